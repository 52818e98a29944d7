//! The external client surface: Station-to-Station keying over real sockets
//! and the sequence discipline of encrypted traffic

use std::net::{TcpListener, TcpStream};

use ed25519_dalek::SigningKey;
use rand::thread_rng;
use spdz_runtime::{
    algebra::Ring64,
    clients::client_public_words,
    program::{RegType, SecrecyType},
    stream::OctetStream,
    sts::{Sts, StsMsg1, StsMsg2, StsMsg3},
    test_helpers::{build_party, Rendezvous},
};

/// The engine runs the STS initiator role against an external client, both
/// sides derive mirrored keys, and the sequence counters start at zero; the
/// client then decrypts a run of tagged datagrams under the advancing
/// counter
#[test]
fn test_sts_handshake_and_sequenced_writes() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let mut rng = thread_rng();
    let client_identity = SigningKey::generate(&mut rng);
    let server_identity = SigningKey::generate(&mut rng);
    let client_public = client_identity.verifying_key().to_bytes();
    let server_public = server_identity.verifying_key().to_bytes();

    // The external client: STS responder, then reader of three sequenced
    // datagrams
    let client = std::thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut ke = Sts::new(&server_public, client_identity).unwrap();
        let mut frame = OctetStream::new();

        frame.receive_expected(&mut stream, 32).unwrap();
        let mut m1 = StsMsg1 { bytes: [0u8; 32] };
        m1.bytes.copy_from_slice(frame.consume(32).unwrap());

        let m2 = ke.recv_msg1(m1).unwrap();
        frame.reset_write_head();
        frame.append(&m2.pubkey);
        frame.append(&m2.sig);
        frame.send(&mut stream).unwrap();

        frame.receive_expected(&mut stream, 64).unwrap();
        let mut m3 = StsMsg3 { bytes: [0u8; 64] };
        m3.bytes.copy_from_slice(frame.consume(64).unwrap());
        ke.recv_msg3(m3).unwrap();

        // The responder derives its receive key first
        let recv_key: [u8; 32] = ke.derive_secret(32).unwrap().try_into().unwrap();
        let send_key: [u8; 32] = ke.derive_secret(32).unwrap().try_into().unwrap();

        // Three datagrams under sequence numbers 0, 1, 2, each tagged 5 and
        // carrying one 32-bit integer
        for sequence in 0..3u64 {
            frame.receive(&mut stream).unwrap();
            frame.decrypt_sequence(&recv_key, sequence).unwrap();
            assert_eq!(frame.get_u32().unwrap(), 5);
            assert_eq!(frame.get_u32().unwrap(), 1000 + sequence as u32);
        }

        (recv_key, send_key)
    });

    let mut proc = build_party(
        "sts-initiator",
        0,
        1,
        Rendezvous::new(1),
        Rendezvous::new(1),
        Rendezvous::new(1),
    );
    proc.clients_mut().set_identity(server_identity);
    proc.clients_mut().register_client(7, TcpStream::connect(addr).unwrap());

    // The client's long-term public key arrives as eight register words
    let words = client_public_words(&client_public);
    for (i, word) in words.iter().enumerate() {
        proc.registers_mut().write_ci(i, *word).unwrap();
    }

    proc.init_secure_socket(7, &[0, 1, 2, 3, 4, 5, 6, 7]).unwrap();

    {
        let session = proc.clients_mut().session(7).unwrap();
        assert_eq!(session.send.as_ref().unwrap().sequence, 0);
        assert_eq!(session.recv.as_ref().unwrap().sequence, 0);
    }

    // Send three tagged integer datagrams; the counter advances per send
    for k in 0..3u32 {
        proc.registers_mut().write_ci(8, (1000 + k) as i64).unwrap();
        proc.write_socket(RegType::Integer, SecrecyType::Clear, false, 7, 5, &[8]).unwrap();
    }
    {
        let session = proc.clients_mut().session(7).unwrap();
        assert_eq!(session.send.as_ref().unwrap().sequence, 3);
    }

    let (client_recv, client_send) = client.join().unwrap();
    let session = proc.clients_mut().session(7).unwrap();
    assert_eq!(session.send.as_ref().unwrap().key, client_recv);
    assert_eq!(session.recv.as_ref().unwrap().key, client_send);
}

/// The engine runs the STS responder role, then reads sequenced clear and
/// private payloads the client pushes under its send key
#[test]
fn test_sts_responder_and_private_reads() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let mut rng = thread_rng();
    let client_identity = SigningKey::generate(&mut rng);
    let server_identity = SigningKey::generate(&mut rng);
    let client_public = client_identity.verifying_key().to_bytes();
    let server_public = server_identity.verifying_key().to_bytes();

    // The external client drives the initiator role and then sends two
    // encrypted frames: clear elements, then one share with its MAC
    let client = std::thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut ke = Sts::new(&server_public, client_identity).unwrap();
        let mut frame = OctetStream::new();

        let m1 = ke.send_msg1();
        frame.reset_write_head();
        frame.append(&m1.bytes);
        frame.send(&mut stream).unwrap();

        frame.receive_expected(&mut stream, 96).unwrap();
        let mut m2 = StsMsg2 { pubkey: [0u8; 32], sig: [0u8; 64] };
        m2.pubkey.copy_from_slice(frame.consume(32).unwrap());
        m2.sig.copy_from_slice(frame.consume(64).unwrap());

        let m3 = ke.recv_msg2(m2).unwrap();
        frame.reset_write_head();
        frame.append(&m3.bytes);
        frame.send(&mut stream).unwrap();

        let send_key: [u8; 32] = ke.derive_secret(32).unwrap().try_into().unwrap();
        let _recv_key: [u8; 32] = ke.derive_secret(32).unwrap().try_into().unwrap();

        frame.reset_write_head();
        frame.pack(&Ring64(111));
        frame.pack(&Ring64(222));
        frame.encrypt_sequence(&send_key, 0).unwrap();
        frame.send(&mut stream).unwrap();

        frame.reset_write_head();
        frame.pack(&Ring64(7));
        frame.pack(&Ring64(21));
        frame.encrypt_sequence(&send_key, 1).unwrap();
        frame.send(&mut stream).unwrap();
    });

    let mut proc = build_party(
        "sts-responder",
        0,
        1,
        Rendezvous::new(1),
        Rendezvous::new(1),
        Rendezvous::new(1),
    );
    proc.clients_mut().set_identity(server_identity);
    proc.clients_mut().register_client(9, TcpStream::connect(addr).unwrap());

    let words = client_public_words(&client_public);
    for (i, word) in words.iter().enumerate() {
        proc.registers_mut().write_ci(i, *word).unwrap();
    }
    proc.resp_secure_socket(9, &[0, 1, 2, 3, 4, 5, 6, 7]).unwrap();

    proc.read_socket_vector(9, &[0, 1]).unwrap();
    assert_eq!(proc.registers().read_cp(0).unwrap(), Ring64(111));
    assert_eq!(proc.registers().read_cp(1).unwrap(), Ring64(222));

    proc.read_socket_private(9, &[2], true).unwrap();
    let share = proc.registers().read_sp(2).unwrap();
    assert_eq!(share.share(), Ring64(7));
    assert_eq!(share.mac(), Ring64(21));

    let session = proc.clients_mut().session(9).unwrap();
    assert_eq!(session.recv.as_ref().unwrap().sequence, 2);

    client.join().unwrap();
}

/// Socket opcodes on an unregistered client log and leave state untouched
#[test]
fn test_unconfigured_socket_is_non_fatal() {
    let mut proc = build_party(
        "sts-unconfigured",
        0,
        1,
        Rendezvous::new(1),
        Rendezvous::new(1),
        Rendezvous::new(1),
    );

    proc.registers_mut().write_ci(0, 99).unwrap();
    proc.write_socket(RegType::Integer, SecrecyType::Clear, false, 3, 0, &[0]).unwrap();
    proc.read_socket_ints(3, &[0]).unwrap();
    assert_eq!(proc.registers().read_ci(0).unwrap(), 99);
}
