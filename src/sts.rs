//! The Station-to-Station key exchange run between the engine and an
//! external client
//!
//! A signed Diffie-Hellman over Ristretto: the initiator opens with its
//! ephemeral point (32 bytes), the responder answers with its own point plus
//! a signature over both (96 bytes), and the initiator closes with its
//! signature (64 bytes). Both sides then derive symmetric keys from the
//! shared point; successive calls to [`Sts::derive_secret`] yield
//! independent keys, so the two directions are keyed by call order.

use curve25519_dalek::{
    constants::RISTRETTO_BASEPOINT_POINT,
    ristretto::{CompressedRistretto, RistrettoPoint},
    scalar::Scalar,
};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};

use crate::error::EngineError;

/// Bytes in the initiator's opening message
pub const STS_MSG1_BYTES: usize = 32;
/// Bytes in the responder's reply
pub const STS_MSG2_BYTES: usize = 96;
/// Bytes in the initiator's closing message
pub const STS_MSG3_BYTES: usize = 64;

/// The initiator's ephemeral point
#[derive(Clone, Copy, Debug)]
pub struct StsMsg1 {
    /// The compressed ephemeral point
    pub bytes: [u8; STS_MSG1_BYTES],
}

/// The responder's ephemeral point and signature over both points
#[derive(Clone, Copy, Debug)]
pub struct StsMsg2 {
    /// The responder's compressed ephemeral point
    pub pubkey: [u8; 32],
    /// The responder's signature over `responder_point || initiator_point`
    pub sig: [u8; 64],
}

/// The initiator's signature over both points
#[derive(Clone, Copy, Debug)]
pub struct StsMsg3 {
    /// The initiator's signature over `initiator_point || responder_point`
    pub bytes: [u8; STS_MSG3_BYTES],
}

/// One side of a Station-to-Station exchange
///
/// Either role drives the same state: an identity keypair to sign with, the
/// peer's long-term verification key, a fresh ephemeral secret, and once the
/// peer's point arrives, the shared secret and a derivation counter.
pub struct Sts {
    /// This side's long-term signing identity
    identity: SigningKey,
    /// The peer's long-term verification key
    peer_identity: VerifyingKey,
    /// The fresh ephemeral exponent
    eph_secret: Scalar,
    /// The compressed ephemeral point sent to the peer
    eph_public: [u8; 32],
    /// The peer's compressed ephemeral point, once received
    peer_eph: Option<[u8; 32]>,
    /// The compressed shared point, once computed
    shared: Option<[u8; 32]>,
    /// The number of secrets derived so far
    derive_counter: u64,
}

impl Sts {
    /// Start an exchange against a peer with the given long-term public key
    pub fn new(peer_public: &[u8; 32], identity: SigningKey) -> Result<Self, EngineError> {
        let peer_identity = VerifyingKey::from_bytes(peer_public)
            .map_err(|e| EngineError::StsHandshakeFailed(format!("bad peer identity: {e}")))?;

        let eph_secret = Scalar::random(&mut rand::thread_rng());
        let eph_public = (RISTRETTO_BASEPOINT_POINT * eph_secret).compress().to_bytes();

        Ok(Self {
            identity,
            peer_identity,
            eph_secret,
            eph_public,
            peer_eph: None,
            shared: None,
            derive_counter: 0,
        })
    }

    /// Initiator: produce the opening message
    pub fn send_msg1(&self) -> StsMsg1 {
        StsMsg1 { bytes: self.eph_public }
    }

    /// Responder: absorb the opening message and produce the reply
    pub fn recv_msg1(&mut self, msg1: StsMsg1) -> Result<StsMsg2, EngineError> {
        self.absorb_peer_point(&msg1.bytes)?;

        let transcript = concat_points(&self.eph_public, &msg1.bytes);
        let sig = self.identity.sign(&transcript);

        Ok(StsMsg2 { pubkey: self.eph_public, sig: sig.to_bytes() })
    }

    /// Initiator: verify the reply and produce the closing message
    pub fn recv_msg2(&mut self, msg2: StsMsg2) -> Result<StsMsg3, EngineError> {
        let transcript = concat_points(&msg2.pubkey, &self.eph_public);
        self.peer_identity
            .verify(&transcript, &Signature::from_bytes(&msg2.sig))
            .map_err(|_| {
                EngineError::StsHandshakeFailed("responder signature rejected".to_string())
            })?;

        self.absorb_peer_point(&msg2.pubkey)?;

        let transcript = concat_points(&self.eph_public, &msg2.pubkey);
        let sig = self.identity.sign(&transcript);

        Ok(StsMsg3 { bytes: sig.to_bytes() })
    }

    /// Responder: verify the closing message
    pub fn recv_msg3(&mut self, msg3: StsMsg3) -> Result<(), EngineError> {
        let peer_eph = self.peer_eph.ok_or_else(|| {
            EngineError::StsHandshakeFailed("closing message before opening".to_string())
        })?;

        let transcript = concat_points(&peer_eph, &self.eph_public);
        self.peer_identity
            .verify(&transcript, &Signature::from_bytes(&msg3.bytes))
            .map_err(|_| {
                EngineError::StsHandshakeFailed("initiator signature rejected".to_string())
            })
    }

    /// Derive the next `len` bytes of key material from the shared secret
    ///
    /// Call order is the key schedule: the initiator derives its send key
    /// then its receive key, the responder the reverse, so the first-derived
    /// key always protects the initiator-to-responder direction.
    pub fn derive_secret(&mut self, len: usize) -> Result<Vec<u8>, EngineError> {
        let shared = self.shared.ok_or_else(|| {
            EngineError::StsHandshakeFailed("key derivation before exchange".to_string())
        })?;

        let mut out = Vec::with_capacity(len);
        let mut block: u64 = 0;
        while out.len() < len {
            let mut hasher = Sha256::new();
            hasher.update(shared);
            hasher.update(self.derive_counter.to_be_bytes());
            hasher.update(block.to_be_bytes());
            out.extend_from_slice(&hasher.finalize());
            block += 1;
        }

        out.truncate(len);
        self.derive_counter += 1;
        Ok(out)
    }

    /// Record the peer's ephemeral point and complete the Diffie-Hellman
    fn absorb_peer_point(&mut self, bytes: &[u8; 32]) -> Result<(), EngineError> {
        let point = CompressedRistretto(*bytes).decompress().ok_or_else(|| {
            EngineError::StsHandshakeFailed("peer ephemeral point rejected".to_string())
        })?;

        self.peer_eph = Some(*bytes);
        self.shared = Some((point * self.eph_secret).compress().to_bytes());
        Ok(())
    }
}

/// The signing transcript: two compressed points back to back
fn concat_points(first: &[u8; 32], second: &[u8; 32]) -> [u8; 64] {
    let mut out = [0u8; 64];
    out[..32].copy_from_slice(first);
    out[32..].copy_from_slice(second);
    out
}

#[cfg(test)]
mod test {
    use ed25519_dalek::SigningKey;
    use rand::thread_rng;

    use super::Sts;

    /// Fresh identity keypairs for both roles
    fn identities() -> (SigningKey, SigningKey) {
        let mut rng = thread_rng();
        (SigningKey::generate(&mut rng), SigningKey::generate(&mut rng))
    }

    /// Both roles complete the exchange and derive mirrored keys
    #[test]
    fn test_handshake_derives_swapped_keys() {
        let (init_id, resp_id) = identities();
        let init_pub = init_id.verifying_key().to_bytes();
        let resp_pub = resp_id.verifying_key().to_bytes();

        let mut initiator = Sts::new(&resp_pub, init_id).unwrap();
        let mut responder = Sts::new(&init_pub, resp_id).unwrap();

        let m1 = initiator.send_msg1();
        let m2 = responder.recv_msg1(m1).unwrap();
        let m3 = initiator.recv_msg2(m2).unwrap();
        responder.recv_msg3(m3).unwrap();

        let init_send = initiator.derive_secret(32).unwrap();
        let init_recv = initiator.derive_secret(32).unwrap();
        let resp_recv = responder.derive_secret(32).unwrap();
        let resp_send = responder.derive_secret(32).unwrap();

        assert_eq!(init_send, resp_recv);
        assert_eq!(init_recv, resp_send);
        assert_ne!(init_send, init_recv);
    }

    /// A responder with the wrong identity key is rejected at msg2
    #[test]
    fn test_wrong_identity_rejected() {
        let (init_id, resp_id) = identities();
        let (_, impostor_id) = identities();
        let init_pub = init_id.verifying_key().to_bytes();
        let resp_pub = resp_id.verifying_key().to_bytes();

        // The initiator expects `resp_pub` but the impostor signs instead
        let mut initiator = Sts::new(&resp_pub, init_id).unwrap();
        let mut impostor = Sts::new(&init_pub, impostor_id).unwrap();

        let m1 = initiator.send_msg1();
        let m2 = impostor.recv_msg1(m1).unwrap();
        assert!(initiator.recv_msg2(m2).is_err());
    }
}
