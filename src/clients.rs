//! Per-client connection state for the engine's external client surface
//!
//! Each client id maps to a socket plus up to three pieces of key material:
//! a Diffie-Hellman session key for whole-payload encryption, and the two
//! directional commsec keys with their sequence counters once a
//! Station-to-Station exchange has completed. Installing commsec keys always
//! resets both counters to zero.

use std::{collections::HashMap, net::TcpStream};

use curve25519_dalek::{
    constants::RISTRETTO_BASEPOINT_POINT, ristretto::CompressedRistretto, scalar::Scalar,
};
use ed25519_dalek::SigningKey;
use sha2::{Digest, Sha256};
use tracing::info;

use crate::{error::EngineError, stream::SYMMETRIC_KEY_BYTES, PartyId};

/// One direction of a commsec channel: a key and the count of datagrams
/// protected under it so far
#[derive(Clone, Debug)]
pub struct CommsecKey {
    /// The symmetric key
    pub key: [u8; SYMMETRIC_KEY_BYTES],
    /// The sequence counter, incremented per encrypted datagram
    pub sequence: u64,
}

impl CommsecKey {
    /// A fresh channel key with its counter at zero
    pub fn new(key: [u8; SYMMETRIC_KEY_BYTES]) -> Self {
        Self { key, sequence: 0 }
    }
}

/// The connection state for one external client
#[derive(Debug)]
pub struct ClientSession {
    /// The connected socket
    pub stream: TcpStream,
    /// The Diffie-Hellman session key, once negotiated
    pub session_key: Option<[u8; SYMMETRIC_KEY_BYTES]>,
    /// The engine-to-client commsec key, once the STS exchange completes
    pub send: Option<CommsecKey>,
    /// The client-to-engine commsec key, once the STS exchange completes
    pub recv: Option<CommsecKey>,
}

/// The set of external clients known to one processor
pub struct ExternalClients {
    /// The owning party, for diagnostics
    my_num: PartyId,
    /// The server's long-term signing identity for STS exchanges
    identity: Option<SigningKey>,
    /// The server's Diffie-Hellman exponent for session keys
    dh_secret: Scalar,
    /// Sessions keyed by client id
    clients: HashMap<i64, ClientSession>,
}

impl ExternalClients {
    /// An empty client table for the given party
    pub fn new(my_num: PartyId) -> Self {
        Self {
            my_num,
            identity: None,
            dh_secret: Scalar::random(&mut rand::thread_rng()),
            clients: HashMap::new(),
        }
    }

    /// Install the server's long-term signing identity
    pub fn set_identity(&mut self, identity: SigningKey) {
        self.identity = Some(identity);
    }

    /// The server's signing identity, required before any STS exchange
    pub fn identity(&self) -> Result<&SigningKey, EngineError> {
        self.identity.as_ref().ok_or_else(|| {
            EngineError::StsHandshakeFailed("server identity keys not installed".to_string())
        })
    }

    /// The public half of the server's Diffie-Hellman keypair
    pub fn dh_public(&self) -> [u8; 32] {
        (RISTRETTO_BASEPOINT_POINT * self.dh_secret).compress().to_bytes()
    }

    /// Attach a connected socket under a client id
    pub fn register_client(&mut self, client_id: i64, stream: TcpStream) {
        info!(party = self.my_num, client_id, "registered external client");
        self.clients.insert(
            client_id,
            ClientSession { stream, session_key: None, send: None, recv: None },
        );
    }

    /// The session for a client id
    pub fn session(&self, client_id: i64) -> Result<&ClientSession, EngineError> {
        self.clients.get(&client_id).ok_or(EngineError::SocketUnconfigured { client_id })
    }

    /// The session for a client id, mutably
    pub fn session_mut(&mut self, client_id: i64) -> Result<&mut ClientSession, EngineError> {
        self.clients.get_mut(&client_id).ok_or(EngineError::SocketUnconfigured { client_id })
    }

    /// Negotiate a whole-payload session key from the client's public point
    ///
    /// The client transmits its point as eight 32-bit register words; the
    /// session key is a hash of the Diffie-Hellman shared point.
    pub fn generate_session_key_for_client(
        &mut self,
        client_id: i64,
        public_key_words: &[i64],
    ) -> Result<(), EngineError> {
        let bytes = client_public_bytes(public_key_words)?;
        let point = CompressedRistretto(bytes).decompress().ok_or_else(|| {
            EngineError::SocketIoFailed(format!("client {client_id} sent a bad public key"))
        })?;

        let shared = (point * self.dh_secret).compress();
        let key: [u8; SYMMETRIC_KEY_BYTES] = Sha256::digest(shared.as_bytes()).into();

        self.session_mut(client_id)?.session_key = Some(key);
        Ok(())
    }

    /// Drop any commsec keys for a client, ahead of a fresh STS exchange
    pub fn clear_commsec_keys(&mut self, client_id: i64) -> Result<(), EngineError> {
        let session = self.session_mut(client_id)?;
        session.send = None;
        session.recv = None;
        Ok(())
    }

    /// Install the directional keys derived from a completed STS exchange;
    /// both sequence counters restart at zero
    pub fn install_commsec_keys(
        &mut self,
        client_id: i64,
        send_key: [u8; SYMMETRIC_KEY_BYTES],
        recv_key: [u8; SYMMETRIC_KEY_BYTES],
    ) -> Result<(), EngineError> {
        let session = self.session_mut(client_id)?;
        session.send = Some(CommsecKey::new(send_key));
        session.recv = Some(CommsecKey::new(recv_key));
        Ok(())
    }
}

/// Reassemble a 32-byte public key from eight 32-bit register words
pub fn client_public_bytes(words: &[i64]) -> Result<[u8; 32], EngineError> {
    if words.len() != 8 {
        return Err(EngineError::BadOpcodeShape(format!(
            "client public key needs 8 register words, got {}",
            words.len()
        )));
    }

    let mut bytes = [0u8; 32];
    for (chunk, word) in bytes.chunks_exact_mut(4).zip(words) {
        chunk.copy_from_slice(&(*word as u32).to_le_bytes());
    }
    Ok(bytes)
}

/// Split a 32-byte public key into eight 32-bit register words
pub fn client_public_words(bytes: &[u8; 32]) -> Vec<i64> {
    bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes(chunk.try_into().expect("4-byte chunk")) as i64)
        .collect()
}

#[cfg(test)]
mod test {
    use super::{client_public_bytes, client_public_words, ExternalClients};
    use crate::error::EngineError;

    /// Word packing of public keys round trips
    #[test]
    fn test_public_key_words_round_trip() {
        let bytes: [u8; 32] = std::array::from_fn(|i| i as u8);
        let words = client_public_words(&bytes);
        assert_eq!(client_public_bytes(&words).unwrap(), bytes);

        assert!(client_public_bytes(&words[..7]).is_err());
    }

    /// An unknown client id surfaces the unconfigured-socket error
    #[test]
    fn test_unknown_client() {
        let clients = ExternalClients::new(0);
        assert_eq!(
            clients.session(3).unwrap_err(),
            EngineError::SocketUnconfigured { client_id: 3 }
        );
    }
}
