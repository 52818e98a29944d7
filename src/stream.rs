//! The byte-oriented buffer that underlies the socket and persistence
//! encodings
//!
//! An [`OctetStream`] is an append-only write region with an independent read
//! head, packing integers big-endian and elements in their fixed-width
//! encodings. Framed transport writes a 4-byte big-endian length prefix.
//! Payload encryption is authenticated: a one-shot mode that carries its own
//! random nonce, and a sequence mode whose nonce both peers derive from a
//! shared monotonic counter.

use std::io::{Read, Write};

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Key, Nonce,
};
use rand::RngCore;

use crate::{
    algebra::{FieldElement, Share},
    error::EngineError,
};

/// Bytes in a symmetric payload key
pub const SYMMETRIC_KEY_BYTES: usize = 32;
/// Bytes in an AEAD nonce
const NONCE_BYTES: usize = 12;

/// A growable byte buffer with separate write and read heads
#[derive(Clone, Debug, Default)]
pub struct OctetStream {
    /// The buffered bytes
    data: Vec<u8>,
    /// The read position within `data`
    read_head: usize,
}

impl OctetStream {
    /// An empty stream
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of buffered bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the stream holds no bytes
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Drop the buffered bytes and rewind the read head
    pub fn reset_write_head(&mut self) {
        self.data.clear();
        self.read_head = 0;
    }

    /// Rewind the read head only
    pub fn reset_read_head(&mut self) {
        self.read_head = 0;
    }

    /// The buffered bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Append raw bytes
    pub fn append(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Consume `n` bytes from the read head
    pub fn consume(&mut self, n: usize) -> Result<&[u8], EngineError> {
        if self.read_head + n > self.data.len() {
            return Err(EngineError::BadOpcodeShape(format!(
                "stream underflow: wanted {n} bytes, {} remain",
                self.data.len() - self.read_head
            )));
        }

        let start = self.read_head;
        self.read_head += n;
        Ok(&self.data[start..start + n])
    }

    // -------------------
    // | Integer Packing |
    // -------------------

    /// Append a 32-bit integer, big-endian
    pub fn store_u32(&mut self, val: u32) {
        self.append(&val.to_be_bytes());
    }

    /// Consume a 32-bit integer
    pub fn get_u32(&mut self) -> Result<u32, EngineError> {
        let bytes = self.consume(4)?;
        Ok(u32::from_be_bytes(bytes.try_into().expect("consumed 4 bytes")))
    }

    /// Append a 64-bit integer, big-endian
    pub fn store_u64(&mut self, val: u64) {
        self.append(&val.to_be_bytes());
    }

    /// Consume a 64-bit integer
    pub fn get_u64(&mut self) -> Result<u64, EngineError> {
        let bytes = self.consume(8)?;
        Ok(u64::from_be_bytes(bytes.try_into().expect("consumed 8 bytes")))
    }

    // -------------------
    // | Element Packing |
    // -------------------

    /// Append a packed element
    pub fn pack<T: FieldElement>(&mut self, value: &T) {
        self.append(&value.to_bytes());
    }

    /// Consume a packed element
    pub fn unpack<T: FieldElement>(&mut self) -> Result<T, EngineError> {
        let bytes = self.consume(T::byte_size())?;
        T::from_bytes(bytes)
    }

    /// Append a packed share: value then MAC
    pub fn pack_share<T: FieldElement>(&mut self, share: &Share<T>) {
        self.pack(&share.share());
        self.pack(&share.mac());
    }

    /// Consume a packed share
    pub fn unpack_share<T: FieldElement>(&mut self) -> Result<Share<T>, EngineError> {
        let a = self.unpack()?;
        let mac = self.unpack()?;
        Ok(Share::new(a, mac))
    }

    // -------------
    // | Transport |
    // -------------

    /// Write the buffered bytes with a 4-byte big-endian length prefix
    pub fn send<W: Write>(&self, writer: &mut W) -> Result<(), EngineError> {
        let len = self.data.len() as u32;
        writer
            .write_all(&len.to_be_bytes())
            .and_then(|_| writer.write_all(&self.data))
            .and_then(|_| writer.flush())
            .map_err(|e| EngineError::SocketIoFailed(e.to_string()))
    }

    /// Replace the buffered bytes with one received frame
    pub fn receive<R: Read>(&mut self, reader: &mut R) -> Result<(), EngineError> {
        let mut len_bytes = [0u8; 4];
        reader
            .read_exact(&mut len_bytes)
            .map_err(|e| EngineError::SocketIoFailed(e.to_string()))?;

        let len = u32::from_be_bytes(len_bytes) as usize;
        self.data.resize(len, 0);
        self.read_head = 0;
        reader
            .read_exact(&mut self.data)
            .map_err(|e| EngineError::SocketIoFailed(e.to_string()))
    }

    /// Receive a frame that must be exactly `expected` bytes long
    pub fn receive_expected<R: Read>(
        &mut self,
        reader: &mut R,
        expected: usize,
    ) -> Result<(), EngineError> {
        self.receive(reader)?;
        if self.data.len() != expected {
            return Err(EngineError::SocketIoFailed(format!(
                "expected a {expected}-byte frame, received {}",
                self.data.len()
            )));
        }

        Ok(())
    }

    // --------------
    // | Encryption |
    // --------------

    /// Encrypt the whole payload in place under a session key, prepending a
    /// fresh random nonce
    pub fn encrypt(&mut self, key: &[u8; SYMMETRIC_KEY_BYTES]) -> Result<(), EngineError> {
        let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
        let mut nonce = [0u8; NONCE_BYTES];
        rand::thread_rng().fill_bytes(&mut nonce);

        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), self.data.as_slice())
            .map_err(|_| EngineError::SocketIoFailed("payload encryption failed".to_string()))?;

        self.data.clear();
        self.data.extend_from_slice(&nonce);
        self.data.extend_from_slice(&ciphertext);
        self.read_head = 0;
        Ok(())
    }

    /// Invert [`OctetStream::encrypt`]
    pub fn decrypt(&mut self, key: &[u8; SYMMETRIC_KEY_BYTES]) -> Result<(), EngineError> {
        if self.data.len() < NONCE_BYTES {
            return Err(EngineError::SocketIoFailed("payload too short to decrypt".to_string()));
        }

        let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
        let (nonce, ciphertext) = self.data.split_at(NONCE_BYTES);
        let plaintext = cipher.decrypt(Nonce::from_slice(nonce), ciphertext).map_err(|_| {
            EngineError::SocketIoFailed("payload authentication failed".to_string())
        })?;

        self.data = plaintext;
        self.read_head = 0;
        Ok(())
    }

    /// Encrypt the payload under a commsec key and a 64-bit sequence number
    /// that both peers track independently; nothing but ciphertext is
    /// carried on the wire
    pub fn encrypt_sequence(
        &mut self,
        key: &[u8; SYMMETRIC_KEY_BYTES],
        sequence: u64,
    ) -> Result<(), EngineError> {
        let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
        let nonce = sequence_nonce(sequence);

        self.data = cipher
            .encrypt(Nonce::from_slice(&nonce), self.data.as_slice())
            .map_err(|_| EngineError::SocketIoFailed("payload encryption failed".to_string()))?;
        self.read_head = 0;
        Ok(())
    }

    /// Invert [`OctetStream::encrypt_sequence`]
    pub fn decrypt_sequence(
        &mut self,
        key: &[u8; SYMMETRIC_KEY_BYTES],
        sequence: u64,
    ) -> Result<(), EngineError> {
        let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
        let nonce = sequence_nonce(sequence);

        self.data = cipher.decrypt(Nonce::from_slice(&nonce), self.data.as_slice()).map_err(
            |_| EngineError::SocketIoFailed("payload authentication failed".to_string()),
        )?;
        self.read_head = 0;
        Ok(())
    }
}

/// The AEAD nonce for a sequence number: zero padding then the counter,
/// big-endian
fn sequence_nonce(sequence: u64) -> [u8; NONCE_BYTES] {
    let mut nonce = [0u8; NONCE_BYTES];
    nonce[4..].copy_from_slice(&sequence.to_be_bytes());
    nonce
}

#[cfg(test)]
mod test {
    use rand::{thread_rng, RngCore};

    use super::OctetStream;
    use crate::algebra::{FieldElement, Fp, Ring64, Share};

    type TestFp = Fp<ark_bn254::Fr>;

    /// Integers and elements read back in the order they were stored
    #[test]
    fn test_store_get_round_trip() {
        let mut rng = thread_rng();
        let x = TestFp::random(&mut rng);
        let share = Share::new(Ring64(7), Ring64(21));

        let mut stream = OctetStream::new();
        stream.store_u32(0xDEAD_BEEF);
        stream.pack(&x);
        stream.pack_share(&share);
        stream.store_u64(42);

        assert_eq!(stream.get_u32().unwrap(), 0xDEAD_BEEF);
        assert_eq!(stream.unpack::<TestFp>().unwrap(), x);
        assert_eq!(stream.unpack_share::<Ring64>().unwrap(), share);
        assert_eq!(stream.get_u64().unwrap(), 42);
        assert!(stream.get_u32().is_err());
    }

    /// Framed transport round trips through any reader/writer pair
    #[test]
    fn test_send_receive() {
        let mut stream = OctetStream::new();
        stream.store_u32(17);
        stream.store_u32(34);

        let mut wire = Vec::new();
        stream.send(&mut wire).unwrap();

        let mut received = OctetStream::new();
        received.receive(&mut wire.as_slice()).unwrap();
        assert_eq!(received.get_u32().unwrap(), 17);
        assert_eq!(received.get_u32().unwrap(), 34);

        let mut short = OctetStream::new();
        assert!(short.receive_expected(&mut wire.as_slice(), 4).is_err());
    }

    /// One-shot encryption round trips and rejects the wrong key
    #[test]
    fn test_encrypt_round_trip() {
        let mut key = [0u8; 32];
        thread_rng().fill_bytes(&mut key);

        let mut stream = OctetStream::new();
        stream.store_u32(99);
        stream.encrypt(&key).unwrap();
        assert_ne!(stream.as_bytes(), &99u32.to_be_bytes()[..]);

        stream.decrypt(&key).unwrap();
        assert_eq!(stream.get_u32().unwrap(), 99);

        let mut stream = OctetStream::new();
        stream.store_u32(99);
        stream.encrypt(&key).unwrap();
        let wrong_key = [1u8; 32];
        assert!(stream.decrypt(&wrong_key).is_err());
    }

    /// Sequence encryption only decrypts under the matching counter
    #[test]
    fn test_sequence_nonce_mismatch() {
        let key = [7u8; 32];

        let mut stream = OctetStream::new();
        stream.store_u32(1234);
        stream.encrypt_sequence(&key, 5).unwrap();

        let mut stale = stream.clone();
        assert!(stale.decrypt_sequence(&key, 4).is_err());

        stream.decrypt_sequence(&key, 5).unwrap();
        assert_eq!(stream.get_u32().unwrap(), 1234);
    }
}
