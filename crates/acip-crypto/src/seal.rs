//! Per-packet AEAD sealing with per-direction counter nonces.
//!
//! After the handshake both sides hold two 256-bit keys (one per
//! direction) and two 4-byte nonce salts. Each packet is sealed with
//! ChaCha20-Poly1305 under nonce `salt || counter_be`; counters advance
//! independently per direction. TCP delivers packets in order, so the
//! receive counter tracks the send counter implicitly, and any
//! reordering or tampering surfaces as a decrypt failure — which is
//! fatal for the connection.

use crate::error::CryptoError;
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Directional keys and nonce salts derived from a handshake transcript.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SessionKeys {
    /// Client-to-server key.
    pub c2s_key: [u8; 32],
    /// Server-to-client key.
    pub s2c_key: [u8; 32],
    /// Client-to-server nonce salt.
    pub c2s_salt: [u8; 4],
    /// Server-to-client nonce salt.
    pub s2c_salt: [u8; 4],
}

impl SessionKeys {
    /// Split into the client's (sender, receiver) pair.
    #[must_use]
    pub fn into_client_pair(self) -> (SealedSender, SealedReceiver) {
        (
            SealedSender::new(&self.c2s_key, self.c2s_salt),
            SealedReceiver::new(&self.s2c_key, self.s2c_salt),
        )
    }

    /// Split into the server's (sender, receiver) pair.
    #[must_use]
    pub fn into_server_pair(self) -> (SealedSender, SealedReceiver) {
        (
            SealedSender::new(&self.s2c_key, self.s2c_salt),
            SealedReceiver::new(&self.c2s_key, self.c2s_salt),
        )
    }
}

fn nonce_bytes(salt: [u8; 4], counter: u64) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[..4].copy_from_slice(&salt);
    nonce[4..].copy_from_slice(&counter.to_be_bytes());
    nonce
}

/// Sealing half of a session: one direction, one counter.
pub struct SealedSender {
    cipher: ChaCha20Poly1305,
    salt: [u8; 4],
    counter: u64,
}

impl SealedSender {
    fn new(key: &[u8; 32], salt: [u8; 4]) -> Self {
        Self {
            cipher: ChaCha20Poly1305::new(Key::from_slice(key)),
            salt,
            counter: 0,
        }
    }

    /// Seal a payload, advancing the direction counter.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::NonceExhausted` once the counter would wrap,
    /// `CryptoError::EncryptionFailed` on AEAD failure.
    pub fn seal(&mut self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if self.counter == u64::MAX {
            return Err(CryptoError::NonceExhausted);
        }
        let nonce = nonce_bytes(self.salt, self.counter);
        self.counter += 1;
        self.cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|_| CryptoError::EncryptionFailed)
    }

    /// Packets sealed so far.
    #[must_use]
    pub fn counter(&self) -> u64 {
        self.counter
    }
}

/// Opening half of a session: one direction, one counter.
pub struct SealedReceiver {
    cipher: ChaCha20Poly1305,
    salt: [u8; 4],
    counter: u64,
}

impl SealedReceiver {
    fn new(key: &[u8; 32], salt: [u8; 4]) -> Self {
        Self {
            cipher: ChaCha20Poly1305::new(Key::from_slice(key)),
            salt,
            counter: 0,
        }
    }

    /// Open a sealed payload, advancing the direction counter.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::NonceExhausted` once the counter would wrap,
    /// `CryptoError::DecryptionFailed` on authentication failure — the
    /// caller must treat that as fatal for the connection.
    pub fn open(&mut self, ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if self.counter == u64::MAX {
            return Err(CryptoError::NonceExhausted);
        }
        let nonce = nonce_bytes(self.salt, self.counter);
        let plaintext = self
            .cipher
            .decrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: ciphertext,
                    aad,
                },
            )
            .map_err(|_| CryptoError::DecryptionFailed)?;
        self.counter += 1;
        Ok(plaintext)
    }

    /// Packets opened so far.
    #[must_use]
    pub fn counter(&self) -> u64 {
        self.counter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys() -> SessionKeys {
        SessionKeys {
            c2s_key: [1u8; 32],
            s2c_key: [2u8; 32],
            c2s_salt: [0xAA, 0xBB, 0xCC, 0xDD],
            s2c_salt: [0x11, 0x22, 0x33, 0x44],
        }
    }

    fn pair() -> ((SealedSender, SealedReceiver), (SealedSender, SealedReceiver)) {
        (keys().into_client_pair(), keys().into_server_pair())
    }

    #[test]
    fn test_bidirectional_roundtrip() {
        let ((mut c_tx, mut c_rx), (mut s_tx, mut s_rx)) = pair();

        let ct = c_tx.seal(b"to server", b"aad").unwrap();
        assert_eq!(s_rx.open(&ct, b"aad").unwrap(), b"to server");

        let ct = s_tx.seal(b"to client", b"").unwrap();
        assert_eq!(c_rx.open(&ct, b"").unwrap(), b"to client");
    }

    #[test]
    fn test_counters_advance_in_lockstep() {
        let ((mut c_tx, _), (_, mut s_rx)) = pair();

        for i in 0..5u8 {
            let ct = c_tx.seal(&[i], b"").unwrap();
            assert_eq!(s_rx.open(&ct, b"").unwrap(), vec![i]);
        }
        assert_eq!(c_tx.counter(), 5);
        assert_eq!(s_rx.counter(), 5);
    }

    #[test]
    fn test_dropped_packet_breaks_stream() {
        let ((mut c_tx, _), (_, mut s_rx)) = pair();

        let _lost = c_tx.seal(b"first", b"").unwrap();
        let second = c_tx.seal(b"second", b"").unwrap();
        // Receiver's counter still expects the first packet.
        assert!(matches!(
            s_rx.open(&second, b""),
            Err(CryptoError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_tampered_ciphertext_rejected() {
        let ((mut c_tx, _), (_, mut s_rx)) = pair();
        let mut ct = c_tx.seal(b"payload", b"").unwrap();
        ct[0] ^= 0x01;
        assert!(s_rx.open(&ct, b"").is_err());
    }

    #[test]
    fn test_wrong_aad_rejected() {
        let ((mut c_tx, _), (_, mut s_rx)) = pair();
        let ct = c_tx.seal(b"payload", b"type=1").unwrap();
        assert!(s_rx.open(&ct, b"type=2").is_err());
    }

    #[test]
    fn test_failed_open_does_not_advance_counter() {
        let ((mut c_tx, _), (_, mut s_rx)) = pair();
        let ct = c_tx.seal(b"payload", b"").unwrap();

        let mut tampered = ct.clone();
        tampered[0] ^= 0xFF;
        assert!(s_rx.open(&tampered, b"").is_err());
        assert_eq!(s_rx.counter(), 0);

        // The genuine packet still opens.
        assert_eq!(s_rx.open(&ct, b"").unwrap(), b"payload");
    }

    #[test]
    fn test_directions_use_distinct_keys() {
        let ((mut c_tx, _), (_, mut c_rx_as_srv)) = pair();
        let ct = c_tx.seal(b"payload", b"").unwrap();
        // Opening a c2s packet with the s2c receiver must fail.
        let (_, mut client_rx) = keys().into_client_pair();
        assert!(client_rx.open(&ct, b"").is_err());
        // Sanity: the proper direction works.
        assert!(c_rx_as_srv.open(&ct, b"").is_ok());
    }

    #[test]
    fn test_ciphertext_is_payload_plus_tag() {
        let ((mut c_tx, _), _) = pair();
        let ct = c_tx.seal(b"12345", b"").unwrap();
        assert_eq!(ct.len(), 5 + crate::AEAD_TAG_SIZE);
    }
}
