//! Error types for ACIP cryptographic operations.

use thiserror::Error;

/// Cryptographic errors.
///
/// Signature, timestamp and AEAD failures are connection-fatal at the
/// dispatch layer; handshake phase misuse fails locally.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Operation called in the wrong handshake phase.
    #[error("invalid handshake state for operation")]
    InvalidState,

    /// Handshake message with an impossible length or layout.
    #[error("malformed handshake message: {0}")]
    InvalidMessage(&'static str),

    /// Bytes that do not decode to an Ed25519 public key point.
    #[error("invalid public key")]
    InvalidPublicKey,

    /// Signature did not verify against the presented key and message.
    #[error("signature verification failed")]
    SignatureVerification,

    /// Peer sent a low-order X25519 point.
    #[error("low-order key exchange point rejected")]
    LowOrderPoint,

    /// Signed timestamp outside the acceptance window.
    #[error("timestamp {timestamp_ms} outside window [{earliest_ms}, {latest_ms}]")]
    TimestampOutOfWindow {
        /// The presented timestamp.
        timestamp_ms: u64,
        /// Oldest acceptable timestamp.
        earliest_ms: u64,
        /// Newest acceptable timestamp (future skew allowance).
        latest_ms: u64,
    },

    /// AEAD sealing failed.
    #[error("encryption failed")]
    EncryptionFailed,

    /// AEAD opening failed: wrong key, wrong nonce, or tampered data.
    #[error("decryption failed")]
    DecryptionFailed,

    /// Per-direction packet counter exhausted.
    #[error("nonce counter exhausted")]
    NonceExhausted,
}
