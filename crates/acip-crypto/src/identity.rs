//! Ed25519 identity keys and the signed discovery-service messages.
//!
//! Sessions whitelist identity public keys; clients prove possession by
//! signing domain-separated messages that bind a wall-clock timestamp, so
//! captured requests cannot be replayed outside a narrow window.

use crate::error::CryptoError;
use crate::{PUBLIC_KEY_SIZE, SIGNATURE_SIZE, TIMESTAMP_SKEW_MS};
use ed25519_dalek::{Signer, Verifier};
use rand_core::OsRng;

/// Domain separator for SESSION_CREATE signatures.
const CREATE_DOMAIN: &[u8] = b"ACDS-CREATE";

/// Domain separator for SESSION_JOIN signatures.
const JOIN_DOMAIN: &[u8] = b"ACDS-JOIN";

/// Long-term Ed25519 identity keypair.
#[derive(Clone)]
pub struct IdentityKeypair {
    signing: ed25519_dalek::SigningKey,
}

impl IdentityKeypair {
    /// Generate a fresh random identity.
    #[must_use]
    pub fn generate() -> Self {
        Self {
            signing: ed25519_dalek::SigningKey::generate(&mut OsRng),
        }
    }

    /// Rebuild an identity from its 32-byte seed.
    #[must_use]
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing: ed25519_dalek::SigningKey::from_bytes(seed),
        }
    }

    /// Export the 32-byte seed. Handle with care.
    #[must_use]
    pub fn to_seed(&self) -> [u8; 32] {
        self.signing.to_bytes()
    }

    /// The public identity key peers whitelist and verify against.
    #[must_use]
    pub fn public_key(&self) -> [u8; PUBLIC_KEY_SIZE] {
        self.signing.verifying_key().to_bytes()
    }

    /// Sign an arbitrary message. Deterministic per (key, message).
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_SIZE] {
        self.signing.sign(message).to_bytes()
    }
}

impl std::fmt::Debug for IdentityKeypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityKeypair")
            .field("public_key", &hex_prefix(&self.public_key()))
            .finish_non_exhaustive()
    }
}

fn hex_prefix(key: &[u8; 32]) -> String {
    key[..4].iter().map(|b| format!("{b:02x}")).collect()
}

/// Verify an Ed25519 signature.
///
/// # Errors
///
/// Returns `CryptoError::InvalidPublicKey` if `public_key` is not a valid
/// curve point, `CryptoError::SignatureVerification` if the signature
/// does not authenticate the message.
pub fn verify_signature(
    public_key: &[u8; PUBLIC_KEY_SIZE],
    message: &[u8],
    signature: &[u8; SIGNATURE_SIZE],
) -> Result<(), CryptoError> {
    let key = ed25519_dalek::VerifyingKey::from_bytes(public_key)
        .map_err(|_| CryptoError::InvalidPublicKey)?;
    let sig = ed25519_dalek::Signature::from_bytes(signature);
    key.verify(message, &sig)
        .map_err(|_| CryptoError::SignatureVerification)
}

/// Compose the SESSION_CREATE signature message:
/// `"ACDS-CREATE" || timestamp_be || capabilities || max_participants`.
#[must_use]
pub fn create_message(timestamp_ms: u64, capabilities: u8, max_participants: u8) -> Vec<u8> {
    let mut msg = Vec::with_capacity(CREATE_DOMAIN.len() + 10);
    msg.extend_from_slice(CREATE_DOMAIN);
    msg.extend_from_slice(&timestamp_ms.to_be_bytes());
    msg.push(capabilities);
    msg.push(max_participants);
    msg
}

/// Compose the SESSION_JOIN signature message:
/// `"ACDS-JOIN" || timestamp_be || session_string`.
#[must_use]
pub fn join_message(timestamp_ms: u64, session_string: &str) -> Vec<u8> {
    let mut msg = Vec::with_capacity(JOIN_DOMAIN.len() + 8 + session_string.len());
    msg.extend_from_slice(JOIN_DOMAIN);
    msg.extend_from_slice(&timestamp_ms.to_be_bytes());
    msg.extend_from_slice(session_string.as_bytes());
    msg
}

/// Validate a signed wall-clock timestamp against the server clock.
///
/// A timestamp `t` is valid iff
/// `now - window_secs * 1000 <= t <= now + 60_000`: up to `window_secs`
/// old, up to 60 seconds of future skew.
///
/// # Errors
///
/// Returns `CryptoError::TimestampOutOfWindow` outside those bounds.
pub fn validate_timestamp(
    timestamp_ms: u64,
    now_ms: u64,
    window_secs: u64,
) -> Result<(), CryptoError> {
    let earliest_ms = now_ms.saturating_sub(window_secs * 1000);
    let latest_ms = now_ms + TIMESTAMP_SKEW_MS;
    if timestamp_ms < earliest_ms || timestamp_ms > latest_ms {
        return Err(CryptoError::TimestampOutOfWindow {
            timestamp_ms,
            earliest_ms,
            latest_ms,
        });
    }
    Ok(())
}
