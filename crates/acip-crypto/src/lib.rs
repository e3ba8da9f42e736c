//! # ACIP Crypto
//!
//! Cryptographic primitives for the ASCII-Chat coordination plane.
//!
//! This crate provides:
//! - **Identity keys**: Ed25519 keypairs and the domain-separated
//!   messages signed for session creation and join
//! - **Handshake**: the 3-step X25519/Ed25519 exchange that mutually
//!   authenticates a client and the discovery server and derives
//!   per-direction session keys from the transcript
//! - **AEAD stream**: ChaCha20-Poly1305 sealing with per-direction
//!   counter nonces for every post-handshake packet
//!
//! ## Cryptographic Suite
//!
//! | Function | Algorithm |
//! |----------|-----------|
//! | Key Exchange | X25519 (ephemeral) |
//! | Signatures | Ed25519 |
//! | Transcript hash / KDF | BLAKE3 |
//! | AEAD | ChaCha20-Poly1305 |

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod error;
pub mod handshake;
pub mod identity;
pub mod seal;

pub use error::CryptoError;
pub use handshake::{
    ClientHandshake, HandshakeAuth, HandshakeComplete, HandshakePhase, HandshakeStart,
    ServerHandshake,
};
pub use identity::{
    IdentityKeypair, create_message, join_message, validate_timestamp, verify_signature,
};
pub use seal::{SealedReceiver, SealedSender, SessionKeys};

/// X25519 / Ed25519 public key size.
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Ed25519 signature size.
pub const SIGNATURE_SIZE: usize = 64;

/// ChaCha20-Poly1305 authentication tag size.
pub const AEAD_TAG_SIZE: usize = 16;

/// Future clock skew accepted when validating signed timestamps.
pub const TIMESTAMP_SKEW_MS: u64 = 60_000;
