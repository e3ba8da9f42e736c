//! Three-step mutually-authenticated handshake.
//!
//! ```text
//! Message 1 (START):    Client → Server: client ephemeral, client identity
//! Message 2 (AUTH):     Server → Client: server ephemeral, server identity,
//!                       server signature over the transcript hash
//! Message 3 (COMPLETE): Client → Server: client signature over the
//!                       transcript hash extended with the server signature
//! ```
//!
//! Both sides maintain a running BLAKE3 transcript of every byte
//! exchanged. Signatures cover transcript hashes, so neither side can be
//! replayed into a different exchange. After message 3, per-direction
//! session keys are derived from the X25519 shared secret and the final
//! transcript hash.
//!
//! Clients that disable encryption never run this handshake; the
//! transport records that choice and skips AEAD entirely.

use crate::error::CryptoError;
use crate::identity::{IdentityKeypair, verify_signature};
use crate::seal::SessionKeys;
use crate::{PUBLIC_KEY_SIZE, SIGNATURE_SIZE};
use rand_core::OsRng;
use subtle::ConstantTimeEq;

const TRANSCRIPT_DOMAIN: &[u8] = b"acip-handshake-v1";
const C2S_KEY_CONTEXT: &str = "ascii-chat acip c2s key v1";
const S2C_KEY_CONTEXT: &str = "ascii-chat acip s2c key v1";
const NONCE_SALT_CONTEXT: &str = "ascii-chat acip nonce salt v1";

/// Handshake progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakePhase {
    /// Nothing exchanged yet.
    Initial,
    /// Client sent START, waiting for AUTH.
    AwaitingAuth,
    /// Server answered START, waiting for COMPLETE.
    AwaitingComplete,
    /// Both sides authenticated; session keys available.
    Complete,
}

/// Message 1: client ephemeral key and identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeStart {
    /// Client's ephemeral X25519 public key.
    pub ephemeral: [u8; PUBLIC_KEY_SIZE],
    /// Client's Ed25519 identity public key.
    pub identity: [u8; PUBLIC_KEY_SIZE],
}

impl HandshakeStart {
    /// Encode to wire bytes.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64);
        buf.extend_from_slice(&self.ephemeral);
        buf.extend_from_slice(&self.identity);
        buf
    }

    /// Decode from wire bytes.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::InvalidMessage` on a wrong length.
    pub fn decode(buf: &[u8]) -> Result<Self, CryptoError> {
        if buf.len() != 64 {
            return Err(CryptoError::InvalidMessage("START must be 64 bytes"));
        }
        let mut ephemeral = [0u8; 32];
        let mut identity = [0u8; 32];
        ephemeral.copy_from_slice(&buf[..32]);
        identity.copy_from_slice(&buf[32..]);
        Ok(Self {
            ephemeral,
            identity,
        })
    }
}

/// Message 2: server ephemeral, identity, and transcript signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeAuth {
    /// Server's ephemeral X25519 public key.
    pub ephemeral: [u8; PUBLIC_KEY_SIZE],
    /// Server's Ed25519 identity public key.
    pub identity: [u8; PUBLIC_KEY_SIZE],
    /// Ed25519 signature over the transcript hash.
    pub signature: [u8; SIGNATURE_SIZE],
}

impl HandshakeAuth {
    /// Encode to wire bytes.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(128);
        buf.extend_from_slice(&self.ephemeral);
        buf.extend_from_slice(&self.identity);
        buf.extend_from_slice(&self.signature);
        buf
    }

    /// Decode from wire bytes.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::InvalidMessage` on a wrong length.
    pub fn decode(buf: &[u8]) -> Result<Self, CryptoError> {
        if buf.len() != 128 {
            return Err(CryptoError::InvalidMessage("AUTH must be 128 bytes"));
        }
        let mut ephemeral = [0u8; 32];
        let mut identity = [0u8; 32];
        let mut signature = [0u8; 64];
        ephemeral.copy_from_slice(&buf[..32]);
        identity.copy_from_slice(&buf[32..64]);
        signature.copy_from_slice(&buf[64..]);
        Ok(Self {
            ephemeral,
            identity,
            signature,
        })
    }
}

/// Message 3: client signature over the extended transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeComplete {
    /// Ed25519 signature over the transcript hash.
    pub signature: [u8; SIGNATURE_SIZE],
}

impl HandshakeComplete {
    /// Encode to wire bytes.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        self.signature.to_vec()
    }

    /// Decode from wire bytes.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::InvalidMessage` on a wrong length.
    pub fn decode(buf: &[u8]) -> Result<Self, CryptoError> {
        if buf.len() != 64 {
            return Err(CryptoError::InvalidMessage("COMPLETE must be 64 bytes"));
        }
        let mut signature = [0u8; 64];
        signature.copy_from_slice(buf);
        Ok(Self { signature })
    }
}

fn dh(
    secret: &x25519_dalek::StaticSecret,
    peer: &[u8; PUBLIC_KEY_SIZE],
) -> Result<[u8; 32], CryptoError> {
    let shared = secret.diffie_hellman(&x25519_dalek::PublicKey::from(*peer));
    // Low-order peer points collapse the shared secret to zero.
    if shared.as_bytes().ct_eq(&[0u8; 32]).into() {
        return Err(CryptoError::LowOrderPoint);
    }
    Ok(*shared.as_bytes())
}

fn derive_session_keys(shared: &[u8; 32], transcript_final: &[u8; 32]) -> SessionKeys {
    let mut ikm = [0u8; 64];
    ikm[..32].copy_from_slice(shared);
    ikm[32..].copy_from_slice(transcript_final);

    let salts = blake3::derive_key(NONCE_SALT_CONTEXT, &ikm);
    let mut c2s_salt = [0u8; 4];
    let mut s2c_salt = [0u8; 4];
    c2s_salt.copy_from_slice(&salts[..4]);
    s2c_salt.copy_from_slice(&salts[4..8]);

    SessionKeys {
        c2s_key: blake3::derive_key(C2S_KEY_CONTEXT, &ikm),
        s2c_key: blake3::derive_key(S2C_KEY_CONTEXT, &ikm),
        c2s_salt,
        s2c_salt,
    }
}

/// Client side of the handshake.
pub struct ClientHandshake {
    identity: IdentityKeypair,
    ephemeral: x25519_dalek::StaticSecret,
    phase: HandshakePhase,
    transcript: blake3::Hasher,
    server_identity: Option<[u8; PUBLIC_KEY_SIZE]>,
    keys: Option<SessionKeys>,
}

impl ClientHandshake {
    /// Begin a handshake with this client identity.
    #[must_use]
    pub fn new(identity: IdentityKeypair) -> Self {
        let mut transcript = blake3::Hasher::new();
        transcript.update(TRANSCRIPT_DOMAIN);
        Self {
            identity,
            ephemeral: x25519_dalek::StaticSecret::random_from_rng(OsRng),
            phase: HandshakePhase::Initial,
            transcript,
            server_identity: None,
            keys: None,
        }
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> HandshakePhase {
        self.phase
    }

    /// Produce the START message.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::InvalidState` if called twice.
    pub fn start(&mut self) -> Result<HandshakeStart, CryptoError> {
        if self.phase != HandshakePhase::Initial {
            return Err(CryptoError::InvalidState);
        }
        let msg = HandshakeStart {
            ephemeral: x25519_dalek::PublicKey::from(&self.ephemeral).to_bytes(),
            identity: self.identity.public_key(),
        };
        self.transcript.update(&msg.ephemeral);
        self.transcript.update(&msg.identity);
        self.phase = HandshakePhase::AwaitingAuth;
        Ok(msg)
    }

    /// Process the server's AUTH message and produce COMPLETE.
    ///
    /// Verifies the server's transcript signature and derives session
    /// keys; after this the handshake is complete on the client side.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::InvalidState` out of phase,
    /// `CryptoError::SignatureVerification` / `InvalidPublicKey` if the
    /// server's signature does not hold, `CryptoError::LowOrderPoint` on a
    /// degenerate key exchange.
    pub fn handle_auth(&mut self, auth: &HandshakeAuth) -> Result<HandshakeComplete, CryptoError> {
        if self.phase != HandshakePhase::AwaitingAuth {
            return Err(CryptoError::InvalidState);
        }

        self.transcript.update(&auth.ephemeral);
        self.transcript.update(&auth.identity);
        let auth_hash = *self.transcript.clone().finalize().as_bytes();
        verify_signature(&auth.identity, &auth_hash, &auth.signature)?;

        self.transcript.update(&auth.signature);
        let complete_hash = *self.transcript.clone().finalize().as_bytes();
        let signature = self.identity.sign(&complete_hash);

        self.transcript.update(&signature);
        let final_hash = *self.transcript.clone().finalize().as_bytes();

        let shared = dh(&self.ephemeral, &auth.ephemeral)?;
        self.keys = Some(derive_session_keys(&shared, &final_hash));
        self.server_identity = Some(auth.identity);
        self.phase = HandshakePhase::Complete;

        Ok(HandshakeComplete { signature })
    }

    /// The server identity key observed during AUTH.
    #[must_use]
    pub fn server_identity(&self) -> Option<[u8; PUBLIC_KEY_SIZE]> {
        self.server_identity
    }

    /// Extract the derived session keys.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::InvalidState` before the handshake completes.
    pub fn into_session_keys(self) -> Result<SessionKeys, CryptoError> {
        if self.phase != HandshakePhase::Complete {
            return Err(CryptoError::InvalidState);
        }
        self.keys.ok_or(CryptoError::InvalidState)
    }
}

/// Server side of the handshake.
pub struct ServerHandshake {
    identity: IdentityKeypair,
    ephemeral: x25519_dalek::StaticSecret,
    phase: HandshakePhase,
    transcript: blake3::Hasher,
    client_identity: Option<[u8; PUBLIC_KEY_SIZE]>,
    complete_hash: Option<[u8; 32]>,
    shared: Option<[u8; 32]>,
    keys: Option<SessionKeys>,
}

impl ServerHandshake {
    /// Begin a responder handshake with this server identity.
    #[must_use]
    pub fn new(identity: IdentityKeypair) -> Self {
        let mut transcript = blake3::Hasher::new();
        transcript.update(TRANSCRIPT_DOMAIN);
        Self {
            identity,
            ephemeral: x25519_dalek::StaticSecret::random_from_rng(OsRng),
            phase: HandshakePhase::Initial,
            transcript,
            client_identity: None,
            complete_hash: None,
            shared: None,
            keys: None,
        }
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> HandshakePhase {
        self.phase
    }

    /// Process the client's START message and produce AUTH.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::InvalidState` out of phase,
    /// `CryptoError::LowOrderPoint` on a degenerate key exchange.
    pub fn handle_start(&mut self, start: &HandshakeStart) -> Result<HandshakeAuth, CryptoError> {
        if self.phase != HandshakePhase::Initial {
            return Err(CryptoError::InvalidState);
        }

        self.transcript.update(&start.ephemeral);
        self.transcript.update(&start.identity);

        let ephemeral = x25519_dalek::PublicKey::from(&self.ephemeral).to_bytes();
        let identity = self.identity.public_key();
        self.transcript.update(&ephemeral);
        self.transcript.update(&identity);

        let auth_hash = *self.transcript.clone().finalize().as_bytes();
        let signature = self.identity.sign(&auth_hash);

        self.transcript.update(&signature);
        self.complete_hash = Some(*self.transcript.clone().finalize().as_bytes());
        self.shared = Some(dh(&self.ephemeral, &start.ephemeral)?);
        self.client_identity = Some(start.identity);
        self.phase = HandshakePhase::AwaitingComplete;

        Ok(HandshakeAuth {
            ephemeral,
            identity,
            signature,
        })
    }

    /// Process the client's COMPLETE message, finishing the handshake.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::InvalidState` out of phase,
    /// `CryptoError::SignatureVerification` if the client's signature over
    /// the transcript does not hold.
    pub fn handle_complete(&mut self, complete: &HandshakeComplete) -> Result<(), CryptoError> {
        if self.phase != HandshakePhase::AwaitingComplete {
            return Err(CryptoError::InvalidState);
        }
        let client_identity = self.client_identity.ok_or(CryptoError::InvalidState)?;
        let complete_hash = self.complete_hash.ok_or(CryptoError::InvalidState)?;

        verify_signature(&client_identity, &complete_hash, &complete.signature)?;

        self.transcript.update(&complete.signature);
        let final_hash = *self.transcript.clone().finalize().as_bytes();
        let shared = self.shared.ok_or(CryptoError::InvalidState)?;
        self.keys = Some(derive_session_keys(&shared, &final_hash));
        self.phase = HandshakePhase::Complete;
        Ok(())
    }

    /// The client identity key presented in START.
    #[must_use]
    pub fn client_identity(&self) -> Option<[u8; PUBLIC_KEY_SIZE]> {
        self.client_identity
    }

    /// Extract the derived session keys.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::InvalidState` before the handshake completes.
    pub fn into_session_keys(self) -> Result<SessionKeys, CryptoError> {
        if self.phase != HandshakePhase::Complete {
            return Err(CryptoError::InvalidState);
        }
        self.keys.ok_or(CryptoError::InvalidState)
    }
}
