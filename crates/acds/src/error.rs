//! Discovery server errors.

use acip_core::error::{ErrorKind, WireError};
use acip_crypto::CryptoError;
use acip_transport::TransportError;
use thiserror::Error;

/// Session store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying sled failure.
    #[error("database error: {0}")]
    Db(#[from] sled::Error),

    /// Row failed to (de)serialize.
    #[error("row encoding error: {0}")]
    Codec(#[from] bincode::Error),

    /// More identity keys than a session may whitelist.
    #[error("too many identity keys: {given} > {max}")]
    TooManyKeys {
        /// Keys supplied.
        given: usize,
        /// Whitelist capacity.
        max: usize,
    },

    /// The same identity key supplied twice.
    #[error("duplicate identity key")]
    DuplicateKey,

    /// Session creation with zero identity keys.
    #[error("no identity keys supplied")]
    NoKeys,

    /// No such session.
    #[error("session not found")]
    NotFound,

    /// The presented identity key is not whitelisted for the session.
    #[error("identity key not whitelisted")]
    KeyNotWhitelisted,

    /// The session already holds its maximum participant count.
    #[error("session is full")]
    CapacityExhausted,
}

impl StoreError {
    /// Project onto the shared taxonomy.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Db(_) | Self::Codec(_) => ErrorKind::Memory,
            Self::TooManyKeys { .. }
            | Self::DuplicateKey
            | Self::NoKeys
            | Self::KeyNotWhitelisted
            | Self::CapacityExhausted => ErrorKind::InvalidParam,
            Self::NotFound => ErrorKind::NetworkProtocol,
        }
    }
}

/// Top-level server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Session store failure.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Transport failure.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Handshake or signature failure.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Payload failed to (de)code.
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// Ring relay could not route the packet.
    #[error("consensus relay error: {0}")]
    Consensus(#[from] acip_consensus::ConsensusError),

    /// Socket-level failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration.
    #[error("config error: {0}")]
    Config(String),
}

impl ServerError {
    /// Project onto the shared taxonomy.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Store(e) => e.kind(),
            Self::Transport(e) => e.kind(),
            Self::Crypto(_) => ErrorKind::CryptoVerification,
            Self::Wire(e) => e.kind(),
            Self::Consensus(e) => e.kind(),
            Self::Io(_) => ErrorKind::Network,
            Self::Config(_) => ErrorKind::InvalidParam,
        }
    }
}
