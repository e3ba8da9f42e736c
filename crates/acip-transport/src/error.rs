//! Transport layer errors.

use acip_core::error::{ErrorKind, FrameError, PoolError};
use acip_crypto::CryptoError;
use thiserror::Error;

/// Errors surfaced by packet transports.
#[derive(Debug, Error)]
pub enum TransportError {
    /// I/O error from the underlying socket.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// No byte arrived within the read deadline. Non-fatal; retry.
    #[error("read deadline elapsed")]
    Timeout,

    /// Peer closed the connection.
    #[error("connection closed by peer")]
    Closed,

    /// Send or receive on an already-closed transport.
    #[error("transport is closed")]
    NotConnected,

    /// Framing violation from the peer.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// AEAD or handshake failure. Fatal for the connection.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Receive buffer pool exhausted; drop the packet and log.
    #[error("buffer pool: {0}")]
    Pool(#[from] PoolError),

    /// WebSocket layer error.
    #[error("websocket error: {0}")]
    WebSocket(String),

    /// Peer sent a sealed packet on a connection that never upgraded.
    #[error("sealed packet on a cleartext connection")]
    UnexpectedSealed,
}

impl TransportError {
    /// Project onto the shared taxonomy.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(_) | Self::Closed | Self::NotConnected | Self::WebSocket(_) => {
                ErrorKind::Network
            }
            Self::Timeout => ErrorKind::NetworkTimeout,
            Self::Frame(e) => e.kind(),
            Self::UnexpectedSealed => ErrorKind::NetworkProtocol,
            Self::Crypto(_) => ErrorKind::CryptoVerification,
            Self::Pool(e) => e.kind(),
        }
    }

    /// Whether the connection must be torn down after this error.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Timeout | Self::Pool(PoolError::Exhausted { .. }))
    }
}

/// Result alias for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_is_retryable() {
        let e = TransportError::Timeout;
        assert_eq!(e.kind(), ErrorKind::NetworkTimeout);
        assert!(!e.is_fatal());
    }

    #[test]
    fn test_pool_exhaustion_is_droppable() {
        let e = TransportError::Pool(PoolError::Exhausted { class_size: 512 });
        assert_eq!(e.kind(), ErrorKind::BufferFull);
        assert!(!e.is_fatal());
    }

    #[test]
    fn test_crypto_is_fatal() {
        let e = TransportError::Crypto(CryptoError::DecryptionFailed);
        assert_eq!(e.kind(), ErrorKind::CryptoVerification);
        assert!(e.is_fatal());
    }

    #[test]
    fn test_frame_is_fatal() {
        let e = TransportError::Frame(FrameError::BadMagic { found: 0 });
        assert_eq!(e.kind(), ErrorKind::NetworkProtocol);
        assert!(e.is_fatal());
    }
}
