//! The packet transport abstraction.

use crate::error::TransportResult;
use acip_core::packet::PacketType;
use acip_core::pool::PooledBuf;
use acip_crypto::SessionKeys;
use acip_crypto::seal::{SealedReceiver, SealedSender};
use async_trait::async_trait;
use std::net::SocketAddr;

/// Which transport a connection arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Plain or encrypted TCP.
    Tcp,
    /// WebSocket over TCP.
    WebSocket,
}

/// Peer description returned by [`PacketTransport::peer_info`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerInfo {
    /// Remote socket address.
    pub addr: SocketAddr,
    /// Transport flavor.
    pub kind: TransportKind,
    /// Whether the connection upgraded to AEAD sealing.
    pub encrypted: bool,
}

/// A received packet; the payload buffer returns to its pool on drop.
#[derive(Debug)]
pub struct IncomingPacket {
    /// Packet type from the header.
    pub packet_type: PacketType,
    /// Payload bytes, pooled.
    pub payload: PooledBuf,
}

/// Which end of the handshake this transport played, for key direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoRole {
    /// Connection initiator.
    Client,
    /// Connection acceptor.
    Server,
}

impl CryptoRole {
    pub(crate) fn split(self, keys: SessionKeys) -> (SealedSender, SealedReceiver) {
        match self {
            Self::Client => keys.into_client_pair(),
            Self::Server => keys.into_server_pair(),
        }
    }
}

/// One framed-packet connection, any transport.
///
/// Implementations serialize concurrent senders internally, so an
/// `Arc<dyn PacketTransport>` can be shared between a handler loop and
/// broadcast paths.
#[async_trait]
pub trait PacketTransport: Send + Sync {
    /// Frame and send one packet.
    async fn send(&self, packet_type: PacketType, payload: &[u8]) -> TransportResult<()>;

    /// Receive the next packet.
    ///
    /// Returns `TransportError::Timeout` when no byte arrives within the
    /// read deadline (retryable), `TransportError::Closed` on EOF.
    async fn recv(&self) -> TransportResult<IncomingPacket>;

    /// Switch the connection to AEAD sealing with handshake-derived keys.
    ///
    /// Every subsequent `send` seals and every `recv` opens; connections
    /// that never call this stay cleartext and never attempt to open.
    async fn enable_encryption(&self, keys: SessionKeys, role: CryptoRole);

    /// Close the connection.
    async fn close(&self) -> TransportResult<()>;

    /// Describe the peer.
    fn peer_info(&self) -> PeerInfo;

    /// Whether the transport has been closed.
    fn is_closed(&self) -> bool;
}
