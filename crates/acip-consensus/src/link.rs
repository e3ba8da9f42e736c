//! [`RingLink`] over packet transports.
//!
//! Maps ring member ids to live transport connections. The coordinator's
//! event methods are synchronous, so sends are enqueued onto one FIFO
//! queue drained by a background task: packets bound for the same
//! connection keep their send order, and per-recipient failures are
//! logged rather than propagated.
//!
//! Several members may share one connection when hops are relayed
//! through the discovery server; broadcasts deduplicate by transport so
//! each connection carries the packet once.

use crate::coordinator::RingLink;
use crate::error::ConsensusError;
use acip_core::packet::PacketType;
use acip_transport::PacketTransport;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

type Outbound = (Arc<dyn PacketTransport>, PacketType, Vec<u8>);

/// Ring link backed by per-peer [`PacketTransport`] connections.
pub struct TransportRingLink {
    peers: HashMap<Uuid, Arc<dyn PacketTransport>>,
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl TransportRingLink {
    /// An empty link with no peers.
    ///
    /// Spawns the queue drainer, so this must run inside a tokio runtime.
    #[must_use]
    pub fn new() -> Self {
        let (outbound, mut rx) = mpsc::unbounded_channel::<Outbound>();
        tokio::spawn(async move {
            while let Some((transport, packet_type, payload)) = rx.recv().await {
                if let Err(e) = transport.send(packet_type, &payload).await {
                    tracing::warn!(
                        peer = %transport.peer_info().addr,
                        ?packet_type,
                        error = %e,
                        "ring relay send failed"
                    );
                }
            }
        });
        Self {
            peers: HashMap::new(),
            outbound,
        }
    }

    /// Attach or replace the connection for a ring member.
    pub fn set_peer(&mut self, id: Uuid, transport: Arc<dyn PacketTransport>) {
        self.peers.insert(id, transport);
    }

    /// Detach a ring member's connection.
    pub fn remove_peer(&mut self, id: Uuid) {
        self.peers.remove(&id);
    }

    /// Connected peer count.
    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    fn enqueue(
        &self,
        transport: &Arc<dyn PacketTransport>,
        packet_type: PacketType,
        payload: Vec<u8>,
    ) -> Result<(), ConsensusError> {
        self.outbound
            .send((Arc::clone(transport), packet_type, payload))
            .map_err(|_| ConsensusError::Link("outbound queue closed".to_string()))
    }
}

impl Default for TransportRingLink {
    fn default() -> Self {
        Self::new()
    }
}

impl RingLink for TransportRingLink {
    fn send_to(
        &mut self,
        peer: Uuid,
        packet_type: PacketType,
        payload: Vec<u8>,
    ) -> Result<(), ConsensusError> {
        let transport = self
            .peers
            .get(&peer)
            .ok_or_else(|| ConsensusError::Link(format!("no connection for peer {peer}")))?;
        let transport = Arc::clone(transport);
        self.enqueue(&transport, packet_type, payload)
    }

    fn broadcast(
        &mut self,
        packet_type: PacketType,
        payload: Vec<u8>,
    ) -> Result<(), ConsensusError> {
        let mut dispatched = Vec::with_capacity(self.peers.len());
        for transport in self.peers.values() {
            let connection = Arc::as_ptr(transport) as *const () as usize;
            if dispatched.contains(&connection) {
                continue;
            }
            dispatched.push(connection);
            self.enqueue(&Arc::clone(transport), packet_type, payload.clone())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use acip_core::pool::BufferPool;
    use acip_transport::TcpPacketTransport;
    use std::time::Duration;
    use tokio::net::{TcpListener, TcpStream};

    async fn connected_pair() -> (Arc<dyn PacketTransport>, TcpPacketTransport) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let pool = BufferPool::default();

        let (accepted, connected) = tokio::join!(listener.accept(), TcpStream::connect(addr));
        let (server_stream, _) = accepted.unwrap();
        let client_stream = connected.unwrap();

        let sender: Arc<dyn PacketTransport> = Arc::new(
            TcpPacketTransport::new(client_stream, pool.clone(), Duration::from_millis(500))
                .unwrap(),
        );
        let receiver =
            TcpPacketTransport::new(server_stream, pool, Duration::from_millis(500)).unwrap();
        (sender, receiver)
    }

    #[tokio::test]
    async fn test_send_to_known_peer() {
        let (sender, receiver) = connected_pair().await;
        let peer = Uuid::from_bytes([4; 16]);

        let mut link = TransportRingLink::new();
        link.set_peer(peer, sender);

        link.send_to(peer, PacketType::StatsAck, vec![1, 2, 3]).unwrap();

        let packet = receiver.recv().await.unwrap();
        assert_eq!(packet.packet_type, PacketType::StatsAck);
        assert_eq!(&packet.payload[..], &[1, 2, 3]);
    }

    #[tokio::test]
    async fn test_send_to_unknown_peer_fails() {
        let mut link = TransportRingLink::new();
        assert!(matches!(
            link.send_to(Uuid::from_bytes([9; 16]), PacketType::Ping, vec![]),
            Err(ConsensusError::Link(_))
        ));
    }

    #[tokio::test]
    async fn test_sends_to_one_peer_keep_order() {
        let (sender, receiver) = connected_pair().await;
        let peer = Uuid::from_bytes([4; 16]);

        let mut link = TransportRingLink::new();
        link.set_peer(peer, sender);

        for i in 0..16u8 {
            link.send_to(peer, PacketType::StatsUpdate, vec![i]).unwrap();
        }
        for i in 0..16u8 {
            assert_eq!(&receiver.recv().await.unwrap().payload[..], &[i]);
        }
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_peer() {
        let (sender_a, receiver_a) = connected_pair().await;
        let (sender_b, receiver_b) = connected_pair().await;

        let mut link = TransportRingLink::new();
        link.set_peer(Uuid::from_bytes([1; 16]), sender_a);
        link.set_peer(Uuid::from_bytes([2; 16]), sender_b);

        link.broadcast(PacketType::ElectionResult, vec![7]).unwrap();

        assert_eq!(&receiver_a.recv().await.unwrap().payload[..], &[7]);
        assert_eq!(&receiver_b.recv().await.unwrap().payload[..], &[7]);
    }

    #[tokio::test]
    async fn test_broadcast_shared_transport_sends_once() {
        let (sender, receiver) = connected_pair().await;

        let mut link = TransportRingLink::new();
        link.set_peer(Uuid::from_bytes([1; 16]), Arc::clone(&sender));
        link.set_peer(Uuid::from_bytes([2; 16]), sender);

        link.broadcast(PacketType::ElectionResult, vec![9]).unwrap();

        assert_eq!(&receiver.recv().await.unwrap().payload[..], &[9]);
        // Both peers route through one connection; no duplicate follows.
        assert!(matches!(
            receiver.recv().await,
            Err(acip_transport::TransportError::Timeout)
        ));
    }

    #[tokio::test]
    async fn test_remove_peer() {
        let (sender, _receiver) = connected_pair().await;
        let peer = Uuid::from_bytes([4; 16]);

        let mut link = TransportRingLink::new();
        link.set_peer(peer, sender);
        assert_eq!(link.peer_count(), 1);
        link.remove_peer(peer);
        assert!(link.send_to(peer, PacketType::Ping, vec![]).is_err());
    }
}
