//! Thread-safe registry of connected clients.
//!
//! Read-mostly: handlers add and remove themselves, relays and
//! broadcasts iterate. Entries hold the connection's transport so any
//! task can address a client; transports serialize their own sends.

use acip_transport::PacketTransport;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Registry entry for one connected socket.
#[derive(Clone)]
pub struct ClientEntry {
    /// Registry-assigned connection id.
    pub connection_id: u64,
    /// Remote socket address.
    pub peer_addr: SocketAddr,
    /// The connection's transport.
    pub transport: Arc<dyn PacketTransport>,
    /// Session the client joined, if any.
    pub session_id: Option<Uuid>,
    /// Participant id assigned at join, if any.
    pub participant_id: Option<Uuid>,
    /// Whether the client has completed a join.
    pub joined: bool,
}

/// Registry of connected clients keyed by connection id.
pub struct ClientRegistry {
    clients: DashMap<u64, ClientEntry>,
    next_id: AtomicU64,
}

impl ClientRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            clients: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a freshly accepted connection.
    pub fn add(&self, peer_addr: SocketAddr, transport: Arc<dyn PacketTransport>) -> u64 {
        let connection_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.clients.insert(
            connection_id,
            ClientEntry {
                connection_id,
                peer_addr,
                transport,
                session_id: None,
                participant_id: None,
                joined: false,
            },
        );
        tracing::debug!(connection_id, peer = %peer_addr, "client registered");
        connection_id
    }

    /// Remove a connection; called on handler exit.
    pub fn remove(&self, connection_id: u64) -> Option<ClientEntry> {
        let removed = self.clients.remove(&connection_id).map(|(_, e)| e);
        if removed.is_some() {
            tracing::debug!(connection_id, "client removed");
        }
        removed
    }

    /// Record a successful join on the connection.
    pub fn mark_joined(&self, connection_id: u64, session_id: Uuid, participant_id: Uuid) {
        if let Some(mut entry) = self.clients.get_mut(&connection_id) {
            entry.session_id = Some(session_id);
            entry.participant_id = Some(participant_id);
            entry.joined = true;
        }
    }

    /// Record a leave on the connection.
    pub fn mark_left(&self, connection_id: u64) {
        if let Some(mut entry) = self.clients.get_mut(&connection_id) {
            entry.session_id = None;
            entry.participant_id = None;
            entry.joined = false;
        }
    }

    /// Run a callback over every connected client.
    pub fn for_each_client<F: FnMut(&ClientEntry)>(&self, mut f: F) {
        for entry in self.clients.iter() {
            f(entry.value());
        }
    }

    /// Find the transport of one joined participant.
    #[must_use]
    pub fn find_participant(
        &self,
        session_id: Uuid,
        participant_id: Uuid,
    ) -> Option<Arc<dyn PacketTransport>> {
        self.clients.iter().find_map(|entry| {
            let e = entry.value();
            (e.joined
                && e.session_id == Some(session_id)
                && e.participant_id == Some(participant_id))
            .then(|| Arc::clone(&e.transport))
        })
    }

    /// The (session, participant) pair a connection joined, if any.
    #[must_use]
    pub fn joined_identity(&self, connection_id: u64) -> Option<(Uuid, Uuid)> {
        self.clients.get(&connection_id).and_then(|entry| {
            let e = entry.value();
            match (e.joined, e.session_id, e.participant_id) {
                (true, Some(session), Some(participant)) => Some((session, participant)),
                _ => None,
            }
        })
    }

    /// Participant ids of every joined member of a session.
    #[must_use]
    pub fn session_participants(&self, session_id: Uuid) -> Vec<Uuid> {
        let mut ids = Vec::new();
        self.for_each_client(|e| {
            if e.joined && e.session_id == Some(session_id) {
                if let Some(pid) = e.participant_id {
                    ids.push(pid);
                }
            }
        });
        ids
    }

    /// Collect transports of every joined participant of a session except
    /// `except`, for broadcasts.
    #[must_use]
    pub fn session_peers(
        &self,
        session_id: Uuid,
        except: Uuid,
    ) -> Vec<(Uuid, Arc<dyn PacketTransport>)> {
        let mut peers = Vec::new();
        self.for_each_client(|e| {
            if e.joined && e.session_id == Some(session_id) {
                if let Some(pid) = e.participant_id {
                    if pid != except {
                        peers.push((pid, Arc::clone(&e.transport)));
                    }
                }
            }
        });
        peers
    }

    /// Connected client count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Whether no clients are connected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use acip_core::packet::PacketType;
    use acip_crypto::SessionKeys;
    use acip_transport::{CryptoRole, IncomingPacket, PeerInfo, TransportError, TransportKind};
    use async_trait::async_trait;

    /// Transport stub; registry tests never touch the wire.
    struct NullTransport;

    #[async_trait]
    impl PacketTransport for NullTransport {
        async fn send(&self, _: PacketType, _: &[u8]) -> Result<(), TransportError> {
            Ok(())
        }
        async fn recv(&self) -> Result<IncomingPacket, TransportError> {
            Err(TransportError::Timeout)
        }
        async fn enable_encryption(&self, _: SessionKeys, _: CryptoRole) {}
        async fn close(&self) -> Result<(), TransportError> {
            Ok(())
        }
        fn peer_info(&self) -> PeerInfo {
            PeerInfo {
                addr: "127.0.0.1:1".parse().unwrap(),
                kind: TransportKind::Tcp,
                encrypted: false,
            }
        }
        fn is_closed(&self) -> bool {
            false
        }
    }

    fn add_client(registry: &ClientRegistry) -> u64 {
        registry.add("127.0.0.1:9".parse().unwrap(), Arc::new(NullTransport))
    }

    fn uuid(b: u8) -> Uuid {
        Uuid::from_bytes([b; 16])
    }

    #[test]
    fn test_add_remove() {
        let registry = ClientRegistry::new();
        let id = add_client(&registry);
        assert_eq!(registry.len(), 1);

        let removed = registry.remove(id).unwrap();
        assert_eq!(removed.connection_id, id);
        assert!(registry.is_empty());
        assert!(registry.remove(id).is_none());
    }

    #[test]
    fn test_join_state_tracking() {
        let registry = ClientRegistry::new();
        let id = add_client(&registry);

        registry.mark_joined(id, uuid(1), uuid(2));
        assert!(registry.find_participant(uuid(1), uuid(2)).is_some());

        registry.mark_left(id);
        assert!(registry.find_participant(uuid(1), uuid(2)).is_none());
    }

    #[test]
    fn test_session_peers_excludes_sender_and_outsiders() {
        let registry = ClientRegistry::new();
        let a = add_client(&registry);
        let b = add_client(&registry);
        let c = add_client(&registry);
        let outsider = add_client(&registry);
        let _unjoined = add_client(&registry);

        registry.mark_joined(a, uuid(1), uuid(0xA));
        registry.mark_joined(b, uuid(1), uuid(0xB));
        registry.mark_joined(c, uuid(1), uuid(0xC));
        registry.mark_joined(outsider, uuid(2), uuid(0xD));

        let peers = registry.session_peers(uuid(1), uuid(0xA));
        let mut ids: Vec<Uuid> = peers.iter().map(|(id, _)| *id).collect();
        ids.sort();
        assert_eq!(ids, vec![uuid(0xB), uuid(0xC)]);
    }

    #[test]
    fn test_joined_identity_and_session_participants() {
        let registry = ClientRegistry::new();
        let a = add_client(&registry);
        let b = add_client(&registry);
        let unjoined = add_client(&registry);

        registry.mark_joined(a, uuid(1), uuid(0xA));
        registry.mark_joined(b, uuid(1), uuid(0xB));

        assert_eq!(registry.joined_identity(a), Some((uuid(1), uuid(0xA))));
        assert_eq!(registry.joined_identity(unjoined), None);
        assert_eq!(registry.joined_identity(9999), None);

        let mut ids = registry.session_participants(uuid(1));
        ids.sort();
        assert_eq!(ids, vec![uuid(0xA), uuid(0xB)]);
        assert!(registry.session_participants(uuid(2)).is_empty());
    }

    #[test]
    fn test_for_each_client_visits_all() {
        let registry = ClientRegistry::new();
        for _ in 0..4 {
            add_client(&registry);
        }
        let mut seen = 0;
        registry.for_each_client(|_| seen += 1);
        assert_eq!(seen, 4);
    }

    #[test]
    fn test_connection_ids_are_unique() {
        let registry = ClientRegistry::new();
        let a = add_client(&registry);
        let b = add_client(&registry);
        assert_ne!(a, b);
    }
}
