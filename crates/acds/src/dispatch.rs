//! Per-packet dispatch table and per-connection state.
//!
//! After the optional crypto handshake, every incoming packet is routed
//! by its type: session catalog CRUD, signaling relay, ring-consensus
//! relay, host lifecycle, or probe replies. Failures follow the
//! propagation policy: recoverable problems answer the client with an
//! `ERROR` packet and keep the connection; protocol and crypto
//! violations bubble up and tear the connection down. Nothing a handler
//! does can take the server with it.

use crate::config::ServerConfig;
use crate::error::{ServerError, StoreError};
use crate::migration::MigrationTable;
use crate::rate_limit::{RateEventKind, RateLimiter};
use crate::registry::ClientRegistry;
use crate::ring_relay;
use crate::signaling;
use crate::store::{CreateRequest, HostEndpoint, SessionStore};
use crate::{now_ms, now_ns};
use acip_core::error::ErrorKind;
use acip_core::packet::PacketType;
use acip_core::wire::{
    ErrorReply, HostAnnouncement, HostLost, RingMembers, SessionCreate, SessionCreated,
    SessionInfo, SessionJoin, SessionJoined, SessionLeave, SessionLookup, SessionType,
    SignalEnvelope,
};
use acip_crypto::{
    HandshakeAuth, HandshakeComplete, HandshakeStart, IdentityKeypair, ServerHandshake,
    create_message, join_message, validate_timestamp, verify_signature,
};
use acip_transport::{CryptoRole, IncomingPacket, PacketTransport};
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Session parameters carried by the first SESSION_CREATE packet,
/// buffered until the zero-key finalize.
#[derive(Debug, Clone)]
pub struct PendingCreate {
    capabilities: u8,
    max_participants: u8,
    session_type: SessionType,
    server_address: String,
    server_port: u16,
}

/// Mutable state owned by one connection's handler.
pub struct ConnectionState {
    /// Registry id of this connection.
    pub connection_id: u64,
    /// Remote socket address.
    pub peer_addr: SocketAddr,
    handshake: Option<ServerHandshake>,
    /// Whether the crypto handshake finished on this connection.
    pub handshake_complete: bool,
    /// Whether the connection is accumulating identity keys.
    pub multi_key: bool,
    pending_keys: Vec<[u8; 32]>,
    pending_create: Option<PendingCreate>,
}

impl ConnectionState {
    /// Fresh state for an accepted connection.
    #[must_use]
    pub fn new(connection_id: u64, peer_addr: SocketAddr) -> Self {
        Self {
            connection_id,
            peer_addr,
            handshake: None,
            handshake_complete: false,
            multi_key: false,
            pending_keys: Vec::new(),
            pending_create: None,
        }
    }

    /// Pending identity keys accumulated so far.
    #[must_use]
    pub fn pending_key_count(&self) -> usize {
        self.pending_keys.len()
    }
}

/// Shared server context the per-connection handlers dispatch against.
pub struct Dispatcher {
    /// Server configuration.
    pub config: ServerConfig,
    /// Durable session catalog.
    pub store: Arc<SessionStore>,
    /// Sliding-window rate limiter.
    pub limiter: Arc<RateLimiter>,
    /// Connected-client registry.
    pub registry: Arc<ClientRegistry>,
    /// In-flight host migrations.
    pub migrations: Arc<Mutex<MigrationTable>>,
    /// Per-session ring topology generations, bumped on membership change.
    pub ring_generations: DashMap<Uuid, u32>,
    /// Server identity for the crypto handshake.
    pub identity: IdentityKeypair,
}

impl Dispatcher {
    async fn reply_error(
        &self,
        transport: &Arc<dyn PacketTransport>,
        kind: ErrorKind,
        message: &str,
    ) {
        let reply = ErrorReply::new(kind, message);
        match reply.encode() {
            Ok(payload) => {
                if let Err(e) = transport.send(PacketType::Error, &payload).await {
                    tracing::debug!(error = %e, "error reply not delivered");
                }
            }
            Err(e) => tracing::debug!(error = %e, "error reply failed to encode"),
        }
    }

    async fn rate_check(
        &self,
        transport: &Arc<dyn PacketTransport>,
        peer: SocketAddr,
        kind: RateEventKind,
    ) -> Result<bool, ServerError> {
        let accepted = self
            .limiter
            .check_and_record(peer.ip(), kind, now_ms())
            .map_err(ServerError::Store)?;
        if !accepted {
            self.reply_error(transport, ErrorKind::RateLimited, "request suppressed")
                .await;
        }
        Ok(accepted)
    }

    /// Route one packet.
    ///
    /// # Errors
    ///
    /// Returns connection-fatal errors only; everything recoverable has
    /// already been answered on the transport.
    pub async fn handle_packet(
        &self,
        conn: &mut ConnectionState,
        transport: &Arc<dyn PacketTransport>,
        packet: &IncomingPacket,
    ) -> Result<(), ServerError> {
        let ty = packet.packet_type;

        // While accumulating identity keys, only the create flow and
        // liveness probes are admissible.
        if conn.multi_key
            && !matches!(
                ty,
                PacketType::SessionCreate
                    | PacketType::DiscoveryPing
                    | PacketType::Ping
                    | PacketType::Pong
            )
        {
            tracing::debug!(peer = %conn.peer_addr, ?ty, "packet rejected in multi-key mode");
            self.reply_error(
                transport,
                ErrorKind::InvalidParam,
                "only SESSION_CREATE is accepted while accumulating keys",
            )
            .await;
            return Ok(());
        }

        match ty {
            PacketType::HandshakeStart => self.on_handshake_start(conn, transport, packet).await,
            PacketType::HandshakeComplete => {
                self.on_handshake_complete(conn, transport, packet).await
            }
            PacketType::HandshakeAuth => {
                // Servers emit AUTH, they never receive it.
                self.reply_error(transport, ErrorKind::NetworkProtocol, "unexpected AUTH")
                    .await;
                Err(ServerError::Crypto(acip_crypto::CryptoError::InvalidState))
            }
            PacketType::Ping => {
                transport.send(PacketType::Pong, &[]).await?;
                Ok(())
            }
            PacketType::Pong => Ok(()),
            PacketType::DiscoveryPing => {
                if self
                    .rate_check(transport, conn.peer_addr, RateEventKind::Probe)
                    .await?
                {
                    transport.send(PacketType::DiscoveryPong, &[]).await?;
                }
                Ok(())
            }
            PacketType::SessionCreate => self.on_session_create(conn, transport, packet).await,
            PacketType::SessionLookup => self.on_session_lookup(conn, transport, packet).await,
            PacketType::SessionJoin => self.on_session_join(conn, transport, packet).await,
            PacketType::SessionLeave => self.on_session_leave(conn, packet).await,
            PacketType::WebRtcSdp | PacketType::WebRtcIce => {
                self.on_signaling(transport, ty, packet).await
            }
            PacketType::HostAnnouncement => self.on_host_announcement(transport, packet).await,
            PacketType::HostLost => self.on_host_lost(transport, packet).await,
            PacketType::RingMembers => self.on_ring_members_request(transport, packet).await,
            PacketType::StatsCollectionStart
            | PacketType::StatsUpdate
            | PacketType::StatsAck
            | PacketType::ElectionResult => {
                self.on_consensus(conn, transport, ty, packet).await
            }
            other => {
                tracing::debug!(peer = %conn.peer_addr, ?other, "unhandled packet type");
                self.reply_error(
                    transport,
                    ErrorKind::NetworkProtocol,
                    "packet type not handled by discovery",
                )
                .await;
                Ok(())
            }
        }
    }

    async fn on_handshake_start(
        &self,
        conn: &mut ConnectionState,
        transport: &Arc<dyn PacketTransport>,
        packet: &IncomingPacket,
    ) -> Result<(), ServerError> {
        if conn.handshake_complete || conn.handshake.is_some() {
            return Err(ServerError::Crypto(acip_crypto::CryptoError::InvalidState));
        }
        let start = HandshakeStart::decode(&packet.payload)?;
        let mut handshake = ServerHandshake::new(self.identity.clone());
        let auth = handshake.handle_start(&start)?;
        transport
            .send(PacketType::HandshakeAuth, &auth.encode())
            .await?;
        conn.handshake = Some(handshake);
        Ok(())
    }

    async fn on_handshake_complete(
        &self,
        conn: &mut ConnectionState,
        transport: &Arc<dyn PacketTransport>,
        packet: &IncomingPacket,
    ) -> Result<(), ServerError> {
        let complete = HandshakeComplete::decode(&packet.payload)?;
        let mut handshake = conn
            .handshake
            .take()
            .ok_or(ServerError::Crypto(acip_crypto::CryptoError::InvalidState))?;
        handshake.handle_complete(&complete)?;
        let keys = handshake.into_session_keys()?;
        transport.enable_encryption(keys, CryptoRole::Server).await;
        conn.handshake_complete = true;
        tracing::info!(peer = %conn.peer_addr, "client handshake complete");
        Ok(())
    }

    async fn on_session_create(
        &self,
        conn: &mut ConnectionState,
        transport: &Arc<dyn PacketTransport>,
        packet: &IncomingPacket,
    ) -> Result<(), ServerError> {
        let msg = SessionCreate::decode(&packet.payload)?;

        if msg.is_finalize() {
            return self.finalize_session_create(conn, transport).await;
        }

        if conn.multi_key {
            // Key accumulation: duplicates and overflow are rejected,
            // accepted keys get no response.
            if conn.pending_keys.contains(&msg.identity_pubkey) {
                self.reply_error(transport, ErrorKind::InvalidParam, "duplicate identity key")
                    .await;
                return Ok(());
            }
            if conn.pending_keys.len() >= self.config.max_identity_keys {
                self.reply_error(
                    transport,
                    ErrorKind::InvalidParam,
                    "identity key limit reached",
                )
                .await;
                return Ok(());
            }
            conn.pending_keys.push(msg.identity_pubkey);
            return Ok(());
        }

        // First key of a create flow.
        if !self
            .rate_check(transport, conn.peer_addr, RateEventKind::SessionCreate)
            .await?
        {
            return Ok(());
        }

        if self.config.require_server_identity {
            if let Err(e) = validate_timestamp(
                msg.timestamp_ms,
                now_ms(),
                self.config.timestamp_window_secs,
            ) {
                self.reply_error(transport, ErrorKind::CryptoVerification, "stale timestamp")
                    .await;
                return Err(e.into());
            }
            let signed = create_message(msg.timestamp_ms, msg.capabilities.as_u8(), msg.max_participants);
            if let Err(e) = verify_signature(&msg.identity_pubkey, &signed, &msg.signature) {
                self.reply_error(
                    transport,
                    ErrorKind::CryptoVerification,
                    "create signature invalid",
                )
                .await;
                return Err(e.into());
            }
        }

        let mut server_address = msg.server_address.clone();
        if msg.session_type == SessionType::DirectTcp {
            let observed = conn.peer_addr.ip().to_string();
            if server_address.is_empty() {
                server_address = observed;
            } else if server_address != observed {
                tracing::warn!(
                    peer = %conn.peer_addr,
                    advertised = %server_address,
                    "direct-tcp create advertises a foreign address"
                );
                self.reply_error(
                    transport,
                    ErrorKind::InvalidParam,
                    "advertised address does not match peer",
                )
                .await;
                return Ok(());
            }
        }

        conn.pending_keys.clear();
        conn.pending_keys.push(msg.identity_pubkey);
        conn.pending_create = Some(PendingCreate {
            capabilities: msg.capabilities.as_u8(),
            max_participants: msg.max_participants,
            session_type: msg.session_type,
            server_address,
            server_port: msg.server_port,
        });
        conn.multi_key = true;
        // No response until finalize.
        Ok(())
    }

    async fn finalize_session_create(
        &self,
        conn: &mut ConnectionState,
        transport: &Arc<dyn PacketTransport>,
    ) -> Result<(), ServerError> {
        if !conn.multi_key {
            self.reply_error(
                transport,
                ErrorKind::InvalidParam,
                "finalize without pending keys",
            )
            .await;
            return Ok(());
        }

        // The finalize concludes the flow whether or not the store
        // accepts it.
        conn.multi_key = false;
        let keys = std::mem::take(&mut conn.pending_keys);
        let Some(pending) = conn.pending_create.take() else {
            self.reply_error(transport, ErrorKind::InvalidState, "no pending create")
                .await;
            return Ok(());
        };

        let request = CreateRequest {
            identity_keys: keys,
            capabilities: pending.capabilities,
            max_participants: pending.max_participants,
            session_type: pending.session_type as u8,
            server_address: pending.server_address,
            server_port: pending.server_port,
        };
        match self.store.create(request, &self.config, now_ms()) {
            Ok(outcome) => {
                let reply = SessionCreated {
                    session_id: outcome.session_id,
                    session_string: outcome.session_string,
                    stun_servers: outcome.stun_servers,
                    turn_servers: outcome.turn_servers,
                };
                transport
                    .send(PacketType::SessionCreated, &reply.encode()?)
                    .await?;
                Ok(())
            }
            Err(e) => {
                self.reply_error(transport, e.kind(), &e.to_string()).await;
                Ok(())
            }
        }
    }

    async fn on_session_lookup(
        &self,
        conn: &mut ConnectionState,
        transport: &Arc<dyn PacketTransport>,
        packet: &IncomingPacket,
    ) -> Result<(), ServerError> {
        if !self
            .rate_check(transport, conn.peer_addr, RateEventKind::SessionLookup)
            .await?
        {
            return Ok(());
        }
        let msg = SessionLookup::decode(&packet.payload)?;

        let info = match self.store.lookup(&msg.session_string)? {
            Some(record) => {
                let num_participants = self.store.participant_count(record.session_id)? as u8;
                SessionInfo {
                    found: true,
                    session_id: record.session_id,
                    session_type: SessionType::try_from(record.session_type)
                        .unwrap_or(SessionType::WebRtc),
                    capabilities: acip_core::wire::Capabilities::from_u8(record.capabilities),
                    max_participants: record.max_participants,
                    num_participants,
                    host_id: record.host.as_ref().map(|h| h.id),
                    host_address: record
                        .host
                        .as_ref()
                        .map(|h| h.address.clone())
                        .unwrap_or_default(),
                    host_port: record.host.as_ref().map_or(0, |h| h.port),
                    in_migration: record.in_migration,
                }
            }
            None => SessionInfo::not_found(),
        };
        transport
            .send(PacketType::SessionInfo, &info.encode()?)
            .await?;
        Ok(())
    }

    async fn on_session_join(
        &self,
        conn: &mut ConnectionState,
        transport: &Arc<dyn PacketTransport>,
        packet: &IncomingPacket,
    ) -> Result<(), ServerError> {
        if !self
            .rate_check(transport, conn.peer_addr, RateEventKind::SessionJoin)
            .await?
        {
            return Ok(());
        }
        let msg = SessionJoin::decode(&packet.payload)?;

        if self.config.require_client_identity {
            if let Err(e) = validate_timestamp(
                msg.timestamp_ms,
                now_ms(),
                self.config.timestamp_window_secs,
            ) {
                self.reply_error(transport, ErrorKind::CryptoVerification, "stale timestamp")
                    .await;
                return Err(e.into());
            }
            let signed = join_message(msg.timestamp_ms, &msg.session_string);
            if let Err(e) = verify_signature(&msg.identity_pubkey, &signed, &msg.signature) {
                self.reply_error(
                    transport,
                    ErrorKind::CryptoVerification,
                    "join signature invalid",
                )
                .await;
                return Err(e.into());
            }
        }

        let mut joined_session = None;
        let reply = match self
            .store
            .join(&msg.session_string, &msg.identity_pubkey, now_ms())
        {
            Ok(joined) => {
                self.registry
                    .mark_joined(conn.connection_id, joined.session_id, joined.participant_id);
                joined_session = Some(joined.session_id);
                SessionJoined {
                    success: true,
                    session_id: joined.session_id,
                    participant_id: joined.participant_id,
                    err_code: ErrorKind::Ok.code(),
                    err_message: String::new(),
                }
            }
            Err(e) => SessionJoined {
                success: false,
                session_id: Uuid::nil(),
                participant_id: Uuid::nil(),
                err_code: e.kind().code(),
                err_message: e.to_string(),
            },
        };
        transport
            .send(PacketType::SessionJoined, &reply.encode()?)
            .await?;
        if let Some(session_id) = joined_session {
            self.broadcast_ring_members(session_id).await;
        }
        Ok(())
    }

    async fn on_session_leave(
        &self,
        conn: &mut ConnectionState,
        packet: &IncomingPacket,
    ) -> Result<(), ServerError> {
        let msg = SessionLeave::decode(&packet.payload)?;
        self.store.leave(msg.session_id, msg.participant_id)?;
        self.registry.mark_left(conn.connection_id);
        self.broadcast_ring_members(msg.session_id).await;
        Ok(())
    }

    /// Bump a session's topology generation and fan out a fresh
    /// membership snapshot; called on join, leave, and disconnect.
    pub async fn broadcast_ring_members(&self, session_id: Uuid) {
        let generation = {
            let mut entry = self.ring_generations.entry(session_id).or_insert(0);
            *entry += 1;
            *entry
        };
        ring_relay::broadcast_members(&self.registry, session_id, generation).await;
    }

    async fn on_ring_members_request(
        &self,
        transport: &Arc<dyn PacketTransport>,
        packet: &IncomingPacket,
    ) -> Result<(), ServerError> {
        let msg = RingMembers::decode(&packet.payload)?;
        if self.store.find_by_id(msg.session_id)?.is_none() {
            self.reply_error(transport, ErrorKind::NetworkProtocol, "unknown session")
                .await;
            return Ok(());
        }
        let generation = self
            .ring_generations
            .get(&msg.session_id)
            .map_or(0, |g| *g);
        match ring_relay::members_snapshot(&self.registry, msg.session_id, generation) {
            Some(snapshot) => {
                transport
                    .send(PacketType::RingMembers, &snapshot.encode()?)
                    .await?;
                Ok(())
            }
            None => {
                self.reply_error(
                    transport,
                    ErrorKind::NetworkProtocol,
                    "session has no joined participants",
                )
                .await;
                Ok(())
            }
        }
    }

    async fn on_consensus(
        &self,
        conn: &ConnectionState,
        transport: &Arc<dyn PacketTransport>,
        packet_type: PacketType,
        packet: &IncomingPacket,
    ) -> Result<(), ServerError> {
        let sender = self.registry.joined_identity(conn.connection_id);
        match ring_relay::relay(
            &self.registry,
            &self.store,
            sender,
            packet_type,
            &packet.payload,
        )
        .await
        {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::debug!(peer = %conn.peer_addr, ?packet_type, error = %e, "ring relay failed");
                self.reply_error(
                    transport,
                    ring_relay::relay_error_kind(&e),
                    "consensus relay failed",
                )
                .await;
                Ok(())
            }
        }
    }

    async fn on_signaling(
        &self,
        transport: &Arc<dyn PacketTransport>,
        packet_type: PacketType,
        packet: &IncomingPacket,
    ) -> Result<(), ServerError> {
        let envelope = SignalEnvelope::decode(&packet.payload)?;
        match signaling::relay(
            &self.registry,
            &self.store,
            packet_type,
            &envelope,
            &packet.payload,
        )
        .await
        {
            Ok(()) => Ok(()),
            Err(e) => {
                self.reply_error(
                    transport,
                    signaling::relay_error_kind(&e),
                    "signaling relay failed",
                )
                .await;
                Ok(())
            }
        }
    }

    async fn on_host_announcement(
        &self,
        transport: &Arc<dyn PacketTransport>,
        packet: &IncomingPacket,
    ) -> Result<(), ServerError> {
        let msg = HostAnnouncement::decode(&packet.payload)?;
        let endpoint = HostEndpoint {
            id: msg.host_id,
            address: msg.address.clone(),
            port: msg.port,
            connection_type: msg.connection_type as u8,
        };
        match self.store.update_host(msg.session_id, endpoint) {
            Ok(()) => {
                self.migrations
                    .lock()
                    .expect("migration table lock poisoned")
                    .remove(msg.session_id);
                tracing::info!(
                    session = %msg.session_id,
                    host = %msg.host_id,
                    "host announced"
                );
                Ok(())
            }
            Err(e) => {
                self.reply_error(transport, e.kind(), "host announcement rejected")
                    .await;
                Ok(())
            }
        }
    }

    async fn on_host_lost(
        &self,
        transport: &Arc<dyn PacketTransport>,
        packet: &IncomingPacket,
    ) -> Result<(), ServerError> {
        let msg = HostLost::decode(&packet.payload)?;
        match self.store.start_migration(msg.session_id) {
            Ok(()) => {
                self.migrations
                    .lock()
                    .expect("migration table lock poisoned")
                    .begin(msg.session_id, now_ns());
                tracing::info!(
                    session = %msg.session_id,
                    reporter = %msg.reporter_id,
                    "host lost, migration started"
                );
                Ok(())
            }
            Err(e) => {
                self.reply_error(transport, e.kind(), "host-lost rejected")
                    .await;
                Ok(())
            }
        }
    }
}
