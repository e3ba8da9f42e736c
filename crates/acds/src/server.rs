//! The discovery server: accept loops, per-client handlers, background
//! maintenance, and ordered shutdown.
//!
//! Each accepted connection gets its own handler task that owns the
//! connection state and drives the dispatch table. A failing handler
//! tears down only its own connection. On shutdown the listeners close
//! first, handlers get a bounded drain window, stragglers are aborted,
//! and background workers join in ascending stop order.

use crate::config::ServerConfig;
use crate::dispatch::{ConnectionState, Dispatcher};
use crate::error::ServerError;
use crate::migration::MigrationTable;
use crate::rate_limit::RateLimiter;
use crate::registry::ClientRegistry;
use crate::store::SessionStore;
use crate::{now_ms, now_ns};
use acip_core::pool::BufferPool;
use acip_core::wire::ErrorReply;
use acip_core::packet::PacketType;
use acip_crypto::IdentityKeypair;
use acip_transport::{
    ACCEPT_TIMEOUT, DualStackListener, PacketTransport, TcpPacketTransport, TransportError,
    WebSocketTransport, WorkerPool,
};
use dashmap::DashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinSet;

/// Sweep cadence for the migration monitor.
const MIGRATION_SWEEP_INTERVAL: Duration = Duration::from_millis(100);

/// Cadence of the rate-limit pruner.
const PRUNE_INTERVAL: Duration = Duration::from_secs(300);

/// Cadence of the session-expiry sweeper.
const EXPIRY_INTERVAL: Duration = Duration::from_secs(60);

fn load_identity(config: &ServerConfig) -> Result<IdentityKeypair, ServerError> {
    let Some(path) = config.identity_seed_file.as_deref() else {
        tracing::info!("no identity seed file configured, generating ephemeral identity");
        return Ok(IdentityKeypair::generate());
    };
    if path.exists() {
        let raw = std::fs::read_to_string(path)?;
        let bytes = hex::decode(raw.trim())
            .map_err(|e| ServerError::Config(format!("bad identity seed: {e}")))?;
        let seed: [u8; 32] = bytes
            .try_into()
            .map_err(|_| ServerError::Config("identity seed must be 32 bytes".to_string()))?;
        Ok(IdentityKeypair::from_seed(&seed))
    } else {
        let identity = IdentityKeypair::generate();
        write_identity(path, &identity)?;
        tracing::info!(path = %path.display(), "generated new server identity");
        Ok(identity)
    }
}

/// Persist an identity seed as hex, creating parent directories.
///
/// # Errors
///
/// Returns `ServerError::Io` if the file cannot be written.
pub fn write_identity(path: &Path, identity: &IdentityKeypair) -> Result<(), ServerError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, hex::encode(identity.to_seed()))?;
    Ok(())
}

/// The ASCII-Chat discovery server.
pub struct DiscoveryServer {
    dispatcher: Arc<Dispatcher>,
    pool: Arc<WorkerPool>,
    buffers: BufferPool,
}

impl DiscoveryServer {
    /// Assemble a server: open the store, the limiter sharing its
    /// database, and the identity.
    ///
    /// # Errors
    ///
    /// Returns configuration, store, or identity errors.
    pub fn new(config: ServerConfig) -> Result<Self, ServerError> {
        config.validate()?;
        let store = Arc::new(SessionStore::open(&config.database_path)?);
        let limiter = Arc::new(RateLimiter::new(store.db(), config.rate_limit.clone())?);
        let identity = load_identity(&config)?;
        tracing::info!(
            identity = %hex::encode(&identity.public_key()[..8]),
            db = %config.database_path.display(),
            "discovery server assembled"
        );
        if !config.keepawake {
            tracing::debug!("keepawake disabled");
        }

        Ok(Self {
            dispatcher: Arc::new(Dispatcher {
                config,
                store,
                limiter,
                registry: Arc::new(ClientRegistry::new()),
                migrations: Arc::new(Mutex::new(MigrationTable::new())),
                ring_generations: DashMap::new(),
                identity,
            }),
            pool: Arc::new(WorkerPool::new()),
            buffers: BufferPool::default(),
        })
    }

    /// Access to the worker pool, for shutdown triggering.
    #[must_use]
    pub fn worker_pool(&self) -> Arc<WorkerPool> {
        Arc::clone(&self.pool)
    }

    /// Shared dispatcher, exposed for tests.
    #[must_use]
    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        Arc::clone(&self.dispatcher)
    }

    fn spawn_background_workers(&self) {
        let config = &self.dispatcher.config;

        let limiter = Arc::clone(&self.dispatcher.limiter);
        let mut signal = self.pool.shutdown_signal();
        self.pool.spawn("rate-pruner", -1, async move {
            loop {
                tokio::select! {
                    () = signal.wait() => break,
                    () = tokio::time::sleep(PRUNE_INTERVAL) => {
                        if let Err(e) = limiter.prune(now_ms()) {
                            tracing::warn!(error = %e, "rate limit prune failed");
                        }
                    }
                }
            }
        });

        let store = Arc::clone(&self.dispatcher.store);
        let migrations = Arc::clone(&self.dispatcher.migrations);
        let timeout_ns = config.migration_timeout_ms * 1_000_000;
        let mut signal = self.pool.shutdown_signal();
        self.pool.spawn("migration-monitor", -1, async move {
            loop {
                tokio::select! {
                    () = signal.wait() => break,
                    () = tokio::time::sleep(MIGRATION_SWEEP_INTERVAL) => {
                        let expired = migrations
                            .lock()
                            .expect("migration table lock poisoned")
                            .sweep(now_ns(), timeout_ns);
                        for session_id in expired {
                            tracing::warn!(
                                session = %session_id,
                                "host migration timed out, clearing host"
                            );
                            if let Err(e) = store.clear_host(session_id) {
                                tracing::warn!(session = %session_id, error = %e, "clear_host failed");
                            }
                        }
                    }
                }
            }
        });

        let store = Arc::clone(&self.dispatcher.store);
        let mut signal = self.pool.shutdown_signal();
        self.pool.spawn("session-expiry", -1, async move {
            loop {
                tokio::select! {
                    () = signal.wait() => break,
                    () = tokio::time::sleep(EXPIRY_INTERVAL) => {
                        match store.cleanup_expired(now_ms()) {
                            Ok(0) => {}
                            Ok(removed) => tracing::info!(removed, "expired sessions cleaned up"),
                            Err(e) => tracing::warn!(error = %e, "session expiry sweep failed"),
                        }
                    }
                }
            }
        });
    }

    /// Run until shutdown is triggered on the worker pool.
    ///
    /// # Errors
    ///
    /// Returns bind errors; runtime errors are contained per connection.
    pub async fn run(&self) -> Result<(), ServerError> {
        let config = &self.dispatcher.config;
        let tcp = DualStackListener::bind(config.address, config.address6, config.port)?;
        let ws = DualStackListener::bind(config.address, config.address6, config.websocket_port)?;
        tracing::info!(
            tcp = ?tcp.local_addrs(),
            websocket = ?ws.local_addrs(),
            "discovery server listening"
        );

        self.spawn_background_workers();

        let mut handlers: JoinSet<()> = JoinSet::new();
        let signal = self.pool.shutdown_signal();

        while !signal.is_shutdown() {
            // Reap finished handlers without blocking.
            while handlers.try_join_next().is_some() {}

            tokio::select! {
                accepted = tcp.accept(ACCEPT_TIMEOUT) => {
                    if let Some((stream, peer)) = accepted? {
                        self.spawn_tcp_handler(&mut handlers, stream, peer);
                    }
                }
                accepted = ws.accept(ACCEPT_TIMEOUT) => {
                    if let Some((stream, peer)) = accepted? {
                        self.spawn_ws_handler(&mut handlers, stream, peer);
                    }
                }
            }
        }

        // Listeners close first so nothing new arrives while draining.
        drop(tcp);
        drop(ws);
        tracing::info!("listeners closed, draining client handlers");

        let drain = Duration::from_secs(self.dispatcher.config.shutdown_drain_secs);
        let drained = tokio::time::timeout(drain, async {
            while handlers.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            tracing::warn!(remaining = handlers.len(), "drain window elapsed, force-closing");
            handlers.abort_all();
            while handlers.join_next().await.is_some() {}
        }

        self.pool.stop_all().await;
        self.dispatcher.store.flush();
        tracing::info!("discovery server stopped");
        Ok(())
    }

    fn spawn_tcp_handler(&self, handlers: &mut JoinSet<()>, stream: TcpStream, peer: SocketAddr) {
        let read_timeout = Duration::from_secs(self.dispatcher.config.read_timeout_secs);
        match TcpPacketTransport::new(stream, self.buffers.clone(), read_timeout) {
            Ok(transport) => {
                self.spawn_handler(handlers, Arc::new(transport), peer);
            }
            Err(e) => tracing::warn!(%peer, error = %e, "tcp connection setup failed"),
        }
    }

    fn spawn_ws_handler(&self, handlers: &mut JoinSet<()>, stream: TcpStream, peer: SocketAddr) {
        let read_timeout = Duration::from_secs(self.dispatcher.config.read_timeout_secs);
        let buffers = self.buffers.clone();
        let dispatcher = Arc::clone(&self.dispatcher);
        let signal = self.pool.shutdown_signal();
        handlers.spawn(async move {
            // The WebSocket upgrade itself can stall; bound it.
            let accepted = tokio::time::timeout(
                Duration::from_secs(5),
                WebSocketTransport::accept(stream, buffers, read_timeout),
            )
            .await;
            match accepted {
                Ok(Ok(transport)) => {
                    handle_connection(dispatcher, Arc::new(transport), peer, signal).await;
                }
                Ok(Err(e)) => tracing::warn!(%peer, error = %e, "websocket upgrade failed"),
                Err(_) => tracing::warn!(%peer, "websocket upgrade timed out"),
            }
        });
    }

    fn spawn_handler(
        &self,
        handlers: &mut JoinSet<()>,
        transport: Arc<dyn PacketTransport>,
        peer: SocketAddr,
    ) {
        let dispatcher = Arc::clone(&self.dispatcher);
        let signal = self.pool.shutdown_signal();
        handlers.spawn(async move {
            handle_connection(dispatcher, transport, peer, signal).await;
        });
    }
}

/// Drive one client connection until it closes, fails, or the server
/// shuts down.
async fn handle_connection(
    dispatcher: Arc<Dispatcher>,
    transport: Arc<dyn PacketTransport>,
    peer: SocketAddr,
    signal: acip_transport::ShutdownSignal,
) {
    let connection_id = dispatcher.registry.add(peer, Arc::clone(&transport));
    let mut conn = ConnectionState::new(connection_id, peer);
    tracing::debug!(connection_id, %peer, "client handler started");

    loop {
        if signal.is_shutdown() {
            break;
        }
        let packet = match transport.recv().await {
            Ok(packet) => packet,
            Err(TransportError::Timeout) => continue,
            Err(TransportError::Closed) => {
                tracing::debug!(connection_id, %peer, "peer closed connection");
                break;
            }
            Err(e) if !e.is_fatal() => {
                // Pool exhaustion: the packet is dropped, the peer lives.
                tracing::warn!(connection_id, %peer, error = %e, "packet dropped");
                continue;
            }
            Err(e) => {
                tracing::warn!(connection_id, %peer, error = %e, "receive failed, closing");
                break;
            }
        };

        let packet_type = packet.packet_type;
        if let Err(e) = dispatcher.handle_packet(&mut conn, &transport, &packet).await {
            tracing::warn!(
                connection_id,
                %peer,
                ?packet_type,
                error = %e,
                "connection-fatal dispatch error"
            );
            let reply = ErrorReply::new(e.kind(), "connection closed");
            if let Ok(payload) = reply.encode() {
                let _ = transport.send(PacketType::Error, &payload).await;
            }
            break;
        }
    }

    let _ = transport.close().await;
    let removed = dispatcher.registry.remove(connection_id);
    // A joined client dropping off changes the ring under everyone else.
    if let Some(entry) = removed {
        if entry.joined {
            if let Some(session_id) = entry.session_id {
                dispatcher.broadcast_ring_members(session_id).await;
            }
        }
    }
    tracing::debug!(connection_id, %peer, "client handler exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use acip_core::wire::{
        Capabilities, SessionCreate, SessionCreated, SessionInfo, SessionLookup, SessionType,
    };
    use std::net::Ipv4Addr;

    fn reserve_port() -> u16 {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    fn test_config(dir: &Path, tcp_port: u16, ws_port: u16) -> ServerConfig {
        ServerConfig {
            port: tcp_port,
            websocket_port: ws_port,
            address: Some(Ipv4Addr::LOCALHOST),
            address6: None,
            database_path: dir.join("db"),
            ..ServerConfig::default()
        }
    }

    #[tokio::test]
    async fn test_server_end_to_end_create_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let tcp_port = reserve_port();
        let ws_port = reserve_port();
        let config = test_config(dir.path(), tcp_port, ws_port);

        let server = Arc::new(DiscoveryServer::new(config).unwrap());
        let pool = server.worker_pool();
        let run_server = Arc::clone(&server);
        let server_task = tokio::spawn(async move { run_server.run().await });

        // Give the listeners a moment.
        tokio::time::sleep(Duration::from_millis(100)).await;

        let addr: SocketAddr = format!("127.0.0.1:{tcp_port}").parse().unwrap();
        let client = TcpPacketTransport::connect(
            addr,
            BufferPool::default(),
            Duration::from_secs(2),
        )
        .await
        .unwrap();

        // Create with one key, then finalize.
        let create = SessionCreate {
            identity_pubkey: [1u8; 32],
            timestamp_ms: now_ms(),
            capabilities: Capabilities::full(),
            max_participants: 4,
            session_type: SessionType::WebRtc,
            server_address: String::new(),
            server_port: 0,
            signature: [0u8; 64],
        };
        client
            .send(PacketType::SessionCreate, &create.encode().unwrap())
            .await
            .unwrap();
        let finalize = SessionCreate {
            identity_pubkey: [0u8; 32],
            ..create
        };
        client
            .send(PacketType::SessionCreate, &finalize.encode().unwrap())
            .await
            .unwrap();

        let reply = client.recv().await.unwrap();
        assert_eq!(reply.packet_type, PacketType::SessionCreated);
        let created = SessionCreated::decode(&reply.payload).unwrap();

        // Lookup over the same connection.
        let lookup = SessionLookup {
            session_string: created.session_string.clone(),
        };
        client
            .send(PacketType::SessionLookup, &lookup.encode().unwrap())
            .await
            .unwrap();
        let reply = client.recv().await.unwrap();
        assert_eq!(reply.packet_type, PacketType::SessionInfo);
        let info = SessionInfo::decode(&reply.payload).unwrap();
        assert!(info.found);
        assert_eq!(info.session_id, created.session_id);

        pool.trigger_shutdown();
        server_task.await.unwrap().unwrap();
    }
}
