//! # ACIP Transport
//!
//! One packet interface over heterogeneous transports.
//!
//! This crate provides:
//! - **[`PacketTransport`]**: the trait every connection speaks —
//!   `send(type, bytes)`, `recv()`, `close()`, `peer_info()`
//! - **TCP**: framed packets over a stream socket, with optional
//!   handshake-derived AEAD sealing enabled mid-connection
//! - **WebSocket**: the same frames inside binary WebSocket messages,
//!   with partial-frame reassembly and a pending-free send queue whose
//!   entries are only recycled after write completion
//! - **[`DualStackListener`]**: IPv4+IPv6 accept with a bounded timeout
//!   so shutdown stays observable
//! - **[`WorkerPool`]**: background tasks joined in ascending `stop_id`
//!   order on shutdown

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod error;
pub mod listener;
pub mod tcp;
pub mod transport;
pub mod websocket;
pub mod worker;

pub use error::TransportError;
pub use listener::DualStackListener;
pub use tcp::TcpPacketTransport;
pub use transport::{CryptoRole, IncomingPacket, PacketTransport, PeerInfo, TransportKind};
pub use websocket::WebSocketTransport;
pub use worker::{ShutdownSignal, WorkerPool};

use std::time::Duration;

/// Default read deadline distinguishing idle sockets from dead ones.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Accept timeout so the accept loop can observe shutdown.
pub const ACCEPT_TIMEOUT: Duration = Duration::from_secs(1);
