//! # ACDS - ASCII-Chat Discovery Service
//!
//! The rendezvous server clients talk to before any media flows. It owns
//! a durable session catalog, authenticates session creation and join
//! with Ed25519 identity signatures, rate-limits abusive peers, relays
//! WebRTC signaling between participants of a session, and tracks
//! host-migration timeouts so a session whose media host vanished becomes
//! joinable again.
//!
//! ## Module Structure
//!
//! - [`config`]: TOML + CLI server configuration
//! - [`store`]: sled-backed durable session catalog
//! - [`rate_limit`]: sliding-window event limiter, persisted in the store
//! - [`registry`]: thread-safe connected-client registry
//! - [`dispatch`]: per-packet dispatch table and connection state
//! - [`signaling`]: WebRTC SDP/ICE unicast and session broadcast relay
//! - [`ring_relay`]: one-hop consensus forwarding around the session ring
//! - [`migration`]: in-memory host-migration contexts and their sweeper
//! - [`server`]: accept loops, handler tasks, ordered shutdown

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod config;
pub mod dispatch;
pub mod error;
pub mod migration;
pub mod rate_limit;
pub mod registry;
pub mod ring_relay;
pub mod server;
pub mod signaling;
pub mod store;
mod words;

pub use config::ServerConfig;
pub use error::{ServerError, StoreError};
pub use server::DiscoveryServer;
pub use store::SessionStore;

/// Current wall clock in milliseconds since the Unix epoch.
#[must_use]
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as u64)
}

/// Current wall clock in nanoseconds since the Unix epoch.
#[must_use]
pub fn now_ns() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_nanos() as u64)
}
