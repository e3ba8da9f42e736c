//! # ACIP Core
//!
//! Protocol core for ACIP, the framed-packet protocol spoken by every
//! ASCII-Chat transport (plain TCP, encrypted TCP, WebSocket).
//!
//! This crate provides:
//! - **Packet framing**: length-prefixed header with magic, version, type
//!   and CRC32 checksum over header and payload
//! - **Pooled receive buffers**: size-classed buffer pool so the receive
//!   path never allocates per packet
//! - **Wire formats**: hand-packed big-endian layouts for session,
//!   signaling and ring-consensus payloads
//! - **Error taxonomy**: the numeric error kinds shared by every component
//!   and echoed to clients in `ERROR` replies
//!
//! ## Module Structure
//!
//! - [`packet`]: header encode/decode and the packet type registry
//! - [`pool`]: size-classed buffer pool and the [`PooledBuf`] guard
//! - [`wire`]: payload layouts (metrics, consensus, session, signaling)
//! - [`error`]: [`ErrorKind`] plus framing/wire/pool error types

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod error;
pub mod packet;
pub mod pool;
pub mod wire;

pub use error::{ErrorKind, FrameError, PoolError, WireError};
pub use packet::{PACKET_HEADER_SIZE, PacketFlags, PacketHeader, PacketType};
pub use pool::{BufferPool, PoolConfig, PooledBuf};

/// ACIP protocol version carried in every packet header.
pub const PROTOCOL_VERSION: u8 = 1;

/// Magic bytes `"ACIP"` opening every packet header.
pub const PACKET_MAGIC: u32 = 0x4143_4950;

/// Largest payload any packet may carry.
pub const MAX_PAYLOAD_SIZE: usize = 64 * 1024;

/// Identity public keys a single session may whitelist.
pub const MAX_IDENTITY_KEYS: usize = 8;

/// Participants a ring topology can carry on the wire.
pub const MAX_RING_PARTICIPANTS: usize = 64;

/// Fixed wire width of the human-memorable session string.
pub const SESSION_STRING_WIRE_LEN: usize = 48;

/// Fixed wire width of address fields (host or host:port strings).
pub const ADDRESS_WIRE_LEN: usize = 64;

/// Ed25519 public key size.
pub const IDENTITY_KEY_LEN: usize = 32;

/// Ed25519 signature size.
pub const SIGNATURE_LEN: usize = 64;
