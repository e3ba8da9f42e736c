//! Hand-packed big-endian payload layouts.
//!
//! Wire form is always big-endian; in-memory form is host-endian native
//! types. Strings travel in fixed-width zero-padded fields; overlong
//! in-memory strings are an encode error, never silently truncated.
//!
//! - [`metrics`]: per-participant network quality measurements
//! - [`consensus`]: ring membership and election round payloads
//! - [`session`]: session create/lookup/join/leave and their replies
//! - [`signaling`]: WebRTC relay envelope, host announcements, errors

pub mod consensus;
pub mod metrics;
pub mod session;
pub mod signaling;

mod cursor;

pub(crate) use cursor::{Reader, Writer};

pub use consensus::{ElectionResult, RingMembers, StatsAck, StatsCollectionStart, StatsUpdate};
pub use metrics::{ConnectionType, METRICS_WIRE_SIZE, NatTier, ParticipantMetrics};
pub use session::{
    Capabilities, SessionCreate, SessionCreated, SessionInfo, SessionJoin, SessionJoined,
    SessionLeave, SessionLookup, SessionType,
};
pub use signaling::{ErrorReply, HostAnnouncement, HostLost, SignalEnvelope};
