//! # ACIP Consensus
//!
//! Deterministic ring consensus electing the media-relay host.
//!
//! Connected participants of a session form a virtual ring ordered by
//! UUID. Every five minutes the ring leader (last UUID in order) opens a
//! metrics collection round: network-quality measurements accumulate
//! counter-clockwise around the ring and arrive at the leader last, the
//! leader runs a deterministic election over the full metric set, and
//! broadcasts the winner plus a pre-elected backup. Because every
//! participant verifies and stores both, failover on host loss needs no
//! further coordination.
//!
//! ## Module Structure
//!
//! - [`topology`]: lexicographic ring order, position/next/prev/leader
//! - [`state`]: the validated round state machine
//! - [`election`]: scalar scoring, top-2 selection, verification
//! - [`coordinator`]: round scheduling and ring relay
//! - [`link`]: [`RingLink`] implementation over packet transports

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod coordinator;
pub mod election;
pub mod error;
pub mod link;
pub mod state;
pub mod topology;

pub use coordinator::{
    COLLECTION_TIMEOUT_NS, ElectedHosts, MetricsSource, RingCoordinator, RingLink,
    ROUND_INTERVAL_NS,
};
pub use election::{ElectedPair, choose_hosts, score, verify};
pub use error::ConsensusError;
pub use link::TransportRingLink;
pub use state::{ConsensusState, ConsensusStateMachine};
pub use topology::RingTopology;
