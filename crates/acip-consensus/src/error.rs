//! Consensus errors.

use crate::state::ConsensusState;
use acip_core::error::ErrorKind;
use thiserror::Error;

/// Errors from ring topology, election, and round coordination.
#[derive(Debug, Error)]
pub enum ConsensusError {
    /// Topology construction with an empty participant set.
    #[error("cannot build a ring from zero participants")]
    EmptyRing,

    /// The caller's id is not in the participant set.
    #[error("caller is not a ring member")]
    NotAMember,

    /// Illegal state-machine transition.
    #[error("invalid transition {from:?} -> {to:?}")]
    InvalidTransition {
        /// State the machine was in.
        from: ConsensusState,
        /// State the transition requested.
        to: ConsensusState,
    },

    /// Metrics added outside the collecting state.
    #[error("metrics may only be added while collecting")]
    NotCollecting,

    /// Election requested with no metrics.
    #[error("no metrics to elect from")]
    NoMetrics,

    /// `get_current_host` before any round has ever succeeded.
    #[error("no election has completed yet")]
    NoElectedHost,

    /// The coordinator has no topology yet.
    #[error("no ring topology installed")]
    NoTopology,

    /// A ring relay send failed.
    #[error("ring link failure: {0}")]
    Link(String),

    /// A consensus payload failed to encode or decode.
    #[error("wire error: {0}")]
    Wire(#[from] acip_core::WireError),
}

impl ConsensusError {
    /// Project onto the shared taxonomy.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::EmptyRing | Self::NotAMember | Self::NoMetrics => ErrorKind::InvalidParam,
            Self::InvalidTransition { .. }
            | Self::NotCollecting
            | Self::NoElectedHost
            | Self::NoTopology => ErrorKind::InvalidState,
            Self::Link(_) => ErrorKind::Network,
            Self::Wire(e) => e.kind(),
        }
    }
}
