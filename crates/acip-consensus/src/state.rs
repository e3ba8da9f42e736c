//! Validated state machine for one consensus round.
//!
//! The machine owns the metrics vector collected during a round. It is
//! single-owner: the coordinator drives it from one task, and every
//! transition outside the legal set fails instead of silently proceeding.

use crate::error::ConsensusError;
use acip_core::wire::ParticipantMetrics;

/// Round states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConsensusState {
    /// Between rounds.
    Idle,
    /// Leader is opening a round.
    CollectionStart,
    /// Metrics are accumulating.
    Collecting,
    /// The metric set is sealed.
    Complete,
    /// Leader is entering the election.
    ElectionStart,
    /// Election computation in progress.
    Electing,
    /// A result exists for this round.
    ElectionComplete,
    /// Unrecoverable round failure.
    Failed,
}

/// Initial capacity of the metrics vector; it grows geometrically beyond.
const INITIAL_METRICS_CAPACITY: usize = 10;

/// State machine owning the per-round metric set.
#[derive(Debug)]
pub struct ConsensusStateMachine {
    state: ConsensusState,
    metrics: Vec<ParticipantMetrics>,
}

impl ConsensusStateMachine {
    /// A fresh machine in `Idle`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: ConsensusState::Idle,
            metrics: Vec::with_capacity(INITIAL_METRICS_CAPACITY),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConsensusState {
        self.state
    }

    /// Metrics collected so far this round.
    #[must_use]
    pub fn metrics(&self) -> &[ParticipantMetrics] {
        &self.metrics
    }

    fn is_legal(from: ConsensusState, to: ConsensusState) -> bool {
        use ConsensusState::{
            Collecting, CollectionStart, Complete, Electing, ElectionComplete, ElectionStart,
            Failed, Idle,
        };
        if to == Failed {
            return true;
        }
        matches!(
            (from, to),
            (Idle, CollectionStart)
                // Non-leaders enter collection straight from idle.
                | (Idle, Collecting)
                | (CollectionStart, Collecting)
                // Abandoned rounds fall back to idle.
                | (CollectionStart, Idle)
                | (Collecting, Idle)
                | (Collecting, Complete)
                | (Complete, ElectionStart)
                // Non-leaders are done once their relay hop completes.
                | (Complete, Idle)
                | (ElectionStart, Electing)
                | (ElectionStart, ElectionComplete)
                | (Electing, ElectionComplete)
                | (ElectionComplete, Idle)
                | (Failed, Idle)
        )
    }

    /// Perform a validated transition.
    ///
    /// Entering `Idle` clears the round's metrics.
    ///
    /// # Errors
    ///
    /// Returns `ConsensusError::InvalidTransition` for anything outside
    /// the legal set.
    pub fn transition(&mut self, to: ConsensusState) -> Result<(), ConsensusError> {
        if !Self::is_legal(self.state, to) {
            return Err(ConsensusError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        if to == ConsensusState::Idle {
            self.metrics.clear();
        }
        self.state = to;
        Ok(())
    }

    /// Force the machine back to `Idle`, dropping round state.
    ///
    /// Used on topology change, where whatever round was in flight is
    /// meaningless against the new ring.
    pub fn force_idle(&mut self) {
        self.metrics.clear();
        self.state = ConsensusState::Idle;
    }

    /// Add one participant's metrics to the round.
    ///
    /// Entries for a participant already collected are skipped, so a
    /// vector that traveled the full ring can be appended wholesale.
    /// Returns whether the entry was actually appended.
    ///
    /// # Errors
    ///
    /// Returns `ConsensusError::NotCollecting` outside `Collecting`.
    pub fn add_metrics(&mut self, entry: ParticipantMetrics) -> Result<bool, ConsensusError> {
        if self.state != ConsensusState::Collecting {
            return Err(ConsensusError::NotCollecting);
        }
        if self
            .metrics
            .iter()
            .any(|m| m.participant_id == entry.participant_id)
        {
            return Ok(false);
        }
        self.metrics.push(entry);
        Ok(true)
    }
}

impl Default for ConsensusStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
