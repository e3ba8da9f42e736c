//! Round coordinator: schedules collections, relays on the ring, runs
//! the election at the leader, and remembers the elected pair.
//!
//! Each round is an explicit state value with an attached deadline, not a
//! suspended function: external events (`on_collection_start`,
//! `on_stats_update`, `on_election_result`) and the periodic `process`
//! tick are synchronous methods that advance the machine. All time is
//! passed in as `now_ns`, so rounds are fully deterministic under test.
//!
//! The ring runs counter-clockwise: the leader opens a round toward its
//! `prev`, every hop appends its own measurements and forwards the
//! accumulated vector to its own `prev`, and the vector arrives back at
//! the leader last, carrying every participant.

use crate::election::{choose_hosts, verify};
use crate::error::ConsensusError;
use crate::state::{ConsensusState, ConsensusStateMachine};
use crate::topology::RingTopology;
use acip_core::packet::PacketType;
use acip_core::wire::{
    ElectionResult, ParticipantMetrics, StatsAck, StatsCollectionStart, StatsUpdate,
};
use uuid::Uuid;

/// Consensus rounds run every five minutes.
pub const ROUND_INTERVAL_NS: u64 = 300_000_000_000;

/// A round still collecting after thirty seconds is abandoned.
pub const COLLECTION_TIMEOUT_NS: u64 = 30_000_000_000;

/// Local network measurement, supplied by the embedding application.
pub trait MetricsSource: Send {
    /// Measure this participant's current network quality.
    fn measure(&mut self, now_ns: u64) -> ParticipantMetrics;
}

/// Outbound path for consensus packets.
///
/// Implementations deliver best-effort; per-recipient broadcast failures
/// are tolerated with a warning and must not fail the whole call.
pub trait RingLink: Send {
    /// Send one packet to a specific ring member.
    ///
    /// # Errors
    ///
    /// Returns `ConsensusError::Link` if the peer cannot be addressed.
    fn send_to(
        &mut self,
        peer: Uuid,
        packet_type: PacketType,
        payload: Vec<u8>,
    ) -> Result<(), ConsensusError>;

    /// Send one packet to every other ring member.
    ///
    /// # Errors
    ///
    /// Returns `ConsensusError::Link` only for total failure.
    fn broadcast(&mut self, packet_type: PacketType, payload: Vec<u8>)
    -> Result<(), ConsensusError>;
}

/// The stored outcome of the most recent successful election.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElectedHosts {
    /// Elected media host.
    pub host: Uuid,
    /// Host media address.
    pub host_address: String,
    /// Host media port.
    pub host_port: u16,
    /// Pre-elected failover host.
    pub backup: Uuid,
    /// Backup media address.
    pub backup_address: String,
    /// Backup media port.
    pub backup_port: u16,
    /// Round that produced this result.
    pub round_id: u32,
    /// When the election concluded (ns since epoch).
    pub elected_at_ns: u64,
}

fn endpoint_of(metrics: &[ParticipantMetrics], id: Uuid) -> (String, u16) {
    metrics
        .iter()
        .find(|m| m.participant_id == id)
        .map(|m| (m.public_address.clone(), m.public_port))
        .unwrap_or_default()
}

/// Per-session consensus coordinator. Single-owner; one per participant.
pub struct RingCoordinator<L: RingLink, M: MetricsSource> {
    session_id: Uuid,
    my_id: Uuid,
    topology: Option<RingTopology>,
    machine: ConsensusStateMachine,
    link: L,
    source: M,
    round_id: u32,
    deadline_ns: Option<u64>,
    next_round_at_ns: u64,
    /// Most recent successful result; survives across rounds so failover
    /// always has a target.
    current: Option<ElectedHosts>,
}

impl<L: RingLink, M: MetricsSource> RingCoordinator<L, M> {
    /// Create a coordinator. The first round is due immediately once a
    /// topology is installed and this participant leads it.
    pub fn new(session_id: Uuid, my_id: Uuid, link: L, source: M, now_ns: u64) -> Self {
        Self {
            session_id,
            my_id,
            topology: None,
            machine: ConsensusStateMachine::new(),
            link,
            source,
            round_id: 0,
            deadline_ns: None,
            next_round_at_ns: now_ns,
            current: None,
        }
    }

    /// Current round state.
    #[must_use]
    pub fn state(&self) -> ConsensusState {
        self.machine.state()
    }

    /// Current round id.
    #[must_use]
    pub fn round_id(&self) -> u32 {
        self.round_id
    }

    /// The installed topology, if any.
    #[must_use]
    pub fn topology(&self) -> Option<&RingTopology> {
        self.topology.as_ref()
    }

    /// Adopt a new ring membership.
    ///
    /// Whatever round was in flight is meaningless against the new ring,
    /// so the machine is forcibly reset to idle.
    ///
    /// # Errors
    ///
    /// Returns a topology construction error; the old topology stays
    /// installed in that case.
    pub fn on_ring_members(
        &mut self,
        participants: &[Uuid],
        _now_ns: u64,
    ) -> Result<(), ConsensusError> {
        let topology = RingTopology::new(participants, self.my_id)?;
        tracing::debug!(
            session = %self.session_id,
            members = topology.len(),
            leader = %topology.leader(),
            "ring topology updated"
        );
        self.topology = Some(topology);
        self.machine.force_idle();
        self.deadline_ns = None;
        Ok(())
    }

    /// Nanoseconds until the next round is due.
    #[must_use]
    pub fn time_until_next_round(&self, now_ns: u64) -> u64 {
        self.next_round_at_ns.saturating_sub(now_ns)
    }

    /// Periodic tick: abandon overdue rounds, open new ones at the leader.
    ///
    /// # Errors
    ///
    /// Returns state machine or link errors; the caller logs and continues.
    pub fn process(&mut self, now_ns: u64) -> Result<(), ConsensusError> {
        if let Some(deadline) = self.deadline_ns {
            let collecting = matches!(
                self.machine.state(),
                ConsensusState::CollectionStart | ConsensusState::Collecting
            );
            if collecting && now_ns > deadline {
                tracing::warn!(
                    session = %self.session_id,
                    round = self.round_id,
                    "collection deadline passed, abandoning round"
                );
                self.machine.transition(ConsensusState::Idle)?;
                self.deadline_ns = None;
                self.next_round_at_ns = now_ns + ROUND_INTERVAL_NS;
            }
        }

        let Some(topology) = self.topology.as_ref() else {
            return Ok(());
        };
        let is_leader = topology.is_leader();
        let prev = topology.prev();
        let ring_size = topology.len();

        if self.machine.state() == ConsensusState::Idle
            && is_leader
            && self.time_until_next_round(now_ns) == 0
        {
            self.round_id += 1;
            self.deadline_ns = Some(now_ns + COLLECTION_TIMEOUT_NS);
            self.next_round_at_ns = now_ns + ROUND_INTERVAL_NS;
            tracing::debug!(
                session = %self.session_id,
                round = self.round_id,
                "leader opening collection round"
            );

            self.machine.transition(ConsensusState::CollectionStart)?;
            self.machine.transition(ConsensusState::Collecting)?;
            let mine = self.source.measure(now_ns);
            self.machine.add_metrics(mine)?;

            if ring_size == 1 {
                // Nothing to collect; elect ourselves right away.
                self.machine.transition(ConsensusState::Complete)?;
                return self.run_election(now_ns);
            }

            let start = StatsCollectionStart {
                session_id: self.session_id,
                initiator_id: self.my_id,
                round_id: self.round_id,
                deadline_ns: now_ns + COLLECTION_TIMEOUT_NS,
            };
            self.link
                .send_to(prev, PacketType::StatsCollectionStart, start.encode())?;

            let update = StatsUpdate {
                session_id: self.session_id,
                sender_id: self.my_id,
                round_id: self.round_id,
                metrics: self.machine.metrics().to_vec(),
            };
            self.link
                .send_to(prev, PacketType::StatsUpdate, update.encode()?)?;
        }

        Ok(())
    }

    /// A leader opened a round; enter collection and propagate the start
    /// counter-clockwise.
    ///
    /// # Errors
    ///
    /// Returns state machine or link errors.
    pub fn on_collection_start(
        &mut self,
        msg: &StatsCollectionStart,
        now_ns: u64,
    ) -> Result<(), ConsensusError> {
        if msg.session_id != self.session_id {
            tracing::debug!(session = %msg.session_id, "collection start for foreign session");
            return Ok(());
        }
        let Some(topology) = self.topology.as_ref() else {
            return Err(ConsensusError::NoTopology);
        };
        if self.machine.state() != ConsensusState::Idle {
            tracing::debug!(
                round = msg.round_id,
                state = ?self.machine.state(),
                "ignoring collection start mid-round"
            );
            return Ok(());
        }

        let prev = topology.prev();
        self.round_id = msg.round_id;
        self.deadline_ns = Some(msg.deadline_ns);

        self.machine.transition(ConsensusState::Collecting)?;
        let mine = self.source.measure(now_ns);
        self.machine.add_metrics(mine)?;

        // Propagation stops where the ring closes on the initiator.
        if prev != msg.initiator_id {
            self.link
                .send_to(prev, PacketType::StatsCollectionStart, msg.encode())?;
        }
        Ok(())
    }

    /// An accumulated metrics vector arrived from our clockwise neighbor.
    ///
    /// Non-leaders append their view and forward; the leader seals the
    /// round and runs the election.
    ///
    /// # Errors
    ///
    /// Returns state machine, election, or link errors.
    pub fn on_stats_update(
        &mut self,
        msg: &StatsUpdate,
        now_ns: u64,
    ) -> Result<(), ConsensusError> {
        if msg.session_id != self.session_id || msg.round_id != self.round_id {
            tracing::debug!(
                round = msg.round_id,
                current = self.round_id,
                "ignoring stats update for another round"
            );
            return Ok(());
        }
        if self.machine.state() != ConsensusState::Collecting {
            tracing::debug!(state = ?self.machine.state(), "ignoring stats update, not collecting");
            return Ok(());
        }
        let Some(topology) = self.topology.as_ref() else {
            return Err(ConsensusError::NoTopology);
        };
        let is_leader = topology.is_leader();
        let prev = topology.prev();

        // Zero entries is a valid no-op append.
        for entry in &msg.metrics {
            self.machine.add_metrics(entry.clone())?;
        }

        if is_leader {
            // The vector has traversed the full ring.
            self.machine.transition(ConsensusState::Complete)?;
            return self.run_election(now_ns);
        }

        let update = StatsUpdate {
            session_id: self.session_id,
            sender_id: self.my_id,
            round_id: self.round_id,
            metrics: self.machine.metrics().to_vec(),
        };
        self.link
            .send_to(prev, PacketType::StatsUpdate, update.encode()?)?;
        self.machine.transition(ConsensusState::Complete)?;
        self.machine.transition(ConsensusState::Idle)?;
        self.deadline_ns = None;
        Ok(())
    }

    fn run_election(&mut self, now_ns: u64) -> Result<(), ConsensusError> {
        self.machine.transition(ConsensusState::ElectionStart)?;
        self.machine.transition(ConsensusState::Electing)?;
        let pair = choose_hosts(self.machine.metrics())?;
        self.machine.transition(ConsensusState::ElectionComplete)?;

        let metrics = self.machine.metrics().to_vec();
        let (host_address, host_port) = endpoint_of(&metrics, pair.host);
        let (backup_address, backup_port) = endpoint_of(&metrics, pair.backup);

        let result = ElectionResult {
            session_id: self.session_id,
            leader_id: self.my_id,
            round_id: self.round_id,
            host_id: pair.host,
            host_address: host_address.clone(),
            host_port,
            backup_id: pair.backup,
            backup_address: backup_address.clone(),
            backup_port,
            elected_at_ns: now_ns,
            metrics,
        };
        tracing::info!(
            session = %self.session_id,
            round = self.round_id,
            host = %pair.host,
            backup = %pair.backup,
            "election complete"
        );
        self.link
            .broadcast(PacketType::ElectionResult, result.encode()?)?;

        self.current = Some(ElectedHosts {
            host: pair.host,
            host_address,
            host_port,
            backup: pair.backup,
            backup_address,
            backup_port,
            round_id: self.round_id,
            elected_at_ns: now_ns,
        });

        self.machine.transition(ConsensusState::Idle)?;
        self.deadline_ns = None;
        Ok(())
    }

    /// A leader broadcast an election result; verify and store it.
    ///
    /// The stored pair persists even across future rounds, and the backup
    /// doubles as the pre-elected future host for zero-latency failover.
    ///
    /// # Errors
    ///
    /// Returns link errors from the acknowledgment send.
    pub fn on_election_result(
        &mut self,
        msg: &ElectionResult,
        _now_ns: u64,
    ) -> Result<(), ConsensusError> {
        if msg.session_id != self.session_id {
            return Ok(());
        }

        let verified = verify(&msg.metrics, msg.host_id, msg.backup_id);
        if !verified {
            tracing::warn!(
                session = %self.session_id,
                round = msg.round_id,
                announced_host = %msg.host_id,
                "election result failed verification, rejecting"
            );
            let ack = StatsAck {
                session_id: self.session_id,
                participant_id: self.my_id,
                round_id: msg.round_id,
                ack_status: 0,
                stored_host_id: Uuid::nil(),
                stored_backup_id: Uuid::nil(),
            };
            return self
                .link
                .send_to(msg.leader_id, PacketType::StatsAck, ack.encode());
        }

        self.current = Some(ElectedHosts {
            host: msg.host_id,
            host_address: msg.host_address.clone(),
            host_port: msg.host_port,
            backup: msg.backup_id,
            backup_address: msg.backup_address.clone(),
            backup_port: msg.backup_port,
            round_id: msg.round_id,
            elected_at_ns: msg.elected_at_ns,
        });

        let ack = StatsAck {
            session_id: self.session_id,
            participant_id: self.my_id,
            round_id: msg.round_id,
            ack_status: 1,
            stored_host_id: msg.host_id,
            stored_backup_id: msg.backup_id,
        };
        self.link
            .send_to(msg.leader_id, PacketType::StatsAck, ack.encode())
    }

    /// A participant acknowledged the result; the leader audits mismatches.
    pub fn on_stats_ack(&mut self, msg: &StatsAck) {
        if msg.session_id != self.session_id {
            return;
        }
        if msg.ack_status != 1 {
            tracing::warn!(
                session = %self.session_id,
                participant = %msg.participant_id,
                round = msg.round_id,
                "participant rejected election result"
            );
        } else {
            tracing::trace!(
                participant = %msg.participant_id,
                round = msg.round_id,
                "election result acknowledged"
            );
        }
    }

    /// The most recently stored host and backup.
    ///
    /// # Errors
    ///
    /// Returns `ConsensusError::NoElectedHost` if no round has ever
    /// succeeded; otherwise the stored result is returned even while a
    /// new round is in progress.
    pub fn get_current_host(&self) -> Result<&ElectedHosts, ConsensusError> {
        self.current.as_ref().ok_or(ConsensusError::NoElectedHost)
    }
}
