//! Ring membership and election round payloads.

use super::metrics::ParticipantMetrics;
use super::{Reader, Writer};
use crate::error::WireError;
use crate::{ADDRESS_WIRE_LEN, MAX_RING_PARTICIPANTS};
use uuid::Uuid;

/// Ring membership snapshot distributed on topology change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingMembers {
    /// Session the ring belongs to.
    pub session_id: Uuid,
    /// Participant ids, already sorted lexicographically.
    pub participant_ids: Vec<Uuid>,
    /// Index of the ring leader within `participant_ids`.
    pub ring_leader_index: u8,
    /// Monotonic topology generation.
    pub generation: u32,
}

impl RingMembers {
    /// Encode to the packed wire form.
    ///
    /// # Errors
    ///
    /// Returns `WireError::FieldTooLong` if more than
    /// [`MAX_RING_PARTICIPANTS`] ids are given.
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        if self.participant_ids.len() > MAX_RING_PARTICIPANTS {
            return Err(WireError::FieldTooLong {
                field: "participant_ids",
                len: self.participant_ids.len(),
                max: MAX_RING_PARTICIPANTS,
            });
        }
        let mut w = Writer::with_capacity(22 + 16 * self.participant_ids.len());
        w.uuid(&self.session_id);
        w.u8(self.participant_ids.len() as u8);
        w.u8(self.ring_leader_index);
        w.u32(self.generation);
        for id in &self.participant_ids {
            w.uuid(id);
        }
        Ok(w.into_inner())
    }

    /// Decode from the packed wire form.
    ///
    /// # Errors
    ///
    /// Returns `WireError` on truncation, an over-limit participant count,
    /// or trailing bytes.
    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let mut r = Reader::new(buf);
        let session_id = r.uuid()?;
        let count = r.u8()? as usize;
        if count > MAX_RING_PARTICIPANTS {
            return Err(WireError::InvalidValue {
                field: "num_participants",
            });
        }
        let ring_leader_index = r.u8()?;
        let generation = r.u32()?;
        let mut participant_ids = Vec::with_capacity(count);
        for _ in 0..count {
            participant_ids.push(r.uuid()?);
        }
        r.finish()?;
        Ok(Self {
            session_id,
            participant_ids,
            ring_leader_index,
            generation,
        })
    }
}

/// Leader opens a metrics collection round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsCollectionStart {
    /// Session the round belongs to.
    pub session_id: Uuid,
    /// The leader that opened the round.
    pub initiator_id: Uuid,
    /// Monotonic round id.
    pub round_id: u32,
    /// Absolute collection deadline (ns since epoch).
    pub deadline_ns: u64,
}

impl StatsCollectionStart {
    /// Encode to the packed wire form.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(44);
        w.uuid(&self.session_id);
        w.uuid(&self.initiator_id);
        w.u32(self.round_id);
        w.u64(self.deadline_ns);
        w.into_inner()
    }

    /// Decode from the packed wire form.
    ///
    /// # Errors
    ///
    /// Returns `WireError` on truncation or trailing bytes.
    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let mut r = Reader::new(buf);
        let msg = Self {
            session_id: r.uuid()?,
            initiator_id: r.uuid()?,
            round_id: r.u32()?,
            deadline_ns: r.u64()?,
        };
        r.finish()?;
        Ok(msg)
    }
}

/// Accumulated metrics traveling counter-clockwise around the ring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsUpdate {
    /// Session the round belongs to.
    pub session_id: Uuid,
    /// The node that forwarded this hop.
    pub sender_id: Uuid,
    /// Round the vector belongs to.
    pub round_id: u32,
    /// Accumulated entries; zero entries is a valid no-op append.
    pub metrics: Vec<ParticipantMetrics>,
}

impl StatsUpdate {
    /// Encode to the packed wire form.
    ///
    /// # Errors
    ///
    /// Returns `WireError::FieldTooLong` on more than
    /// [`MAX_RING_PARTICIPANTS`] entries or an overlong address inside one.
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        if self.metrics.len() > MAX_RING_PARTICIPANTS {
            return Err(WireError::FieldTooLong {
                field: "metrics",
                len: self.metrics.len(),
                max: MAX_RING_PARTICIPANTS,
            });
        }
        let mut w = Writer::with_capacity(37 + super::METRICS_WIRE_SIZE * self.metrics.len());
        w.uuid(&self.session_id);
        w.uuid(&self.sender_id);
        w.u32(self.round_id);
        w.u8(self.metrics.len() as u8);
        for m in &self.metrics {
            m.encode_into(&mut w)?;
        }
        Ok(w.into_inner())
    }

    /// Decode from the packed wire form.
    ///
    /// # Errors
    ///
    /// Returns `WireError` on truncation, invalid entries, or trailing
    /// bytes.
    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let mut r = Reader::new(buf);
        let session_id = r.uuid()?;
        let sender_id = r.uuid()?;
        let round_id = r.u32()?;
        let count = r.u8()? as usize;
        if count > MAX_RING_PARTICIPANTS {
            return Err(WireError::InvalidValue {
                field: "num_metrics",
            });
        }
        let mut metrics = Vec::with_capacity(count);
        for _ in 0..count {
            metrics.push(ParticipantMetrics::decode_from(&mut r)?);
        }
        r.finish()?;
        Ok(Self {
            session_id,
            sender_id,
            round_id,
            metrics,
        })
    }
}

/// Leader broadcast of the elected host and backup, with the metric set
/// the election ran on so every participant can verify it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElectionResult {
    /// Session the round belongs to.
    pub session_id: Uuid,
    /// Leader that computed the election.
    pub leader_id: Uuid,
    /// Round the result concludes.
    pub round_id: u32,
    /// Elected media host.
    pub host_id: Uuid,
    /// Address the host serves media on.
    pub host_address: String,
    /// Port the host serves media on.
    pub host_port: u16,
    /// Pre-elected failover host.
    pub backup_id: Uuid,
    /// Backup's media address.
    pub backup_address: String,
    /// Backup's media port.
    pub backup_port: u16,
    /// When the election concluded (ns since epoch).
    pub elected_at_ns: u64,
    /// The full metric set the election consumed.
    pub metrics: Vec<ParticipantMetrics>,
}

impl ElectionResult {
    /// Encode to the packed wire form.
    ///
    /// # Errors
    ///
    /// Returns `WireError::FieldTooLong` on overlong addresses or an
    /// over-limit metric count.
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        if self.metrics.len() > MAX_RING_PARTICIPANTS {
            return Err(WireError::FieldTooLong {
                field: "metrics",
                len: self.metrics.len(),
                max: MAX_RING_PARTICIPANTS,
            });
        }
        let mut w = Writer::with_capacity(250 + super::METRICS_WIRE_SIZE * self.metrics.len());
        w.uuid(&self.session_id);
        w.uuid(&self.leader_id);
        w.u32(self.round_id);
        w.uuid(&self.host_id);
        w.fixed_str(&self.host_address, ADDRESS_WIRE_LEN, "host_address")?;
        w.u16(self.host_port);
        w.uuid(&self.backup_id);
        w.fixed_str(&self.backup_address, ADDRESS_WIRE_LEN, "backup_address")?;
        w.u16(self.backup_port);
        w.u64(self.elected_at_ns);
        w.u8(self.metrics.len() as u8);
        for m in &self.metrics {
            m.encode_into(&mut w)?;
        }
        Ok(w.into_inner())
    }

    /// Decode from the packed wire form.
    ///
    /// # Errors
    ///
    /// Returns `WireError` on truncation, invalid entries, or trailing
    /// bytes.
    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let mut r = Reader::new(buf);
        let session_id = r.uuid()?;
        let leader_id = r.uuid()?;
        let round_id = r.u32()?;
        let host_id = r.uuid()?;
        let host_address = r.fixed_str(ADDRESS_WIRE_LEN, "host_address")?;
        let host_port = r.u16()?;
        let backup_id = r.uuid()?;
        let backup_address = r.fixed_str(ADDRESS_WIRE_LEN, "backup_address")?;
        let backup_port = r.u16()?;
        let elected_at_ns = r.u64()?;
        let count = r.u8()? as usize;
        if count > MAX_RING_PARTICIPANTS {
            return Err(WireError::InvalidValue {
                field: "num_participants",
            });
        }
        let mut metrics = Vec::with_capacity(count);
        for _ in 0..count {
            metrics.push(ParticipantMetrics::decode_from(&mut r)?);
        }
        r.finish()?;
        Ok(Self {
            session_id,
            leader_id,
            round_id,
            host_id,
            host_address,
            host_port,
            backup_id,
            backup_address,
            backup_port,
            elected_at_ns,
            metrics,
        })
    }
}

/// Participant acknowledgment of a broadcast election result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsAck {
    /// Session the round belongs to.
    pub session_id: Uuid,
    /// The acknowledging participant.
    pub participant_id: Uuid,
    /// Round being acknowledged.
    pub round_id: u32,
    /// 1 if verification succeeded and the result was stored.
    pub ack_status: u8,
    /// Host id the participant stored.
    pub stored_host_id: Uuid,
    /// Backup id the participant stored.
    pub stored_backup_id: Uuid,
}

impl StatsAck {
    /// Encode to the packed wire form.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(69);
        w.uuid(&self.session_id);
        w.uuid(&self.participant_id);
        w.u32(self.round_id);
        w.u8(self.ack_status);
        w.uuid(&self.stored_host_id);
        w.uuid(&self.stored_backup_id);
        w.into_inner()
    }

    /// Decode from the packed wire form.
    ///
    /// # Errors
    ///
    /// Returns `WireError` on truncation or trailing bytes.
    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let mut r = Reader::new(buf);
        let msg = Self {
            session_id: r.uuid()?,
            participant_id: r.uuid()?,
            round_id: r.u32()?,
            ack_status: r.u8()?,
            stored_host_id: r.uuid()?,
            stored_backup_id: r.uuid()?,
        };
        r.finish()?;
        Ok(msg)
    }
}
