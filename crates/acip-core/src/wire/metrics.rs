//! Per-participant network quality measurements.
//!
//! Metrics are measured locally, relayed around the consensus ring, and
//! consumed by the election. The wire form is packed with no padding.

use super::{Reader, Writer};
use crate::ADDRESS_WIRE_LEN;
use crate::error::WireError;
use uuid::Uuid;

/// Packed wire size of one [`ParticipantMetrics`] entry.
///
/// id 16 + tier 1 + upload 4 + rtt 8 + probe 1 + address 64 + port 2 +
/// connection type 1 + measured-at 8 + window 8.
pub const METRICS_WIRE_SIZE: usize = 113;

/// NAT reachability tier, best (LAN) to worst (TURN relay).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum NatTier {
    /// Same-LAN reachability.
    Lan = 0,
    /// Publicly routable address.
    Public = 1,
    /// Port mapped via UPnP.
    Upnp = 2,
    /// Reachable after STUN hole punching.
    Stun = 3,
    /// Only reachable through a TURN relay.
    Turn = 4,
}

impl TryFrom<u8> for NatTier {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, WireError> {
        match value {
            0 => Ok(Self::Lan),
            1 => Ok(Self::Public),
            2 => Ok(Self::Upnp),
            3 => Ok(Self::Stun),
            4 => Ok(Self::Turn),
            _ => Err(WireError::InvalidValue { field: "nat_tier" }),
        }
    }
}

/// How a participant is reachable for media.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum ConnectionType {
    /// Direct TCP/UDP connection.
    #[default]
    Direct = 0,
    /// Via STUN-discovered reflexive address.
    Stun = 1,
    /// Via TURN relay.
    Turn = 2,
    /// Via the elected media host.
    HostRelay = 3,
}

impl TryFrom<u8> for ConnectionType {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, WireError> {
        match value {
            0 => Ok(Self::Direct),
            1 => Ok(Self::Stun),
            2 => Ok(Self::Turn),
            3 => Ok(Self::HostRelay),
            _ => Err(WireError::InvalidValue {
                field: "connection_type",
            }),
        }
    }
}

/// One participant's network quality measurement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantMetrics {
    /// Who was measured.
    pub participant_id: Uuid,
    /// NAT reachability tier.
    pub nat_tier: NatTier,
    /// Measured upload bandwidth.
    pub upload_kbps: u32,
    /// Round-trip time in nanoseconds.
    pub rtt_ns: u64,
    /// STUN probe success percentage, 0..=100.
    pub stun_probe_success_pct: u8,
    /// Public address as observed by probes, if any.
    pub public_address: String,
    /// Public port as observed by probes.
    pub public_port: u16,
    /// How the participant is reachable.
    pub connection_type: ConnectionType,
    /// When the measurement was taken (ns since epoch).
    pub measurement_time_ns: u64,
    /// Measurement window length in nanoseconds.
    pub measurement_window_ns: u64,
}

impl ParticipantMetrics {
    /// Round-trip time in whole milliseconds, as consumed by scoring.
    #[must_use]
    pub fn rtt_ms(&self) -> u64 {
        self.rtt_ns / 1_000_000
    }

    pub(crate) fn encode_into(&self, w: &mut Writer) -> Result<(), WireError> {
        w.uuid(&self.participant_id);
        w.u8(self.nat_tier as u8);
        w.u32(self.upload_kbps);
        w.u64(self.rtt_ns);
        w.u8(self.stun_probe_success_pct);
        w.fixed_str(&self.public_address, ADDRESS_WIRE_LEN, "public_address")?;
        w.u16(self.public_port);
        w.u8(self.connection_type as u8);
        w.u64(self.measurement_time_ns);
        w.u64(self.measurement_window_ns);
        Ok(())
    }

    pub(crate) fn decode_from(r: &mut Reader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            participant_id: r.uuid()?,
            nat_tier: NatTier::try_from(r.u8()?)?,
            upload_kbps: r.u32()?,
            rtt_ns: r.u64()?,
            stun_probe_success_pct: r.u8()?,
            public_address: r.fixed_str(ADDRESS_WIRE_LEN, "public_address")?,
            public_port: r.u16()?,
            connection_type: ConnectionType::try_from(r.u8()?)?,
            measurement_time_ns: r.u64()?,
            measurement_window_ns: r.u64()?,
        })
    }

    /// Encode a single entry to its packed wire form.
    ///
    /// # Errors
    ///
    /// Returns `WireError::FieldTooLong` if the public address exceeds its
    /// fixed wire width.
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let mut w = Writer::with_capacity(METRICS_WIRE_SIZE);
        self.encode_into(&mut w)?;
        Ok(w.into_inner())
    }

    /// Decode a single entry from its packed wire form.
    ///
    /// # Errors
    ///
    /// Returns `WireError` on truncation, invalid enum values, or trailing
    /// bytes.
    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let mut r = Reader::new(buf);
        let metrics = Self::decode_from(&mut r)?;
        r.finish()?;
        Ok(metrics)
    }
}
