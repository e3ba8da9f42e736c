//! Deterministic host election over participant metrics.
//!
//! Scoring is a pure function of one metrics row, ranking is score
//! descending with a byte-wise UUID ascending tie-break, so any
//! permutation of the same metric set elects the same pair. Verification
//! is the identical computation plus an equality check, letting every
//! participant validate a broadcast result independently.

use crate::error::ConsensusError;
use acip_core::wire::ParticipantMetrics;
use uuid::Uuid;

/// Elected host and pre-elected failover backup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElectedPair {
    /// The media-relay host.
    pub host: Uuid,
    /// The failover target, pre-elected so recovery is instantaneous.
    pub backup: Uuid,
}

/// Scalar quality score for one participant.
///
/// `(4 - nat_tier) * 1000 + upload_kbps / 10 + (500 - rtt_ms) +
/// stun_probe_success_pct`. NAT reachability dominates, then upload
/// bandwidth; latency and probe reliability refine. A slow link can go
/// negative on the latency term, which is fine — scores only rank.
#[must_use]
pub fn score(metrics: &ParticipantMetrics) -> i64 {
    let tier = metrics.nat_tier as u8;
    i64::from(4 - tier) * 1000
        + i64::from(metrics.upload_kbps / 10)
        + (500 - metrics.rtt_ms() as i64)
        + i64::from(metrics.stun_probe_success_pct)
}

/// Elect host and backup from a metric set.
///
/// A single participant is elected as both host and backup. Duplicate
/// rows for one participant are collapsed to the first occurrence.
///
/// # Errors
///
/// Returns `ConsensusError::NoMetrics` on an empty set.
pub fn choose_hosts(metrics: &[ParticipantMetrics]) -> Result<ElectedPair, ConsensusError> {
    if metrics.is_empty() {
        return Err(ConsensusError::NoMetrics);
    }

    let mut ranked: Vec<(i64, Uuid)> = Vec::with_capacity(metrics.len());
    for m in metrics {
        if !ranked.iter().any(|(_, id)| *id == m.participant_id) {
            ranked.push((score(m), m.participant_id));
        }
    }
    // Highest score first; smaller UUID wins ties.
    ranked.sort_unstable_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

    let host = ranked[0].1;
    let backup = if ranked.len() > 1 { ranked[1].1 } else { host };
    Ok(ElectedPair { host, backup })
}

/// Verify an announced result against the same metric set.
#[must_use]
pub fn verify(metrics: &[ParticipantMetrics], host: Uuid, backup: Uuid) -> bool {
    matches!(
        choose_hosts(metrics),
        Ok(pair) if pair.host == host && pair.backup == backup
    )
}
