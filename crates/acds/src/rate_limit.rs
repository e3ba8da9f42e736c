//! Sliding-window rate limiter, persisted in the session store backend.
//!
//! Events are keyed by `(peer_ip, event_kind)` and stored as individual
//! rows with their timestamp in the key, so counting a window is one
//! prefix scan. Check-and-record is atomic behind an internal gate. A
//! background pruner removes rows older than the window; because the
//! rows live in the same sled database as sessions, limiter history
//! survives server restarts.

use crate::config::RateLimitConfig;
use crate::error::StoreError;
use std::net::IpAddr;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Kinds of rate-limited events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RateEventKind {
    /// SESSION_CREATE requests.
    SessionCreate = 0,
    /// SESSION_LOOKUP requests.
    SessionLookup = 1,
    /// SESSION_JOIN requests.
    SessionJoin = 2,
    /// Protocol probes (discovery pings and the like).
    Probe = 3,
}

impl RateEventKind {
    fn limit(self, config: &RateLimitConfig) -> u32 {
        match self {
            Self::SessionCreate => config.session_create_limit,
            Self::SessionLookup => config.session_lookup_limit,
            Self::SessionJoin => config.session_join_limit,
            Self::Probe => config.probe_limit,
        }
    }
}

fn event_prefix(peer: IpAddr, kind: RateEventKind) -> Vec<u8> {
    let peer_str = peer.to_string();
    let mut key = Vec::with_capacity(peer_str.len() + 2);
    key.extend_from_slice(peer_str.as_bytes());
    key.push(0);
    key.push(kind as u8);
    key
}

/// Timestamp is encoded big-endian directly after the prefix so prefix
/// scans yield rows in time order.
fn event_key(peer: IpAddr, kind: RateEventKind, now_ms: u64, seq: u64) -> Vec<u8> {
    let mut key = event_prefix(peer, kind);
    key.extend_from_slice(&now_ms.to_be_bytes());
    key.extend_from_slice(&seq.to_be_bytes());
    key
}

fn timestamp_of(key: &[u8]) -> Option<u64> {
    if key.len() < 16 {
        return None;
    }
    let ts_start = key.len() - 16;
    let mut ts = [0u8; 8];
    ts.copy_from_slice(&key[ts_start..ts_start + 8]);
    Some(u64::from_be_bytes(ts))
}

/// Sliding-window event limiter.
pub struct RateLimiter {
    tree: sled::Tree,
    config: RateLimitConfig,
    gate: Mutex<()>,
    seq: AtomicU64,
}

impl RateLimiter {
    /// Create a limiter sharing the session store's database.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Db` if the events tree cannot be opened.
    pub fn new(db: &sled::Db, config: RateLimitConfig) -> Result<Self, StoreError> {
        Ok(Self {
            tree: db.open_tree("rate_events")?,
            config,
            gate: Mutex::new(()),
            seq: AtomicU64::new(0),
        })
    }

    fn window_ms(&self) -> u64 {
        self.config.window_secs * 1000
    }

    /// Count events for `(peer, kind)` within the window ending at `now_ms`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Db` on storage failure.
    pub fn count_within(
        &self,
        peer: IpAddr,
        kind: RateEventKind,
        now_ms: u64,
    ) -> Result<u32, StoreError> {
        let cutoff = now_ms.saturating_sub(self.window_ms());
        let mut count = 0;
        for item in self.tree.scan_prefix(event_prefix(peer, kind)) {
            let (key, _) = item?;
            if timestamp_of(&key).is_some_and(|ts| ts >= cutoff && ts <= now_ms) {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Atomically check the window and record the event if accepted.
    ///
    /// Returns `true` if the event was accepted, `false` if suppressed.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Db` on storage failure.
    pub fn check_and_record(
        &self,
        peer: IpAddr,
        kind: RateEventKind,
        now_ms: u64,
    ) -> Result<bool, StoreError> {
        let _gate = self.gate.lock().expect("rate limiter gate poisoned");

        let count = self.count_within(peer, kind, now_ms)?;
        if count >= kind.limit(&self.config) {
            tracing::warn!(%peer, ?kind, count, "rate limit exceeded");
            return Ok(false);
        }

        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        self.tree.insert(event_key(peer, kind, now_ms, seq), &[])?;
        Ok(true)
    }

    /// Remove events older than the window. Returns rows removed.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Db` on storage failure.
    pub fn prune(&self, now_ms: u64) -> Result<usize, StoreError> {
        let cutoff = now_ms.saturating_sub(self.window_ms());
        let stale: Vec<_> = self
            .tree
            .iter()
            .filter_map(|item| item.ok().map(|(k, _)| k))
            .filter(|key| timestamp_of(key).is_some_and(|ts| ts < cutoff))
            .collect();

        let removed = stale.len();
        for key in stale {
            self.tree.remove(key)?;
        }
        if removed > 0 {
            tracing::debug!(removed, "pruned rate limiter history");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(config: RateLimitConfig) -> (RateLimiter, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path()).unwrap();
        (RateLimiter::new(&db, config).unwrap(), dir)
    }

    fn peer() -> IpAddr {
        "203.0.113.77".parse().unwrap()
    }

    #[test]
    fn test_accepts_until_limit() {
        let (limiter, _dir) = limiter(RateLimitConfig {
            session_create_limit: 3,
            ..RateLimitConfig::default()
        });

        for i in 0..3 {
            assert!(
                limiter
                    .check_and_record(peer(), RateEventKind::SessionCreate, 1000 + i)
                    .unwrap()
            );
        }
        assert!(
            !limiter
                .check_and_record(peer(), RateEventKind::SessionCreate, 1004)
                .unwrap()
        );
    }

    #[test]
    fn test_kinds_are_independent() {
        let (limiter, _dir) = limiter(RateLimitConfig {
            session_create_limit: 1,
            ..RateLimitConfig::default()
        });

        assert!(
            limiter
                .check_and_record(peer(), RateEventKind::SessionCreate, 0)
                .unwrap()
        );
        assert!(
            !limiter
                .check_and_record(peer(), RateEventKind::SessionCreate, 1)
                .unwrap()
        );
        // A different kind still has budget.
        assert!(
            limiter
                .check_and_record(peer(), RateEventKind::SessionLookup, 2)
                .unwrap()
        );
    }

    #[test]
    fn test_peers_are_independent() {
        let (limiter, _dir) = limiter(RateLimitConfig {
            session_create_limit: 1,
            ..RateLimitConfig::default()
        });
        let other: IpAddr = "198.51.100.2".parse().unwrap();

        assert!(
            limiter
                .check_and_record(peer(), RateEventKind::SessionCreate, 0)
                .unwrap()
        );
        assert!(
            limiter
                .check_and_record(other, RateEventKind::SessionCreate, 0)
                .unwrap()
        );
    }

    #[test]
    fn test_window_slides() {
        let (limiter, _dir) = limiter(RateLimitConfig {
            window_secs: 10,
            session_create_limit: 1,
            ..RateLimitConfig::default()
        });

        assert!(
            limiter
                .check_and_record(peer(), RateEventKind::SessionCreate, 1000)
                .unwrap()
        );
        assert!(
            !limiter
                .check_and_record(peer(), RateEventKind::SessionCreate, 5000)
                .unwrap()
        );
        // Past the window the old event no longer counts.
        assert!(
            limiter
                .check_and_record(peer(), RateEventKind::SessionCreate, 11_001)
                .unwrap()
        );
    }

    #[test]
    fn test_count_monotone_between_prunes() {
        let (limiter, _dir) = limiter(RateLimitConfig::default());
        let mut last = 0;
        for i in 0..5 {
            limiter
                .check_and_record(peer(), RateEventKind::Probe, 1000 + i)
                .unwrap();
            let count = limiter
                .count_within(peer(), RateEventKind::Probe, 1000 + i)
                .unwrap();
            assert!(count >= last);
            last = count;
        }
        assert_eq!(last, 5);
    }

    #[test]
    fn test_prune_removes_only_stale() {
        let (limiter, _dir) = limiter(RateLimitConfig {
            window_secs: 10,
            ..RateLimitConfig::default()
        });

        limiter
            .check_and_record(peer(), RateEventKind::Probe, 1000)
            .unwrap();
        limiter
            .check_and_record(peer(), RateEventKind::Probe, 20_000)
            .unwrap();

        let removed = limiter.prune(20_000).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(
            limiter
                .count_within(peer(), RateEventKind::Probe, 20_000)
                .unwrap(),
            1
        );
    }

    #[test]
    fn test_history_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let config = RateLimitConfig {
            session_create_limit: 1,
            ..RateLimitConfig::default()
        };
        {
            let db = sled::open(dir.path()).unwrap();
            let limiter = RateLimiter::new(&db, config.clone()).unwrap();
            assert!(
                limiter
                    .check_and_record(peer(), RateEventKind::SessionCreate, 1000)
                    .unwrap()
            );
            db.flush().unwrap();
        }

        let db = sled::open(dir.path()).unwrap();
        let limiter = RateLimiter::new(&db, config).unwrap();
        // The restart did not wipe history: still limited.
        assert!(
            !limiter
                .check_and_record(peer(), RateEventKind::SessionCreate, 2000)
                .unwrap()
        );
    }
}
