//! In-memory host-migration contexts.
//!
//! When a host is reported lost, the server tracks a migration context
//! and waits: clients already know the pre-elected backup from the last
//! election result and fail over on their own. The server's only job is
//! timeout hygiene — a migration that never concludes gets its session's
//! host state cleared so the session is queryable and joinable again.
//!
//! Contexts live in a fixed-size array owned by the server; removal
//! compacts by shift-down. At most [`MAX_MIGRATIONS`] run concurrently;
//! beyond that the least-recently-started context is replaced with a
//! warning.

use uuid::Uuid;

/// Concurrent migration contexts the server will track.
pub const MAX_MIGRATIONS: usize = 32;

/// One in-flight host migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationContext {
    /// Session whose host is being replaced.
    pub session_id: Uuid,
    /// When the migration started (ns since epoch).
    pub migration_start_ns: u64,
}

/// Fixed-capacity migration table.
#[derive(Debug, Default)]
pub struct MigrationTable {
    entries: Vec<MigrationContext>,
}

impl MigrationTable {
    /// An empty table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Vec::with_capacity(MAX_MIGRATIONS),
        }
    }

    /// Begin or refresh a migration for a session.
    ///
    /// Refreshing restarts the clock. When the table is full, the oldest
    /// context is replaced and a warning is logged; the call still
    /// succeeds.
    pub fn begin(&mut self, session_id: Uuid, now_ns: u64) {
        if let Some(existing) = self
            .entries
            .iter_mut()
            .find(|c| c.session_id == session_id)
        {
            existing.migration_start_ns = now_ns;
            return;
        }

        if self.entries.len() >= MAX_MIGRATIONS {
            let oldest = self
                .entries
                .iter()
                .enumerate()
                .min_by_key(|(_, c)| c.migration_start_ns)
                .map(|(i, _)| i)
                .unwrap_or(0);
            let evicted = self.entries.remove(oldest);
            tracing::warn!(
                evicted_session = %evicted.session_id,
                new_session = %session_id,
                "migration table full, replacing oldest context"
            );
        }

        self.entries.push(MigrationContext {
            session_id,
            migration_start_ns: now_ns,
        });
    }

    /// Drop the context for a session, e.g. when a new host announces.
    pub fn remove(&mut self, session_id: Uuid) -> bool {
        match self.entries.iter().position(|c| c.session_id == session_id) {
            Some(idx) => {
                // Shift-down removal keeps the array compact.
                self.entries.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Remove and return every context older than `timeout_ns`.
    pub fn sweep(&mut self, now_ns: u64, timeout_ns: u64) -> Vec<Uuid> {
        let mut expired = Vec::new();
        let mut idx = 0;
        while idx < self.entries.len() {
            if now_ns.saturating_sub(self.entries[idx].migration_start_ns) > timeout_ns {
                expired.push(self.entries.remove(idx).session_id);
            } else {
                idx += 1;
            }
        }
        expired
    }

    /// Whether a session is currently migrating.
    #[must_use]
    pub fn contains(&self, session_id: Uuid) -> bool {
        self.entries.iter().any(|c| c.session_id == session_id)
    }

    /// Active context count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no migrations are in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uuid(b: u8) -> Uuid {
        Uuid::from_bytes([b; 16])
    }

    #[test]
    fn test_begin_and_sweep() {
        let mut table = MigrationTable::new();
        table.begin(uuid(1), 1000);
        table.begin(uuid(2), 2000);

        // Neither is old enough yet.
        assert!(table.sweep(2500, 1_000_000).is_empty());
        assert_eq!(table.len(), 2);

        let expired = table.sweep(1_002_001, 1_000_000);
        assert_eq!(expired, vec![uuid(1)]);
        assert_eq!(table.len(), 1);
        assert!(table.contains(uuid(2)));
    }

    #[test]
    fn test_refresh_restarts_clock() {
        let mut table = MigrationTable::new();
        table.begin(uuid(1), 1000);
        table.begin(uuid(1), 500_000);
        assert_eq!(table.len(), 1);

        // Would have expired from the original start, not the refresh.
        assert!(table.sweep(600_000, 500_000).is_empty());
    }

    #[test]
    fn test_remove_on_host_announcement() {
        let mut table = MigrationTable::new();
        table.begin(uuid(1), 0);
        assert!(table.remove(uuid(1)));
        assert!(!table.remove(uuid(1)));
        assert!(table.is_empty());
    }

    #[test]
    fn test_capacity_32_succeeds_33_replaces_oldest() {
        let mut table = MigrationTable::new();
        for i in 0..32u8 {
            table.begin(uuid(i), u64::from(i) * 100);
        }
        assert_eq!(table.len(), 32);
        assert!(table.contains(uuid(0)));

        // The 33rd replaces the oldest (uuid(0)) without failing.
        table.begin(uuid(99), 10_000);
        assert_eq!(table.len(), 32);
        assert!(!table.contains(uuid(0)));
        assert!(table.contains(uuid(99)));
    }

    #[test]
    fn test_sweep_compacts_in_order() {
        let mut table = MigrationTable::new();
        table.begin(uuid(1), 100);
        table.begin(uuid(2), 10_000);
        table.begin(uuid(3), 200);

        let expired = table.sweep(10_500, 1_000);
        assert_eq!(expired, vec![uuid(1), uuid(3)]);
        assert_eq!(table.len(), 1);
        assert!(table.contains(uuid(2)));
    }
}
