//! Durable session catalog on sled.
//!
//! Trees:
//! - `sessions`: session uuid -> bincode [`SessionRecord`]
//! - `session_strings`: session string -> session uuid (uniqueness index)
//! - `participants`: session uuid || participant uuid -> bincode
//!   [`ParticipantRecord`]
//!
//! Rows are bincode-encoded serde structs; schema evolutions append
//! fields. Mutating operations serialize behind one internal lock, so
//! callers never hold locks of their own across store calls.

use crate::config::ServerConfig;
use crate::error::StoreError;
use crate::words;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;
use uuid::Uuid;

/// A host (or backup) endpoint bound to a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostEndpoint {
    /// Hosting participant.
    pub id: Uuid,
    /// Media address.
    pub address: String,
    /// Media port.
    pub port: u16,
    /// How participants reach the host.
    pub connection_type: u8,
}

/// One durable session row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Session uuid, the primary key.
    pub session_id: Uuid,
    /// Human-memorable session string, unique while the session lives.
    pub session_string: String,
    /// Creation wall clock (ms since epoch).
    pub created_at_ms: u64,
    /// Expiry wall clock (ms since epoch).
    pub expires_at_ms: u64,
    /// Capability bitmask (video/audio).
    pub capabilities: u8,
    /// Participant cap.
    pub max_participants: u8,
    /// Media flow type.
    pub session_type: u8,
    /// Whitelisted identity keys, insertion-ordered.
    pub identity_keys: Vec<[u8; 32]>,
    /// Bound media server address, if the session advertises one.
    pub server_address: String,
    /// Bound media server port.
    pub server_port: u16,
    /// Current media host.
    pub host: Option<HostEndpoint>,
    /// Pre-elected backup host.
    pub backup: Option<HostEndpoint>,
    /// Pre-elected future host from the last election.
    pub future_host_id: Option<Uuid>,
    /// Whether the session is mid host-migration.
    pub in_migration: bool,
}

/// One durable membership row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantRecord {
    /// Session joined.
    pub session_id: Uuid,
    /// Assigned participant uuid.
    pub participant_id: Uuid,
    /// Identity key presented at join.
    pub identity_key: [u8; 32],
    /// Join wall clock (ms since epoch).
    pub joined_at_ms: u64,
    /// Last activity wall clock (ms since epoch).
    pub last_seen_ms: u64,
}

/// Parameters for session creation, accumulated by the dispatch layer.
#[derive(Debug, Clone)]
pub struct CreateRequest {
    /// Whitelisted identity keys, in presentation order.
    pub identity_keys: Vec<[u8; 32]>,
    /// Capability bitmask.
    pub capabilities: u8,
    /// Participant cap; zero means the server default.
    pub max_participants: u8,
    /// Media flow type.
    pub session_type: u8,
    /// Advertised media server address.
    pub server_address: String,
    /// Advertised media server port.
    pub server_port: u16,
}

/// What a successful create hands back to the client.
#[derive(Debug, Clone)]
pub struct CreateOutcome {
    /// New session uuid.
    pub session_id: Uuid,
    /// Generated session string.
    pub session_string: String,
    /// STUN policy from server config.
    pub stun_servers: Vec<String>,
    /// TURN policy from server config.
    pub turn_servers: Vec<String>,
}

/// What a successful join hands back.
#[derive(Debug, Clone, Copy)]
pub struct JoinOutcome {
    /// Joined session.
    pub session_id: Uuid,
    /// Assigned participant uuid.
    pub participant_id: Uuid,
}

fn participant_key(session_id: Uuid, participant_id: Uuid) -> [u8; 32] {
    let mut key = [0u8; 32];
    key[..16].copy_from_slice(session_id.as_bytes());
    key[16..].copy_from_slice(participant_id.as_bytes());
    key
}

/// Durable session catalog.
pub struct SessionStore {
    db: sled::Db,
    sessions: sled::Tree,
    strings: sled::Tree,
    participants: sled::Tree,
    write_gate: Mutex<()>,
}

impl SessionStore {
    /// Open (or create) the store at a directory path.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Db` if sled cannot open the directory.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        Ok(Self {
            sessions: db.open_tree("sessions")?,
            strings: db.open_tree("session_strings")?,
            participants: db.open_tree("participants")?,
            db,
            write_gate: Mutex::new(()),
        })
    }

    /// The shared database handle; the rate limiter keeps its tree here
    /// so limiter history survives restarts alongside sessions.
    #[must_use]
    pub fn db(&self) -> &sled::Db {
        &self.db
    }

    fn put_session(&self, record: &SessionRecord) -> Result<(), StoreError> {
        let bytes = bincode::serialize(record)?;
        self.sessions
            .insert(record.session_id.as_bytes(), bytes)?;
        Ok(())
    }

    fn get_session(&self, session_id: Uuid) -> Result<Option<SessionRecord>, StoreError> {
        match self.sessions.get(session_id.as_bytes())? {
            Some(raw) => Ok(Some(bincode::deserialize(&raw)?)),
            None => Ok(None),
        }
    }

    /// Create a session.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NoKeys`, `TooManyKeys`, or `DuplicateKey` on
    /// whitelist violations, `StoreError::Db` on storage failure.
    pub fn create(
        &self,
        req: CreateRequest,
        config: &ServerConfig,
        now_ms: u64,
    ) -> Result<CreateOutcome, StoreError> {
        if req.identity_keys.is_empty() {
            return Err(StoreError::NoKeys);
        }
        if req.identity_keys.len() > config.max_identity_keys {
            return Err(StoreError::TooManyKeys {
                given: req.identity_keys.len(),
                max: config.max_identity_keys,
            });
        }
        for (i, key) in req.identity_keys.iter().enumerate() {
            if req.identity_keys[..i].contains(key) {
                return Err(StoreError::DuplicateKey);
            }
        }

        let _gate = self.write_gate.lock().expect("store gate poisoned");

        let session_id = Uuid::new_v4();
        let mut rng = rand::thread_rng();
        let session_string = loop {
            let candidate = words::session_string(&mut rng);
            if !self.strings.contains_key(candidate.as_bytes())? {
                break candidate;
            }
        };

        let max_participants = if req.max_participants == 0 {
            config.default_max_participants
        } else {
            req.max_participants
        };

        let record = SessionRecord {
            session_id,
            session_string: session_string.clone(),
            created_at_ms: now_ms,
            expires_at_ms: now_ms + config.session_ttl_secs * 1000,
            capabilities: req.capabilities,
            max_participants,
            session_type: req.session_type,
            identity_keys: req.identity_keys,
            server_address: req.server_address,
            server_port: req.server_port,
            host: None,
            backup: None,
            future_host_id: None,
            in_migration: false,
        };

        self.put_session(&record)?;
        self.strings
            .insert(session_string.as_bytes(), session_id.as_bytes())?;

        tracing::info!(
            session = %session_id,
            string = %session_string,
            keys = record.identity_keys.len(),
            "session created"
        );
        Ok(CreateOutcome {
            session_id,
            session_string,
            stun_servers: config.stun_servers.clone(),
            turn_servers: config.turn_servers.clone(),
        })
    }

    /// Resolve a session string. Safe on missing strings.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Db` on storage failure only.
    pub fn lookup(&self, session_string: &str) -> Result<Option<SessionRecord>, StoreError> {
        match self.strings.get(session_string.as_bytes())? {
            Some(raw) => {
                let mut id = [0u8; 16];
                id.copy_from_slice(&raw);
                self.get_session(Uuid::from_bytes(id))
            }
            None => Ok(None),
        }
    }

    /// Join a session by string with a presented identity key.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound`, `KeyNotWhitelisted`, or
    /// `CapacityExhausted` on domain rejections.
    pub fn join(
        &self,
        session_string: &str,
        identity_key: &[u8; 32],
        now_ms: u64,
    ) -> Result<JoinOutcome, StoreError> {
        let _gate = self.write_gate.lock().expect("store gate poisoned");

        let record = self
            .lookup(session_string)?
            .ok_or(StoreError::NotFound)?;
        if !record.identity_keys.contains(identity_key) {
            return Err(StoreError::KeyNotWhitelisted);
        }
        if self.participant_count(record.session_id)? >= usize::from(record.max_participants) {
            return Err(StoreError::CapacityExhausted);
        }

        let participant_id = Uuid::new_v4();
        let row = ParticipantRecord {
            session_id: record.session_id,
            participant_id,
            identity_key: *identity_key,
            joined_at_ms: now_ms,
            last_seen_ms: now_ms,
        };
        self.participants.insert(
            participant_key(record.session_id, participant_id),
            bincode::serialize(&row)?,
        )?;

        tracing::info!(
            session = %record.session_id,
            participant = %participant_id,
            "participant joined"
        );
        Ok(JoinOutcome {
            session_id: record.session_id,
            participant_id,
        })
    }

    /// Remove a participant from a session.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Db` on storage failure.
    pub fn leave(&self, session_id: Uuid, participant_id: Uuid) -> Result<(), StoreError> {
        let _gate = self.write_gate.lock().expect("store gate poisoned");
        self.participants
            .remove(participant_key(session_id, participant_id))?;
        tracing::debug!(session = %session_id, participant = %participant_id, "participant left");
        Ok(())
    }

    /// Record a host announcement, clearing any in-flight migration.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` for an unknown session.
    pub fn update_host(&self, session_id: Uuid, host: HostEndpoint) -> Result<(), StoreError> {
        let _gate = self.write_gate.lock().expect("store gate poisoned");
        let mut record = self.get_session(session_id)?.ok_or(StoreError::NotFound)?;
        record.host = Some(host);
        record.in_migration = false;
        self.put_session(&record)
    }

    /// Persist a relayed election result: the elected host, the backup,
    /// and the backup's id as the pre-elected future host for failover.
    /// Clears any in-flight migration.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` for an unknown session.
    pub fn record_election(
        &self,
        session_id: Uuid,
        host: HostEndpoint,
        backup: HostEndpoint,
    ) -> Result<(), StoreError> {
        let _gate = self.write_gate.lock().expect("store gate poisoned");
        let mut record = self.get_session(session_id)?.ok_or(StoreError::NotFound)?;
        record.future_host_id = Some(backup.id);
        record.host = Some(host);
        record.backup = Some(backup);
        record.in_migration = false;
        self.put_session(&record)
    }

    /// Mark a session as migrating: `in_migration = true`, host cleared.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` for an unknown session.
    pub fn start_migration(&self, session_id: Uuid) -> Result<(), StoreError> {
        let _gate = self.write_gate.lock().expect("store gate poisoned");
        let mut record = self.get_session(session_id)?.ok_or(StoreError::NotFound)?;
        record.in_migration = true;
        record.host = None;
        self.put_session(&record)
    }

    /// Clear host state after a migration timed out.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` for an unknown session.
    pub fn clear_host(&self, session_id: Uuid) -> Result<(), StoreError> {
        let _gate = self.write_gate.lock().expect("store gate poisoned");
        let mut record = self.get_session(session_id)?.ok_or(StoreError::NotFound)?;
        record.host = None;
        record.in_migration = false;
        self.put_session(&record)
    }

    /// Fetch a detached copy of a session row by uuid.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Db` on storage failure.
    pub fn find_by_id(&self, session_id: Uuid) -> Result<Option<SessionRecord>, StoreError> {
        self.get_session(session_id)
    }

    /// Count joined participants.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Db` on storage failure.
    pub fn participant_count(&self, session_id: Uuid) -> Result<usize, StoreError> {
        let mut count = 0;
        for item in self.participants.scan_prefix(session_id.as_bytes()) {
            item?;
            count += 1;
        }
        Ok(count)
    }

    /// Fetch every membership row of a session.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Db` or `Codec` on storage failure.
    pub fn participants_of(&self, session_id: Uuid) -> Result<Vec<ParticipantRecord>, StoreError> {
        let mut rows = Vec::new();
        for item in self.participants.scan_prefix(session_id.as_bytes()) {
            let (_, raw) = item?;
            rows.push(bincode::deserialize(&raw)?);
        }
        Ok(rows)
    }

    /// Refresh a participant's last-seen clock.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Db` or `Codec` on storage failure.
    pub fn touch_participant(
        &self,
        session_id: Uuid,
        participant_id: Uuid,
        now_ms: u64,
    ) -> Result<(), StoreError> {
        let key = participant_key(session_id, participant_id);
        if let Some(raw) = self.participants.get(key)? {
            let mut row: ParticipantRecord = bincode::deserialize(&raw)?;
            row.last_seen_ms = now_ms;
            self.participants.insert(key, bincode::serialize(&row)?)?;
        }
        Ok(())
    }

    /// Drop expired sessions, their string index entries, and their
    /// membership rows. Returns how many sessions were removed.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Db` or `Codec` on storage failure.
    pub fn cleanup_expired(&self, now_ms: u64) -> Result<usize, StoreError> {
        let _gate = self.write_gate.lock().expect("store gate poisoned");

        let mut expired = Vec::new();
        for item in self.sessions.iter() {
            let (_, raw) = item?;
            let record: SessionRecord = bincode::deserialize(&raw)?;
            if record.expires_at_ms <= now_ms {
                expired.push(record);
            }
        }

        for record in &expired {
            self.sessions.remove(record.session_id.as_bytes())?;
            self.strings.remove(record.session_string.as_bytes())?;
            let member_keys: Vec<_> = self
                .participants
                .scan_prefix(record.session_id.as_bytes())
                .filter_map(|item| item.ok().map(|(k, _)| k))
                .collect();
            for key in member_keys {
                self.participants.remove(key)?;
            }
            tracing::debug!(session = %record.session_id, "expired session removed");
        }
        Ok(expired.len())
    }

    /// Flush sled to disk; called on shutdown.
    pub fn flush(&self) {
        if let Err(e) = self.db.flush() {
            tracing::warn!(error = %e, "session store flush failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> (SessionStore, tempfile::TempDir, ServerConfig) {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(dir.path()).unwrap();
        (store, dir, ServerConfig::default())
    }

    fn request(keys: Vec<[u8; 32]>) -> CreateRequest {
        CreateRequest {
            identity_keys: keys,
            capabilities: 0b11,
            max_participants: 4,
            session_type: 1,
            server_address: String::new(),
            server_port: 0,
        }
    }

    #[test]
    fn test_create_then_lookup() {
        let (store, _dir, config) = test_store();
        let outcome = store.create(request(vec![[1; 32]]), &config, 1000).unwrap();

        let record = store.lookup(&outcome.session_string).unwrap().unwrap();
        assert_eq!(record.session_id, outcome.session_id);
        assert_eq!(record.identity_keys, vec![[1; 32]]);
        assert_eq!(record.max_participants, 4);
        assert!(!record.in_migration);
        assert_eq!(outcome.stun_servers, config.stun_servers);
    }

    #[test]
    fn test_lookup_missing_is_none() {
        let (store, _dir, _config) = test_store();
        assert!(store.lookup("no-such-session").unwrap().is_none());
    }

    #[test]
    fn test_create_rejects_bad_whitelists() {
        let (store, _dir, config) = test_store();

        assert!(matches!(
            store.create(request(vec![]), &config, 0),
            Err(StoreError::NoKeys)
        ));
        assert!(matches!(
            store.create(request(vec![[1; 32]; 9]), &config, 0),
            Err(StoreError::TooManyKeys { given: 9, max: 8 })
        ));
        assert!(matches!(
            store.create(request(vec![[1; 32], [2; 32], [1; 32]]), &config, 0),
            Err(StoreError::DuplicateKey)
        ));
    }

    #[test]
    fn test_join_happy_path() {
        let (store, _dir, config) = test_store();
        let outcome = store.create(request(vec![[1; 32]]), &config, 0).unwrap();

        let joined = store.join(&outcome.session_string, &[1; 32], 5).unwrap();
        assert_eq!(joined.session_id, outcome.session_id);
        assert_eq!(store.participant_count(outcome.session_id).unwrap(), 1);

        let rows = store.participants_of(outcome.session_id).unwrap();
        assert_eq!(rows[0].identity_key, [1; 32]);
        assert_eq!(rows[0].joined_at_ms, 5);
    }

    #[test]
    fn test_join_rejections() {
        let (store, _dir, config) = test_store();
        let outcome = store
            .create(
                CreateRequest {
                    max_participants: 1,
                    ..request(vec![[1; 32]])
                },
                &config,
                0,
            )
            .unwrap();

        assert!(matches!(
            store.join("absent-string-here", &[1; 32], 0),
            Err(StoreError::NotFound)
        ));
        assert!(matches!(
            store.join(&outcome.session_string, &[9; 32], 0),
            Err(StoreError::KeyNotWhitelisted)
        ));

        store.join(&outcome.session_string, &[1; 32], 0).unwrap();
        assert!(matches!(
            store.join(&outcome.session_string, &[1; 32], 0),
            Err(StoreError::CapacityExhausted)
        ));
    }

    #[test]
    fn test_leave_frees_capacity() {
        let (store, _dir, config) = test_store();
        let outcome = store
            .create(
                CreateRequest {
                    max_participants: 1,
                    ..request(vec![[1; 32]])
                },
                &config,
                0,
            )
            .unwrap();

        let joined = store.join(&outcome.session_string, &[1; 32], 0).unwrap();
        store.leave(joined.session_id, joined.participant_id).unwrap();
        assert_eq!(store.participant_count(outcome.session_id).unwrap(), 0);
        assert!(store.join(&outcome.session_string, &[1; 32], 0).is_ok());
    }

    #[test]
    fn test_host_lifecycle() {
        let (store, _dir, config) = test_store();
        let outcome = store.create(request(vec![[1; 32]]), &config, 0).unwrap();
        let session = outcome.session_id;
        let host = HostEndpoint {
            id: Uuid::from_bytes([7; 16]),
            address: "192.0.2.50".to_string(),
            port: 8100,
            connection_type: 0,
        };

        store.update_host(session, host.clone()).unwrap();
        let record = store.find_by_id(session).unwrap().unwrap();
        assert_eq!(record.host, Some(host));
        assert!(!record.in_migration);

        store.start_migration(session).unwrap();
        let record = store.find_by_id(session).unwrap().unwrap();
        assert!(record.in_migration);
        // in_migration implies no host.
        assert!(record.host.is_none());

        store.clear_host(session).unwrap();
        let record = store.find_by_id(session).unwrap().unwrap();
        assert!(!record.in_migration);
        assert!(record.host.is_none());
    }

    #[test]
    fn test_update_host_clears_migration() {
        let (store, _dir, config) = test_store();
        let outcome = store.create(request(vec![[1; 32]]), &config, 0).unwrap();
        store.start_migration(outcome.session_id).unwrap();

        store
            .update_host(
                outcome.session_id,
                HostEndpoint {
                    id: Uuid::from_bytes([8; 16]),
                    address: "192.0.2.51".to_string(),
                    port: 8101,
                    connection_type: 0,
                },
            )
            .unwrap();
        let record = store.find_by_id(outcome.session_id).unwrap().unwrap();
        assert!(!record.in_migration);
        assert!(record.host.is_some());
    }

    #[test]
    fn test_record_election_persists_backup_and_future_host() {
        let (store, _dir, config) = test_store();
        let outcome = store.create(request(vec![[1; 32]]), &config, 0).unwrap();
        store.start_migration(outcome.session_id).unwrap();

        let host = HostEndpoint {
            id: Uuid::from_bytes([3; 16]),
            address: "10.0.0.3".to_string(),
            port: 7003,
            connection_type: 0,
        };
        let backup = HostEndpoint {
            id: Uuid::from_bytes([4; 16]),
            address: "10.0.0.4".to_string(),
            port: 7004,
            connection_type: 0,
        };
        store
            .record_election(outcome.session_id, host.clone(), backup.clone())
            .unwrap();

        let record = store.find_by_id(outcome.session_id).unwrap().unwrap();
        assert_eq!(record.host, Some(host));
        assert_eq!(record.future_host_id, Some(backup.id));
        assert_eq!(record.backup, Some(backup));
        assert!(!record.in_migration);

        assert!(matches!(
            store.record_election(
                Uuid::from_bytes([9; 16]),
                HostEndpoint {
                    id: Uuid::nil(),
                    address: String::new(),
                    port: 0,
                    connection_type: 0,
                },
                HostEndpoint {
                    id: Uuid::nil(),
                    address: String::new(),
                    port: 0,
                    connection_type: 0,
                },
            ),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn test_cleanup_expired() {
        let (store, _dir, config) = test_store();
        let outcome = store.create(request(vec![[1; 32]]), &config, 0).unwrap();
        store.join(&outcome.session_string, &[1; 32], 0).unwrap();

        let ttl_ms = config.session_ttl_secs * 1000;
        assert_eq!(store.cleanup_expired(ttl_ms - 1).unwrap(), 0);
        assert_eq!(store.cleanup_expired(ttl_ms).unwrap(), 1);

        assert!(store.lookup(&outcome.session_string).unwrap().is_none());
        assert_eq!(store.participant_count(outcome.session_id).unwrap(), 0);
    }

    #[test]
    fn test_persistence_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig::default();
        let session_string = {
            let store = SessionStore::open(dir.path()).unwrap();
            let outcome = store.create(request(vec![[3; 32]]), &config, 0).unwrap();
            store.flush();
            outcome.session_string
        };

        let store = SessionStore::open(dir.path()).unwrap();
        let record = store.lookup(&session_string).unwrap().unwrap();
        assert_eq!(record.identity_keys, vec![[3; 32]]);
    }

    #[test]
    fn test_session_strings_are_unique() {
        let (store, _dir, config) = test_store();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..16 {
            let outcome = store.create(request(vec![[1; 32]]), &config, 0).unwrap();
            assert!(seen.insert(outcome.session_string));
        }
    }

    #[test]
    fn test_default_max_participants_applied() {
        let (store, _dir, config) = test_store();
        let outcome = store
            .create(
                CreateRequest {
                    max_participants: 0,
                    ..request(vec![[1; 32]])
                },
                &config,
                0,
            )
            .unwrap();
        let record = store.find_by_id(outcome.session_id).unwrap().unwrap();
        assert_eq!(record.max_participants, config.default_max_participants);
    }
}
