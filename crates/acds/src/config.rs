//! Server configuration: TOML file with CLI overrides.

use crate::error::ServerError;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::{Path, PathBuf};

/// Rate limiter thresholds, per peer IP within the sliding window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Sliding window length in seconds.
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    /// SESSION_CREATE events allowed per window.
    #[serde(default = "default_create_limit")]
    pub session_create_limit: u32,
    /// SESSION_LOOKUP events allowed per window.
    #[serde(default = "default_lookup_limit")]
    pub session_lookup_limit: u32,
    /// SESSION_JOIN events allowed per window.
    #[serde(default = "default_join_limit")]
    pub session_join_limit: u32,
    /// Protocol probe events allowed per window.
    #[serde(default = "default_probe_limit")]
    pub probe_limit: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            session_create_limit: default_create_limit(),
            session_lookup_limit: default_lookup_limit(),
            session_join_limit: default_join_limit(),
            probe_limit: default_probe_limit(),
        }
    }
}

fn default_window_secs() -> u64 {
    3600
}
fn default_create_limit() -> u32 {
    20
}
fn default_lookup_limit() -> u32 {
    120
}
fn default_join_limit() -> u32 {
    60
}
fn default_probe_limit() -> u32 {
    240
}

/// Discovery server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// TCP port for ACIP clients.
    #[serde(default = "default_port")]
    pub port: u16,
    /// TCP port for WebSocket clients.
    #[serde(default = "default_websocket_port")]
    pub websocket_port: u16,
    /// IPv4 bind address; both families unspecified when neither is set.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub address: Option<Ipv4Addr>,
    /// IPv6 bind address.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub address6: Option<Ipv6Addr>,
    /// Directory for the durable session store.
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    /// Reject SESSION_CREATE without a valid server-identity signature.
    #[serde(default)]
    pub require_server_identity: bool,
    /// Reject SESSION_JOIN without a valid client-identity signature.
    #[serde(default)]
    pub require_client_identity: bool,
    /// Keep the host machine awake while serving.
    #[serde(default = "default_true")]
    pub keepawake: bool,
    /// File holding the server's Ed25519 identity seed (hex). A fresh
    /// identity is generated when unset or missing.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub identity_seed_file: Option<PathBuf>,
    /// STUN servers handed to clients in SESSION_CREATED.
    #[serde(default = "default_stun_servers")]
    pub stun_servers: Vec<String>,
    /// TURN servers handed to clients in SESSION_CREATED.
    #[serde(default)]
    pub turn_servers: Vec<String>,
    /// Identity keys a session may whitelist.
    #[serde(default = "default_max_identity_keys")]
    pub max_identity_keys: usize,
    /// Participant cap applied when a create request says zero.
    #[serde(default = "default_max_participants")]
    pub default_max_participants: u8,
    /// Session lifetime in seconds.
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,
    /// Signed-timestamp acceptance window in seconds.
    #[serde(default = "default_timestamp_window")]
    pub timestamp_window_secs: u64,
    /// Rate limiter thresholds.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// Host migrations older than this are cleared.
    #[serde(default = "default_migration_timeout")]
    pub migration_timeout_ms: u64,
    /// Per-socket read deadline in seconds.
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,
    /// Grace period for handler drain on shutdown, in seconds.
    #[serde(default = "default_drain_secs")]
    pub shutdown_drain_secs: u64,
}

fn default_port() -> u16 {
    27224
}
fn default_websocket_port() -> u16 {
    27225
}
fn default_database_path() -> PathBuf {
    PathBuf::from("acds-db")
}
fn default_true() -> bool {
    true
}
fn default_stun_servers() -> Vec<String> {
    vec!["stun:stun.l.google.com:19302".to_string()]
}
fn default_max_identity_keys() -> usize {
    8
}
fn default_max_participants() -> u8 {
    16
}
fn default_session_ttl() -> u64 {
    24 * 3600
}
fn default_timestamp_window() -> u64 {
    300
}
fn default_migration_timeout() -> u64 {
    30_000
}
fn default_read_timeout() -> u64 {
    30
}
fn default_drain_secs() -> u64 {
    10
}

impl Default for ServerConfig {
    fn default() -> Self {
        // Serde defaults are the single source of truth.
        toml::from_str("").expect("default config must deserialize")
    }
}

impl ServerConfig {
    /// Load from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Config` if the file is unreadable or invalid.
    pub fn load(path: &Path) -> Result<Self, ServerError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ServerError::Config(format!("cannot read {}: {e}", path.display())))?;
        toml::from_str(&raw)
            .map_err(|e| ServerError::Config(format!("cannot parse {}: {e}", path.display())))
    }

    /// Load from a TOML file, or defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Config` for an existing but invalid file.
    pub fn load_or_default(path: &Path) -> Result<Self, ServerError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Sanity-check the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Config` with the first violation found.
    pub fn validate(&self) -> Result<(), ServerError> {
        if self.port == self.websocket_port {
            return Err(ServerError::Config(
                "port and websocket-port must differ".to_string(),
            ));
        }
        if self.max_identity_keys == 0 {
            return Err(ServerError::Config(
                "max_identity_keys must be at least 1".to_string(),
            ));
        }
        if self.max_identity_keys > acip_core::MAX_IDENTITY_KEYS {
            return Err(ServerError::Config(format!(
                "max_identity_keys must not exceed {}",
                acip_core::MAX_IDENTITY_KEYS
            )));
        }
        if self.default_max_participants == 0 {
            return Err(ServerError::Config(
                "default_max_participants must be at least 1".to_string(),
            ));
        }
        if self.rate_limit.window_secs == 0 {
            return Err(ServerError::Config(
                "rate_limit.window_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ServerConfig::default();
        config.validate().unwrap();
        assert_eq!(config.port, 27224);
        assert_eq!(config.websocket_port, 27225);
        assert_eq!(config.max_identity_keys, 8);
        assert!(config.keepawake);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: ServerConfig = toml::from_str(
            r#"
            port = 9000
            require_server_identity = true

            [rate_limit]
            session_create_limit = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.port, 9000);
        assert!(config.require_server_identity);
        assert_eq!(config.rate_limit.session_create_limit, 5);
        // Untouched fields keep defaults.
        assert_eq!(config.websocket_port, 27225);
        assert_eq!(config.rate_limit.window_secs, 3600);
    }

    #[test]
    fn test_port_collision_rejected() {
        let config = ServerConfig {
            websocket_port: 27224,
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_identity_keys_rejected() {
        let config = ServerConfig {
            max_identity_keys: 0,
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
