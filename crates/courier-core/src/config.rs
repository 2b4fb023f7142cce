//! Configuration system for courier.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $COURIER_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/courier/config.toml
//!   3. ~/.config/courier/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CourierConfig {
    pub node: NodeConfig,
    pub session: SessionConfig,
    pub security: SecurityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Name of this broker node. Clients may not log in under this name.
    pub node_id: String,
    /// IP embedded in generated session tokens. Empty = auto-detect.
    pub advertised_ip: String,
    /// Port of the admin HTTP API (bound on 127.0.0.1).
    pub api_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Max simultaneous sessions per login name, unless a connect overrides it.
    pub max_sessions: usize,
    /// Idle expiry of a session in milliseconds. 0 = never expires.
    pub timeout_ms: u64,
    /// Capacity of every per-session callback queue.
    pub callback_queue_max_entries: usize,
    /// Capacity of every per-subject holding queue.
    pub subject_queue_max_entries: usize,
    /// Delay before an idle subject (no sessions, empty queue) is evicted. 0 = immediately.
    pub subject_eviction_delay_ms: u64,
    /// Interval of the daemon's session table log line. 0 = disabled.
    pub snapshot_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Plugin used when a connect names none.
    pub default_plugin_type: String,
    pub default_plugin_version: String,
    /// Accept any password for any login name.
    pub allow_anonymous: bool,
    /// Login/password table of the built-in plugin.
    pub users: Vec<UserEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserEntry {
    pub login: String,
    pub password: String,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: "courier".to_string(),
            advertised_ip: String::new(),
            api_port: 9101,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_sessions: 10,
            timeout_ms: 86_400_000, // 1 day
            callback_queue_max_entries: 1000,
            subject_queue_max_entries: 1000,
            subject_eviction_delay_ms: 0,
            snapshot_interval_secs: 30,
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            default_plugin_type: "simple".to_string(),
            default_plugin_version: "1.0".to_string(),
            allow_anonymous: false,
            users: Vec::new(),
        }
    }
}

impl SessionConfig {
    /// Session expiry, `None` when sessions never expire.
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }

    pub fn eviction_delay(&self) -> Duration {
        Duration::from_millis(self.subject_eviction_delay_ms)
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("courier")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl CourierConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            CourierConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse a config file without applying env overrides.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("COURIER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&CourierConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply COURIER_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("COURIER_NODE__NODE_ID") {
            self.node.node_id = v;
        }
        if let Ok(v) = std::env::var("COURIER_NODE__API_PORT") {
            if let Ok(p) = v.parse() {
                self.node.api_port = p;
            }
        }
        if let Ok(v) = std::env::var("COURIER_SESSION__MAX_SESSIONS") {
            if let Ok(n) = v.parse() {
                self.session.max_sessions = n;
            }
        }
        if let Ok(v) = std::env::var("COURIER_SESSION__TIMEOUT_MS") {
            if let Ok(ms) = v.parse() {
                self.session.timeout_ms = ms;
            }
        }
        if let Ok(v) = std::env::var("COURIER_SECURITY__ALLOW_ANONYMOUS") {
            self.security.allow_anonymous = v == "true" || v == "1";
        }
    }
}
