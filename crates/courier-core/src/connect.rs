//! Connect and disconnect request types.

use crate::message::CallbackAddress;
use crate::name::{SecretToken, SessionName};
use std::fmt;

/// Login credentials handed to a security plugin.
#[derive(Clone, Default)]
pub struct Credentials {
    /// Security plugin type; `None` selects the configured default.
    pub plugin_type: Option<String>,
    pub plugin_version: Option<String>,
    pub login: String,
    /// Opaque blob interpreted by the plugin (a password for "simple").
    pub blob: String,
}

impl Credentials {
    pub fn new(login: impl Into<String>, blob: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            blob: blob.into(),
            ..Default::default()
        }
    }

    pub fn with_plugin(mut self, plugin_type: impl Into<String>, version: impl Into<String>) -> Self {
        self.plugin_type = Some(plugin_type.into());
        self.plugin_version = Some(version.into());
        self
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("plugin_type", &self.plugin_type)
            .field("plugin_version", &self.plugin_version)
            .field("login", &self.login)
            .field("blob", &"<redacted>")
            .finish()
    }
}

/// A client's connect request.
#[derive(Debug, Clone, Default)]
pub struct ConnectRequest {
    pub credentials: Credentials,
    /// Positive, client-chosen public session id. `None` lets the server pick one.
    pub public_session_id: Option<i64>,
    /// Token of an existing session to reconnect to.
    pub secret_session_id: Option<SecretToken>,
    /// Empty means the session cannot receive callbacks.
    pub callback_addresses: Vec<CallbackAddress>,
    /// Idle expiry override in ms. `Some(0)` never expires.
    pub session_timeout_ms: Option<u64>,
    /// Max sessions per login override.
    pub max_sessions: Option<usize>,
    /// Disconnect every existing session of this login first.
    pub clear_sessions: bool,
}

impl ConnectRequest {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            ..Default::default()
        }
    }

    pub fn login(&self) -> &str {
        &self.credentials.login
    }

    pub fn with_callback(mut self, address: CallbackAddress) -> Self {
        self.callback_addresses.push(address);
        self
    }

    pub fn with_public_session_id(mut self, id: i64) -> Self {
        self.public_session_id = Some(id);
        self
    }

    pub fn with_secret_session_id(mut self, token: SecretToken) -> Self {
        self.secret_session_id = Some(token);
        self
    }

    pub fn with_session_timeout_ms(mut self, ms: u64) -> Self {
        self.session_timeout_ms = Some(ms);
        self
    }

    pub fn with_max_sessions(mut self, max: usize) -> Self {
        self.max_sessions = Some(max);
        self
    }

    pub fn with_clear_sessions(mut self, clear: bool) -> Self {
        self.clear_sessions = clear;
        self
    }

    pub fn has_callback(&self) -> bool {
        !self.callback_addresses.is_empty()
    }
}

/// Acknowledgement of a successful connect.
#[derive(Debug, Clone)]
pub struct ConnectReturn {
    pub secret_session_id: SecretToken,
    pub session_name: SessionName,
    /// True when an existing session was resumed by its token.
    pub reconnected: bool,
    /// Optional response blob from the security plugin.
    pub security_response: Option<String>,
    /// When the registry accepted the request, ms since epoch.
    pub received_at_ms: u64,
}

/// Options of a disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisconnectOptions {
    /// Clear the subject holding queue if this was the last session.
    pub clear_subject_queue: bool,
    /// Also disconnect every other session of the same login.
    pub clear_sessions: bool,
}

impl Default for DisconnectOptions {
    fn default() -> Self {
        Self {
            clear_subject_queue: true,
            clear_sessions: false,
        }
    }
}

impl DisconnectOptions {
    /// Reset a session but keep every queued message.
    pub fn keep_queue() -> Self {
        Self {
            clear_subject_queue: false,
            clear_sessions: false,
        }
    }
}
