//! Error types of the registry and its collaborators.

/// Failures surfaced by `Authenticate`, `SubjectInfo` and `SessionInfo`.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Bad credentials or a plugin that refused the login.
    #[error("authentication failed for '{login}': {reason}")]
    Authentication { login: String, reason: String },

    /// Unknown secret session id on `check`, or a blocked login.
    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("max sessions ({max}) of '{login}' exhausted")]
    Capacity { login: String, max: usize },

    /// Missing security manager, invalid login name, session without callback.
    #[error("configuration: {0}")]
    Configuration(String),

    #[error("unknown session")]
    UnknownSession,

    /// Operation on a subject (or registry) that is already shut down.
    #[error("'{0}' is shut down")]
    Shutdown(String),

    #[error(transparent)]
    Queue(#[from] QueueError),

    /// A login/logout listener failed; the triggering operation is aborted.
    #[error("client listener failed: {0}")]
    Listener(#[source] anyhow::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Failures of a callback or holding queue.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("queue '{name}' is full ({max} entries)")]
    Full { name: String, max: usize },

    #[error("queue '{0}' is shut down")]
    Shutdown(String),
}

/// Failures of a security plugin.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SecurityError {
    #[error("no security manager for plugin '{plugin_type}' version '{version}'")]
    UnknownPlugin { plugin_type: String, version: String },

    #[error("invalid credentials for '{0}'")]
    InvalidCredentials(String),

    #[error("security session already reserved")]
    DuplicateSession,

    #[error("unknown security session")]
    UnknownSession,
}

impl From<SecurityError> for RegistryError {
    fn from(e: SecurityError) -> Self {
        match e {
            SecurityError::UnknownPlugin { .. } => RegistryError::Configuration(e.to_string()),
            SecurityError::InvalidCredentials(ref login) => RegistryError::Authentication {
                login: login.clone(),
                reason: e.to_string(),
            },
            SecurityError::DuplicateSession | SecurityError::UnknownSession => {
                RegistryError::Authentication {
                    login: String::new(),
                    reason: e.to_string(),
                }
            }
        }
    }
}

pub type Result<T, E = RegistryError> = std::result::Result<T, E>;
