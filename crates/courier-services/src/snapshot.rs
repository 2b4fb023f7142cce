//! Serializable admin views of the registry.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// Public session name, `client/<login>/session/<id>`.
    pub name: String,
    pub login: String,
    pub public_id: i64,
    pub instance_id: i64,
    pub uptime_secs: u64,
    pub num_updates: u64,
    pub queue_entries: usize,
    pub queue_max_entries: usize,
    pub has_callback: bool,
    /// `None` when the session never expires.
    pub expires_in_ms: Option<u64>,
    pub subscriptions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectSnapshot {
    pub login: String,
    pub num_sessions: usize,
    pub max_sessions: usize,
    pub holding_queue_entries: usize,
    pub holding_queue_max_entries: usize,
    /// Updates of live sessions plus those of sessions already logged out.
    pub num_updates: u64,
    pub login_blocked: bool,
    pub sessions: Vec<SessionSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    pub node_id: String,
    pub uptime_secs: u64,
    pub num_subjects: usize,
    pub num_sessions: usize,
    /// Both registry indexes agree.
    pub consistent: bool,
    pub subjects: Vec<SubjectSnapshot>,
}
