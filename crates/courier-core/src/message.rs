//! Queue entries and callback addresses.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// One point-to-point message waiting for delivery.
///
/// Entries are cheap to clone (payload is refcounted) so the same entry can
/// be forwarded into several session queues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Content hash, blake3 over sender, key, timestamp and payload.
    pub entry_id: [u8; 32],
    /// Topic / key oid the message was published on.
    pub key_oid: String,
    /// Public name of the publisher.
    pub sender: String,
    /// Milliseconds since Unix epoch.
    pub timestamp: u64,
    /// Persistent entries survive a broker restart when the queue supports it.
    pub persistent: bool,
    pub payload: Bytes,
}

impl QueueEntry {
    pub fn new(key_oid: impl Into<String>, sender: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        let key_oid = key_oid.into();
        let sender = sender.into();
        let payload = payload.into();
        let timestamp = now_ms();
        let entry_id = Self::generate_id(&sender, &key_oid, timestamp, &payload);
        Self {
            entry_id,
            key_oid,
            sender,
            timestamp,
            persistent: false,
            payload,
        }
    }

    pub fn persistent(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }

    pub fn id_hex(&self) -> String {
        hex::encode(self.entry_id)
    }

    /// Short id for log lines.
    pub fn short_id(&self) -> String {
        hex::encode(&self.entry_id[..6])
    }

    fn generate_id(sender: &str, key_oid: &str, timestamp: u64, payload: &[u8]) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(sender.as_bytes());
        hasher.update(&[0]);
        hasher.update(key_oid.as_bytes());
        hasher.update(&timestamp.to_le_bytes());
        hasher.update(payload);
        *hasher.finalize().as_bytes()
    }
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Where a session wants its updates delivered.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallbackAddress {
    /// Transport kind, e.g. "SOCKET" or "HTTP".
    pub kind: String,
    pub address: String,
    /// Also receive messages addressed to the subject as a whole.
    #[serde(default = "default_true")]
    pub use_for_subject_queue: bool,
}

fn default_true() -> bool {
    true
}

impl CallbackAddress {
    pub fn new(kind: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            address: address.into(),
            use_for_subject_queue: true,
        }
    }

    pub fn session_only(mut self) -> Self {
        self.use_for_subject_queue = false;
        self
    }
}
