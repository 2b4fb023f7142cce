//! Callback and holding queues.
//!
//! The registry only relies on the `CallbackQueue` contract. `MemoryQueue` is
//! the bounded in-process implementation used by the daemon and the tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use courier_core::QueueEntry;

use crate::error::QueueError;
use crate::lock;

/// Ordered delivery queue for one addressee.
pub trait CallbackQueue: Send + Sync {
    fn name(&self) -> &str;

    /// Append at the tail. Rejects at capacity or after shutdown.
    fn put(&self, entry: QueueEntry) -> Result<(), QueueError>;

    /// Head of the queue without removing it.
    fn peek(&self) -> Option<QueueEntry>;

    /// Remove and return the head.
    fn remove(&self) -> Option<QueueEntry>;

    /// Remove the head only if it is the entry with `entry_id`.
    /// Entries with equal ids are interchangeable.
    fn remove_if_head(&self, entry_id: &[u8; 32]) -> Option<QueueEntry>;

    fn num_entries(&self) -> usize;

    fn max_entries(&self) -> usize;

    /// Drop every entry. Returns how many were dropped.
    fn clear(&self) -> usize;

    fn shutdown(&self);

    fn is_shutdown(&self) -> bool;

    fn is_empty(&self) -> bool {
        self.num_entries() == 0
    }
}

/// What a queue is allocated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueRelating {
    /// Per-session callback queue.
    Callback,
    /// Per-subject holding queue.
    Subject,
}

impl QueueRelating {
    fn prefix(self) -> &'static str {
        match self {
            QueueRelating::Callback => "callback",
            QueueRelating::Subject => "subject",
        }
    }
}

/// Allocates queues for sessions and subjects.
pub trait QueueFactory: Send + Sync {
    fn create(&self, relating: QueueRelating, owner: &str, max_entries: usize)
        -> Arc<dyn CallbackQueue>;
}

// ── In-memory queue ───────────────────────────────────────────────────────────

struct QueueState {
    entries: VecDeque<QueueEntry>,
    shutdown: bool,
}

pub struct MemoryQueue {
    name: String,
    max_entries: usize,
    state: Mutex<QueueState>,
}

impl MemoryQueue {
    pub fn new(name: impl Into<String>, max_entries: usize) -> Self {
        Self {
            name: name.into(),
            max_entries,
            state: Mutex::new(QueueState {
                entries: VecDeque::new(),
                shutdown: false,
            }),
        }
    }

    /// Copy of all queued entries, head first.
    pub fn entries(&self) -> Vec<QueueEntry> {
        lock(&self.state).entries.iter().cloned().collect()
    }
}

impl CallbackQueue for MemoryQueue {
    fn name(&self) -> &str {
        &self.name
    }

    fn put(&self, entry: QueueEntry) -> Result<(), QueueError> {
        let mut state = lock(&self.state);
        if state.shutdown {
            return Err(QueueError::Shutdown(self.name.clone()));
        }
        if state.entries.len() >= self.max_entries {
            return Err(QueueError::Full {
                name: self.name.clone(),
                max: self.max_entries,
            });
        }
        state.entries.push_back(entry);
        Ok(())
    }

    fn peek(&self) -> Option<QueueEntry> {
        lock(&self.state).entries.front().cloned()
    }

    fn remove(&self) -> Option<QueueEntry> {
        lock(&self.state).entries.pop_front()
    }

    fn remove_if_head(&self, entry_id: &[u8; 32]) -> Option<QueueEntry> {
        let mut state = lock(&self.state);
        if state.entries.front().is_some_and(|e| &e.entry_id == entry_id) {
            state.entries.pop_front()
        } else {
            None
        }
    }

    fn num_entries(&self) -> usize {
        lock(&self.state).entries.len()
    }

    fn max_entries(&self) -> usize {
        self.max_entries
    }

    fn clear(&self) -> usize {
        let mut state = lock(&self.state);
        let n = state.entries.len();
        state.entries.clear();
        n
    }

    fn shutdown(&self) {
        let mut state = lock(&self.state);
        if !state.shutdown {
            state.shutdown = true;
            tracing::debug!(queue = %self.name, pending = state.entries.len(), "queue shut down");
        }
    }

    fn is_shutdown(&self) -> bool {
        lock(&self.state).shutdown
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct MemoryQueueFactory;

impl QueueFactory for MemoryQueueFactory {
    fn create(
        &self,
        relating: QueueRelating,
        owner: &str,
        max_entries: usize,
    ) -> Arc<dyn CallbackQueue> {
        Arc::new(MemoryQueue::new(
            format!("{}:{}", relating.prefix(), owner),
            max_entries,
        ))
    }
}
