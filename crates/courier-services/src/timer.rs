//! One-shot timers on the tokio runtime.
//!
//! Each timer is a spawned task that sleeps and then calls its listener. The
//! listener is held weakly, so a pending timer never keeps its owner alive.
//! Cancellation and firing race on removal from the timer table: whichever
//! removes the key first wins, so a removed timer never fires.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;

use crate::error::RegistryError;

/// Handle of one armed timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerKey(u64);

pub trait TimeoutListener: Send + Sync {
    /// Called on a runtime worker once the timer elapsed.
    fn timeout(&self, key: TimerKey);
}

/// Shared timer service. Cheap to clone.
#[derive(Clone)]
pub struct TimerService {
    runtime: Handle,
    next_key: Arc<AtomicU64>,
    timers: Arc<DashMap<TimerKey, AbortHandle>>,
}

impl TimerService {
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            next_key: Arc::new(AtomicU64::new(1)),
            timers: Arc::new(DashMap::new()),
        }
    }

    /// Timer service on the current tokio runtime.
    pub fn current() -> Result<Self, RegistryError> {
        let handle = Handle::try_current()
            .map_err(|e| RegistryError::Configuration(format!("no tokio runtime: {e}")))?;
        Ok(Self::new(handle))
    }

    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }

    pub fn add_timeout_listener(
        &self,
        listener: Weak<dyn TimeoutListener>,
        delay: Duration,
    ) -> TimerKey {
        let key = TimerKey(self.next_key.fetch_add(1, Ordering::Relaxed));
        let timers = self.timers.clone();
        // Hold the table entry while spawning so a fast timer cannot fire before
        // its abort handle is registered.
        let entry = self.timers.entry(key);
        let task = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if timers.remove(&key).is_none() {
                return;
            }
            if let Some(listener) = listener.upgrade() {
                listener.timeout(key);
            }
        });
        entry.insert(task.abort_handle());
        key
    }

    /// Re-arm: cancel `existing` (if still pending) and add a fresh timer.
    pub fn add_or_refresh_timeout_listener(
        &self,
        listener: Weak<dyn TimeoutListener>,
        delay: Duration,
        existing: Option<TimerKey>,
    ) -> TimerKey {
        if let Some(old) = existing {
            self.remove_timeout_listener(old);
        }
        self.add_timeout_listener(listener, delay)
    }

    /// Cancel a timer. Returns false if it already fired or was removed.
    pub fn remove_timeout_listener(&self, key: TimerKey) -> bool {
        match self.timers.remove(&key) {
            Some((_, handle)) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Number of pending timers.
    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}
