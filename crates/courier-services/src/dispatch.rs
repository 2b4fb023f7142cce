//! Delivery pipes between a session's callback queue and its transport.
//!
//! The registry never talks to a transport directly. It puts entries into the
//! session queue and pokes the pipe; a transport driver waits on the pipe and
//! pulls batches out of the queue.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use courier_core::{CallbackAddress, QueueEntry, SessionName};

use crate::lock;
use crate::queue::CallbackQueue;

/// Counters of one delivery pipe.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryStatistic {
    /// Entries handed to the transport.
    pub num_update: u64,
    /// Times the transport reported the client connection lost.
    pub num_connection_lost: u64,
}

/// Callback dispatcher contract used by `SessionInfo`.
pub trait DeliveryPipe: Send + Sync {
    /// Replace the callback addresses, e.g. after a reconnect.
    fn update_addresses(&self, addresses: Vec<CallbackAddress>);

    /// A new entry is waiting in the queue.
    fn notify_about_new_entry(&self);

    fn statistic(&self) -> DeliveryStatistic;

    /// The transport noticed the client went away.
    fn lost_connection(&self);

    fn shutdown(&self);

    fn is_shutdown(&self) -> bool;
}

/// Builds one pipe per session.
pub trait DispatchFactory: Send + Sync {
    fn create(
        &self,
        session: &SessionName,
        queue: Arc<dyn CallbackQueue>,
        addresses: Vec<CallbackAddress>,
    ) -> Arc<dyn DeliveryPipe>;
}

// ── Queue dispatcher ──────────────────────────────────────────────────────────

/// Pipe that wakes a transport driver through a `Notify`.
pub struct QueueDispatcher {
    session: SessionName,
    queue: Arc<dyn CallbackQueue>,
    addresses: Mutex<Vec<CallbackAddress>>,
    notify: Notify,
    num_update: AtomicU64,
    num_connection_lost: AtomicU64,
    connected: AtomicBool,
    shutdown: AtomicBool,
}

impl QueueDispatcher {
    pub fn new(
        session: SessionName,
        queue: Arc<dyn CallbackQueue>,
        addresses: Vec<CallbackAddress>,
    ) -> Self {
        Self {
            session,
            queue,
            addresses: Mutex::new(addresses),
            notify: Notify::new(),
            num_update: AtomicU64::new(0),
            num_connection_lost: AtomicU64::new(0),
            connected: AtomicBool::new(true),
            shutdown: AtomicBool::new(false),
        }
    }

    pub fn session(&self) -> &SessionName {
        &self.session
    }

    pub fn addresses(&self) -> Vec<CallbackAddress> {
        lock(&self.addresses).clone()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Wait until an entry is announced or the pipe shuts down.
    pub async fn wait_for_entries(&self) {
        if self.shutdown.load(Ordering::Acquire) || !self.queue.is_empty() {
            return;
        }
        self.notify.notified().await;
    }

    /// Remove up to `max` entries for delivery and count them as updates.
    pub fn take_batch(&self, max: usize) -> Vec<QueueEntry> {
        if self.shutdown.load(Ordering::Acquire) {
            return Vec::new();
        }
        let mut batch = Vec::new();
        while batch.len() < max {
            match self.queue.remove() {
                Some(entry) => batch.push(entry),
                None => break,
            }
        }
        if !batch.is_empty() {
            self.connected.store(true, Ordering::Relaxed);
            self.num_update
                .fetch_add(batch.len() as u64, Ordering::Relaxed);
            tracing::trace!(session = %self.session, n = batch.len(), "update batch taken");
        }
        batch
    }
}

impl DeliveryPipe for QueueDispatcher {
    fn update_addresses(&self, addresses: Vec<CallbackAddress>) {
        *lock(&self.addresses) = addresses;
    }

    fn notify_about_new_entry(&self) {
        if !self.shutdown.load(Ordering::Acquire) {
            self.notify.notify_one();
        }
    }

    fn statistic(&self) -> DeliveryStatistic {
        DeliveryStatistic {
            num_update: self.num_update.load(Ordering::Relaxed),
            num_connection_lost: self.num_connection_lost.load(Ordering::Relaxed),
        }
    }

    fn lost_connection(&self) {
        if self.connected.swap(false, Ordering::Relaxed) {
            self.num_connection_lost.fetch_add(1, Ordering::Relaxed);
            tracing::info!(session = %self.session, "client connection lost, entries stay queued");
        }
    }

    fn shutdown(&self) {
        if !self.shutdown.swap(true, Ordering::AcqRel) {
            self.notify.notify_waiters();
            tracing::debug!(session = %self.session, "delivery pipe shut down");
        }
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

/// Creates `QueueDispatcher`s and lets transport drivers look them up by session.
#[derive(Default)]
pub struct QueueDispatchFactory {
    dispatchers: DashMap<SessionName, Weak<QueueDispatcher>>,
}

impl QueueDispatchFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live dispatcher of a session, if any.
    pub fn dispatcher(&self, session: &SessionName) -> Option<Arc<QueueDispatcher>> {
        self.dispatchers
            .get(session)
            .and_then(|d| d.upgrade())
            .filter(|d| !d.is_shutdown())
    }
}

impl DispatchFactory for QueueDispatchFactory {
    fn create(
        &self,
        session: &SessionName,
        queue: Arc<dyn CallbackQueue>,
        addresses: Vec<CallbackAddress>,
    ) -> Arc<dyn DeliveryPipe> {
        self.dispatchers.retain(|_, d| d.strong_count() > 0);
        let dispatcher = Arc::new(QueueDispatcher::new(session.clone(), queue, addresses));
        self.dispatchers
            .insert(session.clone(), Arc::downgrade(&dispatcher));
        dispatcher
    }
}
