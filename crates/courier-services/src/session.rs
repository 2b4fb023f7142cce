//! SessionInfo — one authenticated login session of a subject.
//!
//! A session is ACTIVE from construction until `shutdown()`, which is
//! terminal. Queue and delivery pipe exist only when the connect named at
//! least one callback address. The expiry timer handle lives behind its own
//! mutex so the timer callback never waits on unrelated session state.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use courier_core::message::now_ms;
use courier_core::{CallbackAddress, QueueEntry, SecretToken, SessionName};

use crate::authenticate::ReaperCommand;
use crate::dispatch::{DeliveryPipe, DeliveryStatistic, DispatchFactory};
use crate::error::RegistryError;
use crate::error_handler::{ErrorHandler, ErrorInfo, SessionErrorHandler};
use crate::lock;
use crate::queue::{CallbackQueue, QueueFactory, QueueRelating};
use crate::security::SessionContext;
use crate::snapshot::SessionSnapshot;
use crate::subscription::SubscriptionIndex;
use crate::timer::{TimeoutListener, TimerKey, TimerService};

/// Process-wide instance counter. Counts down, so generated public ids are negative.
static INSTANCE_COUNTER: AtomicI64 = AtomicI64::new(0);

/// Connect-time settings kept for the lifetime of the session.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// `None` never expires.
    pub timeout: Option<Duration>,
    pub max_sessions: usize,
    pub callback_addresses: Vec<CallbackAddress>,
}

/// Everything needed to build a session.
pub(crate) struct SessionInit {
    pub token: SecretToken,
    pub login: String,
    pub public_session_id: Option<i64>,
    pub security: Arc<dyn SessionContext>,
    pub settings: SessionSettings,
    pub queue_capacity: usize,
    /// Callback queue of a replaced session. Only used when callbacks are configured.
    pub inherited_queue: Option<Arc<dyn CallbackQueue>>,
    pub queues: Arc<dyn QueueFactory>,
    pub dispatch: Arc<dyn DispatchFactory>,
    pub errors: Arc<dyn ErrorHandler>,
    pub subscriptions: Option<Arc<dyn SubscriptionIndex>>,
    pub timers: TimerService,
    pub reaper: mpsc::UnboundedSender<ReaperCommand>,
}

#[derive(Default)]
struct TimerSlot {
    key: Option<TimerKey>,
    expires_at: Option<Instant>,
}

struct SessionState {
    settings: Option<SessionSettings>,
    /// Login of the owning subject; a lookup key, not ownership.
    subject: Option<String>,
    /// Statistic captured at shutdown, after the pipe is gone.
    final_statistic: DeliveryStatistic,
}

pub struct SessionInfo {
    instance_id: i64,
    name: SessionName,
    token: Mutex<SecretToken>,
    security: Arc<dyn SessionContext>,
    queue: Mutex<Option<Arc<dyn CallbackQueue>>>,
    pipe: Mutex<Option<Arc<dyn DeliveryPipe>>>,
    errors: SessionErrorHandler,
    subscriptions: Option<Arc<dyn SubscriptionIndex>>,
    timers: TimerService,
    timer: Mutex<TimerSlot>,
    state: Mutex<SessionState>,
    reaper: mpsc::UnboundedSender<ReaperCommand>,
    created_at: Instant,
    created_at_ms: u64,
    disconnecting: AtomicBool,
    shutdown: AtomicBool,
    transient_warned: AtomicBool,
}

impl SessionInfo {
    pub(crate) fn new(init: SessionInit) -> Result<Arc<Self>, RegistryError> {
        if init.security.subject_identity().is_none() {
            return Err(RegistryError::Configuration(format!(
                "security context of '{}' is not authenticated",
                init.login
            )));
        }

        let instance_id = INSTANCE_COUNTER.fetch_sub(1, Ordering::SeqCst) - 1;
        let public_id = match init.public_session_id {
            Some(id) if id > 0 => id,
            _ => instance_id,
        };
        let name = SessionName::new(init.login.clone(), public_id);

        let (queue, pipe) = if init.settings.callback_addresses.is_empty() {
            (None, None)
        } else {
            let queue = match init.inherited_queue {
                Some(q) => q,
                None => init.queues.create(
                    QueueRelating::Callback,
                    &name.to_string(),
                    init.queue_capacity,
                ),
            };
            let pipe = init
                .dispatch
                .create(&name, queue.clone(), init.settings.callback_addresses.clone());
            (Some(queue), Some(pipe))
        };

        tracing::debug!(
            session = %name,
            instance_id,
            callback = queue.is_some(),
            "session created"
        );

        Ok(Arc::new(Self {
            instance_id,
            errors: SessionErrorHandler::new(name.clone(), init.errors),
            name,
            token: Mutex::new(init.token),
            security: init.security,
            queue: Mutex::new(queue),
            pipe: Mutex::new(pipe),
            subscriptions: init.subscriptions,
            timers: init.timers,
            timer: Mutex::new(TimerSlot::default()),
            state: Mutex::new(SessionState {
                settings: Some(init.settings),
                subject: Some(init.login),
                final_statistic: DeliveryStatistic::default(),
            }),
            reaper: init.reaper,
            created_at: Instant::now(),
            created_at_ms: now_ms(),
            disconnecting: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            transient_warned: AtomicBool::new(false),
        }))
    }

    // ── Identity ──────────────────────────────────────────────────────────────

    pub fn instance_id(&self) -> i64 {
        self.instance_id
    }

    pub fn name(&self) -> &SessionName {
        &self.name
    }

    pub fn login(&self) -> &str {
        &self.name.login
    }

    pub fn public_id(&self) -> i64 {
        self.name.public_id
    }

    pub(crate) fn secret_token(&self) -> SecretToken {
        lock(&self.token).clone()
    }

    pub(crate) fn set_secret_token(&self, token: SecretToken) {
        *lock(&self.token) = token;
    }

    pub fn security(&self) -> &Arc<dyn SessionContext> {
        &self.security
    }

    /// Login of the owning subject. `None` once shut down.
    pub fn subject_key(&self) -> Option<String> {
        lock(&self.state).subject.clone()
    }

    pub fn settings(&self) -> Option<SessionSettings> {
        lock(&self.state).settings.clone()
    }

    // ── Expiry ────────────────────────────────────────────────────────────────

    fn session_timeout(&self) -> Option<Duration> {
        lock(&self.state)
            .settings
            .as_ref()
            .and_then(|s| s.timeout)
            .filter(|d| !d.is_zero())
    }

    /// Re-arm the expiry timer to the full timeout. No-op when the session never expires.
    pub fn refresh(self: &Arc<Self>) {
        let Some(timeout) = self.session_timeout() else {
            return;
        };
        let mut slot = lock(&self.timer);
        if self.is_shutdown() {
            return;
        }
        let listener: Weak<dyn TimeoutListener> = Arc::downgrade(self) as Weak<dyn TimeoutListener>;
        let key = self
            .timers
            .add_or_refresh_timeout_listener(listener, timeout, slot.key.take());
        slot.key = Some(key);
        slot.expires_at = Some(Instant::now() + timeout);
        tracing::trace!(session = %self.name, timeout_ms = timeout.as_millis() as u64, "session refreshed");
    }

    /// Time left until expiry, `None` if no timer is armed.
    pub fn time_to_expiry(&self) -> Option<Duration> {
        lock(&self.timer)
            .expires_at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    // ── Delivery ──────────────────────────────────────────────────────────────

    pub fn has_callback(&self) -> bool {
        if self.is_shutdown() {
            return false;
        }
        let has_pipe = lock(&self.pipe).is_some();
        has_pipe && lock(&self.queue).is_some()
    }

    /// Live session with at least one address that accepts subject-level messages.
    pub fn receives_subject_messages(&self) -> bool {
        self.has_callback()
            && lock(&self.state)
                .settings
                .as_ref()
                .is_some_and(|s| s.callback_addresses.iter().any(|a| a.use_for_subject_queue))
    }

    /// Put one entry into this session's callback queue.
    ///
    /// Returns `Ok(false)` when the put failed; the failure has then already
    /// been reported to the error handler.
    pub fn queue_message(&self, mut entry: QueueEntry) -> Result<bool, RegistryError> {
        let no_callback =
            || RegistryError::Configuration(format!("{} has no callback address", self.name));
        if self.is_shutdown() {
            return Err(no_callback());
        }
        let queue = lock(&self.queue).clone().ok_or_else(no_callback)?;
        let pipe = lock(&self.pipe).clone().ok_or_else(no_callback)?;

        if entry.persistent && !self.name.is_pub_session_id_user() {
            entry.persistent = false;
            if !self.transient_warned.swap(true, Ordering::Relaxed) {
                tracing::warn!(
                    session = %self.name,
                    "server generated session id, persistent entries are delivered as transient"
                );
            }
        }

        let entry_id = entry.id_hex();
        match queue.put(entry) {
            Ok(()) => {
                pipe.notify_about_new_entry();
                tracing::trace!(session = %self.name, entry = %&entry_id[..12], "entry queued");
                Ok(true)
            }
            Err(e) => {
                self.errors.handle_error(ErrorInfo {
                    session: self.name.clone(),
                    entry_id,
                    reason: e.to_string(),
                });
                Ok(false)
            }
        }
    }

    /// True if any configured callback address equals `address`.
    pub fn has_address(&self, address: &CallbackAddress) -> bool {
        lock(&self.state)
            .settings
            .as_ref()
            .is_some_and(|s| s.callback_addresses.contains(address))
    }

    /// Addresses that opted in to subject-level delivery.
    pub fn subject_addresses(&self) -> Vec<CallbackAddress> {
        lock(&self.state)
            .settings
            .as_ref()
            .map(|s| {
                s.callback_addresses
                    .iter()
                    .filter(|a| a.use_for_subject_queue)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// New addresses from a reconnect. A session without callback stays without.
    pub(crate) fn update_callback_addresses(&self, addresses: Vec<CallbackAddress>) {
        let pipe = lock(&self.pipe).clone();
        if let Some(pipe) = pipe {
            pipe.update_addresses(addresses.clone());
            if let Some(settings) = lock(&self.state).settings.as_mut() {
                settings.callback_addresses = addresses;
            }
        }
    }

    /// The transport lost the client connection; entries stay queued.
    pub fn connection_lost(&self) {
        let pipe = lock(&self.pipe).clone();
        if let Some(pipe) = pipe {
            pipe.lost_connection();
        }
    }

    /// Take the callback queue out so a replacing session can adopt it.
    pub(crate) fn detach_queue(&self) -> Option<Arc<dyn CallbackQueue>> {
        lock(&self.queue).take()
    }

    /// Put a detached queue back. Hands the queue back if the session is
    /// shut down or already has one.
    pub(crate) fn reattach_queue(
        &self,
        queue: Arc<dyn CallbackQueue>,
    ) -> Result<(), Arc<dyn CallbackQueue>> {
        let mut slot = lock(&self.queue);
        if self.is_shutdown() || slot.is_some() {
            return Err(queue);
        }
        *slot = Some(queue);
        Ok(())
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    /// Claim the right to disconnect this session. Only one caller wins.
    pub(crate) fn begin_disconnect(&self) -> bool {
        !self.disconnecting.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn is_disconnecting(&self) -> bool {
        self.disconnecting.load(Ordering::Acquire)
    }

    pub(crate) fn abort_disconnect(&self) {
        self.disconnecting.store(false, Ordering::Release);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Disarm the timer, shut down queue, pipe and error handler, drop the
    /// subject key and settings. Idempotent.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        {
            let mut slot = lock(&self.timer);
            if let Some(key) = slot.key.take() {
                self.timers.remove_timeout_listener(key);
            }
            slot.expires_at = None;
        }
        let statistic = self.delivery_statistic();
        if let Some(pipe) = lock(&self.pipe).take() {
            pipe.shutdown();
        }
        if let Some(queue) = lock(&self.queue).take() {
            queue.shutdown();
        }
        self.errors.shutdown();
        {
            let mut state = lock(&self.state);
            state.settings = None;
            state.subject = None;
            state.final_statistic = statistic;
        }
        tracing::debug!(session = %self.name, "session shut down");
    }

    // ── Admin ─────────────────────────────────────────────────────────────────

    pub fn uptime(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn created_at_ms(&self) -> u64 {
        self.created_at_ms
    }

    pub fn delivery_statistic(&self) -> DeliveryStatistic {
        let pipe = lock(&self.pipe).clone();
        match pipe {
            Some(pipe) => pipe.statistic(),
            None => lock(&self.state).final_statistic,
        }
    }

    pub fn num_updates(&self) -> u64 {
        self.delivery_statistic().num_update
    }

    pub fn queue_entries(&self) -> usize {
        lock(&self.queue).as_ref().map_or(0, |q| q.num_entries())
    }

    pub fn queue_max_entries(&self) -> usize {
        lock(&self.queue).as_ref().map_or(0, |q| q.max_entries())
    }

    pub fn subscriptions(&self) -> Vec<String> {
        match &self.subscriptions {
            Some(index) if !self.is_shutdown() => index.subscriptions_of(&self.name),
            _ => Vec::new(),
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            name: self.name.to_string(),
            login: self.name.login.clone(),
            public_id: self.name.public_id,
            instance_id: self.instance_id,
            uptime_secs: self.uptime().as_secs(),
            num_updates: self.num_updates(),
            queue_entries: self.queue_entries(),
            queue_max_entries: self.queue_max_entries(),
            has_callback: self.has_callback(),
            expires_in_ms: self.time_to_expiry().map(|d| d.as_millis() as u64),
            subscriptions: self.subscriptions(),
        }
    }
}

impl TimeoutListener for SessionInfo {
    fn timeout(&self, key: TimerKey) {
        {
            let mut slot = lock(&self.timer);
            if slot.key != Some(key) {
                return;
            }
            slot.key = None;
            slot.expires_at = None;
        }
        if self.is_shutdown() {
            return;
        }
        tracing::info!(session = %self.name, "session timed out, disconnecting");
        let command = ReaperCommand::Expire {
            token: self.secret_token(),
            session: self.name.clone(),
        };
        if self.reaper.send(command).is_err() {
            tracing::warn!(session = %self.name, "registry gone, shutting down expired session");
            self.shutdown();
        }
    }
}

impl std::fmt::Debug for SessionInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionInfo")
            .field("name", &self.name)
            .field("instance_id", &self.instance_id)
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}
