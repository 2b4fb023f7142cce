//! SubjectInfo — one client identity (login name) and its sessions.
//!
//! Point-to-point messages for a subject are forwarded to every live session
//! that accepts subject-level delivery. When none does, they wait in the
//! subject holding queue until a session logs in.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use courier_core::{CallbackAddress, QueueEntry};

use crate::error::RegistryError;
use crate::lock;
use crate::queue::CallbackQueue;
use crate::security::SessionContext;
use crate::session::SessionInfo;
use crate::snapshot::SubjectSnapshot;

/// How `queue_message` routed an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    /// Put directly into this many session queues.
    Forwarded(usize),
    /// Parked in the holding queue (and possibly drained right away).
    Held,
}

struct SubjectState {
    /// Live sessions by public session id.
    sessions: HashMap<i64, Arc<SessionInfo>>,
    session_cache: Option<Arc<[Arc<SessionInfo>]>>,
    address_cache: Option<Arc<HashSet<CallbackAddress>>>,
    /// Capacity slots handed out but not yet turned into sessions.
    reserved: usize,
    max_sessions: usize,
    block_login: bool,
    /// Security context of the latest session.
    security: Option<Arc<dyn SessionContext>>,
    logged_out_updates: u64,
}

impl SubjectState {
    fn invalidate(&mut self) {
        self.session_cache = None;
        self.address_cache = None;
    }
}

pub struct SubjectInfo {
    login: String,
    created_at: Instant,
    holding: Arc<dyn CallbackQueue>,
    state: Mutex<SubjectState>,
    /// Serializes holding-queue drains.
    drain: Mutex<()>,
    /// Set under the state lock; readable without it.
    retired: AtomicBool,
}

impl SubjectInfo {
    pub fn new(login: impl Into<String>, holding: Arc<dyn CallbackQueue>, max_sessions: usize) -> Self {
        Self {
            login: login.into(),
            created_at: Instant::now(),
            holding,
            state: Mutex::new(SubjectState {
                sessions: HashMap::new(),
                session_cache: None,
                address_cache: None,
                reserved: 0,
                max_sessions,
                block_login: false,
                security: None,
                logged_out_updates: 0,
            }),
            drain: Mutex::new(()),
            retired: AtomicBool::new(false),
        }
    }

    pub fn login(&self) -> &str {
        &self.login
    }

    pub fn uptime(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn holding_queue(&self) -> &Arc<dyn CallbackQueue> {
        &self.holding
    }

    pub fn is_shutdown(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    // ── Session membership ────────────────────────────────────────────────────

    /// Reserve a session slot under `requested_max`.
    ///
    /// Rejection happens before any session object exists. The slot is given
    /// back when the reservation is dropped without a login.
    pub fn check_capacity(self: &Arc<Self>, requested_max: usize) -> Result<SlotReservation, RegistryError> {
        let mut state = lock(&self.state);
        if self.is_shutdown() {
            return Err(RegistryError::Shutdown(self.login.clone()));
        }
        state.max_sessions = requested_max;
        let used = state.sessions.len() + state.reserved;
        if used >= requested_max {
            tracing::warn!(
                login = %self.login,
                max = requested_max,
                sessions = state.sessions.len(),
                "max sessions exhausted, login rejected"
            );
            return Err(RegistryError::Capacity {
                login: self.login.clone(),
                max: requested_max,
            });
        }
        state.reserved += 1;
        Ok(SlotReservation {
            subject: Arc::clone(self),
            consumed: false,
        })
    }

    /// Register a session in a reserved slot, then drain the holding queue.
    pub fn notify_login(&self, session: &Arc<SessionInfo>, mut slot: SlotReservation) -> Result<(), RegistryError> {
        {
            let mut state = lock(&self.state);
            state.reserved = state.reserved.saturating_sub(1);
            slot.consumed = true;
            if self.is_shutdown() {
                tracing::error!(
                    login = %self.login,
                    session = %session.name(),
                    backtrace = %std::backtrace::Backtrace::capture(),
                    "login on a shut down subject, connect raced with disconnect"
                );
                return Err(RegistryError::Shutdown(self.login.clone()));
            }
            if state.sessions.contains_key(&session.public_id()) {
                return Err(RegistryError::Configuration(format!(
                    "{} is already logged in",
                    session.name()
                )));
            }
            state.sessions.insert(session.public_id(), session.clone());
            state.invalidate();
            state.security = Some(session.security().clone());
        }

        let drained = self.forward_holding_queue();
        if drained > 0 {
            tracing::info!(login = %self.login, session = %session.name(), drained, "holding queue delivered");
        }
        Ok(())
    }

    /// Remove a session. Returns false if it was not registered here.
    ///
    /// Its delivery statistic is folded into the subject. With `clear_queue`
    /// the holding queue is cleared once no session remains.
    pub fn notify_logout(&self, session: &SessionInfo, clear_queue: bool) -> bool {
        let (removed, now_empty) = {
            let mut state = lock(&self.state);
            let is_member = state
                .sessions
                .get(&session.public_id())
                .is_some_and(|s| std::ptr::eq(s.as_ref(), session));
            if is_member {
                state.sessions.remove(&session.public_id());
                state.invalidate();
                state.logged_out_updates += session.num_updates();
            }
            (is_member, state.sessions.is_empty())
        };
        if removed && clear_queue && now_empty {
            let cleared = {
                let _drain = lock(&self.drain);
                self.holding.clear()
            };
            if cleared > 0 {
                tracing::info!(login = %self.login, cleared, "holding queue cleared on last logout");
            }
        }
        removed
    }

    /// Snapshot of the live sessions. Recomputed after membership changes.
    pub fn get_sessions(&self) -> Arc<[Arc<SessionInfo>]> {
        let mut state = lock(&self.state);
        if let Some(cached) = &state.session_cache {
            return cached.clone();
        }
        let sessions: Arc<[Arc<SessionInfo>]> = state.sessions.values().cloned().collect();
        state.session_cache = Some(sessions.clone());
        sessions
    }

    pub fn session_by_public_id(&self, public_id: i64) -> Option<Arc<SessionInfo>> {
        lock(&self.state).sessions.get(&public_id).cloned()
    }

    pub fn num_sessions(&self) -> usize {
        lock(&self.state).sessions.len()
    }

    pub fn is_logged_in(&self) -> bool {
        self.num_sessions() > 0
    }

    /// Union of the subject-level callback addresses of all live sessions.
    pub fn callback_addresses(&self) -> Arc<HashSet<CallbackAddress>> {
        let mut state = lock(&self.state);
        if let Some(cached) = &state.address_cache {
            return cached.clone();
        }
        let addresses: HashSet<CallbackAddress> = state
            .sessions
            .values()
            .flat_map(|s| s.subject_addresses())
            .collect();
        let addresses = Arc::new(addresses);
        state.address_cache = Some(addresses.clone());
        addresses
    }

    // ── Routing ───────────────────────────────────────────────────────────────

    /// Route a point-to-point entry addressed to this subject.
    ///
    /// Forward to every live session; if none took it, park it in the holding
    /// queue and retry at once, covering a login that raced with this call.
    pub fn queue_message(&self, entry: QueueEntry) -> Result<Routed, RegistryError> {
        if self.is_shutdown() {
            return Err(RegistryError::Shutdown(self.login.clone()));
        }
        let forwarded = self.forward_to_sessions(&entry);
        if forwarded > 0 {
            return Ok(Routed::Forwarded(forwarded));
        }

        {
            let _state = lock(&self.state);
            if self.is_shutdown() {
                return Err(RegistryError::Shutdown(self.login.clone()));
            }
            let short_id = entry.short_id();
            self.holding.put(entry).map_err(|e| {
                tracing::warn!(login = %self.login, entry = %short_id, error = %e, "holding queue rejected entry");
                RegistryError::Queue(e)
            })?;
            tracing::debug!(login = %self.login, entry = %short_id, "no session available, entry held");
        }

        self.forward_holding_queue();
        Ok(Routed::Held)
    }

    /// Put `entry` into every session that accepts it. Per-session failures
    /// are reported by the session and do not stop the loop.
    fn forward_to_sessions(&self, entry: &QueueEntry) -> usize {
        let mut forwarded = 0;
        for session in self.get_sessions().iter() {
            if !session.receives_subject_messages() {
                continue;
            }
            match session.queue_message(entry.clone()) {
                Ok(true) => forwarded += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::debug!(session = %session.name(), error = %e, "session skipped");
                }
            }
        }
        forwarded
    }

    /// Move held entries, head first, into the live sessions.
    /// Stops at the first entry no session accepted. Only the forwarded
    /// entry is removed, even if the head changed meanwhile.
    fn forward_holding_queue(&self) -> usize {
        let _drain = lock(&self.drain);
        let mut drained = 0;
        while let Some(head) = self.holding.peek() {
            if self.forward_to_sessions(&head) == 0 {
                break;
            }
            if self.holding.remove_if_head(&head.entry_id).is_none() {
                tracing::debug!(login = %self.login, entry = %head.short_id(), "held entry left the queue while forwarding");
            }
            drained += 1;
        }
        drained
    }

    // ── Authorization and admin ───────────────────────────────────────────────

    /// Fails closed when no session ever attached a security context.
    pub fn is_authorized(&self, action: &str, resource: &str) -> bool {
        let security = lock(&self.state).security.clone();
        match security {
            Some(security) => security.is_authorized(action, resource),
            None => {
                tracing::warn!(login = %self.login, action, resource, "no security context, access denied");
                false
            }
        }
    }

    pub fn set_block_login(&self, block: bool) {
        lock(&self.state).block_login = block;
        tracing::info!(login = %self.login, block, "login block changed");
    }

    pub fn is_login_blocked(&self) -> bool {
        lock(&self.state).block_login
    }

    pub fn max_sessions(&self) -> usize {
        lock(&self.state).max_sessions
    }

    /// Updates of all sessions, including logged out ones.
    pub fn num_updates(&self) -> u64 {
        let logged_out = lock(&self.state).logged_out_updates;
        logged_out + self.get_sessions().iter().map(|s| s.num_updates()).sum::<u64>()
    }

    /// Shut down if idle: no session, no reservation, nothing held.
    /// A retired subject rejects logins and messages.
    pub(crate) fn try_retire(&self) -> bool {
        {
            let mut state = lock(&self.state);
            if self.is_shutdown()
                || !state.sessions.is_empty()
                || state.reserved > 0
                || !self.holding.is_empty()
            {
                return false;
            }
            self.retired.store(true, Ordering::Release);
            state.security = None;
            state.invalidate();
        }
        self.holding.shutdown();
        true
    }

    pub fn snapshot(&self) -> SubjectSnapshot {
        let sessions = self.get_sessions();
        let (max_sessions, login_blocked) = {
            let state = lock(&self.state);
            (state.max_sessions, state.block_login)
        };
        SubjectSnapshot {
            login: self.login.clone(),
            num_sessions: sessions.len(),
            max_sessions,
            holding_queue_entries: self.holding.num_entries(),
            holding_queue_max_entries: self.holding.max_entries(),
            num_updates: self.num_updates(),
            login_blocked,
            sessions: sessions.iter().map(|s| s.snapshot()).collect(),
        }
    }
}

impl std::fmt::Debug for SubjectInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubjectInfo")
            .field("login", &self.login)
            .field("sessions", &self.num_sessions())
            .field("held", &self.holding.num_entries())
            .finish()
    }
}

/// A reserved session slot. Dropping it unused gives the slot back.
pub struct SlotReservation {
    subject: Arc<SubjectInfo>,
    consumed: bool,
}

impl Drop for SlotReservation {
    fn drop(&mut self) {
        if !self.consumed {
            let mut state = lock(&self.subject.state);
            state.reserved = state.reserved.saturating_sub(1);
        }
    }
}
