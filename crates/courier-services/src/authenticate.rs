//! Authenticate — the process-wide session registry.
//!
//! Two indexes: secret token → session and login name → subject. Every
//! connect, disconnect and check goes through here. Index guards are never
//! held while calling into a subject or a session.
//!
//! Session expiry and admin kills arrive as commands on a channel and are
//! executed by the reaper task through the ordinary disconnect path.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::mpsc;

use courier_core::config::CourierConfig;
use courier_core::message::now_ms;
use courier_core::{ConnectRequest, ConnectReturn, DisconnectOptions, QueueEntry, SecretToken, SessionName};

use crate::dispatch::{DispatchFactory, QueueDispatchFactory};
use crate::error::RegistryError;
use crate::error_handler::{ErrorHandler, LoggingErrorHandler};
use crate::events::{ClientEventKind, ClientListener, ListenerSet};
use crate::queue::{CallbackQueue, MemoryQueueFactory, QueueFactory, QueueRelating};
use crate::security::{PluginRegistry, SessionContext};
use crate::session::{SessionInfo, SessionInit, SessionSettings};
use crate::snapshot::RegistrySnapshot;
use crate::subject::{Routed, SubjectInfo};
use crate::subscription::SubscriptionIndex;
use crate::timer::TimerService;

/// Work for the reaper task.
#[derive(Debug)]
pub(crate) enum ReaperCommand {
    /// A session timer elapsed.
    Expire { token: SecretToken, session: SessionName },
    /// An administrator asked to remove a session.
    Kill { token: SecretToken, session: SessionName },
    /// Re-check an idle subject after the eviction delay.
    Evict { login: String },
}

/// Services the registry calls out to.
pub struct Collaborators {
    pub security: Arc<PluginRegistry>,
    pub queues: Arc<dyn QueueFactory>,
    pub dispatch: Arc<dyn DispatchFactory>,
    pub errors: Arc<dyn ErrorHandler>,
    pub subscriptions: Option<Arc<dyn SubscriptionIndex>>,
}

impl Collaborators {
    /// In-process queues and dispatchers, security from `[security]`.
    pub fn in_memory(config: &CourierConfig) -> Self {
        Self {
            security: Arc::new(PluginRegistry::from_config(&config.security)),
            queues: Arc::new(MemoryQueueFactory),
            dispatch: Arc::new(QueueDispatchFactory::new()),
            errors: Arc::new(LoggingErrorHandler::new()),
            subscriptions: None,
        }
    }
}

/// How a session is torn down.
#[derive(Debug, Clone, Copy)]
struct Teardown {
    /// A failing logout listener aborts the teardown.
    strict_listeners: bool,
    /// Retire the subject afterwards if it became idle.
    evict: bool,
}

impl Teardown {
    /// Client disconnect.
    const CLIENT: Self = Self { strict_listeners: true, evict: true };
    /// A connect replacing older sessions of the same subject.
    const RESET: Self = Self { strict_listeners: true, evict: false };
    /// Expiry, kill, or cleanup of a failed connect.
    const FORCED: Self = Self { strict_listeners: false, evict: true };
    /// Registry shutdown.
    const HALT: Self = Self { strict_listeners: false, evict: false };
}

pub struct Authenticate {
    config: CourierConfig,
    node_ip: String,
    collab: Collaborators,
    timers: TimerService,
    sessions: DashMap<SecretToken, Arc<SessionInfo>>,
    subjects: DashMap<String, Arc<SubjectInfo>>,
    listeners: ListenerSet,
    token_counter: AtomicU64,
    reaper: mpsc::UnboundedSender<ReaperCommand>,
    halted: AtomicBool,
    started_at: Instant,
}

impl Authenticate {
    /// Build the registry and spawn its reaper on the timer service runtime.
    pub fn new(config: CourierConfig, collab: Collaborators, timers: TimerService) -> Arc<Self> {
        let (reaper, commands) = mpsc::unbounded_channel();
        let node_ip = if config.node.advertised_ip.is_empty() {
            detect_node_ip()
        } else {
            config.node.advertised_ip.clone()
        };
        let registry = Arc::new(Self {
            config,
            node_ip,
            collab,
            timers,
            sessions: DashMap::new(),
            subjects: DashMap::new(),
            listeners: ListenerSet::default(),
            token_counter: AtomicU64::new(0),
            reaper,
            halted: AtomicBool::new(false),
            started_at: Instant::now(),
        });
        registry
            .timers
            .runtime()
            .spawn(run_reaper(Arc::downgrade(&registry), commands));
        tracing::info!(
            node = %registry.config.node.node_id,
            max_sessions = registry.config.session.max_sessions,
            timeout_ms = registry.config.session.timeout_ms,
            "session registry started"
        );
        registry
    }

    pub fn config(&self) -> &CourierConfig {
        &self.config
    }

    pub fn node_id(&self) -> &str {
        &self.config.node.node_id
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    // ── Connect ───────────────────────────────────────────────────────────────

    /// Authenticate a client and register its session.
    ///
    /// A usable secret token that names a live session resumes that session.
    /// A positive public session id that is already live replaces the stale
    /// session and adopts its callback queue.
    pub fn connect(&self, request: ConnectRequest) -> Result<ConnectReturn, RegistryError> {
        let received_at_ms = now_ms();
        if self.halted.load(Ordering::Acquire) {
            return Err(RegistryError::Shutdown(self.config.node.node_id.clone()));
        }
        let login = request.login().to_string();
        self.validate_login(&login)?;

        let supplied = request.secret_session_id.clone().filter(|t| t.is_usable());
        if let Some(token) = &supplied {
            if let Ok(session) = self.check(token) {
                return self.reconnect(session, &request, received_at_ms);
            }
        }

        let token = match supplied {
            Some(token) => token,
            None => self.mint_token(&login),
        };
        let credentials = &request.credentials;
        let manager = self.collab.security.manager(
            credentials.plugin_type.as_deref(),
            credentials.plugin_version.as_deref(),
        )?;
        let security = manager.reserve_session(&token)?;
        let security_response = match security.init(credentials) {
            Ok(response) => response,
            Err(e) => {
                manager.release_session(&token);
                return Err(e.into());
            }
        };
        if security.subject_identity().as_deref() != Some(login.as_str()) {
            manager.release_session(&token);
            return Err(RegistryError::AccessDenied(format!(
                "security plugin did not confirm identity '{login}'"
            )));
        }

        match self.register_session(&request, &login, token.clone(), security) {
            Ok(session) => Ok(ConnectReturn {
                secret_session_id: token,
                session_name: session.name().clone(),
                reconnected: false,
                security_response,
                received_at_ms,
            }),
            Err(e) => {
                tracing::warn!(login = %login, error = %e, "connect failed, cleaning up");
                match self.check(&token) {
                    Ok(session) => {
                        // The login drained held entries into this session.
                        self.requeue(&login, session.detach_queue());
                        if let Err(cleanup) =
                            self.teardown(&session, DisconnectOptions::keep_queue(), Teardown::FORCED)
                        {
                            tracing::warn!(login = %login, error = %cleanup, "cleanup after failed connect failed");
                        }
                    }
                    Err(_) => manager.release_session(&token),
                }
                Err(e)
            }
        }
    }

    fn validate_login(&self, login: &str) -> Result<(), RegistryError> {
        if login == self.config.node.node_id {
            return Err(RegistryError::Configuration(format!(
                "login name '{login}' is reserved for this node"
            )));
        }
        if login.chars().count() < 2 {
            return Err(RegistryError::Configuration(format!(
                "login name '{login}' is too short, at least 2 characters required"
            )));
        }
        if self
            .subject_by_name(login)
            .is_some_and(|subject| subject.is_login_blocked())
        {
            tracing::warn!(login, "login rejected, subject is blocked");
            return Err(RegistryError::AccessDenied(format!("login of '{login}' is blocked")));
        }
        Ok(())
    }

    fn mint_token(&self, login: &str) -> SecretToken {
        let counter = self.token_counter.fetch_add(1, Ordering::Relaxed) + 1;
        SecretToken::generate(&self.node_ip, login, counter)
    }

    /// Resume a live session identified by its secret token.
    fn reconnect(
        &self,
        session: Arc<SessionInfo>,
        request: &ConnectRequest,
        received_at_ms: u64,
    ) -> Result<ConnectReturn, RegistryError> {
        if session.login() != request.login() {
            return Err(RegistryError::AccessDenied(format!(
                "secret session id does not belong to '{}'",
                request.login()
            )));
        }
        let security_response = session
            .security()
            .init(&request.credentials)
            .map_err(RegistryError::from)?;
        if request.has_callback() {
            session.update_callback_addresses(request.callback_addresses.clone());
        }
        session.refresh();
        tracing::info!(session = %session.name(), "client reconnected with its secret session id");
        self.listeners.fire(ClientEventKind::Reconnected, &session)?;
        Ok(ConnectReturn {
            secret_session_id: session.secret_token(),
            session_name: session.name().clone(),
            reconnected: true,
            security_response,
            received_at_ms,
        })
    }

    fn register_session(
        &self,
        request: &ConnectRequest,
        login: &str,
        token: SecretToken,
        security: Arc<dyn SessionContext>,
    ) -> Result<Arc<SessionInfo>, RegistryError> {
        let max_sessions = request
            .max_sessions
            .unwrap_or(self.config.session.max_sessions);
        let mut inherited: Option<Arc<dyn CallbackQueue>> = None;

        let mut attempt = 0;
        let (subject, slot) = loop {
            let subject = self.get_or_create_subject(login);
            if let Err(e) = self.reset_previous_sessions(&subject, request, &mut inherited) {
                self.requeue(login, inherited.take());
                return Err(e);
            }
            match subject.check_capacity(max_sessions) {
                Ok(slot) => break (subject, slot),
                // Retired by a concurrent logout; the next lookup replaces it.
                Err(RegistryError::Shutdown(_)) if attempt < 2 => attempt += 1,
                Err(e) => {
                    self.requeue(login, inherited.take());
                    return Err(e);
                }
            }
        };

        let settings = SessionSettings {
            timeout: request
                .session_timeout_ms
                .map(Duration::from_millis)
                .or_else(|| self.config.session.timeout()),
            max_sessions,
            callback_addresses: request.callback_addresses.clone(),
        };
        let adopted = if request.has_callback() {
            inherited.take()
        } else {
            None
        };
        let session = SessionInfo::new(SessionInit {
            token: token.clone(),
            login: login.to_string(),
            public_session_id: request.public_session_id,
            security,
            settings,
            queue_capacity: self.config.session.callback_queue_max_entries,
            inherited_queue: adopted,
            queues: self.collab.queues.clone(),
            dispatch: self.collab.dispatch.clone(),
            errors: self.collab.errors.clone(),
            subscriptions: self.collab.subscriptions.clone(),
            timers: self.timers.clone(),
            reaper: self.reaper.clone(),
        })?;

        self.sessions.insert(token.clone(), session.clone());
        if let Err(e) = subject.notify_login(&session, slot) {
            self.sessions.remove(&token);
            self.requeue(login, session.detach_queue());
            session.shutdown();
            return Err(e);
        }
        // The replacing session has no callback: route the adopted entries again.
        self.requeue(login, inherited.take());

        session.refresh();
        tracing::info!(
            session = %session.name(),
            callback = session.has_callback(),
            sessions = subject.num_sessions(),
            "client logged in"
        );
        self.listeners.fire(ClientEventKind::Login, &session)?;
        self.verify_session(&session);
        Ok(session)
    }

    /// Reset a stale session with the requested public id, and with
    /// `clear_sessions` every other session of the subject. Queues are kept.
    fn reset_previous_sessions(
        &self,
        subject: &Arc<SubjectInfo>,
        request: &ConnectRequest,
        inherited: &mut Option<Arc<dyn CallbackQueue>>,
    ) -> Result<(), RegistryError> {
        if let Some(public_id) = request.public_session_id.filter(|id| *id > 0) {
            if let Some(stale) = subject.session_by_public_id(public_id) {
                tracing::warn!(
                    session = %stale.name(),
                    "session is still logged in, resetting it for the reconnecting client"
                );
                let queue = stale.detach_queue();
                match self.ignore_unknown(self.teardown(&stale, DisconnectOptions::keep_queue(), Teardown::RESET)) {
                    Ok(()) => {
                        if queue.is_some() {
                            *inherited = queue;
                        }
                    }
                    Err(e) => {
                        // The stale session stays registered, give its queue back.
                        if let Some(queue) = queue {
                            if let Err(queue) = stale.reattach_queue(queue) {
                                *inherited = Some(queue);
                            }
                        }
                        return Err(e);
                    }
                }
            }
        }
        if request.clear_sessions {
            for session in subject.get_sessions().iter() {
                tracing::info!(session = %session.name(), "clearing session on client request");
                self.ignore_unknown(self.teardown(session, DisconnectOptions::keep_queue(), Teardown::RESET))?;
            }
        }
        Ok(())
    }

    /// Route entries of a dropped callback queue through the subject again.
    fn requeue(&self, login: &str, queue: Option<Arc<dyn CallbackQueue>>) {
        let Some(queue) = queue else {
            return;
        };
        let mut moved = 0;
        while let Some(entry) = queue.remove() {
            let short_id = entry.short_id();
            match self.route_ptp(login, entry) {
                Ok(_) => moved += 1,
                Err(e) => {
                    tracing::warn!(login, entry = %short_id, error = %e, "entry of replaced session lost")
                }
            }
        }
        queue.shutdown();
        if moved > 0 {
            tracing::info!(login, moved, "entries of replaced session routed again");
        }
    }

    fn ignore_unknown(&self, result: Result<(), RegistryError>) -> Result<(), RegistryError> {
        match result {
            Err(RegistryError::UnknownSession) => Ok(()),
            other => other,
        }
    }

    // ── Disconnect ────────────────────────────────────────────────────────────

    /// Remove a session from both indexes and shut it down.
    ///
    /// Listeners see the logout while the session is still registered; a
    /// failing listener aborts the disconnect.
    pub fn disconnect(&self, token: &SecretToken, options: DisconnectOptions) -> Result<(), RegistryError> {
        let session = self
            .sessions
            .get(token)
            .map(|s| s.value().clone())
            .ok_or(RegistryError::UnknownSession)?;
        self.teardown(&session, options, Teardown::CLIENT)
    }

    fn teardown(
        &self,
        session: &Arc<SessionInfo>,
        options: DisconnectOptions,
        mode: Teardown,
    ) -> Result<(), RegistryError> {
        if !session.begin_disconnect() {
            return Err(RegistryError::UnknownSession);
        }
        if let Err(e) = self.listeners.fire(ClientEventKind::Logout, session) {
            if mode.strict_listeners {
                session.abort_disconnect();
                return Err(e);
            }
        }

        let token = session.secret_token();
        self.sessions
            .remove_if(&token, |_, registered| Arc::ptr_eq(registered, session));
        session.security().manager().release_session(&token);

        let subject = session
            .subject_key()
            .and_then(|login| self.subjects.get(&login).map(|s| s.value().clone()));
        if let Some(subject) = &subject {
            subject.notify_logout(session, options.clear_subject_queue);
        }
        session.shutdown();
        tracing::info!(session = %session.name(), "client logged out");

        if let (true, Some(subject)) = (options.clear_sessions, &subject) {
            let rest = DisconnectOptions {
                clear_sessions: false,
                ..options
            };
            for other in subject.get_sessions().iter() {
                self.ignore_unknown(self.teardown(other, rest, mode))?;
            }
        }
        if let (true, Some(subject)) = (mode.evict, &subject) {
            self.schedule_eviction(subject);
        }
        self.verify_session(session);
        Ok(())
    }

    // ── Lookup ────────────────────────────────────────────────────────────────

    /// Session of a secret token. Called on every request; no side effects.
    pub fn check(&self, token: &SecretToken) -> Result<Arc<SessionInfo>, RegistryError> {
        self.sessions
            .get(token)
            .map(|s| s.value().clone())
            .ok_or_else(|| RegistryError::AccessDenied("unknown secret session id".to_string()))
    }

    /// `check` plus a refresh of the expiry timer.
    pub fn keep_alive(&self, token: &SecretToken) -> Result<Arc<SessionInfo>, RegistryError> {
        let session = self.check(token)?;
        session.refresh();
        Ok(session)
    }

    /// Subject of a login name, created on first use. A retired subject is replaced.
    pub fn get_or_create_subject(&self, login: &str) -> Arc<SubjectInfo> {
        match self.subjects.entry(login.to_string()) {
            Entry::Occupied(mut occupied) if occupied.get().is_shutdown() => {
                let fresh = self.new_subject(login);
                occupied.insert(fresh.clone());
                fresh
            }
            Entry::Occupied(occupied) => occupied.get().clone(),
            Entry::Vacant(vacant) => {
                let fresh = self.new_subject(login);
                vacant.insert(fresh.clone());
                tracing::debug!(login, "subject created");
                fresh
            }
        }
    }

    fn new_subject(&self, login: &str) -> Arc<SubjectInfo> {
        let holding = self.collab.queues.create(
            QueueRelating::Subject,
            login,
            self.config.session.subject_queue_max_entries,
        );
        Arc::new(SubjectInfo::new(login, holding, self.config.session.max_sessions))
    }

    pub fn subject_by_name(&self, login: &str) -> Option<Arc<SubjectInfo>> {
        self.subjects
            .get(login)
            .map(|s| s.value().clone())
            .filter(|s| !s.is_shutdown())
    }

    /// Deliver a point-to-point entry to a subject, creating it if unknown.
    pub fn route_ptp(&self, login: &str, entry: QueueEntry) -> Result<Routed, RegistryError> {
        for _ in 0..3 {
            let subject = self.get_or_create_subject(login);
            match subject.queue_message(entry.clone()) {
                Err(RegistryError::Shutdown(_)) => continue,
                other => return other,
            }
        }
        Err(RegistryError::Internal(format!(
            "subject '{login}' kept shutting down while routing"
        )))
    }

    // ── Listeners ─────────────────────────────────────────────────────────────

    pub fn add_listener(&self, listener: Arc<dyn ClientListener>) {
        self.listeners.add(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn ClientListener>) -> bool {
        self.listeners.remove(listener)
    }

    // ── Session management ────────────────────────────────────────────────────

    /// Re-key a live session. Fails if `old` is unknown or `new` is taken.
    pub fn change_secret_session_id(&self, old: &SecretToken, new: &SecretToken) -> Result<(), RegistryError> {
        if !new.is_usable() {
            return Err(RegistryError::Configuration(
                "new secret session id is too short".to_string(),
            ));
        }
        let session = self.check(old)?;
        match self.sessions.entry(new.clone()) {
            Entry::Occupied(_) => {
                return Err(RegistryError::Configuration(
                    "secret session id already in use".to_string(),
                ))
            }
            Entry::Vacant(vacant) => {
                vacant.insert(session.clone());
            }
        }
        if let Err(e) = session.security().manager().change_session_id(old, new) {
            self.sessions.remove(new);
            return Err(e.into());
        }
        self.sessions.remove(old);
        session.set_secret_token(new.clone());
        tracing::info!(session = %session.name(), "secret session id changed");
        Ok(())
    }

    /// Schedule removal of a session. The reaper disconnects it.
    pub fn kill_session(&self, name: &SessionName) -> Result<(), RegistryError> {
        let session = self
            .subject_by_name(&name.login)
            .and_then(|subject| subject.session_by_public_id(name.public_id))
            .ok_or(RegistryError::UnknownSession)?;
        tracing::warn!(session = %name, "session kill requested");
        self.reaper
            .send(ReaperCommand::Kill {
                token: session.secret_token(),
                session: name.clone(),
            })
            .map_err(|_| RegistryError::Shutdown(self.config.node.node_id.clone()))
    }

    /// The transport lost the client connection. The session stays registered.
    pub fn connection_lost(&self, token: &SecretToken) -> Result<(), RegistryError> {
        self.check(token)?.connection_lost();
        Ok(())
    }

    /// Reset every session without clearing any queue. New connects are refused.
    pub fn shutdown(&self) {
        if self.halted.swap(true, Ordering::AcqRel) {
            return;
        }
        let sessions: Vec<Arc<SessionInfo>> =
            self.sessions.iter().map(|s| s.value().clone()).collect();
        tracing::info!(sessions = sessions.len(), "registry shutting down");
        for session in &sessions {
            if let Err(e) = self.teardown(session, DisconnectOptions::keep_queue(), Teardown::HALT) {
                tracing::debug!(session = %session.name(), error = %e, "session already gone");
            }
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }

    // ── Eviction ──────────────────────────────────────────────────────────────

    fn schedule_eviction(&self, subject: &Arc<SubjectInfo>) {
        if subject.is_logged_in() || !subject.holding_queue().is_empty() {
            return;
        }
        let delay = self.config.session.eviction_delay();
        if delay.is_zero() {
            self.evict_if_idle(subject.login());
            return;
        }
        let reaper = self.reaper.clone();
        let login = subject.login().to_string();
        self.timers.runtime().spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = reaper.send(ReaperCommand::Evict { login });
        });
    }

    fn evict_if_idle(&self, login: &str) {
        let Some(subject) = self.subjects.get(login).map(|s| s.value().clone()) else {
            return;
        };
        if subject.try_retire() {
            self.subjects
                .remove_if(login, |_, registered| Arc::ptr_eq(registered, &subject));
            tracing::debug!(login, "idle subject evicted");
        }
    }

    fn force_disconnect(&self, token: &SecretToken, name: &SessionName, reason: &str) {
        let Ok(session) = self.check(token) else {
            tracing::debug!(session = %name, reason, "session already gone");
            return;
        };
        if session.name() != name {
            return;
        }
        match self.teardown(&session, DisconnectOptions::default(), Teardown::FORCED) {
            Ok(()) => tracing::info!(session = %name, reason, "session removed"),
            Err(RegistryError::UnknownSession) => {}
            Err(e) => tracing::warn!(session = %name, reason, error = %e, "forced disconnect failed"),
        }
    }

    fn handle(&self, command: ReaperCommand) {
        match command {
            ReaperCommand::Expire { token, session } => self.force_disconnect(&token, &session, "expired"),
            ReaperCommand::Kill { token, session } => self.force_disconnect(&token, &session, "killed"),
            ReaperCommand::Evict { login } => self.evict_if_idle(&login),
        }
    }

    // ── Consistency and admin ─────────────────────────────────────────────────

    /// Compare index sizes. A mismatch is logged, never repaired.
    pub fn verify_consistency(&self) -> bool {
        let by_token = self.sessions.len();
        let by_subject: usize = self.subjects().iter().map(|s| s.num_sessions()).sum();
        if by_token != by_subject {
            tracing::error!(by_token, by_subject, "registry indexes diverged");
            return false;
        }
        true
    }

    /// A session must be in both indexes or in neither. Sessions in the
    /// middle of a teardown are skipped.
    fn verify_session(&self, session: &Arc<SessionInfo>) -> bool {
        if session.is_disconnecting() && !session.is_shutdown() {
            return true;
        }
        let indexed = self
            .sessions
            .get(&session.secret_token())
            .is_some_and(|s| Arc::ptr_eq(s.value(), session));
        let member = self
            .subject_by_name(session.login())
            .and_then(|subject| subject.session_by_public_id(session.public_id()))
            .is_some_and(|s| Arc::ptr_eq(&s, session));
        if indexed != member {
            tracing::error!(session = %session.name(), indexed, member, "registry indexes diverged");
            return false;
        }
        true
    }

    /// Sessions reachable from one index but not the other.
    pub fn index_anomalies(&self) -> Vec<String> {
        let mut anomalies = Vec::new();
        let registered: Vec<Arc<SessionInfo>> =
            self.sessions.iter().map(|s| s.value().clone()).collect();
        for session in &registered {
            let member = self
                .subject_by_name(session.login())
                .and_then(|subject| subject.session_by_public_id(session.public_id()))
                .is_some_and(|s| Arc::ptr_eq(&s, session));
            if !member {
                anomalies.push(format!("{} missing from its subject", session.name()));
            }
        }
        for subject in self.subjects() {
            for session in subject.get_sessions().iter() {
                let indexed = self
                    .sessions
                    .get(&session.secret_token())
                    .is_some_and(|s| Arc::ptr_eq(s.value(), session));
                if !indexed {
                    anomalies.push(format!("{} missing from the token index", session.name()));
                }
            }
        }
        anomalies
    }

    pub fn num_sessions(&self) -> usize {
        self.sessions.len()
    }

    pub fn num_subjects(&self) -> usize {
        self.subjects.len()
    }

    /// All live subjects, sorted by login.
    pub fn subjects(&self) -> Vec<Arc<SubjectInfo>> {
        let mut subjects: Vec<Arc<SubjectInfo>> = self
            .subjects
            .iter()
            .map(|s| s.value().clone())
            .filter(|s| !s.is_shutdown())
            .collect();
        subjects.sort_by(|a, b| a.login().cmp(b.login()));
        subjects
    }

    pub fn subject_list(&self) -> Vec<String> {
        self.subjects().iter().map(|s| s.login().to_string()).collect()
    }

    pub fn status(&self) -> RegistrySnapshot {
        let subjects = self.subjects();
        RegistrySnapshot {
            node_id: self.config.node.node_id.clone(),
            uptime_secs: self.uptime().as_secs(),
            num_subjects: subjects.len(),
            num_sessions: self.num_sessions(),
            consistent: self.index_anomalies().is_empty(),
            subjects: subjects.iter().map(|s| s.snapshot()).collect(),
        }
    }
}

async fn run_reaper(registry: Weak<Authenticate>, mut commands: mpsc::UnboundedReceiver<ReaperCommand>) {
    while let Some(command) = commands.recv().await {
        let Some(registry) = registry.upgrade() else {
            break;
        };
        registry.handle(command);
    }
    tracing::debug!("reaper stopped");
}

/// Outbound interface address, used in generated tokens.
fn detect_node_ip() -> String {
    std::net::UdpSocket::bind("0.0.0.0:0")
        .and_then(|socket| {
            socket.connect("192.0.2.1:9")?;
            socket.local_addr()
        })
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|_| "127.0.0.1".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ClientEvent;
    use courier_core::{CallbackAddress, Credentials};
    use std::sync::Mutex;

    fn registry() -> Arc<Authenticate> {
        let mut config = CourierConfig::default();
        config.security.allow_anonymous = true;
        config.node.advertised_ip = "10.1.1.1".into();
        let collab = Collaborators::in_memory(&config);
        Authenticate::new(config, collab, TimerService::current().unwrap())
    }

    fn request(login: &str) -> ConnectRequest {
        ConnectRequest::new(Credentials::new(login, "pw"))
            .with_callback(CallbackAddress::new("SOCKET", "127.0.0.1:7607"))
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<(ClientEventKind, String, bool)>>,
        fail_on: Mutex<Option<ClientEventKind>>,
    }

    impl ClientListener for Recorder {
        fn on_event(&self, event: &ClientEvent<'_>) -> anyhow::Result<()> {
            self.events.lock().unwrap().push((
                event.kind,
                event.session.name().to_string(),
                event.session.is_shutdown(),
            ));
            if *self.fail_on.lock().unwrap() == Some(event.kind) {
                anyhow::bail!("listener refused {:?}", event.kind);
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn token_embeds_node_ip_and_login() {
        let auth = registry();
        let ret = auth.connect(request("joe")).unwrap();
        assert!(ret.secret_session_id.expose().starts_with("10.1.1.1-joe-"));
        assert!(!ret.reconnected);
        assert!(ret.session_name.public_id < 0);
        assert!(auth.check(&ret.secret_session_id).is_ok());
    }

    #[tokio::test]
    async fn node_name_and_short_logins_rejected() {
        let auth = registry();
        assert!(matches!(
            auth.connect(request("courier")),
            Err(RegistryError::Configuration(_))
        ));
        assert!(matches!(
            auth.connect(request("j")),
            Err(RegistryError::Configuration(_))
        ));
        assert_eq!(auth.num_sessions(), 0);
    }

    #[tokio::test]
    async fn wrong_password_leaves_no_state() {
        let mut config = CourierConfig::default();
        config.security.users = vec![courier_core::config::UserEntry {
            login: "joe".into(),
            password: "secret".into(),
        }];
        let collab = Collaborators::in_memory(&config);
        let auth = Authenticate::new(config, collab, TimerService::current().unwrap());
        assert!(matches!(
            auth.connect(request("joe")),
            Err(RegistryError::Authentication { .. })
        ));
        assert_eq!(auth.num_sessions(), 0);
        let ok = ConnectRequest::new(Credentials::new("joe", "secret"));
        assert!(auth.connect(ok).is_ok());
    }

    #[tokio::test]
    async fn unknown_plugin_is_configuration_error() {
        let auth = registry();
        let req = ConnectRequest::new(Credentials::new("joe", "pw").with_plugin("ldap", "3.0"));
        assert!(matches!(auth.connect(req), Err(RegistryError::Configuration(_))));
    }

    #[tokio::test]
    async fn reconnect_with_secret_token_returns_same_session() {
        let auth = registry();
        let first = auth.connect(request("joe")).unwrap();
        let again = auth
            .connect(request("joe").with_secret_session_id(first.secret_session_id.clone()))
            .unwrap();
        assert!(again.reconnected);
        assert_eq!(again.session_name, first.session_name);
        assert_eq!(auth.num_sessions(), 1);

        let stolen = auth.connect(request("eve").with_secret_session_id(first.secret_session_id.clone()));
        assert!(matches!(stolen, Err(RegistryError::AccessDenied(_))));
    }

    #[tokio::test]
    async fn disconnect_unknown_token() {
        let auth = registry();
        assert!(matches!(
            auth.disconnect(&SecretToken::new("nope"), DisconnectOptions::default()),
            Err(RegistryError::UnknownSession)
        ));
        assert!(matches!(
            auth.check(&SecretToken::new("nope")),
            Err(RegistryError::AccessDenied(_))
        ));
    }

    #[tokio::test]
    async fn listeners_see_logout_before_removal() {
        let auth = registry();
        let recorder = Arc::new(Recorder::default());
        auth.add_listener(recorder.clone());
        let ret = auth.connect(request("joe")).unwrap();
        auth.disconnect(&ret.secret_session_id, DisconnectOptions::default()).unwrap();

        let events = recorder.events.lock().unwrap().clone();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].0, ClientEventKind::Login);
        assert_eq!(events[1].0, ClientEventKind::Logout);
        assert!(!events[1].2, "session must still be alive during logout");
    }

    #[tokio::test]
    async fn failing_login_listener_aborts_connect() {
        let auth = registry();
        let recorder = Arc::new(Recorder::default());
        *recorder.fail_on.lock().unwrap() = Some(ClientEventKind::Login);
        let listener: Arc<dyn ClientListener> = recorder.clone();
        auth.add_listener(listener.clone());

        assert!(matches!(auth.connect(request("joe")), Err(RegistryError::Listener(_))));
        assert_eq!(auth.num_sessions(), 0);
        assert!(auth.index_anomalies().is_empty());

        assert!(auth.remove_listener(&listener));
        assert!(auth.connect(request("joe")).is_ok());
    }

    #[tokio::test]
    async fn failing_login_listener_keeps_held_entries() {
        let auth = registry();
        auth.route_ptp("joe", QueueEntry::new("news", "bob", bytes::Bytes::from_static(b"m1")))
            .unwrap();
        let recorder = Arc::new(Recorder::default());
        *recorder.fail_on.lock().unwrap() = Some(ClientEventKind::Login);
        auth.add_listener(recorder.clone());

        assert!(matches!(auth.connect(request("joe")), Err(RegistryError::Listener(_))));
        let joe = auth.subject_by_name("joe").unwrap();
        assert_eq!(joe.num_sessions(), 0);
        assert_eq!(joe.holding_queue().num_entries(), 1);

        *recorder.fail_on.lock().unwrap() = None;
        let ret = auth.connect(request("joe")).unwrap();
        assert_eq!(auth.check(&ret.secret_session_id).unwrap().queue_entries(), 1);
    }

    #[tokio::test]
    async fn failing_reset_keeps_queue_of_stale_session() {
        let auth = registry();
        let first = auth.connect(request("erin").with_public_session_id(7)).unwrap();
        auth.route_ptp("erin", QueueEntry::new("news", "bob", bytes::Bytes::from_static(b"m1")))
            .unwrap();
        let recorder = Arc::new(Recorder::default());
        *recorder.fail_on.lock().unwrap() = Some(ClientEventKind::Logout);
        auth.add_listener(recorder.clone());

        assert!(matches!(
            auth.connect(request("erin").with_public_session_id(7)),
            Err(RegistryError::Listener(_))
        ));
        let stale = auth.check(&first.secret_session_id).unwrap();
        assert!(stale.has_callback());
        assert_eq!(stale.queue_entries(), 1);
        assert_eq!(auth.num_sessions(), 1);
        assert!(auth.index_anomalies().is_empty());
    }

    #[tokio::test]
    async fn session_check_spots_one_sided_index() {
        let auth = registry();
        let ret = auth.connect(request("joe")).unwrap();
        let session = auth.check(&ret.secret_session_id).unwrap();
        assert!(auth.verify_session(&session));

        auth.disconnect(&ret.secret_session_id, DisconnectOptions::default()).unwrap();
        assert!(auth.verify_session(&session));

        let other = auth.connect(request("bob")).unwrap();
        let bob = auth.check(&other.secret_session_id).unwrap();
        auth.sessions.remove(&other.secret_session_id);
        assert!(!auth.verify_session(&bob));
    }

    #[tokio::test]
    async fn failing_logout_listener_aborts_disconnect() {
        let auth = registry();
        let recorder = Arc::new(Recorder::default());
        auth.add_listener(recorder.clone());
        let ret = auth.connect(request("joe")).unwrap();

        *recorder.fail_on.lock().unwrap() = Some(ClientEventKind::Logout);
        assert!(matches!(
            auth.disconnect(&ret.secret_session_id, DisconnectOptions::default()),
            Err(RegistryError::Listener(_))
        ));
        assert!(auth.check(&ret.secret_session_id).is_ok());

        *recorder.fail_on.lock().unwrap() = None;
        auth.disconnect(&ret.secret_session_id, DisconnectOptions::default()).unwrap();
        assert_eq!(auth.num_sessions(), 0);
    }

    #[tokio::test]
    async fn blocked_subject_cannot_login() {
        let auth = registry();
        let ret = auth.connect(request("joe")).unwrap();
        auth.subject_by_name("joe").unwrap().set_block_login(true);
        assert!(matches!(auth.connect(request("joe")), Err(RegistryError::AccessDenied(_))));
        assert!(auth.check(&ret.secret_session_id).is_ok());
        auth.subject_by_name("joe").unwrap().set_block_login(false);
        assert!(auth.connect(request("joe")).is_ok());
    }

    #[tokio::test]
    async fn change_secret_session_id_rekeys() {
        let auth = registry();
        let a = auth.connect(request("joe")).unwrap();
        let b = auth.connect(request("bob")).unwrap();
        let fresh = SecretToken::new("brand-new-token");

        assert!(auth
            .change_secret_session_id(&a.secret_session_id, &b.secret_session_id)
            .is_err());
        auth.change_secret_session_id(&a.secret_session_id, &fresh).unwrap();
        assert!(auth.check(&a.secret_session_id).is_err());
        assert_eq!(auth.check(&fresh).unwrap().name(), &a.session_name);
        auth.disconnect(&fresh, DisconnectOptions::default()).unwrap();
        assert_eq!(auth.num_sessions(), 1);
    }

    #[tokio::test]
    async fn clear_sessions_on_connect() {
        let auth = registry();
        let a = auth.connect(request("joe")).unwrap();
        let b = auth.connect(request("joe")).unwrap();
        let c = auth.connect(request("joe").with_clear_sessions(true)).unwrap();
        assert!(auth.check(&a.secret_session_id).is_err());
        assert!(auth.check(&b.secret_session_id).is_err());
        assert!(auth.check(&c.secret_session_id).is_ok());
        assert_eq!(auth.subject_by_name("joe").unwrap().num_sessions(), 1);
    }

    #[tokio::test]
    async fn clear_sessions_on_disconnect() {
        let auth = registry();
        let a = auth.connect(request("joe")).unwrap();
        auth.connect(request("joe")).unwrap();
        auth.connect(request("bob")).unwrap();
        let options = DisconnectOptions {
            clear_sessions: true,
            ..DisconnectOptions::default()
        };
        auth.disconnect(&a.secret_session_id, options).unwrap();
        assert_eq!(auth.num_sessions(), 1);
        assert!(auth.subject_by_name("joe").is_none());
    }

    #[tokio::test]
    async fn idle_subject_evicted_but_not_with_held_messages() {
        let auth = registry();
        let joe = auth.connect(request("joe")).unwrap();
        auth.disconnect(&joe.secret_session_id, DisconnectOptions::default()).unwrap();
        assert!(auth.subject_by_name("joe").is_none());

        let bob = auth.connect(ConnectRequest::new(Credentials::new("bob", "pw"))).unwrap();
        auth.route_ptp("bob", QueueEntry::new("news", "x", bytes::Bytes::new())).unwrap();
        auth.disconnect(&bob.secret_session_id, DisconnectOptions::keep_queue()).unwrap();
        let subject = auth.subject_by_name("bob").unwrap();
        assert_eq!(subject.holding_queue().num_entries(), 1);
    }

    #[tokio::test]
    async fn shutdown_resets_sessions_and_refuses_connects() {
        let auth = registry();
        auth.connect(ConnectRequest::new(Credentials::new("joe", "pw"))).unwrap();
        auth.route_ptp("joe", QueueEntry::new("news", "x", bytes::Bytes::new())).unwrap();
        auth.shutdown();
        assert_eq!(auth.num_sessions(), 0);
        assert_eq!(auth.subject_by_name("joe").unwrap().holding_queue().num_entries(), 1);
        assert!(matches!(auth.connect(request("joe")), Err(RegistryError::Shutdown(_))));
    }

    #[tokio::test]
    async fn status_snapshot_lists_subjects() {
        let auth = registry();
        auth.connect(request("joe")).unwrap();
        auth.connect(request("bob")).unwrap();
        let status = auth.status();
        assert_eq!(status.num_sessions, 2);
        assert_eq!(auth.subject_list(), vec!["bob".to_string(), "joe".to_string()]);
        assert!(status.consistent);
        assert_eq!(status.subjects[1].sessions.len(), 1);
        assert!(status.subjects[1].sessions[0].has_callback);
    }
}
