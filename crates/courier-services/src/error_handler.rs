//! Delivery failure handling.
//!
//! A failed put into a session queue is never raised through the routing
//! path. It is reported here instead.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use courier_core::SessionName;

/// One failed delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub session: SessionName,
    /// Hex id of the entry that could not be queued.
    pub entry_id: String,
    pub reason: String,
}

pub trait ErrorHandler: Send + Sync {
    fn handle_error(&self, info: ErrorInfo);

    fn shutdown(&self) {}
}

/// Logs every failure and counts them.
#[derive(Debug, Default)]
pub struct LoggingErrorHandler {
    failures: AtomicU64,
}

impl LoggingErrorHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

impl ErrorHandler for LoggingErrorHandler {
    fn handle_error(&self, info: ErrorInfo) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            session = %info.session,
            entry = %info.entry_id,
            reason = %info.reason,
            "delivery failed"
        );
    }
}

/// Per-session wrapper, shut down together with its session.
pub struct SessionErrorHandler {
    session: SessionName,
    inner: Arc<dyn ErrorHandler>,
    shutdown: AtomicBool,
}

impl SessionErrorHandler {
    pub fn new(session: SessionName, inner: Arc<dyn ErrorHandler>) -> Self {
        Self {
            session,
            inner,
            shutdown: AtomicBool::new(false),
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

impl ErrorHandler for SessionErrorHandler {
    fn handle_error(&self, info: ErrorInfo) {
        if self.is_shutdown() {
            tracing::debug!(session = %self.session, reason = %info.reason, "error after session shutdown ignored");
            return;
        }
        self.inner.handle_error(info);
    }

    fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }
}
