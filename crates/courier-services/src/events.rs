//! Login / logout notifications.

use std::sync::{Arc, Mutex};

use crate::error::RegistryError;
use crate::lock;
use crate::session::SessionInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientEventKind {
    /// A new session was registered.
    Login,
    /// A session is about to be removed. It is still registered and inspectable.
    Logout,
    /// A client resumed an existing session with its secret token.
    Reconnected,
}

pub struct ClientEvent<'a> {
    pub kind: ClientEventKind,
    pub session: &'a Arc<SessionInfo>,
}

/// Observer of session lifecycle events.
///
/// An error aborts the connect or disconnect that fired the event and is
/// returned to its caller.
pub trait ClientListener: Send + Sync {
    fn on_event(&self, event: &ClientEvent<'_>) -> anyhow::Result<()>;
}

#[derive(Default)]
pub struct ListenerSet {
    listeners: Mutex<Vec<Arc<dyn ClientListener>>>,
}

impl ListenerSet {
    pub fn add(&self, listener: Arc<dyn ClientListener>) {
        lock(&self.listeners).push(listener);
    }

    /// Returns false if the listener was not registered.
    pub fn remove(&self, listener: &Arc<dyn ClientListener>) -> bool {
        let mut listeners = lock(&self.listeners);
        let before = listeners.len();
        listeners.retain(|l| !Arc::ptr_eq(l, listener));
        listeners.len() != before
    }

    pub fn len(&self) -> usize {
        lock(&self.listeners).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Notify every listener in registration order; stops at the first error.
    pub fn fire(&self, kind: ClientEventKind, session: &Arc<SessionInfo>) -> Result<(), RegistryError> {
        let listeners = lock(&self.listeners).clone();
        let event = ClientEvent { kind, session };
        for listener in listeners {
            listener.on_event(&event).map_err(|e| {
                tracing::warn!(session = %session.name(), ?kind, error = %e, "client listener failed");
                RegistryError::Listener(e)
            })?;
        }
        Ok(())
    }
}
