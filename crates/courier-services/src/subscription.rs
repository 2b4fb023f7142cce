//! Subscription lookup for the admin view of a session.

use dashmap::DashMap;

use courier_core::SessionName;

/// External index of active subscriptions.
pub trait SubscriptionIndex: Send + Sync {
    /// Subscription ids held by a session.
    fn subscriptions_of(&self, session: &SessionName) -> Vec<String>;
}

/// In-memory index, keyed by session.
#[derive(Default)]
pub struct MemorySubscriptions {
    by_session: DashMap<SessionName, Vec<String>>,
}

impl MemorySubscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, session: &SessionName, subscription_id: impl Into<String>) {
        self.by_session
            .entry(session.clone())
            .or_default()
            .push(subscription_id.into());
    }

    pub fn unsubscribe_all(&self, session: &SessionName) {
        self.by_session.remove(session);
    }
}

impl SubscriptionIndex for MemorySubscriptions {
    fn subscriptions_of(&self, session: &SessionName) -> Vec<String> {
        self.by_session
            .get(session)
            .map(|s| s.value().clone())
            .unwrap_or_default()
    }
}
