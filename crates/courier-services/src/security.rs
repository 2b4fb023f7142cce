//! Security plugins.
//!
//! A `SecurityManager` hands out one `SessionContext` per secret session id.
//! The context authenticates the credentials and answers authorization
//! questions for the lifetime of the session.
//!
//! The built-in "simple" plugin checks a login/password table from the config,
//! or accepts anyone when anonymous logins are allowed. It authorizes every
//! action of an authenticated subject.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use dashmap::DashMap;

use courier_core::config::SecurityConfig;
use courier_core::{Credentials, SecretToken};

use crate::error::SecurityError;
use crate::lock;

/// Per-session security state.
pub trait SessionContext: Send + Sync {
    /// Authenticate. Returns an optional response blob for the client.
    fn init(&self, credentials: &Credentials) -> Result<Option<String>, SecurityError>;

    /// Login name established by `init`, `None` before.
    fn subject_identity(&self) -> Option<String>;

    fn is_authorized(&self, action: &str, resource: &str) -> bool;

    fn secret_session_id(&self) -> SecretToken;

    fn change_session_id(&self, new_token: SecretToken);

    fn manager(&self) -> Arc<dyn SecurityManager>;
}

/// One security plugin.
pub trait SecurityManager: Send + Sync {
    fn plugin_type(&self) -> &str;

    fn version(&self) -> &str;

    fn reserve_session(&self, token: &SecretToken) -> Result<Arc<dyn SessionContext>, SecurityError>;

    fn release_session(&self, token: &SecretToken);

    fn session_by_id(&self, token: &SecretToken) -> Option<Arc<dyn SessionContext>>;

    /// Re-key a reserved session.
    fn change_session_id(&self, old: &SecretToken, new: &SecretToken) -> Result<(), SecurityError>;
}

// ── Plugin registry ───────────────────────────────────────────────────────────

/// Security managers by (type, version).
pub struct PluginRegistry {
    default_type: String,
    default_version: String,
    managers: DashMap<(String, String), Arc<dyn SecurityManager>>,
}

impl PluginRegistry {
    pub fn new(default_type: impl Into<String>, default_version: impl Into<String>) -> Self {
        Self {
            default_type: default_type.into(),
            default_version: default_version.into(),
            managers: DashMap::new(),
        }
    }

    /// Registry with the "simple" plugin configured from `[security]`.
    pub fn from_config(config: &SecurityConfig) -> Self {
        let registry = Self::new(&config.default_plugin_type, &config.default_plugin_version);
        registry.register(Arc::new(SimpleManager::from_config(config)));
        registry
    }

    pub fn register(&self, manager: Arc<dyn SecurityManager>) {
        tracing::info!(
            plugin = manager.plugin_type(),
            version = manager.version(),
            "security plugin registered"
        );
        self.managers.insert(
            (manager.plugin_type().to_string(), manager.version().to_string()),
            manager,
        );
    }

    /// Manager for the requested plugin, falling back to the configured default.
    pub fn manager(
        &self,
        plugin_type: Option<&str>,
        version: Option<&str>,
    ) -> Result<Arc<dyn SecurityManager>, SecurityError> {
        let plugin_type = plugin_type.unwrap_or(&self.default_type);
        let version = version.unwrap_or(&self.default_version);
        self.managers
            .get(&(plugin_type.to_string(), version.to_string()))
            .map(|m| m.value().clone())
            .ok_or_else(|| SecurityError::UnknownPlugin {
                plugin_type: plugin_type.to_string(),
                version: version.to_string(),
            })
    }
}

// ── Simple plugin ─────────────────────────────────────────────────────────────

struct SimpleInner {
    users: HashMap<String, String>,
    allow_anonymous: bool,
    sessions: DashMap<SecretToken, Arc<SimpleSession>>,
}

/// Password-table security manager. Cheap to clone.
#[derive(Clone)]
pub struct SimpleManager {
    inner: Arc<SimpleInner>,
}

impl SimpleManager {
    pub const TYPE: &'static str = "simple";
    pub const VERSION: &'static str = "1.0";

    pub fn new(users: HashMap<String, String>, allow_anonymous: bool) -> Self {
        Self {
            inner: Arc::new(SimpleInner {
                users,
                allow_anonymous,
                sessions: DashMap::new(),
            }),
        }
    }

    pub fn from_config(config: &SecurityConfig) -> Self {
        let users = config
            .users
            .iter()
            .map(|u| (u.login.clone(), u.password.clone()))
            .collect();
        Self::new(users, config.allow_anonymous)
    }

    pub fn anonymous() -> Self {
        Self::new(HashMap::new(), true)
    }

    pub fn num_sessions(&self) -> usize {
        self.inner.sessions.len()
    }
}

impl SecurityManager for SimpleManager {
    fn plugin_type(&self) -> &str {
        Self::TYPE
    }

    fn version(&self) -> &str {
        Self::VERSION
    }

    fn reserve_session(&self, token: &SecretToken) -> Result<Arc<dyn SessionContext>, SecurityError> {
        use dashmap::mapref::entry::Entry;
        match self.inner.sessions.entry(token.clone()) {
            Entry::Occupied(_) => Err(SecurityError::DuplicateSession),
            Entry::Vacant(v) => {
                let session = Arc::new(SimpleSession {
                    manager: self.clone(),
                    token: Mutex::new(token.clone()),
                    identity: Mutex::new(None),
                });
                v.insert(session.clone());
                Ok(session)
            }
        }
    }

    fn release_session(&self, token: &SecretToken) {
        self.inner.sessions.remove(token);
    }

    fn session_by_id(&self, token: &SecretToken) -> Option<Arc<dyn SessionContext>> {
        self.inner
            .sessions
            .get(token)
            .map(|s| s.value().clone() as Arc<dyn SessionContext>)
    }

    fn change_session_id(&self, old: &SecretToken, new: &SecretToken) -> Result<(), SecurityError> {
        if self.inner.sessions.contains_key(new) {
            return Err(SecurityError::DuplicateSession);
        }
        let (_, session) = self
            .inner
            .sessions
            .remove(old)
            .ok_or(SecurityError::UnknownSession)?;
        *lock(&session.token) = new.clone();
        self.inner.sessions.insert(new.clone(), session);
        Ok(())
    }
}

pub struct SimpleSession {
    manager: SimpleManager,
    token: Mutex<SecretToken>,
    identity: Mutex<Option<String>>,
}

impl SessionContext for SimpleSession {
    fn init(&self, credentials: &Credentials) -> Result<Option<String>, SecurityError> {
        let login = credentials.login.trim();
        if login.is_empty() {
            return Err(SecurityError::InvalidCredentials(String::new()));
        }
        let inner = &self.manager.inner;
        let accepted = match inner.users.get(login) {
            Some(password) => *password == credentials.blob,
            None => inner.allow_anonymous,
        };
        if !accepted {
            tracing::warn!(login, "access denied, wrong credentials");
            return Err(SecurityError::InvalidCredentials(login.to_string()));
        }
        *lock(&self.identity) = Some(login.to_string());
        Ok(None)
    }

    fn subject_identity(&self) -> Option<String> {
        lock(&self.identity).clone()
    }

    fn is_authorized(&self, _action: &str, _resource: &str) -> bool {
        lock(&self.identity).is_some()
    }

    fn secret_session_id(&self) -> SecretToken {
        lock(&self.token).clone()
    }

    fn change_session_id(&self, new_token: SecretToken) {
        *lock(&self.token) = new_token;
    }

    fn manager(&self) -> Arc<dyn SecurityManager> {
        Arc::new(self.manager.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::config::UserEntry;

    fn config() -> SecurityConfig {
        SecurityConfig {
            users: vec![UserEntry {
                login: "joe".into(),
                password: "secret".into(),
            }],
            ..SecurityConfig::default()
        }
    }

    #[test]
    fn password_table_login() {
        let registry = PluginRegistry::from_config(&config());
        let manager = registry.manager(None, None).unwrap();
        let token = SecretToken::new("tok-1");
        let ctx = manager.reserve_session(&token).unwrap();
        assert!(ctx.init(&Credentials::new("joe", "wrong")).is_err());
        assert!(!ctx.is_authorized("publish", "news"));
        assert!(ctx.init(&Credentials::new("joe", "secret")).is_ok());
        assert_eq!(ctx.subject_identity().as_deref(), Some("joe"));
        assert!(ctx.is_authorized("publish", "news"));
    }

    #[test]
    fn unknown_user_rejected_unless_anonymous() {
        let strict = SimpleManager::from_config(&config());
        let ctx = strict.reserve_session(&SecretToken::new("t1")).unwrap();
        assert_eq!(
            ctx.init(&Credentials::new("eve", "x")),
            Err(SecurityError::InvalidCredentials("eve".into()))
        );

        let open = SimpleManager::anonymous();
        let ctx = open.reserve_session(&SecretToken::new("t2")).unwrap();
        assert!(ctx.init(&Credentials::new("eve", "x")).is_ok());
    }

    #[test]
    fn unknown_plugin_type() {
        let registry = PluginRegistry::from_config(&config());
        assert!(matches!(
            registry.manager(Some("ldap"), Some("1.0")),
            Err(SecurityError::UnknownPlugin { .. })
        ));
    }

    #[test]
    fn reserve_release_and_rekey() {
        let manager = SimpleManager::anonymous();
        let old = SecretToken::new("old-token");
        let new = SecretToken::new("new-token");
        manager.reserve_session(&old).unwrap();
        assert!(matches!(
            manager.reserve_session(&old),
            Err(SecurityError::DuplicateSession)
        ));
        manager.change_session_id(&old, &new).unwrap();
        assert!(manager.session_by_id(&old).is_none());
        let ctx = manager.session_by_id(&new).unwrap();
        assert_eq!(ctx.secret_session_id(), new);
        manager.release_session(&new);
        assert_eq!(manager.num_sessions(), 0);
    }
}
