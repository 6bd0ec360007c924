// Session Store
//
// Single owner of the bearer token. Constructed once per process and handed
// to the gateway and controller as an `Arc<SessionStore>`; nothing else keeps
// a copy of the token.

use parking_lot::RwLock;

use crate::error::SessionError;
use crate::persistence::MemoryTokenStore;
use crate::traits::TokenPersistence;

/// Holder of the current bearer token, backed by a persistence layer.
pub struct SessionStore {
    token: RwLock<Option<String>>,
    persistence: Box<dyn TokenPersistence>,
}

impl SessionStore {
    /// Open a store, loading any previously persisted token.
    pub fn open(persistence: impl TokenPersistence + 'static) -> Result<Self, SessionError> {
        let token = persistence.load()?;
        tracing::debug!(has_token = token.is_some(), "session store opened");
        Ok(Self {
            token: RwLock::new(token),
            persistence: Box::new(persistence),
        })
    }

    /// A store without persistence and without a token.
    pub fn in_memory() -> Self {
        Self {
            token: RwLock::new(None),
            persistence: Box::new(MemoryTokenStore::new()),
        }
    }

    /// A non-persistent store that starts with `token`.
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: RwLock::new(Some(token.into())),
            persistence: Box::new(MemoryTokenStore::new()),
        }
    }

    /// Current token, if any.
    pub fn token(&self) -> Option<String> {
        self.token.read().clone()
    }

    pub fn has_token(&self) -> bool {
        self.token.read().is_some()
    }

    /// Replace the token and persist it.
    ///
    /// The in-memory token is updated even when persisting fails, so the
    /// current process stays signed in; the failure is returned to the caller.
    pub fn set_token(&self, token: impl Into<String>) -> Result<(), SessionError> {
        let token = token.into();
        let result = self.persistence.save(&token);
        *self.token.write() = Some(token);
        if let Err(e) = &result {
            tracing::warn!(error = %e, "failed to persist session token");
        }
        result
    }

    /// Drop the token from memory and from persistence.
    pub fn clear(&self) -> Result<(), SessionError> {
        self.token.write().take();
        let result = self.persistence.clear();
        if let Err(e) = &result {
            tracing::warn!(error = %e, "failed to clear persisted session token");
        }
        result
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("has_token", &self.has_token())
            .finish()
    }
}
