//! Auth token management
//!
//! Thin wrapper around [`AuthState`] that keeps the platform token store in
//! sync: every mutation is persisted before the in-memory state changes, so
//! a store failure never leaves the two disagreeing. Verdicts persist too,
//! which is what lets a verified token stay verified across a restart.

use std::sync::Arc;

use visor_core::auth::{AuthState, TokenStatus};
use visor_core::errors::VisorResult;
use visor_core::types::Timestamp;

use crate::platform::TokenStore;

// ----------------------------------------------------------------------------
// Auth Manager
// ----------------------------------------------------------------------------

/// Token state backed by the platform token store
pub struct AuthManager {
    state: AuthState,
    store: Arc<dyn TokenStore>,
}

impl AuthManager {
    /// Adopt the persisted auth state, if any
    pub fn load(store: Arc<dyn TokenStore>) -> VisorResult<Self> {
        let state = store.load()?.unwrap_or_default();
        Ok(Self { state, store })
    }

    /// Start with no token, ignoring whatever the store holds
    pub fn empty(store: Arc<dyn TokenStore>) -> Self {
        Self {
            state: AuthState::new(),
            store,
        }
    }

    /// Persist and adopt a new token; verification status resets to pending
    pub fn set_token(&mut self, token: String, owner: Option<String>) -> VisorResult<()> {
        self.mutate(|state| state.set_token(token, owner))
    }

    /// Remove the token from the store and from memory
    pub fn clear(&mut self) -> VisorResult<()> {
        self.store.clear()?;
        self.state.clear();
        Ok(())
    }

    pub fn mark_verified(&mut self, now: Timestamp) -> VisorResult<()> {
        self.mutate(|state| state.mark_verified(now))
    }

    pub fn mark_invalid(&mut self) -> VisorResult<()> {
        self.mutate(AuthState::mark_invalid)
    }

    pub fn token(&self) -> Option<&str> {
        self.state.token()
    }

    pub fn owner(&self) -> Option<&str> {
        self.state.owner()
    }

    pub fn status(&self) -> TokenStatus {
        self.state.status()
    }

    /// Whether a connect attempt is worth making with the current token
    pub fn has_usable_token(&self) -> bool {
        self.state.has_usable_token()
    }

    fn mutate(&mut self, apply: impl FnOnce(&mut AuthState)) -> VisorResult<()> {
        let mut next = self.state.clone();
        apply(&mut next);
        self.store.save(&next)?;
        self.state = next;
        Ok(())
    }
}

impl std::fmt::Debug for AuthManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthManager")
            .field("status", &self.state.status())
            .finish_non_exhaustive()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::MemoryTokenStore;

    #[test]
    fn test_load_adopts_persisted_token() {
        let store = Arc::new(MemoryTokenStore::with_token("stored-token"));
        let auth = AuthManager::load(store).unwrap();
        assert_eq!(auth.token(), Some("stored-token"));
        assert_eq!(auth.status(), TokenStatus::Pending);
        assert!(auth.has_usable_token());
    }

    #[test]
    fn test_load_without_token_starts_empty() {
        let auth = AuthManager::load(Arc::new(MemoryTokenStore::new())).unwrap();
        assert_eq!(auth.token(), None);
        assert_eq!(auth.status(), TokenStatus::None);
        assert!(!auth.has_usable_token());
    }

    #[test]
    fn test_set_token_persists() {
        let store = Arc::new(MemoryTokenStore::new());
        let mut auth = AuthManager::empty(store.clone());
        auth.set_token("fresh".to_string(), Some("alice@example.com".to_string()))
            .unwrap();

        assert_eq!(auth.token(), Some("fresh"));
        assert_eq!(auth.owner(), Some("alice@example.com"));
        let stored = store.load().unwrap().unwrap();
        assert_eq!(stored.token(), Some("fresh"));
        assert_eq!(stored.owner(), Some("alice@example.com"));
    }

    #[test]
    fn test_clear_removes_both_copies() {
        let store = Arc::new(MemoryTokenStore::with_token("doomed"));
        let mut auth = AuthManager::load(store.clone()).unwrap();
        auth.clear().unwrap();

        assert_eq!(auth.token(), None);
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn test_invalid_token_is_not_usable() {
        let mut auth = AuthManager::empty(Arc::new(MemoryTokenStore::new()));
        auth.set_token("bad".to_string(), None).unwrap();
        auth.mark_invalid().unwrap();

        assert_eq!(auth.status(), TokenStatus::Invalid);
        assert!(!auth.has_usable_token());
    }

    #[test]
    fn test_verdict_survives_reload() {
        let store = Arc::new(MemoryTokenStore::new());
        let mut auth = AuthManager::empty(store.clone());
        auth.set_token("good".to_string(), None).unwrap();
        auth.mark_verified(Timestamp::new(1_700_000_000_000)).unwrap();

        let reloaded = AuthManager::load(store).unwrap();
        assert_eq!(reloaded.status(), TokenStatus::Verified);
        assert!(reloaded.has_usable_token());
    }
}
