//! Auth token state
//!
//! One token authenticates this device to the cloud. The state here is the
//! single source of truth for whether a connect attempt is worthwhile; the
//! verdict itself comes from the cloud (`connection_ack` confirms, an auth
//! error condemns). Persistence goes through the embedder's token store.

use serde::{Deserialize, Serialize};

use crate::types::Timestamp;

// ----------------------------------------------------------------------------
// Token Status
// ----------------------------------------------------------------------------

/// Where the stored token stands with the cloud
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenStatus {
    /// No token stored
    None,
    /// Stored but not yet accepted by the cloud
    Pending,
    /// Accepted by the cloud at `verified_at`
    Verified,
    /// Rejected by the cloud; do not present it again
    Invalid,
}

impl std::fmt::Display for TokenStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenStatus::None => write!(f, "none"),
            TokenStatus::Pending => write!(f, "pending"),
            TokenStatus::Verified => write!(f, "verified"),
            TokenStatus::Invalid => write!(f, "invalid"),
        }
    }
}

// ----------------------------------------------------------------------------
// Auth State
// ----------------------------------------------------------------------------

/// Persistent auth state for this device
///
/// `owner` is the account the manager claims the token belongs to. The claim
/// only means something once the cloud confirms it, at which point `status`
/// reads Verified and `verified_at` carries the confirmation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthState {
    token: Option<String>,
    owner: Option<String>,
    status: TokenStatus,
    verified_at: Option<Timestamp>,
}

impl Default for AuthState {
    fn default() -> Self {
        Self {
            token: None,
            owner: None,
            status: TokenStatus::None,
            verified_at: None,
        }
    }
}

impl AuthState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a fresh token; verification starts over
    pub fn set_token(&mut self, token: String, owner: Option<String>) {
        self.token = Some(token);
        self.owner = owner;
        self.status = TokenStatus::Pending;
        self.verified_at = None;
    }

    /// The cloud accepted the token
    pub fn mark_verified(&mut self, now: Timestamp) {
        if self.token.is_some() {
            self.status = TokenStatus::Verified;
            self.verified_at = Some(now);
        }
    }

    /// The cloud rejected the token; the owner claim dies with it
    pub fn mark_invalid(&mut self) {
        if self.token.is_some() {
            self.status = TokenStatus::Invalid;
            self.owner = None;
            self.verified_at = None;
        }
    }

    /// Forget the token entirely
    pub fn clear(&mut self) {
        self.token = None;
        self.owner = None;
        self.status = TokenStatus::None;
        self.verified_at = None;
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    pub fn status(&self) -> TokenStatus {
        self.status
    }

    pub fn verified_at(&self) -> Option<Timestamp> {
        self.verified_at
    }

    /// A token worth presenting: stored and not known-bad
    pub fn has_usable_token(&self) -> bool {
        self.token.is_some() && self.status != TokenStatus::Invalid
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_state_has_nothing() {
        let state = AuthState::new();
        assert_eq!(state.status(), TokenStatus::None);
        assert!(state.token().is_none());
        assert!(!state.has_usable_token());
    }

    #[test]
    fn test_set_token_is_pending_and_usable() {
        let mut state = AuthState::new();
        state.set_token("tok-1".to_string(), None);
        assert_eq!(state.status(), TokenStatus::Pending);
        assert_eq!(state.token(), Some("tok-1"));
        assert!(state.has_usable_token());
    }

    #[test]
    fn test_verification_lifecycle() {
        let mut state = AuthState::new();
        state.set_token("tok-1".to_string(), Some("alice@example.com".to_string()));
        state.mark_verified(Timestamp::new(1000));
        assert_eq!(state.status(), TokenStatus::Verified);
        assert_eq!(state.owner(), Some("alice@example.com"));
        assert_eq!(state.verified_at(), Some(Timestamp::new(1000)));

        state.mark_invalid();
        assert_eq!(state.status(), TokenStatus::Invalid);
        assert!(state.owner().is_none());
        assert!(state.verified_at().is_none());
        assert!(!state.has_usable_token());
    }

    #[test]
    fn test_new_token_resets_verdict() {
        let mut state = AuthState::new();
        state.set_token("tok-1".to_string(), None);
        state.mark_invalid();
        state.set_token("tok-2".to_string(), Some("bob@example.com".to_string()));
        assert_eq!(state.status(), TokenStatus::Pending);
        assert_eq!(state.owner(), Some("bob@example.com"));
        assert!(state.has_usable_token());
    }

    #[test]
    fn test_verdicts_require_a_token() {
        let mut state = AuthState::new();
        state.mark_verified(Timestamp::new(1));
        assert_eq!(state.status(), TokenStatus::None);
        state.mark_invalid();
        assert_eq!(state.status(), TokenStatus::None);
    }

    #[test]
    fn test_clear_forgets_everything() {
        let mut state = AuthState::new();
        state.set_token("tok-1".to_string(), Some("alice@example.com".to_string()));
        state.mark_verified(Timestamp::new(5));
        state.clear();
        assert_eq!(state, AuthState::default());
    }

    #[test]
    fn test_state_persists_as_json() {
        let mut state = AuthState::new();
        state.set_token("tok-1".to_string(), Some("alice@example.com".to_string()));
        state.mark_verified(Timestamp::new(7));
        let json = serde_json::to_string(&state).unwrap();
        let restored: AuthState = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, state);
    }
}
