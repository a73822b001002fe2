// crates/core/src/auth/session.rs
use fedwatch_types::{AuthState, StoredCredentials, TokenPair, UserProfile};

/// The process-wide session. Written only by [`super::TokenManager`].
///
/// Readers always get a whole clone, so an access token is never observed
/// next to a refresh token from a different pair.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    access_token: Option<String>,
    refresh_token: Option<String>,
    user: Option<UserProfile>,
    state: AuthState,
    /// Bumped on every login/logout. Work started under an older epoch must
    /// not write its result back.
    epoch: u64,
}

impl Session {
    pub(crate) fn logged_out(epoch: u64) -> Self {
        Self {
            access_token: None,
            refresh_token: None,
            user: None,
            state: AuthState::LoggedOut,
            epoch,
        }
    }

    /// Stored credentials under validation.
    pub(crate) fn hydrating(stored: &StoredCredentials, epoch: u64) -> Self {
        Self {
            access_token: Some(stored.access_token.clone()),
            refresh_token: Some(stored.refresh_token.clone()),
            user: None,
            state: AuthState::Hydrating,
            epoch,
        }
    }

    pub(crate) fn authenticated(pair: &TokenPair, user: Option<UserProfile>, epoch: u64) -> Self {
        Self {
            access_token: Some(pair.access_token.clone()),
            refresh_token: Some(pair.refresh_token.clone()),
            user,
            state: AuthState::Authenticated,
            epoch,
        }
    }

    /// Swap in a refreshed pair, keeping identity and epoch.
    pub(crate) fn with_tokens(&self, pair: &TokenPair) -> Self {
        let state = match self.state {
            AuthState::Hydrating => AuthState::Hydrating,
            _ => AuthState::Authenticated,
        };
        Self {
            access_token: Some(pair.access_token.clone()),
            refresh_token: Some(pair.refresh_token.clone()),
            user: self.user.clone(),
            state,
            epoch: self.epoch,
        }
    }

    pub(crate) fn set_state(&mut self, state: AuthState) {
        debug_assert!(state != AuthState::Authenticated || self.access_token.is_some());
        self.state = state;
    }

    pub(crate) fn set_user(&mut self, user: Option<UserProfile>) {
        self.user = user;
    }

    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }

    pub fn user(&self) -> Option<&UserProfile> {
        self.user.as_ref()
    }

    pub fn state(&self) -> AuthState {
        self.state
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.has_credential()
    }
}
