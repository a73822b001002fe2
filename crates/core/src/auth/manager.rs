// crates/core/src/auth/manager.rs
//! Token lifecycle: restore, login, single-flight refresh, logout.
//!
//! The manager is the only writer of the [`Session`]. Everything else reads
//! snapshots through [`TokenManager::session`] or a [`watch::Receiver`].

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use fedwatch_types::{AuthState, NewUser, StoredCredentials, TokenPair, UserProfile};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::api::AuthApi;
use super::session::Session;
use super::store::CredentialStore;
use crate::error::AuthError;

type RefreshOutcome = Result<String, AuthError>;

/// The one in-flight refresh. Every concurrent caller awaits a clone of
/// `outcome`, so they all settle together with the same result.
struct RefreshTicket {
    id: u64,
    /// Session epoch the refresh was started under.
    epoch: u64,
    outcome: Shared<BoxFuture<'static, RefreshOutcome>>,
}

#[derive(Default)]
struct TicketSlot {
    next_id: u64,
    current: Option<RefreshTicket>,
}

struct Inner {
    api: Arc<dyn AuthApi>,
    store: Arc<dyn CredentialStore>,
    session: watch::Sender<Session>,
    ticket: Mutex<TicketSlot>,
    /// Held across a session transition and the store write that goes with
    /// it, so storage always ends up matching the final session.
    store_lock: Mutex<()>,
}

/// Owns the session credentials and their life cycle.
#[derive(Clone)]
pub struct TokenManager {
    inner: Arc<Inner>,
}

impl TokenManager {
    pub fn new(api: Arc<dyn AuthApi>, store: Arc<dyn CredentialStore>) -> Self {
        let (session, _) = watch::channel(Session::logged_out(0));
        Self {
            inner: Arc::new(Inner {
                api,
                store,
                session,
                ticket: Mutex::new(TicketSlot::default()),
                store_lock: Mutex::new(()),
            }),
        }
    }

    // ── Readers ─────────────────────────────────────────────────────────

    pub fn session(&self) -> Session {
        self.inner.session.borrow().clone()
    }

    /// Session change notifications (login, refresh, logout, hydration).
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.inner.session.subscribe()
    }

    pub fn state(&self) -> AuthState {
        self.inner.session.borrow().state()
    }

    /// True while [`restore_session`](Self::restore_session) has not decided yet.
    pub fn is_hydrating(&self) -> bool {
        self.state() == AuthState::Hydrating
    }

    pub fn access_token(&self) -> Option<String> {
        self.inner.session.borrow().access_token().map(str::to_owned)
    }

    pub fn user(&self) -> Option<UserProfile> {
        self.inner.session.borrow().user().cloned()
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    /// Validate persisted credentials. Ends in `Authenticated` or `LoggedOut`.
    ///
    /// Profile fetch with the stored access credential; if that is rejected,
    /// one refresh and a second profile fetch. Any other outcome clears the
    /// stored credentials.
    pub async fn restore_session(&self) -> AuthState {
        let stored = match self.inner.store.load() {
            Ok(Some(creds)) => creds,
            Ok(None) => {
                debug!("no stored session");
                self.inner.end_session(None, "no stored session");
                return AuthState::LoggedOut;
            }
            Err(e) => {
                warn!(error = %e, "credential store unreadable");
                self.inner.end_session(None, "credential store unreadable");
                return AuthState::LoggedOut;
            }
        };

        let epoch = self.inner.begin_epoch(|epoch| Session::hydrating(&stored, epoch));
        info!("validating stored session");

        let user = match self.inner.api.profile(&stored.access_token).await {
            Ok(user) => Some(user),
            Err(e) if e.is_rejection() => {
                debug!("stored access credential rejected, refreshing once");
                match self.refresh().await {
                    Ok(access) => match self.inner.api.profile(&access).await {
                        Ok(user) => Some(user),
                        Err(e) => {
                            warn!(error = %e, "profile fetch failed after refresh");
                            None
                        }
                    },
                    Err(e) => {
                        warn!(error = %e, "stored refresh credential rejected");
                        None
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "could not validate stored session");
                None
            }
        };

        let Some(user) = user else {
            self.inner.end_session(Some(epoch), "session restore failed");
            return self.state();
        };

        let restored = self.inner.session.send_if_modified(|s| {
            if s.epoch() != epoch || s.access_token().is_none() {
                return false;
            }
            s.set_user(Some(user.clone()));
            s.set_state(AuthState::Authenticated);
            true
        });
        if restored {
            info!(username = %user.username, "session restored");
        }
        self.state()
    }

    /// Exchange username/password for a fresh session.
    ///
    /// Invalid credentials come back as [`AuthError::InvalidCredentials`];
    /// nothing is retried.
    pub async fn login(&self, username: &str, password: &str) -> Result<Session, AuthError> {
        let pair = match self.inner.api.login(username, password).await {
            Ok(pair) => pair,
            Err(e) => {
                warn!(username, error = %e, "login failed");
                return Err(e);
            }
        };

        let user = match self.inner.api.profile(&pair.access_token).await {
            Ok(user) => Some(user),
            Err(e) => {
                warn!(error = %e, "profile fetch after login failed");
                None
            }
        };

        {
            let _store = self.inner.lock_store();
            self.inner.persist(&pair);
            self.inner
                .begin_epoch(|epoch| Session::authenticated(&pair, user, epoch));
        }
        info!(username, "logged in");
        Ok(self.session())
    }

    /// Create an account. Leaves the current session untouched.
    pub async fn register(&self, user: &NewUser) -> Result<UserProfile, AuthError> {
        let profile = self.inner.api.register(user).await?;
        info!(username = %profile.username, "account registered");
        Ok(profile)
    }

    /// Single-flight refresh.
    ///
    /// Joins the in-flight refresh if one exists for the current session,
    /// otherwise starts one. Success swaps both credentials; failure logs the
    /// session out. All joined callers get the same result.
    pub async fn refresh(&self) -> Result<String, AuthError> {
        let outcome = {
            let mut slot = self.inner.lock_ticket();
            let epoch = self.inner.session.borrow().epoch();
            match &slot.current {
                Some(ticket) if ticket.epoch == epoch => {
                    debug!(ticket = ticket.id, "joining in-flight refresh");
                    ticket.outcome.clone()
                }
                _ => {
                    slot.next_id += 1;
                    let id = slot.next_id;
                    let weak = Arc::downgrade(&self.inner);
                    let outcome = Inner::run_refresh(weak, id, epoch).boxed().shared();
                    slot.current = Some(RefreshTicket {
                        id,
                        epoch,
                        outcome: outcome.clone(),
                    });
                    outcome
                }
            }
        };
        outcome.await
    }

    /// Recover from a request rejected with `rejected_token`.
    ///
    /// If the session already moved on to another access credential (a
    /// refresh finished while the request was in flight), that credential is
    /// returned without a network call. Otherwise joins or starts
    /// [`refresh`](Self::refresh).
    pub async fn refresh_after_rejection(&self, rejected_token: Option<&str>) -> Result<String, AuthError> {
        {
            let session = self.inner.session.borrow();
            if session.state() == AuthState::Authenticated {
                if let Some(current) = session.access_token() {
                    if Some(current) != rejected_token {
                        debug!("credential already refreshed, replaying");
                        return Ok(current.to_owned());
                    }
                }
            }
        }
        self.refresh().await
    }

    /// Credential for opening the live stream.
    ///
    /// Waits until hydration has decided and any in-flight refresh has
    /// settled, so a reconnect never races a refresh with a stale credential.
    pub async fn stream_credential(&self) -> Option<String> {
        let mut rx = self.subscribe();
        let _ = rx.wait_for(|s| s.state() != AuthState::Hydrating).await;

        let pending = self
            .inner
            .lock_ticket()
            .current
            .as_ref()
            .map(|ticket| ticket.outcome.clone());
        if let Some(outcome) = pending {
            debug!("waiting for in-flight refresh before connecting");
            let _ = outcome.await;
        }

        let session = self.session();
        if session.is_authenticated() {
            session.access_token().map(str::to_owned)
        } else {
            None
        }
    }

    /// User-initiated logout.
    pub fn logout(&self) {
        self.inner.end_session(None, "logout");
    }

    /// Logout triggered by an authorization failure somewhere else.
    ///
    /// Pending refresh waiters are not resolved here; they fail on their own
    /// with [`AuthError::SessionEnded`].
    pub fn force_logout(&self, reason: &str) {
        self.inner.end_session(None, reason);
    }
}

impl Inner {
    fn lock_ticket(&self) -> MutexGuard<'_, TicketSlot> {
        self.ticket.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_store(&self) -> MutexGuard<'_, ()> {
        self.store_lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Replace the session with one built for a fresh epoch; returns the epoch.
    fn begin_epoch(&self, build: impl FnOnce(u64) -> Session) -> u64 {
        let mut epoch = 0;
        self.session.send_modify(|s| {
            epoch = s.epoch() + 1;
            *s = build(epoch);
        });
        epoch
    }

    /// Log out and clear storage. With `expected_epoch`, only if the session
    /// is still the one that epoch refers to.
    fn end_session(&self, expected_epoch: Option<u64>, reason: &str) {
        let _store = self.lock_store();
        let mut stale = false;
        let ended = self.session.send_if_modified(|s| {
            if expected_epoch.is_some_and(|e| e != s.epoch()) {
                stale = true;
                return false;
            }
            if s.state() == AuthState::LoggedOut {
                return false;
            }
            *s = Session::logged_out(s.epoch() + 1);
            true
        });
        if stale {
            // Someone else already replaced this session; leave storage alone.
            return;
        }
        if let Err(e) = self.store.clear() {
            warn!(error = %e, "failed to clear stored credentials");
        }
        if ended {
            info!(reason, "session ended");
        }
    }

    fn persist(&self, pair: &TokenPair) {
        if let Err(e) = self.store.save(&StoredCredentials::from(pair)) {
            warn!(error = %e, "failed to persist credentials");
        }
    }

    async fn run_refresh(this: Weak<Inner>, id: u64, epoch: u64) -> RefreshOutcome {
        let Some(inner) = this.upgrade() else {
            return Err(AuthError::SessionEnded);
        };
        let outcome = inner.refresh_once(epoch).await;
        let mut slot = inner.lock_ticket();
        if slot.current.as_ref().map(|t| t.id) == Some(id) {
            slot.current = None;
        }
        outcome
    }

    async fn refresh_once(&self, epoch: u64) -> RefreshOutcome {
        let refresh_token = {
            let session = self.session.borrow();
            if session.epoch() != epoch {
                return Err(AuthError::SessionEnded);
            }
            session.refresh_token().map(str::to_owned)
        };
        let Some(refresh_token) = refresh_token else {
            self.end_session(Some(epoch), "no refresh credential");
            return Err(AuthError::NoRefreshCredential);
        };

        self.session.send_if_modified(|s| {
            if s.epoch() == epoch && s.state() == AuthState::Authenticated {
                s.set_state(AuthState::Refreshing);
                true
            } else {
                false
            }
        });
        info!("refreshing access credential");

        match self.api.refresh(&refresh_token).await {
            Ok(pair) => {
                let store = self.lock_store();
                let applied = self.session.send_if_modified(|s| {
                    if s.epoch() != epoch {
                        return false;
                    }
                    *s = s.with_tokens(&pair);
                    true
                });
                if !applied {
                    debug!("session ended during refresh, discarding new credentials");
                    return Err(AuthError::SessionEnded);
                }
                self.persist(&pair);
                drop(store);
                info!("access credential refreshed");
                Ok(pair.access_token)
            }
            Err(e) => {
                if self.session.borrow().epoch() != epoch {
                    return Err(AuthError::SessionEnded);
                }
                warn!(error = %e, "refresh failed, logging out");
                self.end_session(Some(epoch), "refresh failed");
                Err(e)
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::store::MemoryCredentialStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::time::Duration;
    use tokio::sync::Semaphore;

    /// Scripted backend. `refresh` blocks on `gate` until the test adds a permit.
    struct FakeAuth {
        refresh_calls: AtomicUsize,
        profile_calls: AtomicUsize,
        valid: Mutex<Vec<String>>,
        refresh_to: Mutex<Option<TokenPair>>,
        gate: Semaphore,
    }

    impl FakeAuth {
        fn new(valid: &[&str], refresh_to: Option<TokenPair>, gated: bool) -> Arc<Self> {
            Arc::new(Self {
                refresh_calls: AtomicUsize::new(0),
                profile_calls: AtomicUsize::new(0),
                valid: Mutex::new(valid.iter().map(|s| s.to_string()).collect()),
                refresh_to: Mutex::new(refresh_to),
                gate: Semaphore::new(if gated { 0 } else { Semaphore::MAX_PERMITS }),
            })
        }

        fn open_gate(&self) {
            self.gate.add_permits(1000);
        }
    }

    fn profile(name: &str) -> UserProfile {
        UserProfile {
            id: format!("id-{name}"),
            username: name.into(),
            email: format!("{name}@example.com"),
            role: "admin".into(),
            is_active: true,
            created_at: None,
        }
    }

    #[async_trait]
    impl AuthApi for FakeAuth {
        async fn register(&self, user: &NewUser) -> Result<UserProfile, AuthError> {
            Ok(profile(&user.username))
        }

        async fn login(&self, username: &str, password: &str) -> Result<TokenPair, AuthError> {
            if password != "secret" {
                return Err(AuthError::InvalidCredentials);
            }
            let pair = TokenPair::new(format!("{username}-access"), format!("{username}-refresh"));
            self.valid.lock().unwrap().push(pair.access_token.clone());
            Ok(pair)
        }

        async fn refresh(&self, _refresh_token: &str) -> Result<TokenPair, AuthError> {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            let _permit = self.gate.acquire().await.unwrap();
            let next = self.refresh_to.lock().unwrap().clone();
            match next {
                Some(pair) => {
                    self.valid.lock().unwrap().push(pair.access_token.clone());
                    Ok(pair)
                }
                None => Err(AuthError::RefreshRejected("expired".into())),
            }
        }

        async fn profile(&self, access_token: &str) -> Result<UserProfile, AuthError> {
            self.profile_calls.fetch_add(1, Ordering::SeqCst);
            if self.valid.lock().unwrap().iter().any(|t| t == access_token) {
                Ok(profile("operator"))
            } else {
                Err(AuthError::Unauthorized)
            }
        }
    }

    fn stored(access: &str) -> StoredCredentials {
        StoredCredentials {
            access_token: access.into(),
            refresh_token: format!("{access}-refresh"),
        }
    }

    fn manager(api: Arc<FakeAuth>, store: Arc<MemoryCredentialStore>) -> TokenManager {
        TokenManager::new(api, store)
    }

    async fn logged_in(api: Arc<FakeAuth>) -> (TokenManager, Arc<MemoryCredentialStore>) {
        let store = Arc::new(MemoryCredentialStore::new());
        let tm = manager(api, store.clone());
        tm.login("operator", "secret").await.unwrap();
        (tm, store)
    }

    #[tokio::test]
    async fn test_login_authenticates_and_persists() {
        let api = FakeAuth::new(&[], None, false);
        let (tm, store) = logged_in(api).await;
        let session = tm.session();
        assert_eq!(session.state(), AuthState::Authenticated);
        assert_eq!(session.access_token(), Some("operator-access"));
        assert_eq!(session.user().map(|u| u.username.as_str()), Some("operator"));
        assert_eq!(
            store.load().unwrap(),
            Some(StoredCredentials {
                access_token: "operator-access".into(),
                refresh_token: "operator-refresh".into(),
            })
        );
    }

    #[tokio::test]
    async fn test_login_invalid_credentials() {
        let api = FakeAuth::new(&[], None, false);
        let tm = manager(api, Arc::new(MemoryCredentialStore::new()));
        let err = tm.login("operator", "wrong").await.unwrap_err();
        assert_eq!(err, AuthError::InvalidCredentials);
        assert_eq!(tm.state(), AuthState::LoggedOut);
    }

    #[tokio::test]
    async fn test_concurrent_refresh_is_single_flight() {
        let api = FakeAuth::new(&[], Some(TokenPair::new("fresh", "fresh-refresh")), true);
        let (tm, store) = logged_in(api.clone()).await;

        let waiters: Vec<_> = (0..5)
            .map(|_| {
                let tm = tm.clone();
                tokio::spawn(async move { tm.refresh().await })
            })
            .collect();

        // Let every waiter reach the ticket before the refresh resolves.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(tm.state(), AuthState::Refreshing);
        api.open_gate();

        for w in waiters {
            assert_eq!(w.await.unwrap().unwrap(), "fresh");
        }
        assert_eq!(api.refresh_calls.load(Ordering::SeqCst), 1);
        assert_eq!(tm.state(), AuthState::Authenticated);
        assert_eq!(tm.session().refresh_token(), Some("fresh-refresh"));
        assert_eq!(store.load().unwrap().unwrap().access_token, "fresh");
    }

    #[tokio::test]
    async fn test_sequential_refreshes_each_hit_network() {
        let api = FakeAuth::new(&[], Some(TokenPair::new("fresh", "fresh-refresh")), false);
        let (tm, _) = logged_in(api.clone()).await;
        tm.refresh().await.unwrap();
        tm.refresh().await.unwrap();
        assert_eq!(api.refresh_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_refresh_logs_out_every_waiter() {
        let api = FakeAuth::new(&[], None, true);
        let (tm, store) = logged_in(api.clone()).await;

        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let tm = tm.clone();
                tokio::spawn(async move { tm.refresh().await })
            })
            .collect();
        tokio::time::sleep(Duration::from_millis(50)).await;
        api.open_gate();

        for w in waiters {
            assert_eq!(
                w.await.unwrap().unwrap_err(),
                AuthError::RefreshRejected("expired".into())
            );
        }
        assert_eq!(api.refresh_calls.load(Ordering::SeqCst), 1);
        assert_eq!(tm.state(), AuthState::LoggedOut);
        assert!(tm.access_token().is_none());
        assert_eq!(store.load().unwrap(), None);
    }

    /// Once armed, `save` parks between two barriers the test controls.
    struct ParkingStore {
        slot: MemoryCredentialStore,
        armed: AtomicBool,
        entered: Barrier,
        release: Barrier,
    }

    impl ParkingStore {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                slot: MemoryCredentialStore::new(),
                armed: AtomicBool::new(false),
                entered: Barrier::new(2),
                release: Barrier::new(2),
            })
        }
    }

    impl CredentialStore for ParkingStore {
        fn load(&self) -> Result<Option<StoredCredentials>, AuthError> {
            self.slot.load()
        }

        fn save(&self, credentials: &StoredCredentials) -> Result<(), AuthError> {
            if self.armed.swap(false, Ordering::SeqCst) {
                self.entered.wait();
                self.release.wait();
            }
            self.slot.save(credentials)
        }

        fn clear(&self) -> Result<(), AuthError> {
            self.slot.clear()
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_logout_while_refresh_persists_leaves_store_empty() {
        let api = FakeAuth::new(&[], Some(TokenPair::new("fresh", "fresh-refresh")), false);
        let store = ParkingStore::new();
        let tm = TokenManager::new(api, store.clone());
        tm.login("operator", "secret").await.unwrap();
        store.armed.store(true, Ordering::SeqCst);

        let refresh = tokio::spawn({
            let tm = tm.clone();
            async move { tm.refresh().await }
        });
        let parked = store.clone();
        tokio::task::spawn_blocking(move || {
            parked.entered.wait();
        })
        .await
        .unwrap();

        // Logout lands while the refreshed pair is being written.
        let logout = tokio::task::spawn_blocking({
            let tm = tm.clone();
            move || tm.logout()
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        let parked = store.clone();
        tokio::task::spawn_blocking(move || {
            parked.release.wait();
        })
        .await
        .unwrap();

        logout.await.unwrap();
        assert_eq!(refresh.await.unwrap().unwrap(), "fresh");
        assert_eq!(tm.state(), AuthState::LoggedOut);
        assert_eq!(store.load().unwrap(), None);
    }

    #[tokio::test]
    async fn test_logout_during_refresh_is_not_undone() {
        let api = FakeAuth::new(&[], Some(TokenPair::new("fresh", "fresh-refresh")), true);
        let (tm, store) = logged_in(api.clone()).await;

        let waiter = {
            let tm = tm.clone();
            tokio::spawn(async move { tm.refresh().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        tm.logout();
        api.open_gate();

        assert_eq!(waiter.await.unwrap().unwrap_err(), AuthError::SessionEnded);
        assert_eq!(tm.state(), AuthState::LoggedOut);
        assert!(tm.access_token().is_none());
        assert_eq!(store.load().unwrap(), None);
    }

    #[tokio::test]
    async fn test_new_login_does_not_join_stale_ticket() {
        let api = FakeAuth::new(&[], Some(TokenPair::new("fresh", "fresh-refresh")), true);
        let (tm, _) = logged_in(api.clone()).await;

        let stale = {
            let tm = tm.clone();
            tokio::spawn(async move { tm.refresh().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        tm.logout();
        tm.login("operator", "secret").await.unwrap();

        let current = {
            let tm = tm.clone();
            tokio::spawn(async move { tm.refresh().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        api.open_gate();

        assert_eq!(stale.await.unwrap().unwrap_err(), AuthError::SessionEnded);
        assert_eq!(current.await.unwrap().unwrap(), "fresh");
        assert_eq!(api.refresh_calls.load(Ordering::SeqCst), 2);
        assert_eq!(tm.state(), AuthState::Authenticated);
    }

    #[tokio::test]
    async fn test_refresh_after_rejection_skips_network_when_already_rotated() {
        let api = FakeAuth::new(&[], Some(TokenPair::new("fresh", "fresh-refresh")), false);
        let (tm, _) = logged_in(api.clone()).await;
        tm.refresh().await.unwrap();

        let token = tm.refresh_after_rejection(Some("operator-access")).await.unwrap();
        assert_eq!(token, "fresh");
        assert_eq!(api.refresh_calls.load(Ordering::SeqCst), 1);

        // Rejection of the current credential does refresh.
        tm.refresh_after_rejection(Some("fresh")).await.unwrap();
        assert_eq!(api.refresh_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_restore_with_valid_credentials() {
        let api = FakeAuth::new(&["stored"], None, false);
        let store = Arc::new(MemoryCredentialStore::with(stored("stored")));
        let tm = manager(api.clone(), store);

        assert_eq!(tm.restore_session().await, AuthState::Authenticated);
        assert_eq!(tm.access_token().as_deref(), Some("stored"));
        assert!(tm.user().is_some());
        assert_eq!(api.refresh_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_restore_refreshes_expired_access_once() {
        let api = FakeAuth::new(&[], Some(TokenPair::new("renewed", "renewed-refresh")), false);
        let store = Arc::new(MemoryCredentialStore::with(stored("expired")));
        let tm = manager(api.clone(), store.clone());

        assert_eq!(tm.restore_session().await, AuthState::Authenticated);
        assert_eq!(tm.access_token().as_deref(), Some("renewed"));
        assert_eq!(api.refresh_calls.load(Ordering::SeqCst), 1);
        assert_eq!(api.profile_calls.load(Ordering::SeqCst), 2);
        assert_eq!(store.load().unwrap().unwrap().access_token, "renewed");
    }

    #[tokio::test]
    async fn test_restore_failure_clears_everything() {
        let api = FakeAuth::new(&[], None, false);
        let store = Arc::new(MemoryCredentialStore::with(stored("expired")));
        let tm = manager(api.clone(), store.clone());

        assert_eq!(tm.restore_session().await, AuthState::LoggedOut);
        assert!(tm.access_token().is_none());
        assert_eq!(store.load().unwrap(), None);
        assert_eq!(api.refresh_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_restore_without_stored_session() {
        let api = FakeAuth::new(&[], None, false);
        let tm = manager(api.clone(), Arc::new(MemoryCredentialStore::new()));
        assert_eq!(tm.restore_session().await, AuthState::LoggedOut);
        assert_eq!(api.profile_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_hydrating_flag_spans_restore() {
        let api = FakeAuth::new(&[], Some(TokenPair::new("renewed", "renewed-refresh")), true);
        let store = Arc::new(MemoryCredentialStore::with(stored("expired")));
        let tm = manager(api.clone(), store);

        let restore = {
            let tm = tm.clone();
            tokio::spawn(async move { tm.restore_session().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(tm.is_hydrating());
        api.open_gate();

        assert_eq!(restore.await.unwrap(), AuthState::Authenticated);
        assert!(!tm.is_hydrating());
    }

    #[tokio::test]
    async fn test_stream_credential_waits_for_refresh() {
        let api = FakeAuth::new(&[], Some(TokenPair::new("fresh", "fresh-refresh")), true);
        let (tm, _) = logged_in(api.clone()).await;

        let refresh = {
            let tm = tm.clone();
            tokio::spawn(async move { tm.refresh().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let credential = {
            let tm = tm.clone();
            tokio::spawn(async move { tm.stream_credential().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!credential.is_finished());

        api.open_gate();
        refresh.await.unwrap().unwrap();
        assert_eq!(credential.await.unwrap().as_deref(), Some("fresh"));
    }

    #[tokio::test]
    async fn test_stream_credential_none_when_logged_out() {
        let api = FakeAuth::new(&[], None, false);
        let tm = manager(api, Arc::new(MemoryCredentialStore::new()));
        assert_eq!(tm.stream_credential().await, None);
    }

    #[tokio::test]
    async fn test_session_watch_sees_logout() {
        let api = FakeAuth::new(&[], None, false);
        let (tm, _) = logged_in(api).await;
        let mut rx = tm.subscribe();
        tm.force_logout("stream rejected");
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().state(), AuthState::LoggedOut);
    }
}
