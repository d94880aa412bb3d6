//! Session store: the signed-in user and their onboarding status.
//!
//! ARCHITECTURE
//! ============
//! `SessionStore` is a cheap `Clone` handle around one owned state value
//! published on a `watch` channel. `SessionContext` is the mounted form:
//! mounting subscribes to the auth service's event channel, spawns the
//! one-time restoration and (optionally) the expiry watchdog; unmounting
//! aborts the subscription and the watchdog.
//!
//! ORDERING
//! ========
//! Auth events arrive on a `watch` channel, so only the latest unseen event
//! is processed. Events are applied synchronously; a profile check they
//! trigger is spawned as its own task and never awaited inside the handler.
//! Every identity change bumps the state epoch and a profile result is
//! dropped unless its epoch is still current. Restoration only applies what
//! it learned if no event changed the user while it was waiting.
//!
//! TRADE-OFFS
//! ==========
//! Unmount does not abort in-flight profile checks or restoration. Their
//! results land in the store (and are epoch-checked) but nobody observes
//! them once the context is gone.

use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::markers::SessionMarkers;
use super::profile::ProfileSetupGate;
use crate::backend::{AuthError, AuthEvent, AuthService};
use crate::state::{AuthState, ProfileSetupStatus, User};
use crate::storage::StorageError;

const DEFAULT_TEMPORARY_SESSION_TTL: Duration = Duration::from_secs(24 * 60 * 60);
const DEFAULT_EXPIRY_CHECK_INTERVAL: Duration = Duration::from_secs(60);

// =============================================================================
// SETTINGS / ERRORS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    /// Lifetime of a sign-in without "remember me".
    pub temporary_session_ttl: Duration,
    /// Watchdog period; `None` disables it.
    pub expiry_check_interval: Option<Duration>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            temporary_session_ttl: DEFAULT_TEMPORARY_SESSION_TTL,
            expiry_check_interval: Some(DEFAULT_EXPIRY_CHECK_INTERVAL),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("session marker persistence failed: {0}")]
    Storage(#[from] StorageError),
    #[error("no signed-in user")]
    NotSignedIn,
    #[error("temporary session lifetime of {secs}s is out of range")]
    ExpiryOutOfRange { secs: u64 },
}

// =============================================================================
// SESSION STORE
// =============================================================================

#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    auth: Arc<dyn AuthService>,
    gate: ProfileSetupGate,
    markers: SessionMarkers,
    settings: SessionSettings,
    state: watch::Sender<AuthState>,
}

impl SessionStore {
    #[must_use]
    pub fn new(
        auth: Arc<dyn AuthService>,
        gate: ProfileSetupGate,
        markers: SessionMarkers,
        settings: SessionSettings,
    ) -> Self {
        let (state, _) = watch::channel(AuthState::initial());
        Self { inner: Arc::new(StoreInner { auth, gate, markers, settings, state }) }
    }

    // -------------------------------------------------------------------------
    // observation
    // -------------------------------------------------------------------------

    #[must_use]
    pub fn snapshot(&self) -> AuthState {
        self.inner.state.borrow().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.inner.state.subscribe()
    }

    #[must_use]
    pub fn current_user(&self) -> Option<User> {
        self.inner.state.borrow().user.clone()
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.inner.state.borrow().loading
    }

    #[must_use]
    pub fn needs_profile_setup(&self) -> Option<bool> {
        self.inner.state.borrow().needs_profile_setup()
    }

    #[must_use]
    pub fn settings(&self) -> SessionSettings {
        self.inner.settings
    }

    // -------------------------------------------------------------------------
    // operations
    // -------------------------------------------------------------------------

    /// Sign in and evaluate the profile-setup gate for the new user.
    ///
    /// Without `remember_me` the session is marked temporary and expires after
    /// the configured TTL.
    ///
    /// # Errors
    ///
    /// Returns the auth error unchanged, or a storage/range error when the
    /// session markers could not be written (the backend session is then
    /// logged out).
    pub async fn sign_in(&self, email: &str, password: &str, remember_me: bool) -> Result<User, SessionError> {
        let session = self
            .inner
            .auth
            .login(email, password, remember_me)
            .await?;

        if let Err(e) = self.write_markers(remember_me) {
            error!(error = %e, "failed to persist session markers; discarding session");
            self.discard_session().await;
            return Err(e);
        }

        let user = session.user;
        info!(user_id = %user.id, remember_me, "signed in");
        self.apply_user(Some(user.clone()));
        let epoch = self.inner.state.borrow().epoch();
        self.run_profile_check(user.id, epoch).await;
        Ok(user)
    }

    /// Register a new account. New accounts always need profile setup.
    ///
    /// # Errors
    ///
    /// Returns the auth error unchanged, or a storage error when markers left
    /// by an earlier session could not be replaced (the new session is then
    /// logged out).
    pub async fn sign_up(&self, email: &str, password: &str) -> Result<User, SessionError> {
        let session = self.inner.auth.register(email, password).await?;

        let reset = self
            .inner
            .markers
            .clear()
            .and_then(|()| self.inner.markers.mark_persistent());
        if let Err(e) = reset {
            error!(error = %e, "failed to reset session markers after sign-up; discarding session");
            self.discard_session().await;
            return Err(e.into());
        }

        let user = session.user;
        info!(user_id = %user.id, "registered");
        self.inner.state.send_modify(|state| {
            state.set_user(Some(user.clone()));
            let epoch = state.epoch();
            state.set_profile(ProfileSetupStatus { user_id: user.id, needs_setup: true, epoch });
        });
        Ok(user)
    }

    /// Sign out. Local markers and user state are cleared even when the
    /// backend call fails.
    ///
    /// # Errors
    ///
    /// Returns the backend logout error after local cleanup.
    pub async fn sign_out(&self) -> Result<(), SessionError> {
        let result = self.inner.auth.logout().await;
        self.clear_markers();
        self.apply_user(None);
        match result {
            Ok(()) => {
                info!("signed out");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "backend logout failed; local session cleared");
                Err(e.into())
            }
        }
    }

    /// Re-run the profile-setup check for the current user.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotSignedIn`] without a user.
    pub async fn refresh_profile_setup(&self) -> Result<bool, SessionError> {
        let (user_id, epoch) = {
            let state = self.inner.state.borrow();
            (state.user_id().ok_or(SessionError::NotSignedIn)?, state.epoch())
        };
        Ok(self.run_profile_check(user_id, epoch).await)
    }

    /// Mark onboarding finished for the current user.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotSignedIn`] without a user.
    pub fn complete_profile_setup(&self) -> Result<(), SessionError> {
        let mut signed_in = false;
        self.inner.state.send_if_modified(|state| {
            let Some(user_id) = state.user_id() else {
                return false;
            };
            signed_in = true;
            let epoch = state.epoch();
            state.set_profile(ProfileSetupStatus { user_id, needs_setup: false, epoch })
        });
        if signed_in { Ok(()) } else { Err(SessionError::NotSignedIn) }
    }

    /// One-time restoration at mount.
    pub async fn restore(&self) {
        let now = OffsetDateTime::now_utc();
        match self.inner.markers.read() {
            Ok(markers) if markers.is_expired_at(now) => {
                info!("temporary session expired; signing out");
                self.expire_session().await;
                self.finish_loading();
                return;
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "failed to read session markers"),
        }

        let epoch_before = self.inner.state.borrow().epoch();
        match self.inner.auth.get_session().await {
            Ok(Some(session)) if session.is_expired_at(now) => {
                if self.inner.state.borrow().epoch() == epoch_before {
                    info!(user_id = %session.user.id, "restored session already expired; signing out");
                    self.expire_session().await;
                } else {
                    debug!(user_id = %session.user.id, "auth event superseded expired restored session");
                }
            }
            Ok(Some(session)) => {
                let user_id = session.user.id;
                if self.apply_user_if_epoch(epoch_before, Some(session.user)) {
                    info!(%user_id, "session restored");
                    let epoch = self.inner.state.borrow().epoch();
                    self.run_profile_check(user_id, epoch).await;
                } else {
                    debug!(%user_id, "auth event superseded restored session");
                }
            }
            Ok(None) => {
                debug!("no stored session");
                self.apply_user_if_epoch(epoch_before, None);
            }
            Err(e) => warn!(error = %e, "session restore failed; continuing signed out"),
        }
        self.finish_loading();
    }

    // -------------------------------------------------------------------------
    // event handling
    // -------------------------------------------------------------------------

    /// Apply one auth event. Never awaits; a needed profile check is spawned.
    pub fn handle_event(&self, event: AuthEvent) {
        debug!(event = event.name(), "auth state change");
        match event {
            AuthEvent::SignedOut => {
                self.clear_markers();
                self.apply_user(None);
            }
            AuthEvent::InitialSession(None) => {
                self.apply_user(None);
            }
            AuthEvent::InitialSession(Some(session))
            | AuthEvent::SignedIn(session)
            | AuthEvent::TokenRefreshed(session)
            | AuthEvent::UserUpdated(session) => {
                let user_id = session.user.id;
                if self.apply_user(Some(session.user)) {
                    let epoch = self.inner.state.borrow().epoch();
                    self.spawn_profile_check(user_id, epoch);
                }
            }
        }
    }

    // -------------------------------------------------------------------------
    // internals
    // -------------------------------------------------------------------------

    fn write_markers(&self, remember_me: bool) -> Result<(), SessionError> {
        if remember_me {
            return Ok(self.inner.markers.mark_persistent()?);
        }
        let ttl = self.inner.settings.temporary_session_ttl;
        let expires_at = match time::Duration::try_from(ttl) {
            Ok(ttl) => OffsetDateTime::now_utc().checked_add(ttl),
            Err(_) => None,
        }
        .ok_or(SessionError::ExpiryOutOfRange { secs: ttl.as_secs() })?;
        Ok(self.inner.markers.mark_temporary(expires_at)?)
    }

    /// Log out a backend session that must not outlive a failed marker write.
    async fn discard_session(&self) {
        if let Err(e) = self.inner.auth.logout().await {
            warn!(error = %e, "logout after marker failure also failed");
        }
        self.apply_user(None);
    }

    fn clear_markers(&self) {
        if let Err(e) = self.inner.markers.clear() {
            warn!(error = %e, "failed to clear session markers");
        }
    }

    /// Returns true when the user identity changed.
    fn apply_user(&self, user: Option<User>) -> bool {
        let mut changed = false;
        self.inner.state.send_if_modified(|state| {
            let before = state.user.clone();
            changed = state.set_user(user);
            changed || state.user != before
        });
        changed
    }

    /// Apply `user` only if no identity change happened since `epoch`.
    fn apply_user_if_epoch(&self, epoch: u64, user: Option<User>) -> bool {
        let mut applied = false;
        self.inner.state.send_if_modified(|state| {
            if state.epoch() != epoch {
                return false;
            }
            applied = true;
            let before = state.user.clone();
            state.set_user(user) || state.user != before
        });
        applied
    }

    fn finish_loading(&self) {
        self.inner.state.send_if_modified(|state| {
            let was_loading = state.loading;
            state.loading = false;
            was_loading
        });
    }

    async fn run_profile_check(&self, user_id: Uuid, epoch: u64) -> bool {
        let needs_setup = self.inner.gate.check_profile_setup(user_id).await;
        let status = ProfileSetupStatus { user_id, needs_setup, epoch };
        let mut applied = false;
        self.inner.state.send_if_modified(|state| {
            applied = state.set_profile(status);
            applied
        });
        if !applied {
            debug!(%user_id, epoch, needs_setup, "profile setup result stale or unchanged");
        }
        needs_setup
    }

    fn spawn_profile_check(&self, user_id: Uuid, epoch: u64) {
        let store = self.clone();
        tokio::spawn(async move {
            store.run_profile_check(user_id, epoch).await;
        });
    }

    async fn expire_session(&self) {
        if let Err(e) = self.inner.auth.logout().await {
            warn!(error = %e, "stale session cleanup failed");
        }
        self.clear_markers();
        self.apply_user(None);
    }

    async fn check_expiry(&self) {
        if self.inner.state.borrow().user.is_none() {
            return;
        }
        match self.inner.markers.read() {
            Ok(markers) if markers.is_expired_at(OffsetDateTime::now_utc()) => {
                info!("temporary session expired while running; signing out");
                self.expire_session().await;
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "failed to read session markers"),
        }
    }
}

// =============================================================================
// SESSION CONTEXT
// =============================================================================

/// A mounted [`SessionStore`]: subscribed to auth events, restoring, watching
/// expiry. Dropping the context unmounts it.
pub struct SessionContext {
    store: SessionStore,
    listener: JoinHandle<()>,
    watchdog: Option<JoinHandle<()>>,
}

impl SessionContext {
    /// Subscribe to auth events and start restoration. Must be called inside
    /// a tokio runtime; returns before restoration finishes (the store reports
    /// `loading` until then).
    #[must_use]
    pub fn mount(store: SessionStore) -> Self {
        let events = store.inner.auth.subscribe();
        let listener = tokio::spawn(listen(store.clone(), events));

        let restoring = store.clone();
        tokio::spawn(async move {
            restoring.restore().await;
        });

        let watchdog = store
            .inner
            .settings
            .expiry_check_interval
            .filter(|period| !period.is_zero())
            .map(|period| tokio::spawn(watch_expiry(store.clone(), period)));

        debug!("session context mounted");
        Self { store, listener, watchdog }
    }

    #[must_use]
    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Wait for restoration to finish and return the state at that point.
    pub async fn ready(&self) -> AuthState {
        let mut states = self.store.subscribe();
        match states.wait_for(|state| !state.loading).await {
            Ok(state) => state.clone(),
            Err(_) => self.store.snapshot(),
        }
    }

    /// Stop consuming auth events and stop the watchdog.
    pub fn unmount(self) {
        drop(self);
    }
}

impl Drop for SessionContext {
    fn drop(&mut self) {
        self.listener.abort();
        if let Some(watchdog) = &self.watchdog {
            watchdog.abort();
        }
        debug!("session context unmounted");
    }
}

async fn listen(store: SessionStore, mut events: watch::Receiver<AuthEvent>) {
    while events.changed().await.is_ok() {
        let event = events.borrow_and_update().clone();
        store.handle_event(event);
    }
    debug!("auth event channel closed");
}

async fn watch_expiry(store: SessionStore, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.tick().await;
    loop {
        interval.tick().await;
        store.check_expiry().await;
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
