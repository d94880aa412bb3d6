//! In-memory collaborators for unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::watch;
use uuid::Uuid;

use crate::backend::{AuthError, AuthEvent, AuthService, ProfileDirectory, ProfileError, UserSettings};
use crate::services::markers::SessionMarkers;
use crate::services::profile::ProfileSetupGate;
use crate::services::session::{SessionSettings, SessionStore};
use crate::state::{Session, User};
use crate::storage::MemoryStorage;

#[must_use]
pub fn user(email: &str) -> User {
    User { id: Uuid::new_v4(), email: Some(email.to_owned()) }
}

#[must_use]
pub fn session_for(user: &User) -> Session {
    Session {
        access_token: format!("access-{}", user.id),
        refresh_token: Some(format!("refresh-{}", user.id)),
        expires_at: Some(OffsetDateTime::now_utc() + time::Duration::hours(1)),
        user: user.clone(),
    }
}

/// Settings with the watchdog off so tests only see the events they drive.
#[must_use]
pub fn quiet_settings() -> SessionSettings {
    SessionSettings { temporary_session_ttl: Duration::from_secs(3600), expiry_check_interval: None }
}

// =============================================================================
// MockAuth
// =============================================================================

pub struct MockAuth {
    accounts: Mutex<HashMap<String, (String, User)>>,
    current: Mutex<Option<Session>>,
    events: watch::Sender<AuthEvent>,
    fail_logout: AtomicBool,
    logout_calls: AtomicUsize,
}

impl MockAuth {
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = watch::channel(AuthEvent::InitialSession(None));
        Self {
            accounts: Mutex::new(HashMap::new()),
            current: Mutex::new(None),
            events,
            fail_logout: AtomicBool::new(false),
            logout_calls: AtomicUsize::new(0),
        }
    }

    /// Register an account that can sign in with `password`.
    pub fn with_account(&self, email: &str, password: &str) -> User {
        let account = user(email);
        self.accounts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(email.to_owned(), (password.to_owned(), account.clone()));
        account
    }

    /// Pretend a session was persisted by an earlier run.
    pub fn with_current_session(&self, session: Session) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = Some(session);
    }

    pub fn fail_logout(&self) {
        self.fail_logout.store(true, Ordering::SeqCst);
    }

    pub fn logout_calls(&self) -> usize {
        self.logout_calls.load(Ordering::SeqCst)
    }

    pub fn emit(&self, event: AuthEvent) {
        self.events.send_replace(event);
    }
}

#[async_trait::async_trait]
impl AuthService for MockAuth {
    async fn login(&self, email: &str, password: &str, _remember_me: bool) -> Result<Session, AuthError> {
        let account = self
            .accounts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(email)
            .cloned();
        let Some((expected, account)) = account else {
            return Err(AuthError::InvalidCredentials);
        };
        if expected != password {
            return Err(AuthError::InvalidCredentials);
        }
        let session = session_for(&account);
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = Some(session.clone());
        self.emit(AuthEvent::SignedIn(session.clone()));
        Ok(session)
    }

    async fn register(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let exists = self
            .accounts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(email);
        if exists {
            return Err(AuthError::Response { status: 422, body: "user already registered".into() });
        }
        let account = self.with_account(email, password);
        let session = session_for(&account);
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = Some(session.clone());
        self.emit(AuthEvent::SignedIn(session.clone()));
        Ok(session)
    }

    async fn logout(&self) -> Result<(), AuthError> {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_logout.load(Ordering::SeqCst) {
            return Err(AuthError::Request("network unreachable".into()));
        }
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = None;
        self.emit(AuthEvent::SignedOut);
        Ok(())
    }

    async fn get_session(&self) -> Result<Option<Session>, AuthError> {
        Ok(self
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn subscribe(&self) -> watch::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}

impl Default for MockAuth {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// MockDirectory
// =============================================================================

#[derive(Default)]
pub struct MockDirectory {
    settings: Mutex<HashMap<Uuid, UserSettings>>,
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl MockDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, user_id: Uuid, profile_completed: bool) {
        self.settings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(user_id, UserSettings { user_id, username: Some("traveller".into()), profile_completed });
    }

    pub fn fail(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ProfileDirectory for MockDirectory {
    async fn fetch_settings(&self, user_id: Uuid) -> Result<Option<UserSettings>, ProfileError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(ProfileError::Request("connection reset".into()));
        }
        Ok(self
            .settings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&user_id)
            .cloned())
    }
}

// =============================================================================
// Fixture
// =============================================================================

pub struct Fixture {
    pub auth: Arc<MockAuth>,
    pub directory: Arc<MockDirectory>,
    pub storage: Arc<MemoryStorage>,
}

impl Fixture {
    #[must_use]
    pub fn new() -> Self {
        Self {
            auth: Arc::new(MockAuth::new()),
            directory: Arc::new(MockDirectory::new()),
            storage: Arc::new(MemoryStorage::new()),
        }
    }

    #[must_use]
    pub fn store(&self) -> SessionStore {
        self.store_with(quiet_settings())
    }

    #[must_use]
    pub fn store_with(&self, settings: SessionSettings) -> SessionStore {
        SessionStore::new(
            self.auth.clone(),
            ProfileSetupGate::new(self.directory.clone()),
            SessionMarkers::new(self.storage.clone()),
            settings,
        )
    }
}

impl Default for Fixture {
    fn default() -> Self {
        Self::new()
    }
}
