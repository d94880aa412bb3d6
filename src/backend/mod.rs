//! Seams to the hosted auth service and the settings table.
//!
//! DESIGN
//! ======
//! The session layer only talks to these two traits. `rest::BackendClient`
//! implements both against the hosted platform; `crate::db` offers a direct
//! Postgres `ProfileDirectory`; tests plug in mocks.
//!
//! Auth state changes are published on a `tokio::sync::watch` channel rather
//! than through callbacks: a slow consumer only ever sees the latest event.

pub mod rest;
pub mod types;

use tokio::sync::watch;
use uuid::Uuid;

use crate::state::Session;
pub use rest::BackendClient;
pub use types::{AuthError, AuthEvent, ProfileError, UserSettings};

/// Hosted auth service.
#[async_trait::async_trait]
pub trait AuthService: Send + Sync {
    /// Sign in with email and password.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidCredentials`] for a rejected pair, or a
    /// transport/decode error.
    async fn login(&self, email: &str, password: &str, remember_me: bool) -> Result<Session, AuthError>;

    /// Create an account and sign it in.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend refuses the registration or cannot be
    /// reached.
    async fn register(&self, email: &str, password: &str) -> Result<Session, AuthError>;

    /// End the current session.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be reached.
    async fn logout(&self) -> Result<(), AuthError>;

    /// Session restored from persisted tokens, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the persisted session cannot be read or verified.
    async fn get_session(&self) -> Result<Option<Session>, AuthError>;

    /// Receiver for auth state changes. The value present at subscription
    /// time is considered already seen.
    fn subscribe(&self) -> watch::Receiver<AuthEvent>;
}

/// Read access to per-user settings records.
#[async_trait::async_trait]
pub trait ProfileDirectory: Send + Sync {
    /// Fetch the settings row for `user_id`; `None` when no row exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    async fn fetch_settings(&self, user_id: Uuid) -> Result<Option<UserSettings>, ProfileError>;
}
