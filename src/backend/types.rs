//! Backend types: auth events, settings records, and errors shared by the
//! REST and Postgres adapters.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state::Session;
use crate::storage::StorageError;

// =============================================================================
// ERRORS
// =============================================================================

/// Errors produced by auth backend operations.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The backend rejected the email/password pair.
    #[error("invalid email or password")]
    InvalidCredentials,

    /// Registration succeeded but the account must be confirmed before a
    /// session is issued.
    #[error("account for {email} requires email confirmation")]
    ConfirmationRequired { email: String },

    /// The HTTP request to the backend failed.
    #[error("auth request failed: {0}")]
    Request(String),

    /// The backend returned a non-success HTTP status.
    #[error("auth response error: status {status}")]
    Response { status: u16, body: String },

    /// The backend response body could not be deserialized.
    #[error("auth response parse failed: {0}")]
    Parse(String),

    /// The underlying HTTP client could not be constructed.
    #[error("HTTP client build failed: {0}")]
    HttpClientBuild(String),

    /// The persisted backend session could not be read or written.
    #[error("session storage failed: {0}")]
    Storage(#[from] StorageError),
}

impl AuthError {
    /// Transient failures worth surfacing as "try again".
    #[must_use]
    pub fn retryable(&self) -> bool {
        matches!(self, Self::Request(_) | Self::Response { status: 429 | 500..=599, .. })
    }
}

/// Errors produced by profile-settings lookups.
#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("no backend session to authorize the lookup")]
    NotAuthenticated,

    #[error("profile request failed: {0}")]
    Request(String),

    #[error("profile response error: status {status}")]
    Response { status: u16, body: String },

    #[error("profile response parse failed: {0}")]
    Parse(String),

    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("session storage failed: {0}")]
    Storage(#[from] StorageError),
}

// =============================================================================
// AUTH EVENTS
// =============================================================================

/// Auth state change published by an [`super::AuthService`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    /// Session known when the backend client started (or restored).
    InitialSession(Option<Session>),
    SignedIn(Session),
    TokenRefreshed(Session),
    UserUpdated(Session),
    SignedOut,
}

impl AuthEvent {
    #[must_use]
    pub fn session(&self) -> Option<&Session> {
        match self {
            Self::InitialSession(session) => session.as_ref(),
            Self::SignedIn(session) | Self::TokenRefreshed(session) | Self::UserUpdated(session) => Some(session),
            Self::SignedOut => None,
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::InitialSession(_) => "initial_session",
            Self::SignedIn(_) => "signed_in",
            Self::TokenRefreshed(_) => "token_refreshed",
            Self::UserUpdated(_) => "user_updated",
            Self::SignedOut => "signed_out",
        }
    }
}

// =============================================================================
// USER SETTINGS
// =============================================================================

/// Row of the `user_settings` table, keyed by user id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSettings {
    pub user_id: Uuid,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub profile_completed: bool,
}

impl UserSettings {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.profile_completed
    }
}

#[cfg(test)]
#[path = "types_test.rs"]
mod tests;
