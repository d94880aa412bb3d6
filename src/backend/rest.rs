//! REST client for the hosted backend: auth endpoints plus the settings table.
//!
//! Thin HTTP wrapper over `/auth/v1/*` and `/rest/v1/user_settings`. The
//! backend session is persisted in the local key/value store under
//! [`SESSION_STORAGE_KEY`] so the next process can restore it. Response
//! parsing lives in free functions for testability.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use time::OffsetDateTime;
use tokio::sync::watch;
use tracing::{debug, warn};
use uuid::Uuid;

use super::types::{AuthError, AuthEvent, ProfileError, UserSettings};
use super::{AuthService, ProfileDirectory};
use crate::config::{AppConfig, HttpTimeouts};
use crate::state::{Session, User};
use crate::storage::KeyValueStore;

pub const SESSION_STORAGE_KEY: &str = "auth_session";
const SETTINGS_COLUMNS: &str = "user_id,username,profile_completed";

// =============================================================================
// CLIENT
// =============================================================================

pub struct BackendClient {
    http: reqwest::Client,
    base_url: String,
    anon_key: String,
    storage: Arc<dyn KeyValueStore>,
    events: watch::Sender<AuthEvent>,
}

impl BackendClient {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        anon_key: impl Into<String>,
        timeouts: HttpTimeouts,
        storage: Arc<dyn KeyValueStore>,
    ) -> Result<Self, AuthError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeouts.request_secs))
            .connect_timeout(Duration::from_secs(timeouts.connect_secs))
            .build()
            .map_err(|e| AuthError::HttpClientBuild(e.to_string()))?;
        let (events, _) = watch::channel(AuthEvent::InitialSession(None));
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            anon_key: anon_key.into(),
            storage,
            events,
        })
    }

    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn from_config(config: &AppConfig, storage: Arc<dyn KeyValueStore>) -> Result<Self, AuthError> {
        Self::new(config.backend_url.clone(), config.anon_key.clone(), config.timeouts, storage)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    // -------------------------------------------------------------------------
    // persisted session
    // -------------------------------------------------------------------------

    /// Persisted session, if any. A corrupt entry is discarded.
    fn stored_session(&self) -> Result<Option<Session>, AuthError> {
        let Some(raw) = self.storage.get(SESSION_STORAGE_KEY)? else {
            return Ok(None);
        };
        match serde_json::from_str::<Session>(&raw) {
            Ok(session) => Ok(Some(session)),
            Err(e) => {
                warn!(error = %e, "discarding unreadable persisted session");
                self.storage.remove(SESSION_STORAGE_KEY)?;
                Ok(None)
            }
        }
    }

    fn store_session(&self, session: &Session) -> Result<(), AuthError> {
        let raw = serde_json::to_string(session).map_err(|e| AuthError::Parse(e.to_string()))?;
        self.storage.set(SESSION_STORAGE_KEY, &raw)?;
        Ok(())
    }

    fn forget_session(&self) -> Result<(), AuthError> {
        self.storage.remove(SESSION_STORAGE_KEY)?;
        Ok(())
    }

    fn publish(&self, event: AuthEvent) {
        debug!(event = event.name(), "publishing auth event");
        self.events.send_replace(event);
    }

    // -------------------------------------------------------------------------
    // HTTP calls
    // -------------------------------------------------------------------------

    async fn revoke(&self, session: &Session) -> Result<(), AuthError> {
        let (status, text) = self
            .post_json("/auth/v1/logout", Some(&session.access_token), &serde_json::json!({}))
            .await?;
        match status {
            200..=299 | 401 | 403 | 404 => Ok(()),
            _ => Err(AuthError::Response { status, body: text }),
        }
    }

    async fn post_json(
        &self,
        path: &str,
        bearer: Option<&str>,
        body: &serde_json::Value,
    ) -> Result<(u16, String), AuthError> {
        let mut request = self
            .http
            .post(self.endpoint(path))
            .header("apikey", &self.anon_key)
            .json(body);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .map_err(|e| AuthError::Request(e.to_string()))?;
        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| AuthError::Request(e.to_string()))?;
        Ok((status, text))
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Session, AuthError> {
        let body = serde_json::json!({ "refresh_token": refresh_token });
        let (status, text) = self
            .post_json("/auth/v1/token?grant_type=refresh_token", None, &body)
            .await?;
        if !(200..300).contains(&status) {
            return Err(AuthError::Response { status, body: text });
        }
        parse_token_response(&text, OffsetDateTime::now_utc())
    }

    async fn fetch_user(&self, access_token: &str) -> Result<User, AuthError> {
        let response = self
            .http
            .get(self.endpoint("/auth/v1/user"))
            .header("apikey", &self.anon_key)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| AuthError::Request(e.to_string()))?;
        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| AuthError::Request(e.to_string()))?;
        if !(200..300).contains(&status) {
            return Err(AuthError::Response { status, body: text });
        }
        serde_json::from_str(&text).map_err(|e| AuthError::Parse(e.to_string()))
    }

    /// Discard a persisted session the backend no longer honours.
    fn drop_rejected_session(&self) -> Result<Option<Session>, AuthError> {
        self.forget_session()?;
        self.publish(AuthEvent::SignedOut);
        Ok(None)
    }
}

#[async_trait::async_trait]
impl AuthService for BackendClient {
    async fn login(&self, email: &str, password: &str, _remember_me: bool) -> Result<Session, AuthError> {
        let body = serde_json::json!({ "email": email, "password": password });
        let (status, text) = self
            .post_json("/auth/v1/token?grant_type=password", None, &body)
            .await?;
        if !(200..300).contains(&status) {
            return Err(login_failure(status, text));
        }
        let session = parse_token_response(&text, OffsetDateTime::now_utc())?;
        self.store_session(&session)?;
        self.publish(AuthEvent::SignedIn(session.clone()));
        Ok(session)
    }

    async fn register(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let body = serde_json::json!({ "email": email, "password": password });
        let (status, text) = self.post_json("/auth/v1/signup", None, &body).await?;
        if !(200..300).contains(&status) {
            return Err(AuthError::Response { status, body: text });
        }
        let session = parse_signup_response(&text, email, OffsetDateTime::now_utc())?;
        self.store_session(&session)?;
        self.publish(AuthEvent::SignedIn(session.clone()));
        Ok(session)
    }

    async fn logout(&self) -> Result<(), AuthError> {
        // Local state is dropped even when the backend cannot be reached.
        let remote = match self.stored_session() {
            Ok(Some(session)) => self.revoke(&session).await,
            Ok(None) => Ok(()),
            Err(e) => Err(e),
        };
        self.forget_session()?;
        self.publish(AuthEvent::SignedOut);
        remote
    }

    async fn get_session(&self) -> Result<Option<Session>, AuthError> {
        let Some(session) = self.stored_session()? else {
            return Ok(None);
        };

        if session.is_expired_at(OffsetDateTime::now_utc()) {
            let Some(refresh_token) = session.refresh_token.as_deref() else {
                return self.drop_rejected_session();
            };
            return match self.refresh(refresh_token).await {
                Ok(refreshed) => {
                    self.store_session(&refreshed)?;
                    self.publish(AuthEvent::TokenRefreshed(refreshed.clone()));
                    Ok(Some(refreshed))
                }
                Err(AuthError::Response { status: 400 | 401 | 403, .. }) => self.drop_rejected_session(),
                Err(e) => Err(e),
            };
        }

        match self.fetch_user(&session.access_token).await {
            Ok(user) => {
                let session = Session { user, ..session };
                self.store_session(&session)?;
                Ok(Some(session))
            }
            Err(AuthError::Response { status: 401 | 403, .. }) => self.drop_rejected_session(),
            Err(e) => Err(e),
        }
    }

    fn subscribe(&self) -> watch::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}

#[async_trait::async_trait]
impl ProfileDirectory for BackendClient {
    async fn fetch_settings(&self, user_id: Uuid) -> Result<Option<UserSettings>, ProfileError> {
        let session = self
            .stored_session()
            .map_err(|e| match e {
                AuthError::Storage(inner) => ProfileError::Storage(inner),
                other => ProfileError::Request(other.to_string()),
            })?
            .ok_or(ProfileError::NotAuthenticated)?;

        let url = self.endpoint(&settings_path(user_id));
        let response = self
            .http
            .get(url)
            .header("apikey", &self.anon_key)
            .header("Accept", "application/json")
            .bearer_auth(&session.access_token)
            .send()
            .await
            .map_err(|e| ProfileError::Request(e.to_string()))?;
        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| ProfileError::Request(e.to_string()))?;
        if !(200..300).contains(&status) {
            return Err(ProfileError::Response { status, body: text });
        }
        parse_settings_response(&text)
    }
}

// =============================================================================
// WIRE TYPES
// =============================================================================

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_at: Option<i64>,
    #[serde(default)]
    expires_in: Option<i64>,
    user: User,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SignupResponse {
    Session(TokenResponse),
    /// Returned when the account still needs email confirmation.
    PendingUser(User),
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_code: Option<String>,
}

// =============================================================================
// PARSING
// =============================================================================

fn settings_path(user_id: Uuid) -> String {
    format!("/rest/v1/user_settings?user_id=eq.{user_id}&select={SETTINGS_COLUMNS}")
}

fn session_from_token(token: TokenResponse, now: OffsetDateTime) -> Session {
    let expires_at = match (token.expires_at, token.expires_in) {
        (Some(at), _) => match OffsetDateTime::from_unix_timestamp(at) {
            Ok(expires_at) => Some(expires_at),
            Err(e) => {
                warn!(error = %e, expires_at = at, "ignoring out-of-range session expiry");
                None
            }
        },
        (None, Some(secs)) => {
            let expires_at = now.checked_add(time::Duration::seconds(secs));
            if expires_at.is_none() {
                warn!(expires_in = secs, "ignoring out-of-range session lifetime");
            }
            expires_at
        }
        (None, None) => None,
    };
    Session { access_token: token.access_token, refresh_token: token.refresh_token, expires_at, user: token.user }
}

fn parse_token_response(json: &str, now: OffsetDateTime) -> Result<Session, AuthError> {
    let token: TokenResponse = serde_json::from_str(json).map_err(|e| AuthError::Parse(e.to_string()))?;
    Ok(session_from_token(token, now))
}

fn parse_signup_response(json: &str, email: &str, now: OffsetDateTime) -> Result<Session, AuthError> {
    match serde_json::from_str::<SignupResponse>(json).map_err(|e| AuthError::Parse(e.to_string()))? {
        SignupResponse::Session(token) => Ok(session_from_token(token, now)),
        SignupResponse::PendingUser(_) => Err(AuthError::ConfirmationRequired { email: email.to_owned() }),
    }
}

fn parse_settings_response(json: &str) -> Result<Option<UserSettings>, ProfileError> {
    let rows: Vec<UserSettings> = serde_json::from_str(json).map_err(|e| ProfileError::Parse(e.to_string()))?;
    Ok(rows.into_iter().next())
}

/// Map a failed password grant to an error. Bad credentials come back as
/// 400 `invalid_grant` (or 401 on some deployments).
fn login_failure(status: u16, body: String) -> AuthError {
    let rejected = match status {
        401 => true,
        400 => serde_json::from_str::<ErrorBody>(&body).map_or(false, |err| {
            err.error.as_deref() == Some("invalid_grant") || err.error_code.as_deref() == Some("invalid_credentials")
        }),
        _ => false,
    };
    if rejected {
        AuthError::InvalidCredentials
    } else {
        AuthError::Response { status, body }
    }
}

#[cfg(test)]
#[path = "rest_test.rs"]
mod tests;
