//! Runtime configuration parsed from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use crate::services::session::SessionSettings;

pub const DEFAULT_STORAGE_PATH: &str = ".trailmate/session.json";
pub const DEFAULT_TEMP_SESSION_TTL_SECS: u64 = 24 * 60 * 60;
pub const DEFAULT_EXPIRY_CHECK_SECS: u64 = 60;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required env var {var}")]
    Missing { var: &'static str },
    #[error("invalid value for {var}: {value}")]
    Invalid { var: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpTimeouts {
    pub request_secs: u64,
    pub connect_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub backend_url: String,
    pub anon_key: String,
    pub storage_path: PathBuf,
    pub temporary_session_ttl: Duration,
    /// `None` disables the expiry watchdog.
    pub expiry_check_interval: Option<Duration>,
    pub timeouts: HttpTimeouts,
    pub database_url: Option<String>,
}

impl AppConfig {
    /// Build typed config from environment variables.
    ///
    /// Required:
    /// - `TRAILMATE_BACKEND_URL`
    /// - `TRAILMATE_ANON_KEY`
    ///
    /// Optional:
    /// - `TRAILMATE_STORAGE_PATH`: default `.trailmate/session.json`
    /// - `TRAILMATE_TEMP_SESSION_TTL_SECS`: default 86400
    /// - `TRAILMATE_EXPIRY_CHECK_SECS`: default 60, `0` disables the watchdog
    /// - `TRAILMATE_REQUEST_TIMEOUT_SECS`: default 30
    /// - `TRAILMATE_CONNECT_TIMEOUT_SECS`: default 10
    /// - `DATABASE_URL`: profile lookups go straight to Postgres when set
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing or the backend URL
    /// is not http(s).
    pub fn from_env() -> Result<Self, ConfigError> {
        let backend_url = required("TRAILMATE_BACKEND_URL")?
            .trim_end_matches('/')
            .to_string();
        if !backend_url.starts_with("http://") && !backend_url.starts_with("https://") {
            return Err(ConfigError::Invalid { var: "TRAILMATE_BACKEND_URL", value: backend_url });
        }
        let anon_key = required("TRAILMATE_ANON_KEY")?;

        let storage_path = std::env::var("TRAILMATE_STORAGE_PATH")
            .map_or_else(|_| PathBuf::from(DEFAULT_STORAGE_PATH), PathBuf::from);
        let temporary_session_ttl =
            Duration::from_secs(env_parse_u64("TRAILMATE_TEMP_SESSION_TTL_SECS", DEFAULT_TEMP_SESSION_TTL_SECS));
        let expiry_check_interval = match env_parse_u64("TRAILMATE_EXPIRY_CHECK_SECS", DEFAULT_EXPIRY_CHECK_SECS) {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        let timeouts = HttpTimeouts {
            request_secs: env_parse_u64("TRAILMATE_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS),
            connect_secs: env_parse_u64("TRAILMATE_CONNECT_TIMEOUT_SECS", DEFAULT_CONNECT_TIMEOUT_SECS),
        };
        let database_url = match std::env::var("DATABASE_URL") {
            Ok(url) if !url.trim().is_empty() => Some(url),
            _ => None,
        };

        Ok(Self {
            backend_url,
            anon_key,
            storage_path,
            temporary_session_ttl,
            expiry_check_interval,
            timeouts,
            database_url,
        })
    }

    #[must_use]
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            temporary_session_ttl: self.temporary_session_ttl,
            expiry_check_interval: self.expiry_check_interval,
        }
    }
}

fn required(var: &'static str) -> Result<String, ConfigError> {
    match std::env::var(var) {
        Ok(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        _ => Err(ConfigError::Missing { var }),
    }
}

fn env_parse_u64(key: &str, default: u64) -> u64 {
    std::env::var(key).map_or(default, |v| v.trim().parse::<u64>().unwrap_or(default))
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
