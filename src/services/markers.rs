//! Temporary-session markers in local storage.
//!
//! A sign-in without "remember me" writes `session_type = "temporary"` and an
//! RFC 3339 `session_expiry`. Startup and the expiry watchdog read them back;
//! sign-out removes both.

use std::sync::Arc;

use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::storage::{KeyValueStore, StorageError};

pub const SESSION_TYPE_KEY: &str = "session_type";
pub const SESSION_EXPIRY_KEY: &str = "session_expiry";
pub const TEMPORARY: &str = "temporary";
pub const PERSISTENT: &str = "persistent";

/// Raw marker values as found in storage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredMarkers {
    pub session_type: Option<String>,
    pub session_expiry: Option<String>,
}

impl StoredMarkers {
    #[must_use]
    pub fn is_temporary(&self) -> bool {
        self.session_type.as_deref() == Some(TEMPORARY)
    }

    /// A temporary session is expired once its expiry is at or before `now`.
    /// A temporary marker with a missing or unreadable expiry counts as
    /// expired. Non-temporary sessions never expire here.
    #[must_use]
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        if !self.is_temporary() {
            return false;
        }
        match self.session_expiry.as_deref() {
            Some(raw) => OffsetDateTime::parse(raw, &Rfc3339).map_or(true, |expiry| expiry <= now),
            None => true,
        }
    }
}

#[derive(Clone)]
pub struct SessionMarkers {
    storage: Arc<dyn KeyValueStore>,
}

impl SessionMarkers {
    #[must_use]
    pub fn new(storage: Arc<dyn KeyValueStore>) -> Self {
        Self { storage }
    }

    /// # Errors
    ///
    /// Returns an error if storage cannot be read.
    pub fn read(&self) -> Result<StoredMarkers, StorageError> {
        Ok(StoredMarkers {
            session_type: self.storage.get(SESSION_TYPE_KEY)?,
            session_expiry: self.storage.get(SESSION_EXPIRY_KEY)?,
        })
    }

    /// # Errors
    ///
    /// Returns an error if the expiry cannot be formatted or storage cannot be
    /// written.
    pub fn mark_temporary(&self, expires_at: OffsetDateTime) -> Result<(), StorageError> {
        let expiry = expires_at.format(&Rfc3339)?;
        self.storage.set(SESSION_EXPIRY_KEY, &expiry)?;
        self.storage.set(SESSION_TYPE_KEY, TEMPORARY)
    }

    /// # Errors
    ///
    /// Returns an error if storage cannot be written.
    pub fn mark_persistent(&self) -> Result<(), StorageError> {
        self.storage.remove(SESSION_EXPIRY_KEY)?;
        self.storage.set(SESSION_TYPE_KEY, PERSISTENT)
    }

    /// Remove both markers. Both removals are attempted even if the first
    /// fails.
    ///
    /// # Errors
    ///
    /// Returns the first storage error encountered.
    pub fn clear(&self) -> Result<(), StorageError> {
        let type_removed = self.storage.remove(SESSION_TYPE_KEY);
        let expiry_removed = self.storage.remove(SESSION_EXPIRY_KEY);
        type_removed.and(expiry_removed)
    }
}

#[cfg(test)]
#[path = "markers_test.rs"]
mod tests;
