//! Session data model and the observable auth snapshot.
//!
//! DESIGN
//! ======
//! `AuthState` is the single value published to observers (route guards,
//! screens). Every change of user identity bumps `epoch`; a profile-setup
//! status carries the epoch it was computed under, so a result that arrives
//! after the user changed can never be exposed or applied.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// USER / SESSION
// =============================================================================

/// Authenticated identity as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    #[serde(default)]
    pub email: Option<String>,
}

/// Backend session: tokens plus expiry metadata for one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default, with = "time::serde::timestamp::option")]
    pub expires_at: Option<OffsetDateTime>,
    pub user: User,
}

impl Session {
    /// True when the backend-issued expiry is at or before `now`.
    /// Sessions without an expiry never expire on their own.
    #[must_use]
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }
}

// =============================================================================
// PROFILE SETUP STATUS
// =============================================================================

/// Result of a profile-setup check, bound to the user and epoch it was
/// computed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfileSetupStatus {
    pub user_id: Uuid,
    pub needs_setup: bool,
    pub epoch: u64,
}

// =============================================================================
// AUTH STATE
// =============================================================================

/// Snapshot of the session store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthState {
    pub user: Option<User>,
    /// True until the one-time session restoration has finished.
    pub loading: bool,
    pub profile: Option<ProfileSetupStatus>,
    pub(crate) epoch: u64,
}

impl AuthState {
    /// State at mount time: no user, restoration pending.
    #[must_use]
    pub fn initial() -> Self {
        Self { loading: true, ..Self::default() }
    }

    #[must_use]
    pub fn user_id(&self) -> Option<Uuid> {
        self.user.as_ref().map(|u| u.id)
    }

    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Whether the current user still has to finish onboarding.
    ///
    /// `None` while signed out or while the check for the current user has
    /// not produced a result yet.
    #[must_use]
    pub fn needs_profile_setup(&self) -> Option<bool> {
        let user_id = self.user_id()?;
        self.profile
            .filter(|p| p.user_id == user_id && p.epoch == self.epoch)
            .map(|p| p.needs_setup)
    }

    /// Replace the current user. Returns true when the identity changed, in
    /// which case any previous profile status is dropped and the epoch moves on.
    pub(crate) fn set_user(&mut self, user: Option<User>) -> bool {
        let changed = self.user_id() != user.as_ref().map(|u| u.id);
        self.user = user;
        if changed {
            self.epoch += 1;
            self.profile = None;
        }
        changed
    }

    /// Apply a profile status if it still belongs to the current user and epoch.
    pub(crate) fn set_profile(&mut self, status: ProfileSetupStatus) -> bool {
        if status.epoch != self.epoch || self.user_id() != Some(status.user_id) {
            return false;
        }
        if self.profile == Some(status) {
            return false;
        }
        self.profile = Some(status);
        true
    }
}

#[cfg(test)]
#[path = "state_test.rs"]
mod tests;
