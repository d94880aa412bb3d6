//! Route guard: what a protected screen should do for a given auth state.
//!
//! SYSTEM CONTEXT
//! ==============
//! Every protected route applies the same decision table: wait while the
//! session is restoring or the profile check is pending, send signed-out
//! visitors to login, send users with unfinished onboarding to profile
//! setup, and render otherwise. The profile-setup screen itself uses
//! [`RouteGuard::for_profile_setup`] so it does not redirect to itself.

use tokio::sync::watch;

use crate::state::AuthState;

pub const LOGIN_PATH: &str = "/login";
pub const PROFILE_SETUP_PATH: &str = "/profile-setup";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardDecision {
    Loading,
    RedirectToLogin,
    RedirectToProfileSetup,
    RenderChildren,
}

impl GuardDecision {
    /// False only for [`GuardDecision::Loading`].
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Loading)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteGuard {
    login_path: String,
    profile_setup_path: String,
    allow_incomplete_profile: bool,
}

impl Default for RouteGuard {
    fn default() -> Self {
        Self::with_paths(LOGIN_PATH, PROFILE_SETUP_PATH)
    }
}

impl RouteGuard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Guard for the onboarding screen: signed-in users pass regardless of
    /// their profile state.
    #[must_use]
    pub fn for_profile_setup() -> Self {
        Self { allow_incomplete_profile: true, ..Self::default() }
    }

    #[must_use]
    pub fn with_paths(login_path: impl Into<String>, profile_setup_path: impl Into<String>) -> Self {
        Self {
            login_path: login_path.into(),
            profile_setup_path: profile_setup_path.into(),
            allow_incomplete_profile: false,
        }
    }

    #[must_use]
    pub fn evaluate(&self, state: &AuthState) -> GuardDecision {
        if state.loading {
            return GuardDecision::Loading;
        }
        if state.user.is_none() {
            return GuardDecision::RedirectToLogin;
        }
        match state.needs_profile_setup() {
            None => GuardDecision::Loading,
            Some(true) if !self.allow_incomplete_profile => GuardDecision::RedirectToProfileSetup,
            Some(_) => GuardDecision::RenderChildren,
        }
    }

    /// Navigation target for a redirect decision.
    #[must_use]
    pub fn redirect_path(&self, decision: GuardDecision) -> Option<&str> {
        match decision {
            GuardDecision::RedirectToLogin => Some(&self.login_path),
            GuardDecision::RedirectToProfileSetup => Some(&self.profile_setup_path),
            GuardDecision::Loading | GuardDecision::RenderChildren => None,
        }
    }

    /// Wait until the state yields a non-loading decision.
    ///
    /// A closed channel means the store is gone; that resolves to a login
    /// redirect.
    pub async fn resolve(&self, states: &mut watch::Receiver<AuthState>) -> GuardDecision {
        match states.wait_for(|state| self.evaluate(state).is_terminal()).await {
            Ok(state) => self.evaluate(&state),
            Err(_) => GuardDecision::RedirectToLogin,
        }
    }
}

#[cfg(test)]
#[path = "guard_test.rs"]
mod tests;
