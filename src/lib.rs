//! Trailmate session layer.
//!
//! SYSTEM CONTEXT
//! ==============
//! Client-side authentication state for the Trailmate app: who is signed in,
//! whether session restoration is still running, and whether the user has
//! finished onboarding. Route guards turn that state into a navigation
//! decision. The hosted backend sits behind the traits in [`backend`].

pub mod backend;
pub mod config;
pub mod db;
pub mod services;
pub mod state;
pub mod storage;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use backend::{AuthError, AuthEvent, AuthService, BackendClient, ProfileDirectory, UserSettings};
pub use config::AppConfig;
pub use services::guard::{GuardDecision, RouteGuard};
pub use services::session::{SessionContext, SessionError, SessionSettings, SessionStore};
pub use state::{AuthState, Session, User};
