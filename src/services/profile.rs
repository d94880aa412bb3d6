//! Profile-setup gate. Does this user still need onboarding?
//!
//! Errors resolve to "needs setup": an account is sent back through
//! onboarding rather than admitted with a profile nobody verified.

use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::backend::ProfileDirectory;

#[derive(Clone)]
pub struct ProfileSetupGate {
    directory: Arc<dyn ProfileDirectory>,
}

impl ProfileSetupGate {
    #[must_use]
    pub fn new(directory: Arc<dyn ProfileDirectory>) -> Self {
        Self { directory }
    }

    /// True when the user's settings record is missing, incomplete, or could
    /// not be read.
    pub async fn check_profile_setup(&self, user_id: Uuid) -> bool {
        match self.directory.fetch_settings(user_id).await {
            Ok(Some(settings)) => {
                let needs_setup = !settings.is_complete();
                debug!(%user_id, needs_setup, "profile settings loaded");
                needs_setup
            }
            Ok(None) => {
                debug!(%user_id, "no profile settings record");
                true
            }
            Err(e) => {
                warn!(%user_id, error = %e, "profile setup check failed; assuming setup required");
                true
            }
        }
    }
}

#[cfg(test)]
#[path = "profile_test.rs"]
mod tests;
