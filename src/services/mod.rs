//! Session services.
//!
//! ARCHITECTURE
//! ============
//! - `markers`: temporary-session bookkeeping in local storage
//! - `profile`: fail-closed profile-setup check
//! - `session`: the observable session store and its mounted context
//! - `guard`: route decisions derived from a session snapshot

pub mod guard;
pub mod markers;
pub mod profile;
pub mod session;
