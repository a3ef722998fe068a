//! Authentication module for obtaining a usable Moodle token.
//!
//! This module provides:
//! - `CredentialManager`: checks the cached token and renews it from the
//!   stored username/password when it no longer works
//! - `redact`: shortens secrets before they reach a log line
//!
//! A renewed token is only written back to the settings store after the
//! site has accepted it.

pub mod error;
pub mod manager;
pub mod secret;

pub use error::AuthError;
pub use manager::{CredentialManager, Login, TokenSource};
pub use secret::redact;
