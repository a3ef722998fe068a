use thiserror::Error;

use crate::api::ApiError;
use crate::settings::SettingsError;

/// Fatal outcomes of a login attempt.
///
/// A failure to save a renewed token is not fatal and is reported through
/// `Login::persist_error` instead.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Configuration error: {0}")]
    Config(#[from] SettingsError),

    #[error("Credentials rejected by Moodle: {0}")]
    Rejected(#[source] ApiError),

    #[error("Could not talk to Moodle: {0}")]
    Transport(#[source] ApiError),
}

impl AuthError {
    /// Sort a failed renewal or validation call
    pub fn from_api(err: ApiError) -> Self {
        if err.is_rejection() {
            AuthError::Rejected(err)
        } else {
            AuthError::Transport(err)
        }
    }
}
