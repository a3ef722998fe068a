//! Core library for moodle-downloader.
//!
//! Loads the settings file, makes sure it holds a token the Moodle site
//! still accepts (renewing it from the stored credentials if not) and
//! reports the account behind it.

pub mod api;
pub mod auth;
pub mod settings;

pub use api::{ApiError, MoodleApi, MoodleClient, SiteInfo, Token};
pub use auth::{AuthError, CredentialManager, Login, TokenSource};
pub use settings::{Settings, SettingsError, SettingsStore};
