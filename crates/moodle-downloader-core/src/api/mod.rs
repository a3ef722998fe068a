//! Moodle API module.
//!
//! This module provides the `MoodleApi` trait, the two remote operations the
//! credential flow depends on, and `MoodleClient`, its HTTP implementation.
//!
//! Tokens are issued by `login/token.php` for the mobile app service and
//! checked against the REST web service's site info function.

pub mod client;
pub mod error;
pub mod models;

use async_trait::async_trait;
use url::Url;

pub use client::MoodleClient;
pub use error::ApiError;
pub use models::{SiteInfo, Token};

/// Remote operations needed to obtain and check a token.
#[async_trait]
pub trait MoodleApi: Send + Sync {
    /// Exchange username and password for a new token
    async fn request_token(
        &self,
        base_url: &Url,
        username: &str,
        password: &str,
    ) -> Result<Token, ApiError>;

    /// Identify the account behind a token. Success means the token is live.
    async fn site_info(&self, base_url: &Url, token: &str) -> Result<SiteInfo, ApiError>;
}
