//! HTTP client for the Moodle token and web service endpoints.
//!
//! Both calls are form-encoded POSTs. Moodle reports most failures with a
//! 200 status and an error body, so every reply is checked for that shape
//! before it is decoded.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, ClientBuilder};
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use super::models::MoodleError;
use super::{ApiError, MoodleApi, SiteInfo, Token};

// ============================================================================
// Constants
// ============================================================================

/// Sent with every request
const USER_AGENT: &str = concat!("Moodle Downloader/", env!("CARGO_PKG_VERSION"));

/// HTTP request timeout in seconds, for token issuance and validation alike.
const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Token issuance endpoint, relative to the site root
const TOKEN_PATH: &str = "login/token.php";

/// REST web service endpoint, relative to the site root
const WEBSERVICE_PATH: &str = "webservice/rest/server.php";

/// Service the token is issued for. The mobile app service is enabled on
/// most sites that allow the official app.
const MOBILE_SERVICE: &str = "moodle_mobile_app";

const SITE_INFO_FUNCTION: &str = "core_webservice_get_site_info";

/// API client for a Moodle site.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct MoodleClient {
    client: Client,
}

impl MoodleClient {
    /// Create a new API client
    pub fn new() -> Result<Self, ApiError> {
        Self::build(Client::builder())
    }

    fn build(builder: ClientBuilder) -> Result<Self, ApiError> {
        let client = builder
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self { client })
    }

    /// Join an endpoint path onto the site root, keeping any sub-path the
    /// site is installed under.
    fn endpoint(base_url: &Url, path: &str) -> Result<Url, ApiError> {
        let mut base = base_url.clone();
        if !base.path().ends_with('/') {
            let with_slash = format!("{}/", base.path());
            base.set_path(&with_slash);
        }
        Ok(base.join(path)?)
    }

    /// POST a form and return the body of a successful response
    async fn post_form(&self, url: Url, form: &[(&str, &str)]) -> Result<String, ApiError> {
        debug!(url = %url, "POST");

        let response = self
            .client
            .post(url)
            .header(header::ACCEPT, "application/json")
            .form(form)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ApiError::from_status(status, &body));
        }
        Ok(body)
    }
}

/// Decode a reply, turning a Moodle error body into `ApiError::Rejected`.
fn decode_reply<T: DeserializeOwned>(body: &str, what: &str) -> Result<T, ApiError> {
    let value: serde_json::Value = serde_json::from_str(body)
        .map_err(|e| ApiError::InvalidResponse(format!("{} is not valid JSON: {}", what, e)))?;

    if let Some(err) = MoodleError::from_value(&value) {
        return Err(err.into());
    }

    serde_json::from_value(value)
        .map_err(|e| ApiError::InvalidResponse(format!("unexpected {}: {}", what, e)))
}

fn parse_token_reply(body: &str) -> Result<Token, ApiError> {
    let token: Token = decode_reply(body, "token reply")?;
    if token.token.is_empty() {
        return Err(ApiError::InvalidResponse("token reply has an empty token".to_string()));
    }
    Ok(token)
}

fn parse_site_info_reply(body: &str) -> Result<SiteInfo, ApiError> {
    decode_reply(body, "site info reply")
}

#[async_trait]
impl MoodleApi for MoodleClient {
    async fn request_token(
        &self,
        base_url: &Url,
        username: &str,
        password: &str,
    ) -> Result<Token, ApiError> {
        let url = Self::endpoint(base_url, TOKEN_PATH)?;
        let form = [
            ("username", username),
            ("password", password),
            ("service", MOBILE_SERVICE),
        ];

        let body = self.post_form(url, &form).await?;
        parse_token_reply(&body)
    }

    async fn site_info(&self, base_url: &Url, token: &str) -> Result<SiteInfo, ApiError> {
        let url = Self::endpoint(base_url, WEBSERVICE_PATH)?;
        let form = [
            ("wstoken", token),
            ("wsfunction", SITE_INFO_FUNCTION),
            ("moodlewsrestformat", "json"),
        ];

        let body = self.post_form(url, &form).await?;
        parse_site_info_reply(&body)
    }
}

// ============================================================================
// Tests
// ============================================================================
