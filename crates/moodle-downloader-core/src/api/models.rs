//! Wire types for the Moodle token and web service endpoints.

use std::fmt;

use serde::Deserialize;

use crate::auth::redact;

use super::ApiError;

/// Reply from `login/token.php` on success
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct Token {
    pub token: String,
    #[serde(rename = "privatetoken", default)]
    pub private_token: Option<String>,
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("token", &redact(&self.token))
            .field("private_token", &self.private_token.as_deref().map(redact))
            .finish()
    }
}

/// Reply from `core_webservice_get_site_info`.
/// Only the fields this tool reports are kept.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SiteInfo {
    #[serde(rename = "userid")]
    pub user_id: i64,
    #[serde(rename = "sitename", default)]
    pub site_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(rename = "fullname", default)]
    pub full_name: Option<String>,
}

/// In-band error body. `login/token.php` uses `error`,
/// the web service uses `exception` + `message`.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct MoodleError {
    #[serde(default)]
    errorcode: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    exception: Option<String>,
}

impl MoodleError {
    /// Recognise an error body without committing to the success shape
    pub(crate) fn from_value(value: &serde_json::Value) -> Option<Self> {
        let object = value.as_object()?;
        let is_error = ["errorcode", "error", "exception"]
            .iter()
            .any(|key| object.contains_key(*key));
        if !is_error {
            return None;
        }
        Some(serde_json::from_value(value.clone()).unwrap_or_default())
    }
}

impl From<MoodleError> for ApiError {
    fn from(err: MoodleError) -> Self {
        let code = err
            .errorcode
            .or(err.exception)
            .unwrap_or_else(|| "unknown".to_string());
        let message = err
            .message
            .or(err.error)
            .unwrap_or_else(|| "no message".to_string());
        ApiError::Rejected { code, message }
    }
}
