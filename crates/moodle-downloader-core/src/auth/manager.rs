//! Token acquisition against a Moodle site.
//!
//! The flow for one run:
//! 1. Load settings from the store.
//! 2. If a token is cached, ask the site who it belongs to. An answer means
//!    the token is still good and nothing else happens.
//! 3. Otherwise request a new token with the stored username/password,
//!    check it the same way, and write it back to the store.
//!
//! Any failure while checking the cached token (rejected or unreachable)
//! leads to a renewal. Failures during renewal end the run.

use std::fmt;

use tracing::{debug, info, warn};
use url::Url;

use crate::api::{ApiError, MoodleApi, SiteInfo};
use crate::settings::{Settings, SettingsError, SettingsStore};

use super::{redact, AuthError};

/// Where the returned token came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSource {
    /// The token in the settings file was still accepted
    Cached,
    /// A new token was issued during this run
    Renewed,
}

/// A verified token plus what was learned while verifying it.
pub struct Login {
    pub token: String,
    pub site: SiteInfo,
    pub source: TokenSource,
    /// Settings as they stand after this run, including any new token
    pub settings: Settings,
    /// Set when a renewed token could not be written back. The token is
    /// still usable, but the next run will have to renew again.
    pub persist_error: Option<SettingsError>,
}

impl Login {
    pub fn user_id(&self) -> i64 {
        self.site.user_id
    }
}

impl fmt::Debug for Login {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Login")
            .field("token", &redact(&self.token))
            .field("site", &self.site)
            .field("source", &self.source)
            .field("settings", &self.settings)
            .field("persist_error", &self.persist_error)
            .finish()
    }
}

pub struct CredentialManager<A> {
    api: A,
}

impl<A: MoodleApi> CredentialManager<A> {
    pub fn new(api: A) -> Self {
        Self { api }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    /// Check a token against the site and return the account id behind it
    pub async fn validate(&self, base_url: &Url, token: &str) -> Result<i64, ApiError> {
        let site = self.check_token(base_url, token).await?;
        Ok(site.user_id)
    }

    /// Liveness probe shared by the cached and the renewed token
    async fn check_token(&self, base_url: &Url, token: &str) -> Result<SiteInfo, ApiError> {
        self.api.site_info(base_url, token).await
    }

    /// Load settings from `store` and produce a verified token.
    pub async fn acquire(&self, store: &SettingsStore) -> Result<Login, AuthError> {
        info!(path = %store.path().display(), "Trying to login");
        let settings = store.load()?;
        self.authenticate(settings, store).await
    }

    /// Produce a verified token from already loaded settings. A renewed
    /// token is written to `store`.
    pub async fn authenticate(
        &self,
        settings: Settings,
        store: &SettingsStore,
    ) -> Result<Login, AuthError> {
        let base_url = settings.base_url()?;

        if let Some(token) = settings.cached_token().map(str::to_owned) {
            info!(token = %redact(&token), "Checking whether the cached token is still valid");
            match self.check_token(&base_url, &token).await {
                Ok(site) => {
                    info!(user_id = site.user_id, "Cached token is valid");
                    return Ok(Login {
                        token,
                        site,
                        source: TokenSource::Cached,
                        settings,
                        persist_error: None,
                    });
                }
                Err(e) if e.is_rejection() => {
                    info!(error = %e, "Cached token was rejected");
                }
                // TODO: retry transient failures once before falling back to a full renewal
                Err(e) => {
                    warn!(error = %e, "Could not check the cached token");
                }
            }
        } else {
            info!("No cached token");
        }

        self.renew(settings, &base_url, store).await
    }

    async fn renew(
        &self,
        mut settings: Settings,
        base_url: &Url,
        store: &SettingsStore,
    ) -> Result<Login, AuthError> {
        settings.require_credentials()?;

        info!(username = %settings.username, "Renewing token");
        let issued = self
            .api
            .request_token(base_url, &settings.username, &settings.password)
            .await
            .map_err(AuthError::from_api)?;

        debug!(token = %redact(&issued.token), "Token issued, checking it");
        let site = self
            .check_token(base_url, &issued.token)
            .await
            .map_err(AuthError::from_api)?;
        info!(user_id = site.user_id, "New token is valid");

        settings.set_token(issued.token.clone());
        let persist_error = match store.save(&settings) {
            Ok(()) => {
                info!(path = %store.path().display(), "Saved new token");
                None
            }
            Err(e) => {
                warn!(error = %e, "Failed to save new token, the next run will renew again");
                Some(e)
            }
        };

        Ok(Login {
            token: issued.token,
            site,
            source: TokenSource::Renewed,
            settings,
            persist_error,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use tracing_subscriber::fmt::MakeWriter;

    use super::*;
    use crate::api::Token;

    const USER_ID: i64 = 42;

    enum Issue {
        Token(&'static str),
        Reject,
        Offline,
    }

    /// Collaborator that issues one fixed token and accepts a fixed set
    struct StubApi {
        issue: Issue,
        valid: Vec<&'static str>,
        unreachable: Vec<&'static str>,
        server_error: Vec<&'static str>,
        token_requests: AtomicUsize,
        checked: Mutex<Vec<String>>,
    }

    impl StubApi {
        fn new(issue: Issue, valid: &[&'static str]) -> Self {
            Self {
                issue,
                valid: valid.to_vec(),
                unreachable: Vec::new(),
                server_error: Vec::new(),
                token_requests: AtomicUsize::new(0),
                checked: Mutex::new(Vec::new()),
            }
        }

        fn unreachable_for(mut self, tokens: &[&'static str]) -> Self {
            self.unreachable = tokens.to_vec();
            self
        }

        fn server_error_for(mut self, tokens: &[&'static str]) -> Self {
            self.server_error = tokens.to_vec();
            self
        }

        fn token_requests(&self) -> usize {
            self.token_requests.load(Ordering::SeqCst)
        }

        fn checked(&self) -> Vec<String> {
            self.checked.lock().unwrap().clone()
        }
    }

    /// A real reqwest error, produced without touching the network
    async fn network_error() -> ApiError {
        ApiError::NetworkError(reqwest::get("http://[::1").await.unwrap_err())
    }

    fn rejected(code: &str) -> ApiError {
        ApiError::Rejected {
            code: code.to_string(),
            message: "refused".to_string(),
        }
    }

    #[async_trait]
    impl MoodleApi for StubApi {
        async fn request_token(
            &self,
            _base_url: &Url,
            username: &str,
            password: &str,
        ) -> Result<Token, ApiError> {
            self.token_requests.fetch_add(1, Ordering::SeqCst);
            assert_eq!((username, password), ("u", "p"));
            match self.issue {
                Issue::Token(token) => Ok(Token {
                    token: token.to_string(),
                    private_token: None,
                }),
                Issue::Reject => Err(rejected("invalidlogin")),
                Issue::Offline => Err(network_error().await),
            }
        }

        async fn site_info(&self, _base_url: &Url, token: &str) -> Result<SiteInfo, ApiError> {
            self.checked.lock().unwrap().push(token.to_string());
            if self.unreachable.iter().any(|t| *t == token) {
                return Err(network_error().await);
            }
            if self.server_error.iter().any(|t| *t == token) {
                return Err(ApiError::ServerError("maintenance".to_string()));
            }
            if self.valid.iter().any(|t| *t == token) {
                Ok(SiteInfo {
                    user_id: USER_ID,
                    site_name: Some("Example".to_string()),
                    username: Some("u".to_string()),
                    full_name: None,
                })
            } else {
                Err(rejected("invalidtoken"))
            }
        }
    }

    /// Collects formatted log output for assertions
    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl LogBuffer {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for LogBuffer {
        type Writer = LogBuffer;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    fn capture_logs() -> (LogBuffer, tracing::subscriber::DefaultGuard) {
        let logs = LogBuffer::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(logs.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::INFO)
            .finish();
        let guard = tracing::subscriber::set_default(subscriber);
        (logs, guard)
    }

    fn write_settings(dir: &Path, token: &str) -> SettingsStore {
        let path = dir.join("settings.json");
        let json = serde_json::json!({
            "baseURL": "https://example.edu/",
            "username": "u",
            "password": "p",
            "token": token,
        });
        fs::write(&path, json.to_string()).unwrap();
        SettingsStore::new(path)
    }

    #[tokio::test]
    async fn test_empty_token_renews_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let store = write_settings(dir.path(), "");
        let manager = CredentialManager::new(StubApi::new(Issue::Token("abc123"), &["abc123"]));

        let login = manager.acquire(&store).await.unwrap();

        assert_eq!(login.token, "abc123");
        assert_eq!(login.source, TokenSource::Renewed);
        assert_eq!(login.user_id(), USER_ID);
        assert!(login.persist_error.is_none());
        assert_eq!(login.settings.cached_token(), Some("abc123"));
        // the empty token is never sent for validation
        assert_eq!(manager.api().checked(), vec!["abc123".to_string()]);
        assert_eq!(store.load().unwrap().cached_token(), Some("abc123"));
    }

    #[tokio::test]
    async fn test_valid_cached_token_skips_renewal() {
        let dir = tempfile::tempdir().unwrap();
        let store = write_settings(dir.path(), "cached");
        let before = fs::read(store.path()).unwrap();
        let manager = CredentialManager::new(StubApi::new(Issue::Token("abc123"), &["cached"]));

        let login = manager.acquire(&store).await.unwrap();

        assert_eq!(login.token, "cached");
        assert_eq!(login.source, TokenSource::Cached);
        assert_eq!(manager.api().token_requests(), 0);
        assert_eq!(fs::read(store.path()).unwrap(), before);
    }

    #[tokio::test]
    async fn test_stale_cached_token_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let store = write_settings(dir.path(), "stale");
        let manager = CredentialManager::new(StubApi::new(Issue::Token("abc123"), &["abc123"]));

        let login = manager.acquire(&store).await.unwrap();

        assert_eq!(login.token, "abc123");
        assert_eq!(manager.api().token_requests(), 1);
        assert_eq!(
            manager.api().checked(),
            vec!["stale".to_string(), "abc123".to_string()]
        );
        assert_eq!(store.load().unwrap().cached_token(), Some("abc123"));
    }

    #[tokio::test]
    async fn test_unreachable_during_cached_check_renews() {
        let dir = tempfile::tempdir().unwrap();
        let store = write_settings(dir.path(), "cached");
        let api = StubApi::new(Issue::Token("abc123"), &["cached", "abc123"])
            .unreachable_for(&["cached"]);
        let manager = CredentialManager::new(api);

        let login = manager.acquire(&store).await.unwrap();

        assert_eq!(login.source, TokenSource::Renewed);
        assert_eq!(login.token, "abc123");
        assert_eq!(manager.api().token_requests(), 1);
    }

    #[tokio::test]
    async fn test_server_error_during_cached_check_is_not_logged_as_rejection() {
        let dir = tempfile::tempdir().unwrap();
        let store = write_settings(dir.path(), "cached");
        let api = StubApi::new(Issue::Token("abc123"), &["abc123"]).server_error_for(&["cached"]);
        let manager = CredentialManager::new(api);
        let (logs, _guard) = capture_logs();

        let login = manager.acquire(&store).await.unwrap();

        assert_eq!(login.source, TokenSource::Renewed);
        let logs = logs.contents();
        assert!(logs.contains("WARN"));
        assert!(logs.contains("Could not check the cached token"));
        assert!(!logs.contains("Cached token was rejected"));
    }

    #[tokio::test]
    async fn test_rejected_cached_token_is_logged_as_rejection() {
        let dir = tempfile::tempdir().unwrap();
        let store = write_settings(dir.path(), "stale");
        let manager = CredentialManager::new(StubApi::new(Issue::Token("abc123"), &["abc123"]));
        let (logs, _guard) = capture_logs();

        manager.acquire(&store).await.unwrap();

        let logs = logs.contents();
        assert!(logs.contains("Cached token was rejected"));
        assert!(!logs.contains("Could not check the cached token"));
    }

    #[tokio::test]
    async fn test_rejected_credentials_leave_store_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let store = write_settings(dir.path(), "stale");
        let before = fs::read(store.path()).unwrap();
        let manager = CredentialManager::new(StubApi::new(Issue::Reject, &[]));

        let err = manager.acquire(&store).await.unwrap_err();

        assert!(matches!(err, AuthError::Rejected(_)));
        assert_eq!(fs::read(store.path()).unwrap(), before);
    }

    #[tokio::test]
    async fn test_issued_token_that_fails_validation_is_not_saved() {
        let dir = tempfile::tempdir().unwrap();
        let store = write_settings(dir.path(), "");
        let before = fs::read(store.path()).unwrap();
        let manager = CredentialManager::new(StubApi::new(Issue::Token("abc123"), &[]));

        let err = manager.acquire(&store).await.unwrap_err();

        assert!(matches!(err, AuthError::Rejected(_)));
        assert_eq!(fs::read(store.path()).unwrap(), before);
    }

    #[tokio::test]
    async fn test_network_failure_during_renewal_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let store = write_settings(dir.path(), "");
        let before = fs::read(store.path()).unwrap();
        let manager = CredentialManager::new(StubApi::new(Issue::Offline, &[]));

        let err = manager.acquire(&store).await.unwrap_err();

        assert!(matches!(err, AuthError::Transport(_)));
        assert_eq!(manager.api().token_requests(), 1);
        assert_eq!(fs::read(store.path()).unwrap(), before);
    }

    #[tokio::test]
    async fn test_network_failure_validating_new_token_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let store = write_settings(dir.path(), "");
        let api = StubApi::new(Issue::Token("abc123"), &["abc123"]).unreachable_for(&["abc123"]);
        let manager = CredentialManager::new(api);

        let err = manager.acquire(&store).await.unwrap_err();

        assert!(matches!(err, AuthError::Transport(_)));
        assert_eq!(store.load().unwrap().cached_token(), None);
    }

    #[tokio::test]
    async fn test_missing_settings_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(dir.path().join("missing.json"));
        let manager = CredentialManager::new(StubApi::new(Issue::Token("abc123"), &["abc123"]));

        let err = manager.acquire(&store).await.unwrap_err();

        assert!(matches!(err, AuthError::Config(SettingsError::NotFound(_))));
        assert_eq!(manager.api().token_requests(), 0);
    }

    #[tokio::test]
    async fn test_missing_password_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(dir.path().join("settings.json"));
        let settings = Settings {
            base_url: "https://example.edu/".to_string(),
            username: "u".to_string(),
            password: String::new(),
            token: None,
        };
        let manager = CredentialManager::new(StubApi::new(Issue::Token("abc123"), &["abc123"]));

        let err = manager.authenticate(settings, &store).await.unwrap_err();

        assert!(matches!(
            err,
            AuthError::Config(SettingsError::Missing("password"))
        ));
        assert_eq!(manager.api().token_requests(), 0);
    }

    #[tokio::test]
    async fn test_save_failure_still_returns_token() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(dir.path().join("missing").join("settings.json"));
        let settings = Settings {
            base_url: "https://example.edu/".to_string(),
            username: "u".to_string(),
            password: "p".to_string(),
            token: None,
        };
        let manager = CredentialManager::new(StubApi::new(Issue::Token("abc123"), &["abc123"]));

        let login = manager.authenticate(settings, &store).await.unwrap();

        assert_eq!(login.token, "abc123");
        assert!(matches!(
            login.persist_error,
            Some(SettingsError::Write { .. })
        ));
    }

    #[tokio::test]
    async fn test_validate_is_repeatable() {
        let manager = CredentialManager::new(StubApi::new(Issue::Reject, &["abc123"]));
        let base_url = Url::parse("https://example.edu/").unwrap();

        let first = manager.validate(&base_url, "abc123").await.unwrap();
        let second = manager.validate(&base_url, "abc123").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first, USER_ID);
        assert!(manager.validate(&base_url, "other").await.is_err());
    }

    #[test]
    fn test_login_debug_hides_token() {
        let login = Login {
            token: "0123456789abcdef0123456789abcdef".to_string(),
            site: SiteInfo {
                user_id: USER_ID,
                site_name: None,
                username: None,
                full_name: None,
            },
            source: TokenSource::Cached,
            settings: Settings::default(),
            persist_error: None,
        };
        assert!(!format!("{:?}", login).contains("0123456789abcdef0123456789abcdef"));
    }
}
