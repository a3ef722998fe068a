//! Settings store for connection and credential data.
//!
//! The settings file holds the Moodle base URL, the account credentials and
//! the most recently issued token. It is read once at startup and rewritten
//! only after a freshly issued token has been validated.
//!
//! Default location is `moodleDownloader/settings.json` under the platform
//! config directory: `~/.config` on Linux, `~/Library/Application Support`
//! on macOS, `%APPDATA%` on Windows.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::auth::redact;

/// Application name used for the config directory path
const APP_NAME: &str = "moodleDownloader";

/// Settings file name
const SETTINGS_FILE: &str = "settings.json";

/// Owner read/write only. The file holds a password and a live token.
#[cfg(unix)]
const SETTINGS_FILE_MODE: u32 = 0o600;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Settings file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Failed to read settings file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse settings file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid baseURL {url:?}: {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("Failed to encode settings: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Failed to write settings file {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Could not find config directory")]
    NoConfigDir,
}

/// Connection and credential data, in the on-disk key order.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(rename = "baseURL", default)]
    pub base_url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Last issued token. An empty string on disk loads as `None`.
    #[serde(
        default,
        deserialize_with = "deserialize_token",
        serialize_with = "serialize_token"
    )]
    pub token: Option<String>,
}

fn deserialize_token<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let token: Option<String> = Option::deserialize(deserializer)?;
    Ok(token.filter(|t| !t.is_empty()))
}

fn serialize_token<S>(token: &Option<String>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(token.as_deref().unwrap_or_default())
}

impl Settings {
    /// The cached token, if one is set
    pub fn cached_token(&self) -> Option<&str> {
        self.token.as_deref().filter(|t| !t.is_empty())
    }

    pub fn set_token(&mut self, token: String) {
        self.token = Some(token);
    }

    /// Parse `baseURL` into an absolute http(s) URL whose path ends in `/`,
    /// so endpoint paths can be joined onto it.
    pub fn base_url(&self) -> Result<Url, SettingsError> {
        let raw = self.base_url.trim();
        if raw.is_empty() {
            return Err(SettingsError::Missing("baseURL"));
        }

        let invalid = |reason: String| SettingsError::InvalidBaseUrl {
            url: raw.to_string(),
            reason,
        };

        let mut url = Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid(format!("unsupported scheme {}", url.scheme())));
        }
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        Ok(url)
    }

    /// Check that everything needed to request a new token is present
    pub fn require_credentials(&self) -> Result<(), SettingsError> {
        if self.username.is_empty() {
            return Err(SettingsError::Missing("username"));
        }
        if self.password.is_empty() {
            return Err(SettingsError::Missing("password"));
        }
        Ok(())
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("token", &self.token.as_deref().map(redact))
            .finish()
    }
}

/// File-backed settings storage.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<config dir>/moodleDownloader/settings.json`, where the config dir
    /// is whatever `dirs::config_dir` reports for the platform
    pub fn default_path() -> Result<PathBuf, SettingsError> {
        let config_dir = dirs::config_dir().ok_or(SettingsError::NoConfigDir)?;
        Ok(config_dir.join(APP_NAME).join(SETTINGS_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load settings from disk
    pub fn load(&self) -> Result<Settings, SettingsError> {
        let contents = fs::read_to_string(&self.path).map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                SettingsError::NotFound(self.path.clone())
            } else {
                SettingsError::Read {
                    path: self.path.clone(),
                    source,
                }
            }
        })?;

        let settings: Settings =
            serde_json::from_str(&contents).map_err(|source| SettingsError::Parse {
                path: self.path.clone(),
                source,
            })?;

        debug!(path = %self.path.display(), "Loaded settings");
        Ok(settings)
    }

    /// Save settings to disk.
    ///
    /// The new contents go to a sibling temp file which is renamed over the
    /// store, so the old file stays intact if anything fails. A symlinked
    /// store is written through to its target.
    pub fn save(&self, settings: &Settings) -> Result<(), SettingsError> {
        let contents = encode(settings)?;
        let target = self.resolved_path();
        let tmp = temp_path(&target);

        let result = write_private(&tmp, &contents).and_then(|()| fs::rename(&tmp, &target));
        if let Err(source) = result {
            let _ = fs::remove_file(&tmp);
            return Err(SettingsError::Write {
                path: self.path.clone(),
                source,
            });
        }

        debug!(path = %target.display(), "Saved settings");
        Ok(())
    }

    /// The file the store really lives in, following symlinks
    fn resolved_path(&self) -> PathBuf {
        fs::canonicalize(&self.path).unwrap_or_else(|_| self.path.clone())
    }
}

fn temp_path(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| SETTINGS_FILE.into());
    name.push(".tmp");
    target.with_file_name(name)
}

/// Pretty-print with a one-space indent, matching the hand-edited layout.
fn encode(settings: &Settings) -> Result<Vec<u8>, SettingsError> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b" ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    settings.serialize(&mut serializer)?;
    Ok(buf)
}

fn write_private(path: &Path, contents: &[u8]) -> io::Result<()> {
    let mut file = open_private(path)?;
    file.write_all(contents)?;
    file.sync_all()
}

#[cfg(unix)]
fn open_private(path: &Path) -> io::Result<File> {
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(SETTINGS_FILE_MODE)
        .open(path)?;
    // mode() only applies on create; tighten a leftover temp file too
    file.set_permissions(fs::Permissions::from_mode(SETTINGS_FILE_MODE))?;
    Ok(file)
}

#[cfg(not(unix))]
fn open_private(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
}

/// Expand a leading `~` to the user's home directory
pub fn expand_tilde(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), dirs::home_dir()) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}

// ============================================================================
// Tests
// ============================================================================
