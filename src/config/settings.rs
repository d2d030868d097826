//! Application settings and configuration types.
//!
//! Settings are persisted to `~/.config/mailstream/settings.json` (or the
//! platform equivalent) and loaded at startup. Every section has a default,
//! so a missing file or a partial one is fine.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Errors that can occur while loading or saving settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid settings file {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid server URL {0:?}: {1}")]
    InvalidUrl(String, url::ParseError),

    #[error("invalid value for {name}: {value:?}")]
    InvalidEnv { name: &'static str, value: String },

    #[error("no configuration directory available on this platform")]
    NoConfigDir,
}

/// Result type for settings operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Environment variable overriding [`ServerSettings::base_url`].
pub const ENV_SERVER_URL: &str = "MAILSTREAM_SERVER_URL";
/// Environment variable overriding [`CacheSettings::max_emails`].
pub const ENV_MAX_EMAILS: &str = "MAILSTREAM_MAX_EMAILS";

/// Top-level application settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Backend location and endpoint paths.
    pub server: ServerSettings,
    /// Stream connection and retry behavior.
    pub stream: StreamSettings,
    /// In-memory email cache bounds.
    pub cache: CacheSettings,
    /// List rendering behavior.
    pub render: RenderSettings,
    /// Detail pane rendering.
    pub detail: DetailSettings,
    /// Privacy-related settings.
    pub privacy: PrivacySettings,
}

impl Settings {
    /// Default settings file location.
    pub fn default_path() -> ConfigResult<PathBuf> {
        directories::ProjectDirs::from("io", "mailstream", "mailstream")
            .map(|dirs| dirs.config_dir().join("settings.json"))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Loads settings from `path`, falling back to defaults if it does not exist.
    pub fn load_from(path: &Path) -> ConfigResult<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents).map_err(|source| ConfigError::Json {
                path: path.to_path_buf(),
                source,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No settings file, using defaults");
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Loads settings from the default location and applies environment overrides.
    pub fn load() -> ConfigResult<Self> {
        let mut settings = Self::load_from(&Self::default_path()?)?;
        settings.apply_env_overrides(|name| std::env::var(name).ok())?;
        Ok(settings)
    }

    /// Writes settings to `path` as pretty JSON, creating parent directories.
    pub fn save_to(&self, path: &Path) -> ConfigResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(path, json).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Applies overrides read through `lookup` (usually the process environment).
    pub fn apply_env_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> ConfigResult<()> {
        if let Some(url) = lookup(ENV_SERVER_URL) {
            self.server.base_url = url;
        }
        if let Some(raw) = lookup(ENV_MAX_EMAILS) {
            self.cache.max_emails = raw
                .trim()
                .parse()
                .ok()
                .filter(|max: &usize| *max > 0)
                .ok_or(ConfigError::InvalidEnv {
                    name: ENV_MAX_EMAILS,
                    value: raw,
                })?;
        }
        Ok(())
    }
}

/// Backend location and endpoint paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Base URL of the backend.
    pub base_url: String,
    /// Path of the SSE email stream.
    pub stream_path: String,
    /// Path of the settings endpoint.
    pub settings_path: String,
    /// Path of the send-email endpoint.
    pub send_path: String,
    /// Request timeout for REST calls, in seconds.
    pub request_timeout_seconds: u32,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:5000".to_string(),
            stream_path: "/api/emails/stream".to_string(),
            settings_path: "/api/settings".to_string(),
            send_path: "/api/send-email".to_string(),
            request_timeout_seconds: 30,
        }
    }
}

impl ServerSettings {
    /// Parsed base URL.
    pub fn base(&self) -> ConfigResult<Url> {
        Url::parse(&self.base_url)
            .map_err(|e| ConfigError::InvalidUrl(self.base_url.clone(), e))
    }

    /// Resolves an endpoint path against the base URL.
    pub fn endpoint(&self, path: &str) -> ConfigResult<Url> {
        let base = self.base()?;
        base.join(path)
            .map_err(|e| ConfigError::InvalidUrl(format!("{}{}", self.base_url, path), e))
    }

    /// Stream URL, asking the backend to analyze `days` days of mail.
    pub fn stream_url(&self, days: Option<u32>) -> ConfigResult<Url> {
        let mut url = self.endpoint(&self.stream_path)?;
        if let Some(days) = days {
            url.query_pairs_mut()
                .append_pair("days", &days.to_string());
        }
        Ok(url)
    }

    /// REST request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.request_timeout_seconds))
    }
}

/// Stream connection and retry behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSettings {
    /// Connection attempts before giving up.
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds. Doubles per attempt.
    pub retry_base_delay_ms: u64,
    /// Upper bound on the retry delay, in milliseconds.
    pub retry_max_delay_ms: u64,
    /// Minimum spacing between connection attempts, in milliseconds.
    pub cooldown_ms: u64,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_base_delay_ms: 2_000,
            retry_max_delay_ms: 30_000,
            cooldown_ms: 1_000,
        }
    }
}

/// In-memory email cache bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Maximum number of records kept in memory.
    pub max_emails: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self { max_emails: 500 }
    }
}

/// List rendering behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    /// Quiet period before a burst of updates is painted, in milliseconds.
    pub debounce_ms: u64,
    /// Longest a continuous burst may delay a paint, in milliseconds.
    pub max_wait_ms: u64,
    /// Terminal width used for list rows and body wrapping.
    pub width: usize,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            debounce_ms: 100,
            max_wait_ms: 1_000,
            width: 100,
        }
    }
}

impl RenderSettings {
    /// Debounce quiet period.
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Upper bound on how long a burst can hold back a paint.
    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms.max(self.debounce_ms))
    }
}

/// Detail pane rendering.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetailSettings {
    /// Safety timeout for body rendering, in milliseconds.
    pub render_timeout_ms: u64,
    /// Number of rendered bodies kept in the LRU cache.
    pub cache_capacity: usize,
}

impl Default for DetailSettings {
    fn default() -> Self {
        Self {
            render_timeout_ms: 3_000,
            cache_capacity: 64,
        }
    }
}

impl DetailSettings {
    /// Body rendering timeout.
    pub fn render_timeout(&self) -> Duration {
        Duration::from_millis(self.render_timeout_ms)
    }
}

/// Privacy-related settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrivacySettings {
    /// Whether remote images are listed by URL in the detail pane.
    pub show_blocked_image_urls: bool,
}

impl Default for PrivacySettings {
    fn default() -> Self {
        Self {
            show_blocked_image_urls: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn default_settings_are_valid() {
        let settings = Settings::default();
        assert_eq!(settings.cache.max_emails, 500);
        assert_eq!(settings.stream.max_attempts, 3);
        assert!(settings.server.base().is_ok());
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let settings: Settings =
            serde_json::from_str(r#"{"cache": {"max_emails": 50}}"#).unwrap();
        assert_eq!(settings.cache.max_emails, 50);
        assert_eq!(settings.render.debounce_ms, 100);
        assert_eq!(settings.server.stream_path, "/api/emails/stream");
    }

    #[test]
    fn stream_url_carries_days() {
        let server = ServerSettings {
            base_url: "http://mail.local:8080".to_string(),
            ..Default::default()
        };
        let url = server.stream_url(Some(7)).unwrap();
        assert_eq!(url.as_str(), "http://mail.local:8080/api/emails/stream?days=7");

        let url = server.stream_url(None).unwrap();
        assert_eq!(url.query(), None);
    }

    #[test]
    fn invalid_base_url_is_reported() {
        let server = ServerSettings {
            base_url: "not a url".to_string(),
            ..Default::default()
        };
        assert!(matches!(server.base(), Err(ConfigError::InvalidUrl(..))));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load_from(&dir.path().join("absent.json")).unwrap();
        assert_eq!(settings.cache.max_emails, 500);
    }

    #[test]
    fn save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let mut settings = Settings::default();
        settings.server.base_url = "https://inbox.example.com".to_string();
        settings.render.width = 72;
        settings.save_to(&path).unwrap();

        let loaded = Settings::load_from(&path).unwrap();
        assert_eq!(loaded.server.base_url, "https://inbox.example.com");
        assert_eq!(loaded.render.width, 72);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ nope").unwrap();
        assert!(matches!(
            Settings::load_from(&path),
            Err(ConfigError::Json { .. })
        ));
    }

    #[test]
    fn env_overrides_apply() {
        let vars: HashMap<&str, &str> = HashMap::from([
            (ENV_SERVER_URL, "http://10.0.0.2:5000"),
            (ENV_MAX_EMAILS, "250"),
        ]);
        let mut settings = Settings::default();
        settings
            .apply_env_overrides(|name| vars.get(name).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(settings.server.base_url, "http://10.0.0.2:5000");
        assert_eq!(settings.cache.max_emails, 250);
    }

    #[test]
    fn zero_max_emails_override_is_rejected() {
        let mut settings = Settings::default();
        let result = settings.apply_env_overrides(|name| {
            (name == ENV_MAX_EMAILS).then(|| "0".to_string())
        });
        assert!(matches!(result, Err(ConfigError::InvalidEnv { .. })));
    }
}
