//! Application configuration module
//!
//! [`AppConfig`] carries every tunable the client needs: where the backend
//! lives, the public API key it expects, and the timing knobs for requests,
//! typing indicators and realtime reconnects.

use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Default backend URL (local development stack)
pub const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:54321";

/// Default per-request timeout
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// A peer typing indicator older than this is treated as cleared
pub const DEFAULT_TYPING_TIMEOUT: Duration = Duration::from_secs(6);

/// First delay before a dropped realtime stream is reopened
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(1000);

/// Upper bound for the realtime reconnect backoff
pub const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);

/// Application configuration
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    /// Backend base URL, without trailing slash
    pub backend_url: String,
    /// Public (anon) API key sent with every request
    pub anon_key: String,
    /// Per-request timeout
    pub request_timeout: Duration,
    /// Staleness timeout for peer typing indicators
    pub typing_timeout: Duration,
    /// Initial realtime reconnect delay
    pub reconnect_delay: Duration,
    /// Realtime reconnect delay ceiling
    pub max_reconnect_delay: Duration,
    /// Apply the row returned by a send immediately instead of waiting for the echo
    pub optimistic_send: bool,
    /// Mark incoming messages as read as soon as they are in the synced list
    pub auto_mark_read: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            anon_key: String::new(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            typing_timeout: DEFAULT_TYPING_TIMEOUT,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            max_reconnect_delay: MAX_RECONNECT_DELAY,
            optimistic_send: true,
            auto_mark_read: true,
        }
    }
}

impl AppConfig {
    /// Create a new AppConfigBuilder
    pub fn builder() -> AppConfigBuilder {
        AppConfigBuilder::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.backend_url.starts_with("http://") || self.backend_url.starts_with("https://")) {
            return Err(ConfigError::InvalidUrl(self.backend_url.clone()));
        }
        if self.anon_key.trim().is_empty() {
            return Err(ConfigError::MissingValue("anon_key"));
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::InvalidDuration("request_timeout"));
        }
        if self.reconnect_delay.is_zero() || self.reconnect_delay > self.max_reconnect_delay {
            return Err(ConfigError::InvalidDuration("reconnect_delay"));
        }
        Ok(())
    }

    /// Full URL for a backend path such as `/rest/v1/messages`
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.backend_url, path)
    }
}

/// Builder for AppConfig
#[derive(Debug, Default, Clone)]
pub struct AppConfigBuilder {
    backend_url: Option<String>,
    anon_key: Option<String>,
    request_timeout: Option<Duration>,
    typing_timeout: Option<Duration>,
    reconnect_delay: Option<Duration>,
    max_reconnect_delay: Option<Duration>,
    optimistic_send: Option<bool>,
    auto_mark_read: Option<bool>,
}

impl AppConfigBuilder {
    /// Set the backend URL
    pub fn backend_url(mut self, url: impl Into<String>) -> Self {
        self.backend_url = Some(url.into());
        self
    }

    /// Set the anon API key
    pub fn anon_key(mut self, key: impl Into<String>) -> Self {
        self.anon_key = Some(key.into());
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn typing_timeout(mut self, timeout: Duration) -> Self {
        self.typing_timeout = Some(timeout);
        self
    }

    /// Set the initial and maximum realtime reconnect delays
    pub fn reconnect_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.reconnect_delay = Some(initial);
        self.max_reconnect_delay = Some(max);
        self
    }

    pub fn optimistic_send(mut self, enabled: bool) -> Self {
        self.optimistic_send = Some(enabled);
        self
    }

    pub fn auto_mark_read(mut self, enabled: bool) -> Self {
        self.auto_mark_read = Some(enabled);
        self
    }

    /// Overlay values read from a TOML file; values already set win
    pub fn merge_file(mut self, file: FileConfig) -> Self {
        self.backend_url = self.backend_url.or(file.backend_url);
        self.anon_key = self.anon_key.or(file.anon_key);
        self.request_timeout = self
            .request_timeout
            .or(file.request_timeout_secs.map(Duration::from_secs));
        self.typing_timeout = self
            .typing_timeout
            .or(file.typing_timeout_secs.map(Duration::from_secs));
        self.optimistic_send = self.optimistic_send.or(file.optimistic_send);
        self.auto_mark_read = self.auto_mark_read.or(file.auto_mark_read);
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<AppConfig, ConfigError> {
        let defaults = AppConfig::default();
        let config = AppConfig {
            backend_url: self
                .backend_url
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.backend_url),
            anon_key: self.anon_key.ok_or(ConfigError::MissingValue("anon_key"))?,
            request_timeout: self.request_timeout.unwrap_or(defaults.request_timeout),
            typing_timeout: self.typing_timeout.unwrap_or(defaults.typing_timeout),
            reconnect_delay: self.reconnect_delay.unwrap_or(defaults.reconnect_delay),
            max_reconnect_delay: self
                .max_reconnect_delay
                .unwrap_or(defaults.max_reconnect_delay),
            optimistic_send: self.optimistic_send.unwrap_or(defaults.optimistic_send),
            auto_mark_read: self.auto_mark_read.unwrap_or(defaults.auto_mark_read),
        };
        config.validate()?;
        Ok(config)
    }
}

/// On-disk configuration (`config.toml`); every key is optional
#[derive(Debug, Default, Clone, Deserialize, PartialEq, Eq)]
pub struct FileConfig {
    pub backend_url: Option<String>,
    pub anon_key: Option<String>,
    pub request_timeout_secs: Option<u64>,
    pub typing_timeout_secs: Option<u64>,
    pub optimistic_send: Option<bool>,
    pub auto_mark_read: Option<bool>,
}

impl FileConfig {
    /// Parse a TOML document
    pub fn from_toml(source: &str) -> Result<Self, ConfigError> {
        toml::from_str(source).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}

/// Configuration errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("missing value: {0}")]
    MissingValue(&'static str),
    #[error("invalid duration: {0}")]
    InvalidDuration(&'static str),
    #[error("failed to parse config file: {0}")]
    Parse(String),
    #[error("failed to read config file: {0}")]
    Io(String),
}
