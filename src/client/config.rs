//! Client configuration loading
//!
//! Layers, lowest priority first: built-in defaults, the optional TOML file
//! (`$SHADOWCHAT_CONFIG`, else `<config dir>/shadowchat/config.toml`), then
//! environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::shared::config::{AppConfig, AppConfigBuilder, ConfigError, FileConfig};

/// Overrides the config file location
pub const CONFIG_PATH_ENV: &str = "SHADOWCHAT_CONFIG";
pub const URL_ENV: &str = "SHADOWCHAT_URL";
pub const ANON_KEY_ENV: &str = "SHADOWCHAT_ANON_KEY";
pub const REQUEST_TIMEOUT_ENV: &str = "SHADOWCHAT_REQUEST_TIMEOUT_SECS";

/// `<config dir>/shadowchat/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("shadowchat").join("config.toml"))
}

/// Load from the process environment and the default file location
pub fn load() -> Result<AppConfig, ConfigError> {
    #[cfg(feature = "logging")]
    dotenv::dotenv().ok();

    let path = std::env::var(CONFIG_PATH_ENV)
        .ok()
        .map(PathBuf::from)
        .or_else(default_config_path);
    load_from(path.as_deref(), |key| std::env::var(key).ok())
}

/// Load with an explicit file path and environment lookup.
///
/// A missing file is not an error; an unreadable or malformed one is.
pub fn load_from<F>(path: Option<&Path>, env: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut builder = apply_env(AppConfig::builder(), &env)?;

    if let Some(path) = path {
        if path.exists() {
            let source = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
            tracing::debug!("[CONFIG] Loaded {}", path.display());
            builder = builder.merge_file(FileConfig::from_toml(&source)?);
        }
    }

    builder.build()
}

fn apply_env<F>(mut builder: AppConfigBuilder, env: &F) -> Result<AppConfigBuilder, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(url) = env(URL_ENV) {
        builder = builder.backend_url(url);
    }
    if let Some(key) = env(ANON_KEY_ENV) {
        builder = builder.anon_key(key);
    }
    if let Some(secs) = env(REQUEST_TIMEOUT_ENV) {
        let secs: u64 = secs
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidDuration("request_timeout"))?;
        builder = builder.request_timeout(Duration::from_secs(secs));
    }
    Ok(builder)
}
