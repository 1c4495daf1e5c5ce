//! Configuration management.
//!
//! flowd configuration comes from environment variables (FLOWD_*) with
//! sensible defaults for local development.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// flowd configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Polling supervisor configuration
    #[serde(default)]
    pub polling: PollingConfig,

    /// OAuth provider configuration
    #[serde(default)]
    pub oauth: OAuthConfig,

    /// Default timeout for HTTP-class executors (seconds)
    #[serde(default = "default_http_timeout")]
    pub http_timeout_seconds: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            polling: PollingConfig::default(),
            oauth: OAuthConfig::default(),
            http_timeout_seconds: default_http_timeout(),
        }
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite database
    #[serde(default = "default_db_path")]
    pub database_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_db_path(),
        }
    }
}

/// Polling supervisor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Default interval between polling ticks (seconds)
    #[serde(default = "default_poll_interval")]
    pub default_interval_seconds: u64,

    /// Stagger between poll loops re-installed at startup (milliseconds)
    #[serde(default = "default_startup_stagger")]
    pub startup_stagger_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            default_interval_seconds: default_poll_interval(),
            startup_stagger_ms: default_startup_stagger(),
        }
    }
}

/// OAuth client credentials per provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OAuthConfig {
    #[serde(default)]
    pub google_client_id: Option<String>,
    #[serde(default)]
    pub google_client_secret: Option<String>,
    #[serde(default)]
    pub tiktok_client_key: Option<String>,
    #[serde(default)]
    pub tiktok_client_secret: Option<String>,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("flowd.db")
}

fn default_poll_interval() -> u64 {
    60
}

fn default_startup_stagger() -> u64 {
    500
}

fn default_http_timeout() -> u64 {
    30
}

impl Config {
    /// Load configuration from the environment.
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("FLOWD_DB_PATH") {
            config.storage.database_path = PathBuf::from(path);
        }
        if let Ok(secs) = std::env::var("FLOWD_POLL_INTERVAL_SECS") {
            if let Ok(secs) = secs.parse() {
                config.polling.default_interval_seconds = secs;
            }
        }
        if let Ok(ms) = std::env::var("FLOWD_STARTUP_STAGGER_MS") {
            if let Ok(ms) = ms.parse() {
                config.polling.startup_stagger_ms = ms;
            }
        }
        if let Ok(secs) = std::env::var("FLOWD_HTTP_TIMEOUT_SECS") {
            if let Ok(secs) = secs.parse() {
                config.http_timeout_seconds = secs;
            }
        }

        config.oauth.google_client_id = std::env::var("FLOWD_GOOGLE_CLIENT_ID").ok();
        config.oauth.google_client_secret = std::env::var("FLOWD_GOOGLE_CLIENT_SECRET").ok();
        config.oauth.tiktok_client_key = std::env::var("FLOWD_TIKTOK_CLIENT_KEY").ok();
        config.oauth.tiktok_client_secret = std::env::var("FLOWD_TIKTOK_CLIENT_SECRET").ok();

        config
    }
}
