//! Centralized configuration for dbwatch.
//!
//! Constant groups follow one struct per concern. `ServerConfig` is the
//! user-facing, file-loadable configuration.

use crate::error::{DbWatchError, Result};
use crate::watcher::WatcherConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application-level configuration.
pub struct AppConfig;

impl AppConfig {
    pub const APP_NAME: &'static str = "dbwatch";
    pub const DATA_DIR_NAME: &'static str = "dbwatch";
}

/// Core store configuration.
pub struct StoreConfig;

impl StoreConfig {
    pub const CORE_DB_FILENAME: &'static str = "core.db";
    pub const SCHEMA_VERSION: i64 = 1;
    pub const BUSY_TIMEOUT_MS: u64 = 5_000;
}

/// Well-known system configuration keys.
pub struct ConfigKeys;

impl ConfigKeys {
    pub const SERVER_ID: &'static str = "server_id";
    pub const SCHEMA_VERSION: &'static str = "schema_version";
    pub const INITIALIZED_AT: &'static str = "initialized_at";
    pub const WATCHED_PATHS: &'static str = "watched_paths";
}

/// Watcher defaults.
pub struct WatcherDefaults;

impl WatcherDefaults {
    pub const PATTERNS: &'static [&'static str] = &["**/*.db", "**/*.sqlite", "**/*.sqlite3"];
    pub const IGNORED: &'static [&'static str] = &[
        "**/.git/**",
        "**/node_modules/**",
        "**/target/**",
        "**/dist/**",
        "**/build/**",
        "**/*-journal",
        "**/*-wal",
        "**/*-shm",
    ];
    pub const POLL_INTERVAL: Duration = Duration::from_millis(1000);
    pub const STABILITY_WINDOW: Duration = Duration::from_millis(2000);
    /// Upper bound on how often pending writes are re-checked.
    pub const MAX_STABILITY_TICK: Duration = Duration::from_millis(100);
}

/// Server defaults.
pub struct ServerDefaults;

impl ServerDefaults {
    /// Capacity of the server event broadcast channel.
    pub const EVENT_CHANNEL_CAPACITY: usize = 256;
}

/// Top-level server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Location of the core store holding system config and the registry.
    #[serde(default = "default_core_db_path")]
    pub core_db_path: PathBuf,
    #[serde(default)]
    pub watcher: WatcherConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            core_db_path: default_core_db_path(),
            watcher: WatcherConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Build a config for the given roots with every other option defaulted.
    pub fn new(core_db_path: impl Into<PathBuf>, paths: Vec<PathBuf>) -> Self {
        Self {
            core_db_path: core_db_path.into(),
            watcher: WatcherConfig::new(paths),
        }
    }

    /// Load a JSON config file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents =
            std::fs::read_to_string(path).map_err(|e| DbWatchError::io_with_path(e, path))?;
        serde_json::from_str(&contents).map_err(|e| DbWatchError::Json {
            message: format!("Invalid config file {}: {}", path.display(), e),
            source: Some(e),
        })
    }
}

/// Platform data directory for the core store, falling back to the working directory.
pub fn default_core_db_path() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join(AppConfig::DATA_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from("."))
        .join(StoreConfig::CORE_DB_FILENAME)
}
