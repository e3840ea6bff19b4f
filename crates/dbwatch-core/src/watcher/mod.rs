//! Filesystem watcher for SQLite database files.
//!
//! Watches configured roots for files matching database globs, waits for
//! writes to settle, and emits typed add / change / unlink notifications.

mod fs_watcher;
mod patterns;
mod stability;

pub use fs_watcher::DatabaseWatcher;
pub use patterns::{glob_to_regex, PathMatcher};
pub use stability::{FileSignature, StabilityTracker};

use crate::config::WatcherDefaults;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Watcher configuration. Everything except `paths` has a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WatcherConfig {
    /// Root directories to watch.
    pub paths: Vec<PathBuf>,
    /// Globs a file must match to be reported.
    pub patterns: Vec<String>,
    /// Globs excluding files and whole directories.
    pub ignored: Vec<String>,
    pub poll_interval_ms: u64,
    /// Use a polling backend instead of native notifications.
    pub use_polling: bool,
    /// Keep watching after the initial scan.
    pub persistent: bool,
    pub stability_window_ms: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            patterns: WatcherDefaults::PATTERNS.iter().map(|s| s.to_string()).collect(),
            ignored: WatcherDefaults::IGNORED.iter().map(|s| s.to_string()).collect(),
            poll_interval_ms: WatcherDefaults::POLL_INTERVAL.as_millis() as u64,
            use_polling: false,
            persistent: true,
            stability_window_ms: WatcherDefaults::STABILITY_WINDOW.as_millis() as u64,
        }
    }
}

impl WatcherConfig {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self {
            paths,
            ..Self::default()
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn stability_window(&self) -> Duration {
        Duration::from_millis(self.stability_window_ms)
    }

    /// How often pending writes are re-checked.
    pub fn stability_tick(&self) -> Duration {
        (self.stability_window() / 2)
            .min(WatcherDefaults::MAX_STABILITY_TICK)
            .max(Duration::from_millis(1))
    }
}

/// Kind of change observed for a database file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseEventKind {
    Add,
    Change,
    Unlink,
}

impl DatabaseEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatabaseEventKind::Add => "add",
            DatabaseEventKind::Change => "change",
            DatabaseEventKind::Unlink => "unlink",
        }
    }
}

impl fmt::Display for DatabaseEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A settled change to a database file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseEvent {
    pub kind: DatabaseEventKind,
    pub path: PathBuf,
    pub timestamp: DateTime<Utc>,
    /// File size in bytes; absent for unlink.
    pub size: Option<u64>,
}

impl DatabaseEvent {
    pub fn new(kind: DatabaseEventKind, path: PathBuf, size: Option<u64>) -> Self {
        Self {
            kind,
            path,
            timestamp: Utc::now(),
            size,
        }
    }

    pub fn unlink(path: PathBuf) -> Self {
        Self::new(DatabaseEventKind::Unlink, path, None)
    }
}

/// Everything the watcher reports to its consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum WatcherNotification {
    /// Initial scan finished.
    Ready,
    Event(DatabaseEvent),
    /// A steady-state backend error. Monitoring continues.
    Error(String),
}

/// Watcher lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatcherState {
    Stopped,
    Starting,
    Running,
    Stopping,
    /// The watch loop has exited: a one-shot scan completed.
    Finished,
}
