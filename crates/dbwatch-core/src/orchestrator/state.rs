//! Aggregate server state and the server event stream.

use crate::registry::{DatabaseRemoval, ManagedDatabaseRecord, RegistryObserver};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tracing::debug;

/// Overall server lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    Initializing,
    Running,
    Stopped,
    Error,
}

/// Registry change recorded as the most recent event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryEventKind {
    Added,
    Changed,
    Removed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LastEvent {
    pub kind: RegistryEventKind,
    pub path: PathBuf,
    pub timestamp: DateTime<Utc>,
}

/// In-memory summary of the server.
///
/// `database_count` tracks the number of non-removed registry rows.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateServerState {
    pub status: ServerStatus,
    pub server_id: Option<String>,
    pub database_count: usize,
    pub watched_paths: Vec<PathBuf>,
    pub last_event: Option<LastEvent>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
}

impl Default for AggregateServerState {
    fn default() -> Self {
        Self {
            status: ServerStatus::Stopped,
            server_id: None,
            database_count: 0,
            watched_paths: Vec::new(),
            last_event: None,
            error: None,
            started_at: None,
        }
    }
}

impl AggregateServerState {
    /// Whole seconds since the last successful start; zero unless running.
    pub fn uptime_secs(&self) -> u64 {
        match (self.status, self.started_at) {
            (ServerStatus::Running, Some(started)) => {
                u64::try_from((Utc::now() - started).num_seconds()).unwrap_or(0)
            }
            _ => 0,
        }
    }
}

/// Events broadcast to external subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "server:start")]
    Start,
    #[serde(rename = "server:stop")]
    Stop,
    #[serde(rename = "database:added")]
    DatabaseAdded { path: PathBuf },
    #[serde(rename = "database:changed")]
    DatabaseChanged { path: PathBuf },
    #[serde(rename = "database:removed")]
    DatabaseRemoved { path: PathBuf },
    #[serde(rename = "error")]
    Error { error: String },
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Start => "server:start",
            ServerEvent::Stop => "server:stop",
            ServerEvent::DatabaseAdded { .. } => "database:added",
            ServerEvent::DatabaseChanged { .. } => "database:changed",
            ServerEvent::DatabaseRemoved { .. } => "database:removed",
            ServerEvent::Error { .. } => "error",
        }
    }
}

/// Maintains [`AggregateServerState`] from registry callbacks and lifecycle
/// transitions, and re-emits every change as a [`ServerEvent`].
pub struct AggregateTracker {
    state: Mutex<AggregateServerState>,
    events_tx: broadcast::Sender<ServerEvent>,
}

impl AggregateTracker {
    pub fn new(channel_capacity: usize) -> Self {
        let (events_tx, _) = broadcast::channel(channel_capacity);
        Self {
            state: Mutex::new(AggregateServerState::default()),
            events_tx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, AggregateServerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> AggregateServerState {
        self.lock().clone()
    }

    pub fn status(&self) -> ServerStatus {
        self.lock().status
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.events_tx.subscribe()
    }

    pub fn emit(&self, event: ServerEvent) {
        debug!("Server event {}", event.name());
        // No subscribers is not an error.
        let _ = self.events_tx.send(event);
    }

    pub fn set_initializing(&self) {
        let mut state = self.lock();
        state.status = ServerStatus::Initializing;
        state.error = None;
    }

    pub fn set_server_id(&self, server_id: String) {
        self.lock().server_id = Some(server_id);
    }

    pub fn set_database_count(&self, count: usize) {
        self.lock().database_count = count;
    }

    pub fn set_watched_paths(&self, paths: Vec<PathBuf>) {
        self.lock().watched_paths = paths;
    }

    pub fn mark_running(&self) {
        {
            let mut state = self.lock();
            state.status = ServerStatus::Running;
            state.started_at = Some(Utc::now());
        }
        self.emit(ServerEvent::Start);
    }

    pub fn mark_stopped(&self) {
        {
            let mut state = self.lock();
            state.status = ServerStatus::Stopped;
            state.started_at = None;
        }
        self.emit(ServerEvent::Stop);
    }

    /// Move to the error status and report `message`.
    pub fn mark_failed(&self, message: String) {
        {
            let mut state = self.lock();
            state.status = ServerStatus::Error;
            state.error = Some(message.clone());
        }
        self.emit(ServerEvent::Error { error: message });
    }

    /// Report a non-fatal error without changing status.
    pub fn report_error(&self, message: String) {
        self.emit(ServerEvent::Error { error: message });
    }

    fn record(&self, kind: RegistryEventKind, path: &Path, count_delta: isize) {
        {
            let mut state = self.lock();
            state.database_count = state.database_count.saturating_add_signed(count_delta);
            state.last_event = Some(LastEvent {
                kind,
                path: path.to_path_buf(),
                timestamp: Utc::now(),
            });
        }

        let path = path.to_path_buf();
        self.emit(match kind {
            RegistryEventKind::Added => ServerEvent::DatabaseAdded { path },
            RegistryEventKind::Changed => ServerEvent::DatabaseChanged { path },
            RegistryEventKind::Removed => ServerEvent::DatabaseRemoved { path },
        });
    }
}

impl RegistryObserver for AggregateTracker {
    fn on_database_added(&self, record: &ManagedDatabaseRecord) {
        self.record(RegistryEventKind::Added, &record.path, 1);
    }

    fn on_database_changed(&self, record: &ManagedDatabaseRecord) {
        self.record(RegistryEventKind::Changed, &record.path, 0);
    }

    fn on_database_removed(&self, removal: &DatabaseRemoval) {
        let delta = if removal.was_tracked { -1 } else { 0 };
        self.record(RegistryEventKind::Removed, &removal.path, delta);
    }
}
