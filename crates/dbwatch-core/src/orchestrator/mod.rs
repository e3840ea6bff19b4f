//! Orchestrator: wires the watcher to the registry and serves requests.
//!
//! Watcher notifications are applied one at a time by a single pump task,
//! so registry mutations for a path happen in the order they were observed.

mod handlers;
mod state;

pub use state::{
    AggregateServerState, AggregateTracker, LastEvent, RegistryEventKind, ServerEvent,
    ServerStatus,
};

use crate::config::{ConfigKeys, ServerConfig, ServerDefaults};
use crate::error::{DbWatchError, Result};
use crate::protocol::{Request, Response};
use crate::registry::{DatabaseRegistryManager, DatabaseStatus, MutableFields};
use crate::watcher::{DatabaseEvent, DatabaseEventKind, DatabaseWatcher, WatcherNotification};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

type NotificationRx = mpsc::UnboundedReceiver<WatcherNotification>;

/// Notification pump slot: the idle receiver, or the task currently holding it.
struct EventPump {
    idle: Option<NotificationRx>,
    running: Option<(oneshot::Sender<()>, JoinHandle<NotificationRx>)>,
}

/// Composes the watcher and the registry manager behind a request interface.
pub struct Orchestrator {
    manager: Arc<DatabaseRegistryManager>,
    tracker: Arc<AggregateTracker>,
    watcher: Mutex<DatabaseWatcher>,
    pump: Mutex<EventPump>,
    lifecycle: Mutex<()>,
}

impl Orchestrator {
    pub fn new(config: ServerConfig) -> Self {
        let manager = Arc::new(DatabaseRegistryManager::new(&config.core_db_path));
        let tracker = Arc::new(AggregateTracker::new(ServerDefaults::EVENT_CHANNEL_CAPACITY));
        manager.subscribe(tracker.clone());

        let (watcher, notifications) = DatabaseWatcher::new(config.watcher);
        tracker.set_watched_paths(watcher.paths().to_vec());

        Self {
            manager,
            tracker,
            watcher: Mutex::new(watcher),
            pump: Mutex::new(EventPump {
                idle: Some(notifications),
                running: None,
            }),
            lifecycle: Mutex::new(()),
        }
    }

    pub fn manager(&self) -> &DatabaseRegistryManager {
        &self.manager
    }

    pub fn state(&self) -> AggregateServerState {
        self.tracker.snapshot()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.tracker.subscribe()
    }

    // ========================================
    // Lifecycle
    // ========================================

    /// Start the server. A no-op while running.
    ///
    /// On failure the status moves to `error`, an error event is emitted,
    /// and everything started so far is released again.
    pub async fn start(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        if self.tracker.status() == ServerStatus::Running {
            debug!("Start ignored: already running");
            return Ok(());
        }

        self.tracker.set_initializing();
        match self.start_sequence().await {
            Ok(()) => {
                self.tracker.mark_running();
                info!("Server running");
                Ok(())
            }
            Err(e) => {
                error!("Startup failed: {}", e);
                let _ = self.shutdown_sequence().await;
                self.tracker.mark_failed(e.to_string());
                Err(e)
            }
        }
    }

    async fn start_sequence(&self) -> Result<()> {
        self.manager.initialize()?;
        self.tracker.set_server_id(self.manager.server_id()?);
        self.tracker
            .set_database_count(self.manager.count_managed_databases()?);
        self.manager.restore_attachments()?;

        self.start_pump().await?;

        let mut watcher = self.watcher.lock().await;
        // The core store must never be registered as a managed database.
        for suffix in ["", "-wal", "-shm", "-journal"] {
            let mut file = self.manager.core_db_path().as_os_str().to_owned();
            file.push(suffix);
            watcher.exclude(PathBuf::from(file));
        }
        if watcher.paths().is_empty() {
            let persisted: Option<Vec<PathBuf>> =
                self.manager.get_system_config(ConfigKeys::WATCHED_PATHS)?;
            if let Some(paths) = persisted.filter(|paths| !paths.is_empty()) {
                info!("Using {} persisted watch root(s)", paths.len());
                watcher.reload_paths(paths).await?;
            }
        }
        self.tracker.set_watched_paths(watcher.paths().to_vec());
        watcher.start().await
    }

    /// Stop the server. Calling it again once stopped does nothing.
    pub async fn stop(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        if self.tracker.status() == ServerStatus::Stopped {
            debug!("Stop ignored: already stopped");
            return Ok(());
        }

        let result = self.shutdown_sequence().await;
        self.tracker.mark_stopped();
        info!("Server stopped");
        result
    }

    /// Watcher, then pump, then registry; each step runs even if an earlier one failed.
    async fn shutdown_sequence(&self) -> Result<()> {
        self.watcher.lock().await.stop().await;
        self.stop_pump().await;
        self.manager.cleanup().map_err(|e| {
            warn!("Registry cleanup failed: {}", e);
            e
        })
    }

    async fn start_pump(&self) -> Result<()> {
        let mut pump = self.pump.lock().await;
        if pump.running.is_some() {
            return Ok(());
        }
        let rx = pump
            .idle
            .take()
            .ok_or_else(|| DbWatchError::Other("Watcher notification channel lost".to_string()))?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(run_pump(
            Arc::clone(&self.manager),
            Arc::clone(&self.tracker),
            rx,
            shutdown_rx,
        ));
        pump.running = Some((shutdown_tx, handle));
        Ok(())
    }

    async fn stop_pump(&self) {
        let mut pump = self.pump.lock().await;
        let Some((shutdown_tx, handle)) = pump.running.take() else {
            return;
        };
        let _ = shutdown_tx.send(());
        match handle.await {
            Ok(rx) => pump.idle = Some(rx),
            Err(e) => error!("Event pump ended abnormally: {}", e),
        }
    }

    // ========================================
    // Requests
    // ========================================

    /// Route a request to its handler. Never fails: every error becomes a
    /// failure envelope.
    pub async fn dispatch(&self, request: Request) -> Response {
        debug!("Dispatching {}", request.kind);
        let result = match request.kind.as_str() {
            "status" => self.handle_status(),
            "list_databases" => self.handle_list_databases(),
            "database_info" => self.handle_database_info(&request),
            "attach_database" => self.handle_attach_database(&request),
            "detach_database" => self.handle_detach_database(&request),
            "list_paths" => self.handle_list_paths().await,
            "update_paths" => self.handle_update_paths(&request).await,
            other => return Response::failure(format!("Unknown message type: {}", other)),
        };

        if let Err(ref e) = result {
            debug!("{} failed: {}", request.kind, e);
        }
        Response::from(result)
    }
}

/// Apply notifications in arrival order until told to stop, then drain
/// whatever is already queued. Returns the receiver for the next start.
async fn run_pump(
    manager: Arc<DatabaseRegistryManager>,
    tracker: Arc<AggregateTracker>,
    mut rx: NotificationRx,
    mut shutdown_rx: oneshot::Receiver<()>,
) -> NotificationRx {
    loop {
        tokio::select! {
            biased;
            notification = rx.recv() => {
                match notification {
                    Some(notification) => handle_notification(&manager, &tracker, notification),
                    None => break,
                }
            }
            _ = &mut shutdown_rx => break,
        }
    }

    while let Ok(notification) = rx.try_recv() {
        handle_notification(&manager, &tracker, notification);
    }
    debug!("Event pump stopped");
    rx
}

fn handle_notification(
    manager: &DatabaseRegistryManager,
    tracker: &AggregateTracker,
    notification: WatcherNotification,
) {
    match notification {
        WatcherNotification::Ready => debug!("Watcher ready"),
        WatcherNotification::Event(event) => {
            if let Err(e) = apply_event(manager, &event) {
                warn!("Failed to apply {} for {}: {}", event.kind, event.path.display(), e);
                tracker.report_error(e.to_string());
            }
        }
        WatcherNotification::Error(message) => {
            warn!("Watcher error: {}", message);
            tracker.report_error(message);
        }
    }
}

/// Translate one watcher event into a registry mutation.
fn apply_event(manager: &DatabaseRegistryManager, event: &DatabaseEvent) -> Result<()> {
    match event.kind {
        DatabaseEventKind::Add => {
            match manager.get_managed_database(&event.path)? {
                // Already tracked, e.g. found again by the scan after a restart.
                Some(existing) if !existing.is_removed() => {
                    let mut fields =
                        MutableFields::size(event.size).with_last_checked(event.timestamp);
                    if existing.status == DatabaseStatus::Error {
                        fields.status = Some(DatabaseStatus::Active);
                    }
                    manager.update_managed_database(&event.path, fields)?;
                }
                _ => {
                    manager.add_managed_database(&event.path, event.size)?;
                }
            }
        }
        DatabaseEventKind::Change => {
            manager.update_managed_database(
                &event.path,
                MutableFields::size(event.size).with_last_checked(event.timestamp),
            )?;
        }
        DatabaseEventKind::Unlink => {
            manager.remove_managed_database(&event.path)?;
        }
    }
    Ok(())
}
