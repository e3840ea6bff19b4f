//! Database file watcher.
//!
//! A `notify` backend forwards raw events into a single watch loop task.
//! The loop owns the stability tracker, so events for one path are always
//! emitted in order.

use super::patterns::PathMatcher;
use super::stability::{FileSignature, StabilityTracker};
use super::{DatabaseEvent, WatcherConfig, WatcherNotification, WatcherState};
use crate::error::{DbWatchError, Result};
use notify::event::ModifyKind;
use notify::{Event, EventKind, PollWatcher, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

type RawEvent = notify::Result<Event>;

/// Resources of a started watcher. Dropping the backend stops callbacks.
struct ActiveWatch {
    backend: Option<Box<dyn Watcher + Send>>,
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Watches root directories for database files.
///
/// State machine: `Stopped -> Starting -> Running -> Stopping -> Stopped`.
/// A one-shot watcher reports `Finished` once its scan has drained.
pub struct DatabaseWatcher {
    config: WatcherConfig,
    excluded: HashSet<PathBuf>,
    state: WatcherState,
    out_tx: mpsc::UnboundedSender<WatcherNotification>,
    active: Option<ActiveWatch>,
}

impl DatabaseWatcher {
    /// Create a stopped watcher and the receiver its notifications go to.
    pub fn new(
        mut config: WatcherConfig,
    ) -> (Self, mpsc::UnboundedReceiver<WatcherNotification>) {
        config.paths = dedup_paths(std::mem::take(&mut config.paths));
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        (
            Self {
                config,
                excluded: HashSet::new(),
                state: WatcherState::Stopped,
                out_tx,
                active: None,
            },
            out_rx,
        )
    }

    pub fn config(&self) -> &WatcherConfig {
        &self.config
    }

    /// Configured roots, deduplicated, in insertion order.
    pub fn paths(&self) -> &[PathBuf] {
        &self.config.paths
    }

    pub fn state(&self) -> WatcherState {
        match &self.active {
            Some(active) if self.state == WatcherState::Running && active.task.is_finished() => {
                WatcherState::Finished
            }
            _ => self.state,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == WatcherState::Running
    }

    /// Never report `path`, even if it matches a pattern.
    ///
    /// Takes effect on the next start.
    pub fn exclude(&mut self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        self.excluded.insert(path.to_path_buf());
        if let Ok(canonical) = canonicalize_lenient(path) {
            self.excluded.insert(canonical);
        }
    }

    /// Start watching. A no-op unless stopped or finished.
    pub async fn start(&mut self) -> Result<()> {
        if self.state() == WatcherState::Finished {
            self.stop().await;
        }
        if self.state != WatcherState::Stopped {
            debug!("Watcher start ignored in state {:?}", self.state);
            return Ok(());
        }

        self.state = WatcherState::Starting;
        match self.start_inner().await {
            Ok(active) => {
                self.active = Some(active);
                self.state = WatcherState::Running;
                info!("Watching {} root(s) for database files", self.config.paths.len());
                Ok(())
            }
            Err(e) => {
                self.state = WatcherState::Stopped;
                Err(e)
            }
        }
    }

    async fn start_inner(&mut self) -> Result<ActiveWatch> {
        let matcher = Arc::new(PathMatcher::new(
            &self.config.patterns,
            &self.config.ignored,
        )?);

        let mut roots = Vec::with_capacity(self.config.paths.len());
        for path in &self.config.paths {
            let root = std::fs::canonicalize(path).map_err(|e| DbWatchError::Watcher {
                message: format!("Cannot watch {}: {}", path.display(), e),
                source: None,
            })?;
            roots.push(root);
        }

        // Register before scanning so nothing written during the scan is lost.
        let (raw_tx, raw_rx) = mpsc::unbounded_channel::<RawEvent>();
        let backend = if self.config.persistent {
            Some(self.create_backend(raw_tx, &roots)?)
        } else {
            None
        };

        let scan_roots = roots.clone();
        let scan_matcher = Arc::clone(&matcher);
        let excluded = self.excluded.clone();
        let scanned = tokio::task::spawn_blocking(move || {
            scan_roots
                .iter()
                .flat_map(|root| scan_root(root, &scan_matcher, &excluded))
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|e| DbWatchError::Other(format!("Initial scan task failed: {}", e)))?;

        debug!("Initial scan found {} database file(s)", scanned.len());

        let mut tracker = StabilityTracker::new(self.config.stability_window());
        let now = Instant::now();
        for (path, signature) in scanned {
            tracker.observe(path, signature, now);
        }

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let watch_loop = WatchLoop {
            matcher,
            excluded: self.excluded.clone(),
            tracker,
            out_tx: self.out_tx.clone(),
            persistent: self.config.persistent,
        };
        let task = tokio::spawn(watch_loop.run(raw_rx, shutdown_rx, self.config.stability_tick()));

        let _ = self.out_tx.send(WatcherNotification::Ready);

        Ok(ActiveWatch {
            backend,
            shutdown_tx,
            task,
        })
    }

    fn create_backend(
        &self,
        raw_tx: mpsc::UnboundedSender<RawEvent>,
        roots: &[PathBuf],
    ) -> Result<Box<dyn Watcher + Send>> {
        let handler = move |event: RawEvent| {
            let _ = raw_tx.send(event);
        };

        let mut backend: Box<dyn Watcher + Send> = if self.config.use_polling {
            let config = notify::Config::default().with_poll_interval(self.config.poll_interval());
            Box::new(PollWatcher::new(handler, config).map_err(watcher_error)?)
        } else {
            Box::new(
                RecommendedWatcher::new(handler, notify::Config::default())
                    .map_err(watcher_error)?,
            )
        };

        for root in roots {
            backend
                .watch(root, RecursiveMode::Recursive)
                .map_err(|e| DbWatchError::Watcher {
                    message: format!("Failed to watch {}: {}", root.display(), e),
                    source: Some(e),
                })?;
        }
        Ok(backend)
    }

    /// Stop watching and drop pending writes. A no-op unless running or finished.
    pub async fn stop(&mut self) {
        if self.state != WatcherState::Running {
            return;
        }
        self.state = WatcherState::Stopping;

        if let Some(active) = self.active.take() {
            drop(active.backend);
            let _ = active.shutdown_tx.send(());
            if let Err(e) = active.task.await {
                warn!("Watch loop ended abnormally: {}", e);
            }
        }

        self.state = WatcherState::Stopped;
        info!("Watcher stopped");
    }

    /// Replace the watched roots. A running watcher is restarted on the new set.
    ///
    /// Previously watched roots that have since disappeared are dropped and
    /// reported as errors. If the new set cannot be watched, the previous
    /// roots are restored and the error is returned.
    pub async fn reload_paths(&mut self, paths: Vec<PathBuf>) -> Result<()> {
        let previous = std::mem::replace(&mut self.config.paths, dedup_paths(paths));
        if self.state != WatcherState::Running {
            return Ok(());
        }

        self.stop().await;
        self.drop_vanished_roots(&previous);
        let Err(e) = self.start().await else {
            return Ok(());
        };

        warn!("Reload failed, restoring previous roots: {}", e);
        // Vanished roots were already reported above.
        self.config.paths = previous.into_iter().filter(|path| path.is_dir()).collect();
        if let Err(restore) = self.start().await {
            warn!("Could not restart on previous roots: {}", restore);
        }
        Err(e)
    }

    /// Forget roots in `known` that no longer exist, emitting an error for each.
    fn drop_vanished_roots(&mut self, known: &[PathBuf]) {
        let out_tx = &self.out_tx;
        self.config.paths.retain(|path| {
            if !known.contains(path) || path.is_dir() {
                return true;
            }
            let message = format!("Watched root disappeared: {}", path.display());
            warn!("{}", message);
            let _ = out_tx.send(WatcherNotification::Error(message));
            false
        });
    }

    pub async fn add_path(&mut self, path: PathBuf) -> Result<()> {
        self.add_paths(vec![path]).await
    }

    pub async fn add_paths(&mut self, paths: Vec<PathBuf>) -> Result<()> {
        let mut next = self.config.paths.clone();
        next.extend(paths);
        self.reload_paths(next).await
    }

    pub async fn remove_path(&mut self, path: &Path) -> Result<()> {
        self.remove_paths(&[path.to_path_buf()]).await
    }

    pub async fn remove_paths(&mut self, paths: &[PathBuf]) -> Result<()> {
        let next = self
            .config
            .paths
            .iter()
            .filter(|p| !paths.contains(p))
            .cloned()
            .collect();
        self.reload_paths(next).await
    }
}

impl Drop for DatabaseWatcher {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            let _ = active.shutdown_tx.send(());
            active.task.abort();
        }
    }
}

/// State owned by the spawned watch loop.
struct WatchLoop {
    matcher: Arc<PathMatcher>,
    excluded: HashSet<PathBuf>,
    tracker: StabilityTracker,
    out_tx: mpsc::UnboundedSender<WatcherNotification>,
    persistent: bool,
}

impl WatchLoop {
    async fn run(
        mut self,
        mut raw_rx: mpsc::UnboundedReceiver<RawEvent>,
        mut shutdown_rx: oneshot::Receiver<()>,
        tick_period: std::time::Duration,
    ) {
        let mut tick = tokio::time::interval(tick_period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut raw_open = self.persistent;

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    debug!("Watch loop stopping");
                    break;
                }
                raw = raw_rx.recv(), if raw_open => {
                    match raw {
                        Some(Ok(event)) => self.handle_raw(event),
                        Some(Err(e)) => {
                            warn!("Watcher backend error: {}", e);
                            self.emit(WatcherNotification::Error(e.to_string()));
                        }
                        None => raw_open = false,
                    }
                }
                _ = tick.tick() => {
                    let events = self.tracker.poll(Instant::now(), FileSignature::read);
                    for event in events {
                        self.emit(WatcherNotification::Event(event));
                    }
                    if !self.persistent && !self.tracker.has_pending() {
                        debug!("One-shot scan complete");
                        break;
                    }
                }
            }
        }
    }

    /// Queue every matching file under `dir` that is not already known.
    fn observe_tree(&mut self, dir: &Path, now: Instant) {
        for (path, signature) in scan_root(dir, &self.matcher, &self.excluded) {
            if !self.tracker.is_surfaced(&path) && !self.tracker.is_pending(&path) {
                self.tracker.observe(path, signature, now);
            }
        }
    }

    fn emit(&self, notification: WatcherNotification) {
        if let WatcherNotification::Event(ref event) = notification {
            debug!("{} {}", event.kind, event.path.display());
        }
        let _ = self.out_tx.send(notification);
    }

    fn handle_raw(&mut self, event: Event) {
        if matches!(event.kind, EventKind::Access(_)) {
            return;
        }

        let now = Instant::now();
        let kind = event.kind;
        for path in event.paths {
            if self.excluded.contains(&path) {
                continue;
            }

            match FileSignature::read(&path) {
                Some(signature) => {
                    if self.matcher.is_match(&path) {
                        self.tracker.observe(path, signature, now);
                    }
                }
                None if path.is_dir() => {
                    // Directories moved in arrive as one event; their files report nothing.
                    if is_arrival(&kind) && !self.matcher.is_ignored_dir(&path) {
                        self.observe_tree(&path, now);
                    }
                }
                None if path.exists() => {}
                None => {
                    let mut gone: Vec<DatabaseEvent> =
                        self.tracker.remove(&path).into_iter().collect();
                    gone.extend(self.tracker.remove_under(&path));
                    for event in gone {
                        self.emit(WatcherNotification::Event(event));
                    }
                }
            }
        }
    }
}

/// A path appeared under a root: created, or renamed into place.
fn is_arrival(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(_)) | EventKind::Any
    )
}

/// Walk `root` and return every matching file with its signature.
fn scan_root(
    root: &Path,
    matcher: &PathMatcher,
    excluded: &HashSet<PathBuf>,
) -> Vec<(PathBuf, FileSignature)> {
    walkdir::WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0
                || !(entry.file_type().is_dir() && matcher.is_ignored_dir(entry.path()))
        })
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Skipping unreadable entry during scan: {}", e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(walkdir::DirEntry::into_path)
        .filter(|path| !excluded.contains(path) && matcher.is_match(path))
        .filter_map(|path| FileSignature::read(&path).map(|signature| (path, signature)))
        .collect()
}

/// Canonicalize the parent so files that do not exist yet still resolve.
fn canonicalize_lenient(path: &Path) -> std::io::Result<PathBuf> {
    if let Ok(canonical) = std::fs::canonicalize(path) {
        return Ok(canonical);
    }
    let parent = path.parent().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::NotFound, "path has no parent")
    })?;
    let file_name = path.file_name().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::NotFound, "path has no file name")
    })?;
    Ok(std::fs::canonicalize(parent)?.join(file_name))
}

fn dedup_paths(paths: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    paths
        .into_iter()
        .filter(|path| seen.insert(path.clone()))
        .collect()
}

fn watcher_error(e: notify::Error) -> DbWatchError {
    DbWatchError::Watcher {
        message: format!("Failed to create file watcher: {}", e),
        source: Some(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watcher::DatabaseEventKind;
    use std::time::Duration;
    use tempfile::TempDir;

    fn test_config(paths: Vec<PathBuf>) -> WatcherConfig {
        WatcherConfig {
            use_polling: true,
            poll_interval_ms: 50,
            stability_window_ms: 100,
            ..WatcherConfig::new(paths)
        }
    }

    async fn next_event(
        rx: &mut mpsc::UnboundedReceiver<WatcherNotification>,
    ) -> DatabaseEvent {
        loop {
            let notification = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("timed out waiting for watcher event")
                .expect("watcher channel closed");
            if let WatcherNotification::Event(event) = notification {
                return event;
            }
        }
    }

    #[test]
    fn test_dedup_paths_keeps_first_occurrence() {
        let paths = dedup_paths(vec![
            PathBuf::from("/b"),
            PathBuf::from("/a"),
            PathBuf::from("/b"),
        ]);
        assert_eq!(paths, vec![PathBuf::from("/b"), PathBuf::from("/a")]);
    }

    #[tokio::test]
    async fn test_start_fails_for_missing_root() {
        let temp_dir = TempDir::new().unwrap();
        let (mut watcher, _rx) =
            DatabaseWatcher::new(test_config(vec![temp_dir.path().join("missing")]));

        let err = watcher.start().await.unwrap_err();
        assert!(matches!(err, DbWatchError::Watcher { .. }));
        assert_eq!(watcher.state(), WatcherState::Stopped);
    }

    #[tokio::test]
    async fn test_start_and_stop_are_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let (mut watcher, mut rx) =
            DatabaseWatcher::new(test_config(vec![temp_dir.path().to_path_buf()]));

        watcher.start().await.unwrap();
        watcher.start().await.unwrap();
        assert_eq!(rx.recv().await, Some(WatcherNotification::Ready));
        assert!(rx.try_recv().is_err());

        watcher.stop().await;
        watcher.stop().await;
        assert_eq!(watcher.state(), WatcherState::Stopped);
    }

    #[tokio::test]
    async fn test_one_shot_scan_reports_existing_files() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().canonicalize().unwrap();
        std::fs::write(root.join("a.db"), b"data").unwrap();
        std::fs::write(root.join("a.db-wal"), b"wal").unwrap();
        std::fs::create_dir(root.join("node_modules")).unwrap();
        std::fs::write(root.join("node_modules").join("b.db"), b"data").unwrap();

        let mut config = test_config(vec![root.clone()]);
        config.persistent = false;
        let (mut watcher, mut rx) = DatabaseWatcher::new(config);
        watcher.start().await.unwrap();

        let event = next_event(&mut rx).await;
        assert_eq!(event.kind, DatabaseEventKind::Add);
        assert_eq!(event.path, root.join("a.db"));
        assert_eq!(event.size, Some(4));

        tokio::time::timeout(Duration::from_secs(5), async {
            while watcher.state() != WatcherState::Finished {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("one-shot scan never finished");
        assert!(!watcher.is_running());

        watcher.stop().await;
        assert_eq!(watcher.state(), WatcherState::Stopped);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_finished_one_shot_watcher_can_scan_again() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().canonicalize().unwrap();
        std::fs::write(root.join("a.db"), b"data").unwrap();

        let mut config = test_config(vec![root.clone()]);
        config.persistent = false;
        let (mut watcher, mut rx) = DatabaseWatcher::new(config);
        watcher.start().await.unwrap();
        assert_eq!(next_event(&mut rx).await.path, root.join("a.db"));
        while watcher.state() != WatcherState::Finished {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        watcher.start().await.unwrap();
        let event = next_event(&mut rx).await;
        assert_eq!(event.kind, DatabaseEventKind::Add);
        assert_eq!(event.path, root.join("a.db"));
        watcher.stop().await;
    }

    #[tokio::test]
    async fn test_excluded_file_is_not_reported() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().canonicalize().unwrap();
        std::fs::write(root.join("core.db"), b"core").unwrap();
        std::fs::write(root.join("user.db"), b"user").unwrap();

        let mut config = test_config(vec![root.clone()]);
        config.persistent = false;
        let (mut watcher, mut rx) = DatabaseWatcher::new(config);
        watcher.exclude(root.join("core.db"));
        watcher.start().await.unwrap();

        let event = next_event(&mut rx).await;
        assert_eq!(event.path, root.join("user.db"));
        watcher.stop().await;
    }

    #[tokio::test]
    async fn test_path_set_changes_while_stopped() {
        let (mut watcher, _rx) = DatabaseWatcher::new(test_config(vec![PathBuf::from("/a")]));

        watcher.add_paths(vec![PathBuf::from("/b"), PathBuf::from("/a")]).await.unwrap();
        assert_eq!(watcher.paths(), &[PathBuf::from("/a"), PathBuf::from("/b")]);

        watcher.remove_path(Path::new("/a")).await.unwrap();
        assert_eq!(watcher.paths(), &[PathBuf::from("/b")]);
        assert_eq!(watcher.state(), WatcherState::Stopped);
    }
}
