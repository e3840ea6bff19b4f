//! Write-stability tracking.
//!
//! A write is only reported once the file's size and mtime have stopped
//! changing for the stability window, so half-written databases are never
//! handed to the registry.

use super::{DatabaseEvent, DatabaseEventKind};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

/// Size and modification time of a file at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileSignature {
    pub size: u64,
    pub modified: Option<SystemTime>,
}

impl FileSignature {
    /// Stat `path`. Returns `None` if it is missing or not a regular file.
    pub fn read(path: &Path) -> Option<Self> {
        let metadata = std::fs::metadata(path).ok()?;
        if !metadata.is_file() {
            return None;
        }
        Some(Self {
            size: metadata.len(),
            modified: metadata.modified().ok(),
        })
    }
}

#[derive(Debug)]
struct PendingWrite {
    signature: FileSignature,
    stable_since: Instant,
}

/// Pending writes keyed by path, plus the set of paths already reported.
#[derive(Debug)]
pub struct StabilityTracker {
    window: Duration,
    pending: HashMap<PathBuf, PendingWrite>,
    surfaced: HashSet<PathBuf>,
}

impl StabilityTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: HashMap::new(),
            surfaced: HashSet::new(),
        }
    }

    /// Record a write. The stability clock restarts from `now`.
    pub fn observe(&mut self, path: PathBuf, signature: FileSignature, now: Instant) {
        self.pending.insert(
            path,
            PendingWrite {
                signature,
                stable_since: now,
            },
        );
    }

    /// Record that `path` no longer exists.
    ///
    /// Returns an unlink event only if the path had been reported; a pending
    /// write that never surfaced is dropped silently.
    pub fn remove(&mut self, path: &Path) -> Option<DatabaseEvent> {
        self.pending.remove(path);
        self.surfaced
            .remove(path)
            .then(|| DatabaseEvent::unlink(path.to_path_buf()))
    }

    /// Remove every tracked path under `dir`, e.g. after a directory delete.
    pub fn remove_under(&mut self, dir: &Path) -> Vec<DatabaseEvent> {
        self.pending.retain(|path, _| !path.starts_with(dir));

        let mut gone: Vec<PathBuf> = self
            .surfaced
            .iter()
            .filter(|path| path.starts_with(dir))
            .cloned()
            .collect();
        gone.sort();

        gone.into_iter()
            .filter_map(|path| self.remove(&path))
            .collect()
    }

    /// Re-stat every pending path and return the writes that became stable.
    ///
    /// `stat` is injected so the clock and filesystem can be driven in tests.
    pub fn poll(
        &mut self,
        now: Instant,
        stat: impl Fn(&Path) -> Option<FileSignature>,
    ) -> Vec<DatabaseEvent> {
        let mut ready = Vec::new();
        let mut vanished = Vec::new();

        for (path, pending) in self.pending.iter_mut() {
            match stat(path) {
                None => vanished.push(path.clone()),
                Some(current) if current != pending.signature => {
                    pending.signature = current;
                    pending.stable_since = now;
                }
                Some(current) => {
                    if now.saturating_duration_since(pending.stable_since) >= self.window {
                        ready.push((path.clone(), current));
                    }
                }
            }
        }

        let mut events: Vec<DatabaseEvent> = vanished
            .into_iter()
            .filter_map(|path| self.remove(&path))
            .collect();

        ready.sort_by(|a, b| a.0.cmp(&b.0));
        for (path, signature) in ready {
            self.pending.remove(&path);
            let kind = if self.surfaced.insert(path.clone()) {
                DatabaseEventKind::Add
            } else {
                DatabaseEventKind::Change
            };
            events.push(DatabaseEvent::new(kind, path, Some(signature.size)));
        }

        events
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn is_pending(&self, path: &Path) -> bool {
        self.pending.contains_key(path)
    }

    pub fn is_surfaced(&self, path: &Path) -> bool {
        self.surfaced.contains(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    const WINDOW: Duration = Duration::from_millis(200);

    fn sig(size: u64) -> FileSignature {
        FileSignature {
            size,
            modified: None,
        }
    }

    /// Fake filesystem: path -> current signature.
    struct FakeFs(RefCell<HashMap<PathBuf, FileSignature>>);

    impl FakeFs {
        fn new() -> Self {
            Self(RefCell::new(HashMap::new()))
        }

        fn set(&self, path: &str, size: u64) {
            self.0.borrow_mut().insert(PathBuf::from(path), sig(size));
        }

        fn delete(&self, path: &str) {
            self.0.borrow_mut().remove(Path::new(path));
        }

        fn stat(&self) -> impl Fn(&Path) -> Option<FileSignature> + '_ {
            move |path| self.0.borrow().get(path).copied()
        }
    }

    #[test]
    fn test_write_surfaces_after_window() {
        let fs = FakeFs::new();
        let mut tracker = StabilityTracker::new(WINDOW);
        let start = Instant::now();

        fs.set("/d/a.db", 10);
        tracker.observe(PathBuf::from("/d/a.db"), sig(10), start);

        assert!(tracker.poll(start + WINDOW / 2, fs.stat()).is_empty());

        let events = tracker.poll(start + WINDOW, fs.stat());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, DatabaseEventKind::Add);
        assert_eq!(events[0].size, Some(10));
        assert!(!tracker.has_pending());
    }

    #[test]
    fn test_growing_file_restarts_window() {
        let fs = FakeFs::new();
        let mut tracker = StabilityTracker::new(WINDOW);
        let start = Instant::now();

        fs.set("/d/a.db", 10);
        tracker.observe(PathBuf::from("/d/a.db"), sig(10), start);

        fs.set("/d/a.db", 20);
        assert!(tracker.poll(start + WINDOW, fs.stat()).is_empty());
        assert!(tracker.poll(start + WINDOW + WINDOW / 2, fs.stat()).is_empty());

        let events = tracker.poll(start + WINDOW * 2, fs.stat());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].size, Some(20));
    }

    #[test]
    fn test_second_write_is_a_change() {
        let fs = FakeFs::new();
        let mut tracker = StabilityTracker::new(WINDOW);
        let start = Instant::now();

        fs.set("/d/a.db", 10);
        tracker.observe(PathBuf::from("/d/a.db"), sig(10), start);
        tracker.poll(start + WINDOW, fs.stat());

        fs.set("/d/a.db", 30);
        let later = start + WINDOW * 3;
        tracker.observe(PathBuf::from("/d/a.db"), sig(30), later);
        let events = tracker.poll(later + WINDOW, fs.stat());

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, DatabaseEventKind::Change);
        assert_eq!(events[0].size, Some(30));
    }

    #[test]
    fn test_unsurfaced_delete_is_silent() {
        let fs = FakeFs::new();
        let mut tracker = StabilityTracker::new(WINDOW);
        let start = Instant::now();

        fs.set("/d/a.db", 10);
        tracker.observe(PathBuf::from("/d/a.db"), sig(10), start);
        fs.delete("/d/a.db");

        assert!(tracker.poll(start + WINDOW, fs.stat()).is_empty());
        assert!(tracker.remove(Path::new("/d/a.db")).is_none());
    }

    #[test]
    fn test_surfaced_delete_is_unlink() {
        let fs = FakeFs::new();
        let mut tracker = StabilityTracker::new(WINDOW);
        let start = Instant::now();

        fs.set("/d/a.db", 10);
        tracker.observe(PathBuf::from("/d/a.db"), sig(10), start);
        tracker.poll(start + WINDOW, fs.stat());

        let event = tracker.remove(Path::new("/d/a.db")).unwrap();
        assert_eq!(event.kind, DatabaseEventKind::Unlink);
        assert_eq!(event.size, None);
        assert!(!tracker.is_surfaced(Path::new("/d/a.db")));
    }

    #[test]
    fn test_remove_under_reports_surfaced_children() {
        let fs = FakeFs::new();
        let mut tracker = StabilityTracker::new(WINDOW);
        let start = Instant::now();

        for path in ["/d/sub/a.db", "/d/sub/b.db", "/d/other.db"] {
            fs.set(path, 1);
            tracker.observe(PathBuf::from(path), sig(1), start);
        }
        tracker.poll(start + WINDOW, fs.stat());

        let events = tracker.remove_under(Path::new("/d/sub"));
        let paths: Vec<PathBuf> = events.into_iter().map(|e| e.path).collect();
        assert_eq!(
            paths,
            vec![PathBuf::from("/d/sub/a.db"), PathBuf::from("/d/sub/b.db")]
        );
        assert!(tracker.is_surfaced(Path::new("/d/other.db")));
    }
}
