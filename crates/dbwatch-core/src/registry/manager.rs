//! Authority over the persisted registry and the attachment map.

use super::attachment::AttachedConnection;
use super::observer::RegistryObserver;
use super::types::{
    display_name, path_key, DatabaseRemoval, DatabaseStatus, ManagedDatabaseRecord,
    MutableFields, TableSummary,
};
use crate::config::{ConfigKeys, StoreConfig};
use crate::error::{DbWatchError, Result};
use crate::store::{format_timestamp, schema::SCHEMA, timestamp_now, MetadataStore, Statement};
use rusqlite::params;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tracing::{debug, info, warn};

/// Owns the core store and the path-keyed map of attached connections.
///
/// An attachment exists iff its record is active and opening it succeeded.
pub struct DatabaseRegistryManager {
    store: MetadataStore,
    attachments: Mutex<HashMap<PathBuf, AttachedConnection>>,
    observers: RwLock<Vec<Arc<dyn RegistryObserver>>>,
    initialized: AtomicBool,
}

impl DatabaseRegistryManager {
    pub fn new(core_db_path: impl Into<PathBuf>) -> Self {
        Self {
            store: MetadataStore::new(core_db_path),
            attachments: Mutex::new(HashMap::new()),
            observers: RwLock::new(Vec::new()),
            initialized: AtomicBool::new(false),
        }
    }

    pub fn core_db_path(&self) -> &Path {
        self.store.path()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Register an observer for lifecycle events.
    pub fn subscribe(&self, observer: Arc<dyn RegistryObserver>) {
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    fn notify(&self, event: impl Fn(&dyn RegistryObserver)) {
        let observers = self
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for observer in &observers {
            event(observer.as_ref());
        }
    }

    fn lock_attachments(&self) -> MutexGuard<'_, HashMap<PathBuf, AttachedConnection>> {
        self.attachments
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    // ========================================
    // Lifecycle
    // ========================================

    /// Connect the store, create the schema and seed system configuration.
    ///
    /// Idempotent and safe to retry after a failure.
    pub fn initialize(&self) -> Result<()> {
        if self.is_initialized() {
            return Ok(());
        }

        self.store
            .connect()
            .and_then(|_| self.store.exec("create_schema", SCHEMA))
            .and_then(|_| self.seed_system_config())
            .map_err(|e| DbWatchError::Initialization {
                source: Box::new(e),
            })?;

        self.initialized.store(true, Ordering::SeqCst);
        info!(
            "Registry initialized at {}",
            self.store.path().display()
        );
        Ok(())
    }

    fn seed_system_config(&self) -> Result<()> {
        let now = timestamp_now();
        let server_id = serde_json::to_string(&uuid::Uuid::new_v4().to_string())?;
        let initialized_at = serde_json::to_string(&now)?;
        let schema_version = serde_json::to_string(&StoreConfig::SCHEMA_VERSION)?;

        self.store.transaction("seed_system_config", |tx| {
            tx.execute(
                "seed_system_config",
                Statement::SeedConfig,
                params![ConfigKeys::SERVER_ID, server_id, now],
            )?;
            tx.execute(
                "seed_system_config",
                Statement::SeedConfig,
                params![ConfigKeys::INITIALIZED_AT, initialized_at, now],
            )?;
            tx.execute(
                "seed_system_config",
                Statement::UpsertConfig,
                params![ConfigKeys::SCHEMA_VERSION, schema_version, now],
            )?;
            Ok(())
        })
    }

    /// Close every attachment, disconnect the store and reset initialization.
    ///
    /// Individual close failures are logged and do not stop the cleanup.
    pub fn cleanup(&self) -> Result<()> {
        let drained: Vec<(PathBuf, AttachedConnection)> =
            self.lock_attachments().drain().collect();
        let closed = drained.len();
        for (path, attachment) in drained {
            if let Err(e) = attachment.close() {
                warn!("Failed to close attachment {}: {}", path.display(), e);
            }
        }

        let disconnected = self.store.disconnect();
        self.initialized.store(false, Ordering::SeqCst);
        self.notify(|o| o.on_cleanup());

        info!("Registry cleaned up ({} attachments closed)", closed);
        disconnected
    }

    // ========================================
    // System configuration
    // ========================================

    pub fn server_id(&self) -> Result<String> {
        self.get_system_config::<String>(ConfigKeys::SERVER_ID)?
            .ok_or_else(|| DbWatchError::Other("Server id has not been seeded".to_string()))
    }

    pub fn set_system_config<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        self.store.set_system_config(key, value)
    }

    pub fn get_system_config<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.store.get_system_config(key)
    }

    // ========================================
    // Registry mutations
    // ========================================

    /// Register a newly observed database and attach it.
    ///
    /// Fails with `AddFailed` if a non-removed record already exists for the
    /// path. A `removed` record is brought back to `active` in place.
    pub fn add_managed_database(
        &self,
        path: &Path,
        size: Option<u64>,
    ) -> Result<ManagedDatabaseRecord> {
        let key = path_key(path);
        let name = display_name(path);
        let size = size.map(|s| i64::try_from(s).unwrap_or(i64::MAX));
        let now = timestamp_now();

        let record = self
            .store
            .transaction("add_managed_database", |tx| {
                let existing = tx.get(
                    "add_managed_database",
                    Statement::SelectDatabaseByPath,
                    params![key],
                    ManagedDatabaseRecord::from_row,
                )?;

                let stmt = match existing {
                    Some(ref record) if record.is_removed() => Statement::ResurrectDatabase,
                    _ => Statement::InsertDatabase,
                };
                tx.execute("add_managed_database", stmt, params![key, name, size, now])?;

                tx.get(
                    "add_managed_database",
                    Statement::SelectDatabaseByPath,
                    params![key],
                    ManagedDatabaseRecord::from_row,
                )?
                .ok_or_else(|| {
                    DbWatchError::Other(format!("Record for {} vanished after insert", key))
                })
            })
            .map_err(|e| {
                if e.is_unique_violation() {
                    DbWatchError::AddFailed {
                        path: path.to_path_buf(),
                        message: "a record for this path already exists".to_string(),
                    }
                } else {
                    e
                }
            })?;

        let record = match self.attach(path) {
            Ok(()) => record,
            Err(e) => {
                warn!("Failed to attach {}: {}", path.display(), e);
                self.write_fields(path, &MutableFields::status(DatabaseStatus::Error))?
                    .unwrap_or(record)
            }
        };

        debug!("Added managed database {} ({})", key, record.status);
        self.notify(|o| o.on_database_added(&record));
        Ok(record)
    }

    /// Apply a partial update. Unknown and removed paths are a silent no-op.
    ///
    /// Status changes follow the transition table. Leaving `active` detaches
    /// the database; entering `active` attaches it.
    pub fn update_managed_database(
        &self,
        path: &Path,
        fields: MutableFields,
    ) -> Result<Option<ManagedDatabaseRecord>> {
        if fields.status == Some(DatabaseStatus::Removed) {
            return Err(DbWatchError::validation(
                "status",
                "use remove_managed_database to remove a database",
            ));
        }

        let Some(current) = self.get_managed_database(path)? else {
            debug!("Ignoring update for unmanaged path {}", path.display());
            return Ok(None);
        };
        if let Some(next) = fields.status {
            current.status.validate_transition(next)?;
        }
        if current.is_removed() {
            debug!("Ignoring update for removed path {}", path.display());
            return Ok(None);
        }

        let Some(mut record) = self.write_fields(path, &fields)? else {
            return Ok(None);
        };

        let was_active = current.status == DatabaseStatus::Active;
        let is_active = record.status == DatabaseStatus::Active;
        if was_active && !is_active {
            self.detach(path);
        } else if !was_active && is_active {
            if let Err(e) = self.attach(path) {
                warn!("Failed to attach {}: {}", path.display(), e);
                if let Some(errored) =
                    self.write_fields(path, &MutableFields::status(DatabaseStatus::Error))?
                {
                    record = errored;
                }
            }
        }

        self.notify(|o| o.on_database_changed(&record));
        Ok(Some(record))
    }

    /// Write `fields` and refresh `last_modified`; returns the updated row.
    fn write_fields(
        &self,
        path: &Path,
        fields: &MutableFields,
    ) -> Result<Option<ManagedDatabaseRecord>> {
        let key = path_key(path);
        let size = fields.size.map(|s| i64::try_from(s).unwrap_or(i64::MAX));
        let last_checked = fields.last_checked.map(format_timestamp);

        let summary = self.store.execute(
            "update_managed_database",
            Statement::UpdateDatabase,
            params![key, size, fields.status, last_checked, timestamp_now()],
        )?;
        if summary.changes == 0 {
            return Ok(None);
        }
        self.get_managed_database(path)
    }

    /// Soft-delete the record for `path` and drop its attachment.
    ///
    /// Safe to call for unknown or already removed paths. Observers are
    /// always notified so they can reconcile redundant unlinks.
    pub fn remove_managed_database(&self, path: &Path) -> Result<DatabaseRemoval> {
        let key = path_key(path);
        let now = timestamp_now();

        let was_tracked = self.store.transaction("remove_managed_database", |tx| {
            let existing = tx.get(
                "remove_managed_database",
                Statement::SelectDatabaseByPath,
                params![key],
                ManagedDatabaseRecord::from_row,
            )?;
            tx.execute(
                "remove_managed_database",
                Statement::MarkRemoved,
                params![key, now],
            )?;
            Ok(matches!(existing, Some(record) if !record.is_removed()))
        })?;

        self.detach(path);

        let removal = DatabaseRemoval {
            path: path.to_path_buf(),
            was_tracked,
        };
        debug!("Removed managed database {} (tracked: {})", key, was_tracked);
        self.notify(|o| o.on_database_removed(&removal));
        Ok(removal)
    }

    // ========================================
    // Queries
    // ========================================

    pub fn get_managed_database(&self, path: &Path) -> Result<Option<ManagedDatabaseRecord>> {
        self.store.get(
            "get_managed_database",
            Statement::SelectDatabaseByPath,
            params![path_key(path)],
            ManagedDatabaseRecord::from_row,
        )
    }

    /// Non-removed records, most recently modified first.
    pub fn list_managed_databases(&self) -> Result<Vec<ManagedDatabaseRecord>> {
        self.store.query(
            "list_managed_databases",
            Statement::ListDatabases,
            [],
            ManagedDatabaseRecord::from_row,
        )
    }

    /// Number of non-removed records.
    pub fn count_managed_databases(&self) -> Result<usize> {
        let count: i64 = self
            .store
            .get(
                "count_managed_databases",
                Statement::CountDatabases,
                [],
                |row| row.get(0),
            )?
            .unwrap_or(0);
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// Table summaries for an attached database.
    pub fn get_database_info(&self, path: &Path) -> Result<Vec<TableSummary>> {
        let attachments = self.lock_attachments();
        let attachment = attachments.get(path).ok_or_else(|| DbWatchError::NotFound {
            path: path.to_path_buf(),
        })?;
        attachment.table_summaries()
    }

    pub fn is_attached(&self, path: &Path) -> bool {
        self.lock_attachments().contains_key(path)
    }

    pub fn attached_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.lock_attachments().keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Re-open attachments for active records, e.g. after a restart.
    ///
    /// Records whose file was deleted while nothing was watching are removed,
    /// since no unlink will ever arrive for them. Records whose file still
    /// exists but can no longer be opened move to `error`.
    /// Returns the number of attachments opened.
    pub fn restore_attachments(&self) -> Result<usize> {
        for record in self.list_managed_databases()? {
            if !record.path.exists() {
                info!("Removing {}: file is gone", record.path.display());
                self.remove_managed_database(&record.path)?;
            }
        }

        let active = self.store.query(
            "restore_attachments",
            Statement::ListActiveDatabases,
            [],
            ManagedDatabaseRecord::from_row,
        )?;

        let mut restored = 0;
        for record in active {
            if self.is_attached(&record.path) {
                continue;
            }
            match self.attach(&record.path) {
                Ok(()) => restored += 1,
                Err(e) => {
                    warn!("Could not restore {}: {}", record.path.display(), e);
                    self.update_managed_database(
                        &record.path,
                        MutableFields::status(DatabaseStatus::Error)
                            .with_last_checked(chrono::Utc::now()),
                    )?;
                }
            }
        }

        if restored > 0 {
            info!("Restored {} attachments", restored);
        }
        Ok(restored)
    }

    // ========================================
    // Attachments
    // ========================================

    fn attach(&self, path: &Path) -> Result<()> {
        let attachment = AttachedConnection::open(path)?;
        let previous = self
            .lock_attachments()
            .insert(path.to_path_buf(), attachment);
        if let Some(previous) = previous {
            if let Err(e) = previous.close() {
                warn!("Failed to close replaced attachment: {}", e);
            }
        }
        Ok(())
    }

    fn detach(&self, path: &Path) {
        let removed = self.lock_attachments().remove(path);
        if let Some(attachment) = removed {
            if let Err(e) = attachment.close() {
                warn!("Failed to close attachment {}: {}", path.display(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingObserver {
        events: Mutex<Vec<String>>,
    }

    impl RecordingObserver {
        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
    }

    impl RegistryObserver for RecordingObserver {
        fn on_database_added(&self, record: &ManagedDatabaseRecord) {
            self.events
                .lock()
                .unwrap()
                .push(format!("added:{}", record.name));
        }

        fn on_database_changed(&self, record: &ManagedDatabaseRecord) {
            self.events
                .lock()
                .unwrap()
                .push(format!("changed:{}", record.name));
        }

        fn on_database_removed(&self, removal: &DatabaseRemoval) {
            self.events.lock().unwrap().push(format!(
                "removed:{}:{}",
                display_name(&removal.path),
                removal.was_tracked
            ));
        }

        fn on_cleanup(&self) {
            self.events.lock().unwrap().push("cleanup".to_string());
        }
    }

    fn create_test_manager() -> (DatabaseRegistryManager, Arc<RecordingObserver>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let manager = DatabaseRegistryManager::new(temp_dir.path().join("core").join("core.db"));
        manager.initialize().unwrap();
        let observer = Arc::new(RecordingObserver::default());
        manager.subscribe(observer.clone());
        (manager, observer, temp_dir)
    }

    fn create_target_db(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE items (id INTEGER PRIMARY KEY, label TEXT);
             INSERT INTO items (label) VALUES ('one'), ('two');",
        )
        .unwrap();
        path
    }

    #[test]
    fn test_initialize_is_idempotent_and_seeds_config() {
        let (manager, _observer, _temp_dir) = create_test_manager();
        let server_id = manager.server_id().unwrap();
        manager.initialize().unwrap();

        assert_eq!(manager.server_id().unwrap(), server_id);
        let version: Option<i64> = manager
            .get_system_config(ConfigKeys::SCHEMA_VERSION)
            .unwrap();
        assert_eq!(version, Some(StoreConfig::SCHEMA_VERSION));
    }

    #[test]
    fn test_server_id_survives_reinitialization() {
        let (manager, _observer, _temp_dir) = create_test_manager();
        let server_id = manager.server_id().unwrap();

        manager.cleanup().unwrap();
        manager.initialize().unwrap();
        assert_eq!(manager.server_id().unwrap(), server_id);
    }

    #[test]
    fn test_add_lists_active_record_and_attaches() {
        let (manager, observer, temp_dir) = create_test_manager();
        let path = create_target_db(temp_dir.path(), "app.db");

        let record = manager.add_managed_database(&path, Some(4096)).unwrap();
        assert_eq!(record.status, DatabaseStatus::Active);
        assert_eq!(record.name, "app.db");
        assert_eq!(record.size, Some(4096));

        let listed = manager.list_managed_databases().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].path, path);
        assert_eq!(listed[0].status, DatabaseStatus::Active);

        assert!(manager.is_attached(&path));
        assert_eq!(observer.events(), vec!["added:app.db"]);
    }

    #[test]
    fn test_add_duplicate_path_fails() {
        let (manager, observer, temp_dir) = create_test_manager();
        let path = create_target_db(temp_dir.path(), "app.db");

        manager.add_managed_database(&path, None).unwrap();
        let err = manager.add_managed_database(&path, None).unwrap_err();

        assert!(matches!(err, DbWatchError::AddFailed { .. }));
        assert_eq!(observer.events(), vec!["added:app.db"]);
        assert_eq!(manager.count_managed_databases().unwrap(), 1);
    }

    #[test]
    fn test_add_unreadable_file_records_error_status() {
        let (manager, _observer, temp_dir) = create_test_manager();
        let path = temp_dir.path().join("broken.db");
        std::fs::write(&path, b"plain text pretending to be a database file").unwrap();

        let record = manager.add_managed_database(&path, Some(42)).unwrap();
        assert_eq!(record.status, DatabaseStatus::Error);
        assert!(!manager.is_attached(&path));
        assert_eq!(manager.count_managed_databases().unwrap(), 1);
    }

    #[test]
    fn test_remove_hides_record_and_detaches() {
        let (manager, observer, temp_dir) = create_test_manager();
        let path = create_target_db(temp_dir.path(), "app.db");
        manager.add_managed_database(&path, None).unwrap();

        let removal = manager.remove_managed_database(&path).unwrap();
        assert!(removal.was_tracked);

        assert!(manager.list_managed_databases().unwrap().is_empty());
        assert!(manager.get_database_info(&path).unwrap_err().is_not_found());
        assert!(!manager.is_attached(&path));

        // Soft delete keeps the row.
        let record = manager.get_managed_database(&path).unwrap().unwrap();
        assert_eq!(record.status, DatabaseStatus::Removed);
        assert_eq!(
            observer.events(),
            vec!["added:app.db", "removed:app.db:true"]
        );
    }

    #[test]
    fn test_remove_unknown_path_still_notifies() {
        let (manager, observer, temp_dir) = create_test_manager();
        let path = temp_dir.path().join("ghost.db");

        let removal = manager.remove_managed_database(&path).unwrap();
        assert!(!removal.was_tracked);
        assert!(manager.get_managed_database(&path).unwrap().is_none());
        assert_eq!(observer.events(), vec!["removed:ghost.db:false"]);
    }

    #[test]
    fn test_remove_twice_is_tracked_once() {
        let (manager, _observer, temp_dir) = create_test_manager();
        let path = create_target_db(temp_dir.path(), "app.db");
        manager.add_managed_database(&path, None).unwrap();

        assert!(manager.remove_managed_database(&path).unwrap().was_tracked);
        assert!(!manager.remove_managed_database(&path).unwrap().was_tracked);
    }

    #[test]
    fn test_readd_resurrects_removed_record() {
        let (manager, _observer, temp_dir) = create_test_manager();
        let path = create_target_db(temp_dir.path(), "app.db");
        let original = manager.add_managed_database(&path, Some(1)).unwrap();
        manager.remove_managed_database(&path).unwrap();

        let revived = manager.add_managed_database(&path, Some(2)).unwrap();
        assert_eq!(revived.id, original.id);
        assert_eq!(revived.status, DatabaseStatus::Active);
        assert_eq!(revived.size, Some(2));
        assert!(manager.is_attached(&path));
        assert_eq!(manager.count_managed_databases().unwrap(), 1);
    }

    #[test]
    fn test_update_unknown_path_is_noop() {
        let (manager, observer, temp_dir) = create_test_manager();
        let result = manager
            .update_managed_database(&temp_dir.path().join("ghost.db"), MutableFields::size(Some(1)))
            .unwrap();

        assert!(result.is_none());
        assert!(observer.events().is_empty());
    }

    #[test]
    fn test_update_removed_path_is_noop() {
        let (manager, observer, temp_dir) = create_test_manager();
        let path = create_target_db(temp_dir.path(), "app.db");
        manager.add_managed_database(&path, Some(1)).unwrap();
        manager.remove_managed_database(&path).unwrap();

        let result = manager
            .update_managed_database(&path, MutableFields::size(Some(99)))
            .unwrap();
        assert!(result.is_none());
        assert_eq!(manager.get_managed_database(&path).unwrap().unwrap().size, Some(1));
        assert_eq!(
            observer.events(),
            vec!["added:app.db", "removed:app.db:true"]
        );
    }

    #[test]
    fn test_update_size_refreshes_last_modified() {
        let (manager, observer, temp_dir) = create_test_manager();
        let path = create_target_db(temp_dir.path(), "app.db");
        let added = manager.add_managed_database(&path, Some(1)).unwrap();

        std::thread::sleep(std::time::Duration::from_millis(5));
        let updated = manager
            .update_managed_database(&path, MutableFields::size(Some(8192)))
            .unwrap()
            .unwrap();

        assert_eq!(updated.size, Some(8192));
        assert_eq!(updated.status, DatabaseStatus::Active);
        assert!(updated.last_modified > added.last_modified);
        assert_eq!(observer.events(), vec!["added:app.db", "changed:app.db"]);
    }

    #[test]
    fn test_update_status_moves_attachment() {
        let (manager, _observer, temp_dir) = create_test_manager();
        let path = create_target_db(temp_dir.path(), "app.db");
        manager.add_managed_database(&path, None).unwrap();

        manager
            .update_managed_database(&path, MutableFields::status(DatabaseStatus::Inactive))
            .unwrap();
        assert!(!manager.is_attached(&path));

        manager
            .update_managed_database(&path, MutableFields::status(DatabaseStatus::Active))
            .unwrap();
        assert!(manager.is_attached(&path));
    }

    #[test]
    fn test_update_rejects_removed_status_changes() {
        let (manager, _observer, temp_dir) = create_test_manager();
        let path = create_target_db(temp_dir.path(), "app.db");
        manager.add_managed_database(&path, None).unwrap();

        let err = manager
            .update_managed_database(&path, MutableFields::status(DatabaseStatus::Removed))
            .unwrap_err();
        assert!(matches!(err, DbWatchError::Validation { .. }));

        manager.remove_managed_database(&path).unwrap();
        let err = manager
            .update_managed_database(&path, MutableFields::status(DatabaseStatus::Active))
            .unwrap_err();
        assert!(matches!(err, DbWatchError::InvalidTransition { .. }));
    }

    #[test]
    fn test_list_orders_by_most_recently_modified() {
        let (manager, _observer, temp_dir) = create_test_manager();
        let first = create_target_db(temp_dir.path(), "first.db");
        let second = create_target_db(temp_dir.path(), "second.db");

        manager.add_managed_database(&first, None).unwrap();
        manager.add_managed_database(&second, None).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        manager
            .update_managed_database(&first, MutableFields::size(Some(10)))
            .unwrap();

        let names: Vec<String> = manager
            .list_managed_databases()
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["first.db", "second.db"]);
    }

    #[test]
    fn test_get_database_info_reports_tables() {
        let (manager, _observer, temp_dir) = create_test_manager();
        let path = create_target_db(temp_dir.path(), "app.db");
        manager.add_managed_database(&path, None).unwrap();

        let tables = manager.get_database_info(&path).unwrap();
        assert_eq!(
            tables,
            vec![TableSummary {
                name: "items".to_string(),
                row_count: 2
            }]
        );
    }

    #[test]
    fn test_cleanup_closes_everything() {
        let (manager, observer, temp_dir) = create_test_manager();
        let path = create_target_db(temp_dir.path(), "app.db");
        manager.add_managed_database(&path, None).unwrap();

        manager.cleanup().unwrap();
        assert!(!manager.is_initialized());
        assert!(manager.attached_paths().is_empty());
        assert!(matches!(
            manager.list_managed_databases().unwrap_err(),
            DbWatchError::NotConnected { .. }
        ));
        assert_eq!(observer.events().last().map(String::as_str), Some("cleanup"));
    }

    #[test]
    fn test_restore_attachments_after_restart() {
        let (manager, _observer, temp_dir) = create_test_manager();
        let kept = create_target_db(temp_dir.path(), "kept.db");
        let lost = create_target_db(temp_dir.path(), "lost.db");
        manager.add_managed_database(&kept, None).unwrap();
        manager.add_managed_database(&lost, None).unwrap();
        manager.cleanup().unwrap();

        std::fs::remove_file(&lost).unwrap();
        manager.initialize().unwrap();

        assert_eq!(manager.restore_attachments().unwrap(), 1);
        assert!(manager.is_attached(&kept));
        assert!(!manager.is_attached(&lost));
        let lost_record = manager.get_managed_database(&lost).unwrap().unwrap();
        assert!(lost_record.is_removed());
        assert_eq!(manager.count_managed_databases().unwrap(), 1);
    }

    #[test]
    fn test_restore_marks_unopenable_file_as_error() {
        let (manager, observer, temp_dir) = create_test_manager();
        let broken = create_target_db(temp_dir.path(), "broken.db");
        manager.add_managed_database(&broken, None).unwrap();
        manager.cleanup().unwrap();

        std::fs::write(&broken, b"this is no longer a sqlite file").unwrap();
        manager.initialize().unwrap();

        assert_eq!(manager.restore_attachments().unwrap(), 0);
        let record = manager.get_managed_database(&broken).unwrap().unwrap();
        assert_eq!(record.status, DatabaseStatus::Error);
        assert!(record.last_checked.is_some());
        assert_eq!(manager.count_managed_databases().unwrap(), 1);
        assert!(observer.events().contains(&"changed:broken.db".to_string()));
    }

    #[test]
    fn test_restore_removes_rows_for_deleted_files() {
        let (manager, observer, temp_dir) = create_test_manager();
        let gone = create_target_db(temp_dir.path(), "gone.db");
        manager.add_managed_database(&gone, None).unwrap();
        manager
            .update_managed_database(&gone, MutableFields::status(DatabaseStatus::Error))
            .unwrap();
        manager.cleanup().unwrap();

        std::fs::remove_file(&gone).unwrap();
        manager.initialize().unwrap();
        manager.restore_attachments().unwrap();

        assert_eq!(manager.count_managed_databases().unwrap(), 0);
        assert!(observer
            .events()
            .contains(&"removed:gone.db:true".to_string()));
    }
}
