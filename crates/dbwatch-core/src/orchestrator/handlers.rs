//! Request handlers.
//!
//! Each handler decodes its payload, calls into the registry or watcher,
//! and returns the `data` value of a success envelope.

use super::Orchestrator;
use super::ServerStatus;
use crate::config::ConfigKeys;
use crate::error::{DbWatchError, Result};
use crate::protocol::{PathOperation, PathPayload, Request, UpdatePathsPayload};
use crate::registry::{DatabaseStatus, ManagedDatabaseRecord, MutableFields};
use crate::watcher::WatcherState;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

/// Row shape returned by `list_databases`.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DatabaseSummary<'a> {
    path: &'a Path,
    name: &'a str,
    size: Option<u64>,
    status: DatabaseStatus,
    last_modified: DateTime<Utc>,
}

impl<'a> From<&'a ManagedDatabaseRecord> for DatabaseSummary<'a> {
    fn from(record: &'a ManagedDatabaseRecord) -> Self {
        Self {
            path: &record.path,
            name: &record.name,
            size: record.size,
            status: record.status,
            last_modified: record.last_modified,
        }
    }
}

impl Orchestrator {
    pub(super) fn handle_status(&self) -> Result<Value> {
        let state = self.tracker.snapshot();
        Ok(json!({
            "serverId": state.server_id,
            "status": state.status,
            "uptime": state.uptime_secs(),
            "databaseCount": state.database_count,
            "watchedPaths": state.watched_paths,
            "lastEvent": state.last_event,
            "error": state.error,
        }))
    }

    pub(super) fn handle_list_databases(&self) -> Result<Value> {
        let records = self.manager.list_managed_databases()?;
        let summaries: Vec<DatabaseSummary<'_>> = records.iter().map(DatabaseSummary::from).collect();
        Ok(serde_json::to_value(summaries)?)
    }

    pub(super) fn handle_database_info(&self, request: &Request) -> Result<Value> {
        let PathPayload { path } = request.payload()?;
        let path = resolve_path(&path);

        let record = self.tracked_record(&path)?;
        let tables = self.manager.get_database_info(&path)?;

        let mut value = serde_json::to_value(&record)?;
        value["tables"] = serde_json::to_value(tables)?;
        Ok(value)
    }

    /// Register a database by hand, or re-activate one in `inactive`/`error`.
    pub(super) fn handle_attach_database(&self, request: &Request) -> Result<Value> {
        let PathPayload { path } = request.payload()?;
        let metadata = std::fs::metadata(&path).map_err(|_| DbWatchError::NotFound {
            path: path.clone(),
        })?;
        if !metadata.is_file() {
            return Err(DbWatchError::validation(
                "path",
                format!("{} is not a file", path.display()),
            ));
        }
        let path = std::fs::canonicalize(&path).map_err(|e| DbWatchError::io_with_path(e, &path))?;
        let size = Some(metadata.len());

        let record = match self.manager.get_managed_database(&path)? {
            Some(existing) if existing.status == DatabaseStatus::Active => {
                return Err(DbWatchError::AddFailed {
                    path,
                    message: "database is already attached".to_string(),
                });
            }
            Some(existing) if !existing.is_removed() => {
                let fields = MutableFields {
                    size,
                    status: Some(DatabaseStatus::Active),
                    last_checked: Some(Utc::now()),
                };
                self.manager
                    .update_managed_database(&path, fields)?
                    .ok_or_else(|| DbWatchError::NotFound { path: path.clone() })?
            }
            _ => self.manager.add_managed_database(&path, size)?,
        };

        Ok(serde_json::to_value(record)?)
    }

    pub(super) fn handle_detach_database(&self, request: &Request) -> Result<Value> {
        let PathPayload { path } = request.payload()?;
        let path = resolve_path(&path);

        self.tracked_record(&path)?;
        self.manager.remove_managed_database(&path)?;

        Ok(json!({ "message": format!("Database detached: {}", path.display()) }))
    }

    pub(super) async fn handle_list_paths(&self) -> Result<Value> {
        let watcher = self.watcher.lock().await;
        Ok(json!({ "watchedPaths": watcher.paths() }))
    }

    pub(super) async fn handle_update_paths(&self, request: &Request) -> Result<Value> {
        let payload: UpdatePathsPayload = request.payload()?;
        if payload.operation != PathOperation::Remove {
            if let Some(missing) = payload.paths.iter().find(|path| !path.is_dir()) {
                return Err(DbWatchError::validation(
                    "paths",
                    format!("{} is not a directory", missing.display()),
                ));
            }
        }

        let operation = payload.operation;
        let mut watcher = self.watcher.lock().await;
        let reloaded = match operation {
            PathOperation::Set => watcher.reload_paths(payload.paths).await,
            PathOperation::Add => watcher.add_paths(payload.paths).await,
            PathOperation::Remove => watcher.remove_paths(&payload.paths).await,
        };
        let paths = watcher.paths().to_vec();
        let watcher_state = watcher.state();
        drop(watcher);

        self.tracker.set_watched_paths(paths.clone());
        let watcher_died =
            watcher_state == WatcherState::Stopped && self.tracker.status() == ServerStatus::Running;
        if watcher_died {
            let message = match &reloaded {
                Err(e) => format!("Watcher stopped after path update: {}", e),
                Ok(()) => "Watcher stopped after path update".to_string(),
            };
            self.tracker.mark_failed(message);
        } else if let Err(e) = &reloaded {
            self.tracker.report_error(e.to_string());
        }
        reloaded?;
        if self.manager.is_initialized() {
            self.manager
                .set_system_config(ConfigKeys::WATCHED_PATHS, &paths)?;
        }

        Ok(json!({
            "operation": operation.as_str(),
            "watchedPaths": paths,
        }))
    }

    /// The non-removed record for `path`, or `NotFound`.
    fn tracked_record(&self, path: &Path) -> Result<ManagedDatabaseRecord> {
        self.manager
            .get_managed_database(path)?
            .filter(|record| !record.is_removed())
            .ok_or_else(|| DbWatchError::NotFound {
                path: path.to_path_buf(),
            })
    }
}

/// Registry paths are canonical; fall back to the given path for files that are gone.
fn resolve_path(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
