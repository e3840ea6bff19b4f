//! SQLite-backed core store.

use super::statements::Statement;
use crate::config::StoreConfig;
use crate::error::{DbWatchError, Result};
use rusqlite::{Connection, OpenFlags, OptionalExtension, Params, Row};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, warn};

/// Outcome of a write statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecuteSummary {
    /// Rows changed by the statement.
    pub changes: usize,
    /// Rowid of the most recent successful insert on the connection.
    pub last_insert_id: i64,
}

/// Open a SQLite connection with the durability settings every dbwatch
/// connection shares.
///
/// Read-write connections switch to WAL; read-only connections leave the
/// journal mode alone. Foreign keys and the busy timeout are always set.
pub fn open_connection(path: &Path, read_only: bool) -> Result<Connection> {
    let operation = if read_only { "open_read_only" } else { "open" };

    let conn = if read_only {
        Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
    } else {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| DbWatchError::io_with_path(e, parent))?;
            }
        }
        Connection::open(path)
    }
    .map_err(|e| DbWatchError::Connection {
        operation,
        message: format!("Failed to open {}: {}", path.display(), e),
        source: Some(e),
    })?;

    if !read_only {
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| DbWatchError::Connection {
                operation,
                message: format!("Failed to set journal mode: {}", e),
                source: Some(e),
            })?;
    }

    conn.busy_timeout(Duration::from_millis(StoreConfig::BUSY_TIMEOUT_MS))
        .and_then(|_| conn.pragma_update(None, "foreign_keys", true))
        .map_err(|e| DbWatchError::Connection {
            operation,
            message: format!("Failed to set pragmas: {}", e),
            source: Some(e),
        })?;

    Ok(conn)
}

/// Statement runner bound to a live connection or an open transaction.
pub struct StoreTx<'a> {
    conn: &'a Connection,
}

impl<'a> StoreTx<'a> {
    fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Run a row-returning statement and map every row.
    pub fn query<T, P, F>(
        &self,
        operation: &'static str,
        stmt: Statement,
        params: P,
        mut map: F,
    ) -> Result<Vec<T>>
    where
        P: Params,
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    {
        let query_err = |source| DbWatchError::Query { operation, source };

        let mut prepared = self.conn.prepare_cached(stmt.sql()).map_err(query_err)?;
        let rows = prepared
            .query_map(params, |row| map(row))
            .map_err(query_err)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(query_err)?);
        }
        Ok(out)
    }

    /// Run a statement expected to return at most one row.
    pub fn get<T, P, F>(
        &self,
        operation: &'static str,
        stmt: Statement,
        params: P,
        map: F,
    ) -> Result<Option<T>>
    where
        P: Params,
        F: FnOnce(&Row<'_>) -> rusqlite::Result<T>,
    {
        let query_err = |source| DbWatchError::Query { operation, source };

        let mut prepared = self.conn.prepare_cached(stmt.sql()).map_err(query_err)?;
        prepared
            .query_row(params, map)
            .optional()
            .map_err(query_err)
    }

    /// Run a write statement.
    pub fn execute<P: Params>(
        &self,
        operation: &'static str,
        stmt: Statement,
        params: P,
    ) -> Result<ExecuteSummary> {
        let execute_err = |source| DbWatchError::Execute { operation, source };

        let mut prepared = self.conn.prepare_cached(stmt.sql()).map_err(execute_err)?;
        let changes = prepared.execute(params).map_err(execute_err)?;

        Ok(ExecuteSummary {
            changes,
            last_insert_id: self.conn.last_insert_rowid(),
        })
    }
}

/// Durable store for system configuration and the managed-database registry.
///
/// Holds at most one read-write connection. Thread-safe via an internal
/// mutex; no lock is held once a call returns.
pub struct MetadataStore {
    db_path: PathBuf,
    conn: Mutex<Option<Connection>>,
}

impl MetadataStore {
    /// Create a disconnected store for the given database file.
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            conn: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn lock_conn(&self, operation: &'static str) -> Result<MutexGuard<'_, Option<Connection>>> {
        self.conn.lock().map_err(|_| DbWatchError::Connection {
            operation,
            message: "Failed to acquire store connection lock".to_string(),
            source: None,
        })
    }

    pub fn is_connected(&self) -> bool {
        self.conn.lock().map(|guard| guard.is_some()).unwrap_or(false)
    }

    /// Open the connection. Calling this while connected does nothing.
    pub fn connect(&self) -> Result<()> {
        let mut guard = self.lock_conn("connect")?;
        if guard.is_some() {
            return Ok(());
        }

        let conn = open_connection(&self.db_path, false)?;
        conn.set_prepared_statement_cache_capacity(Statement::ALL.len());
        *guard = Some(conn);

        debug!("Connected core store at {}", self.db_path.display());
        Ok(())
    }

    /// Release the connection and its statement cache. Idempotent.
    pub fn disconnect(&self) -> Result<()> {
        let mut guard = self.lock_conn("disconnect")?;
        let Some(conn) = guard.take() else {
            return Ok(());
        };

        conn.flush_prepared_statement_cache();
        conn.close().map_err(|(_, e)| DbWatchError::Connection {
            operation: "disconnect",
            message: format!("Failed to close core store: {}", e),
            source: Some(e),
        })?;

        debug!("Disconnected core store at {}", self.db_path.display());
        Ok(())
    }

    fn with_conn<T>(
        &self,
        operation: &'static str,
        f: impl FnOnce(StoreTx<'_>) -> Result<T>,
    ) -> Result<T> {
        let guard = self.lock_conn(operation)?;
        let conn = guard
            .as_ref()
            .ok_or(DbWatchError::NotConnected { operation })?;
        f(StoreTx::new(conn))
    }

    pub fn query<T, P, F>(
        &self,
        operation: &'static str,
        stmt: Statement,
        params: P,
        map: F,
    ) -> Result<Vec<T>>
    where
        P: Params,
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    {
        self.with_conn(operation, |tx| tx.query(operation, stmt, params, map))
    }

    pub fn get<T, P, F>(
        &self,
        operation: &'static str,
        stmt: Statement,
        params: P,
        map: F,
    ) -> Result<Option<T>>
    where
        P: Params,
        F: FnOnce(&Row<'_>) -> rusqlite::Result<T>,
    {
        self.with_conn(operation, |tx| tx.get(operation, stmt, params, map))
    }

    pub fn execute<P: Params>(
        &self,
        operation: &'static str,
        stmt: Statement,
        params: P,
    ) -> Result<ExecuteSummary> {
        self.with_conn(operation, |tx| tx.execute(operation, stmt, params))
    }

    /// Run a batch of schema/DDL statements.
    pub fn exec(&self, operation: &'static str, sql: &str) -> Result<()> {
        let guard = self.lock_conn(operation)?;
        let conn = guard
            .as_ref()
            .ok_or(DbWatchError::NotConnected { operation })?;
        conn.execute_batch(sql)
            .map_err(|source| DbWatchError::Execute { operation, source })
    }

    /// Run `body` atomically.
    ///
    /// Commits when `body` succeeds. Any error inside `body` rolls the
    /// transaction back and is returned wrapped in `DbWatchError::Transaction`.
    pub fn transaction<T>(
        &self,
        operation: &'static str,
        body: impl FnOnce(&StoreTx<'_>) -> Result<T>,
    ) -> Result<T> {
        let mut guard = self.lock_conn(operation)?;
        let conn = guard
            .as_mut()
            .ok_or(DbWatchError::NotConnected { operation })?;

        let wrap = |source: DbWatchError| DbWatchError::Transaction {
            operation,
            source: Box::new(source),
        };

        let tx = conn.transaction().map_err(|source| {
            wrap(DbWatchError::Execute {
                operation: "begin",
                source,
            })
        })?;

        let outcome = body(&StoreTx::new(&tx));
        match outcome {
            Ok(value) => {
                tx.commit().map_err(|source| {
                    wrap(DbWatchError::Execute {
                        operation: "commit",
                        source,
                    })
                })?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback() {
                    warn!("Rollback of {} failed: {}", operation, rollback_err);
                }
                Err(wrap(err))
            }
        }
    }

    /// Store a serializable value under a system configuration key.
    pub fn set_system_config<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let encoded = serde_json::to_string(value)?;
        self.execute(
            "set_system_config",
            Statement::UpsertConfig,
            rusqlite::params![key, encoded, super::timestamp_now()],
        )?;
        Ok(())
    }

    /// Read and decode a system configuration value.
    pub fn get_system_config<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let raw: Option<String> = self.get(
            "get_system_config",
            Statement::SelectConfig,
            rusqlite::params![key],
            |row| row.get(0),
        )?;

        raw.map(|value| serde_json::from_str(&value).map_err(DbWatchError::from))
            .transpose()
    }
}

impl Drop for MetadataStore {
    fn drop(&mut self) {
        if let Err(e) = self.disconnect() {
            warn!("Failed to close core store on drop: {}", e);
        }
    }
}
