//! Read-only connections to managed databases.

use super::types::TableSummary;
use crate::error::{DbWatchError, Result};
use crate::store::open_connection;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use std::path::{Path, PathBuf};

/// An open read-only connection to a managed database file.
pub struct AttachedConnection {
    path: PathBuf,
    conn: Connection,
    attached_at: DateTime<Utc>,
}

impl AttachedConnection {
    /// Open `path` read-only and confirm it is a readable SQLite database.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = open_connection(path, true)?;

        // Opening is lazy; touching the schema catches non-database files.
        conn.query_row("SELECT COUNT(*) FROM sqlite_master", [], |row| {
            row.get::<_, i64>(0)
        })
        .map_err(|e| DbWatchError::Connection {
            operation: "attach",
            message: format!("{} is not a readable database: {}", path.display(), e),
            source: Some(e),
        })?;

        Ok(Self {
            path: path.to_path_buf(),
            conn,
            attached_at: Utc::now(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn attached_at(&self) -> DateTime<Utc> {
        self.attached_at
    }

    /// User tables with their row counts, ordered by name.
    pub fn table_summaries(&self) -> Result<Vec<TableSummary>> {
        let query_err = |source| DbWatchError::Query {
            operation: "get_database_info",
            source,
        };

        let mut stmt = self
            .conn
            .prepare(
                "SELECT name FROM sqlite_master
                 WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
                 ORDER BY name",
            )
            .map_err(query_err)?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(query_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(query_err)?;

        names
            .into_iter()
            .map(|name| -> Result<TableSummary> {
                let sql = format!("SELECT COUNT(*) FROM {}", quote_identifier(&name));
                let count: i64 = self
                    .conn
                    .query_row(&sql, [], |row| row.get(0))
                    .map_err(query_err)?;
                Ok(TableSummary {
                    name,
                    row_count: u64::try_from(count).unwrap_or(0),
                })
            })
            .collect()
    }

    pub fn close(self) -> Result<()> {
        let path = self.path;
        self.conn.close().map_err(|(_, e)| DbWatchError::Connection {
            operation: "detach",
            message: format!("Failed to close {}: {}", path.display(), e),
            source: Some(e),
        })
    }
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
