//! Registry record types.

use crate::error::{DbWatchError, Result};
use crate::store::parse_timestamp;
use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::Row;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Lifecycle status of a managed database.
///
/// `Removed` is absorbing: once a row is removed, `update` can no longer
/// change its status. Re-adding the path is the only way back to `Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseStatus {
    Active,
    Inactive,
    Error,
    Removed,
}

impl DatabaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatabaseStatus::Active => "active",
            DatabaseStatus::Inactive => "inactive",
            DatabaseStatus::Error => "error",
            DatabaseStatus::Removed => "removed",
        }
    }

    pub fn can_transition_to(self, next: DatabaseStatus) -> bool {
        match self {
            DatabaseStatus::Removed => next == DatabaseStatus::Removed,
            DatabaseStatus::Active | DatabaseStatus::Inactive | DatabaseStatus::Error => true,
        }
    }

    pub fn validate_transition(self, next: DatabaseStatus) -> Result<()> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(DbWatchError::InvalidTransition {
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }
}

impl fmt::Display for DatabaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DatabaseStatus {
    type Err = DbWatchError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(DatabaseStatus::Active),
            "inactive" => Ok(DatabaseStatus::Inactive),
            "error" => Ok(DatabaseStatus::Error),
            "removed" => Ok(DatabaseStatus::Removed),
            other => Err(DbWatchError::validation(
                "status",
                format!("unknown database status '{}'", other),
            )),
        }
    }
}

impl ToSql for DatabaseStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for DatabaseStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|_| FromSqlError::InvalidType)
    }
}

/// A row of the managed-database registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedDatabaseRecord {
    pub id: i64,
    pub path: PathBuf,
    pub name: String,
    pub size: Option<u64>,
    pub status: DatabaseStatus,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    pub last_checked: Option<DateTime<Utc>>,
}

impl ManagedDatabaseRecord {
    /// Map a row selected with the shared registry column list.
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            path: PathBuf::from(row.get::<_, String>(1)?),
            name: row.get(2)?,
            size: row
                .get::<_, Option<i64>>(3)?
                .map(|size| u64::try_from(size).unwrap_or(0)),
            status: row.get(4)?,
            created_at: parse_timestamp(&row.get::<_, String>(5)?),
            last_modified: parse_timestamp(&row.get::<_, String>(6)?),
            last_checked: row
                .get::<_, Option<String>>(7)?
                .map(|raw| parse_timestamp(&raw)),
        })
    }

    pub fn is_removed(&self) -> bool {
        self.status == DatabaseStatus::Removed
    }
}

/// The registry fields `update_managed_database` is allowed to touch.
///
/// `None` leaves the stored value unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MutableFields {
    pub size: Option<u64>,
    pub status: Option<DatabaseStatus>,
    pub last_checked: Option<DateTime<Utc>>,
}

impl MutableFields {
    pub fn size(size: Option<u64>) -> Self {
        Self {
            size,
            ..Self::default()
        }
    }

    pub fn status(status: DatabaseStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn with_last_checked(mut self, at: DateTime<Utc>) -> Self {
        self.last_checked = Some(at);
        self
    }
}

/// Outcome of a removal, delivered to observers even for unknown paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseRemoval {
    pub path: PathBuf,
    /// True when a non-removed row actually moved to `removed`.
    pub was_tracked: bool,
}

/// Table name and row count from an attached database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSummary {
    pub name: String,
    pub row_count: u64,
}

/// Registry key for a path.
pub(crate) fn path_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Display name for a managed database: its file name.
pub(crate) fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path_key(path))
}
