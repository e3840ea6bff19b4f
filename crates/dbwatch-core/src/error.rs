//! Error types for dbwatch.
//!
//! Store-layer variants carry the name of the operation that failed so a
//! message surfaced at the request boundary still says where it came from.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the dbwatch core.
#[derive(Debug, Error)]
pub enum DbWatchError {
    // Store errors
    #[error("Connection error during {operation}: {message}")]
    Connection {
        operation: &'static str,
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    #[error("Store is not connected (operation: {operation})")]
    NotConnected { operation: &'static str },

    #[error("Query failed during {operation}: {source}")]
    Query {
        operation: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Execute failed during {operation}: {source}")]
    Execute {
        operation: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Transaction {operation} rolled back: {source}")]
    Transaction {
        operation: &'static str,
        #[source]
        source: Box<DbWatchError>,
    },

    // Registry errors
    #[error("Initialization failed: {source}")]
    Initialization {
        #[source]
        source: Box<DbWatchError>,
    },

    #[error("Failed to add database {path:?}: {message}")]
    AddFailed { path: PathBuf, message: String },

    #[error("Database not found: {path:?}")]
    NotFound { path: PathBuf },

    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    // Request errors
    #[error("Validation error for {field}: {message}")]
    Validation { field: String, message: String },

    // Watcher errors
    #[error("Watcher error: {message}")]
    Watcher {
        message: String,
        #[source]
        source: Option<notify::Error>,
    },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("{0}")]
    Other(String),
}

/// Result type alias for dbwatch operations.
pub type Result<T> = std::result::Result<T, DbWatchError>;

impl From<std::io::Error> for DbWatchError {
    fn from(err: std::io::Error) -> Self {
        DbWatchError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for DbWatchError {
    fn from(err: serde_json::Error) -> Self {
        DbWatchError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl DbWatchError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        DbWatchError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Shorthand for a validation failure on a request field.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        DbWatchError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DbWatchError::NotFound { .. })
    }

    /// True when the underlying engine rejected a write on a UNIQUE constraint.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            DbWatchError::Execute { source, .. } | DbWatchError::Query { source, .. } => {
                matches!(
                    source,
                    rusqlite::Error::SqliteFailure(err, _)
                        if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                )
            }
            DbWatchError::Transaction { source, .. } => source.is_unique_violation(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_includes_operation() {
        let err = DbWatchError::NotConnected {
            operation: "list_managed_databases",
        };
        assert_eq!(
            err.to_string(),
            "Store is not connected (operation: list_managed_databases)"
        );
    }

    #[test]
    fn test_transaction_error_wraps_cause() {
        let err = DbWatchError::Transaction {
            operation: "seed_system_config",
            source: Box::new(DbWatchError::Other("boom".into())),
        };
        assert_eq!(err.to_string(), "Transaction seed_system_config rolled back: boom");
    }

    #[test]
    fn test_is_not_found() {
        assert!(DbWatchError::NotFound {
            path: PathBuf::from("/tmp/a.db")
        }
        .is_not_found());
        assert!(!DbWatchError::Other("x".into()).is_not_found());
    }
}
