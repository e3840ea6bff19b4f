//! Managed-database registry.
//!
//! The registry persists one row per discovered database file in the core
//! store and keeps a read-only connection open for every active entry:
//! - **Records**: path, name, size, status and timestamps, soft-deleted on removal
//! - **Attachments**: live connections used for table introspection
//!
//! Lifecycle events are delivered to subscribed [`RegistryObserver`]s.

mod attachment;
mod manager;
mod observer;
mod types;

pub use attachment::AttachedConnection;
pub use manager::DatabaseRegistryManager;
pub use observer::RegistryObserver;
pub use types::{
    DatabaseRemoval, DatabaseStatus, ManagedDatabaseRecord, MutableFields, TableSummary,
};
