//! dbwatch core - live registry of SQLite database files.
//!
//! Watches directory trees for database files, records each one in a durable
//! registry with its lifecycle status, keeps a read-only connection open to
//! every active database, and answers requests about all of it. The crate is
//! transport-agnostic: callers hand decoded [`Request`]s to
//! [`Orchestrator::dispatch`].
//!
//! # Example
//!
//! ```rust,ignore
//! use dbwatch_core::{Orchestrator, Request, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> dbwatch_core::Result<()> {
//!     let config = ServerConfig::new("/var/lib/dbwatch/core.db", vec!["/srv/data".into()]);
//!     let server = Orchestrator::new(config);
//!     server.start().await?;
//!
//!     let response = server.dispatch(Request::new("list_databases")).await;
//!     println!("{}", serde_json::to_string_pretty(&response)?);
//!
//!     server.stop().await
//! }
//! ```

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod protocol;
pub mod registry;
pub mod store;
pub mod watcher;

pub use config::ServerConfig;
pub use error::{DbWatchError, Result};
pub use orchestrator::{AggregateServerState, Orchestrator, ServerEvent, ServerStatus};
pub use protocol::{Request, Response};
pub use registry::{
    DatabaseRegistryManager, DatabaseStatus, ManagedDatabaseRecord, RegistryObserver,
};
pub use store::MetadataStore;
pub use watcher::{DatabaseEvent, DatabaseEventKind, DatabaseWatcher, WatcherConfig};
