//! Typed lifecycle notifications from the registry manager.

use super::types::{DatabaseRemoval, ManagedDatabaseRecord};

/// Receives registry lifecycle events.
///
/// Callbacks run synchronously on the thread that performed the mutation,
/// after the change is committed. Implementations must not call back into
/// the manager while handling an event.
pub trait RegistryObserver: Send + Sync {
    fn on_database_added(&self, _record: &ManagedDatabaseRecord) {}

    fn on_database_changed(&self, _record: &ManagedDatabaseRecord) {}

    fn on_database_removed(&self, _removal: &DatabaseRemoval) {}

    fn on_cleanup(&self) {}
}
