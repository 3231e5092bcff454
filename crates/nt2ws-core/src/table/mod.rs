//! Table collaborator interface
//!
//! The bridge never owns the key-value table. It is handed a shared
//! `Arc<dyn Table>` and only observes it through listeners and mutates it
//! through typed setters. Listener callbacks run on a context owned by the
//! table implementation and must not block.

mod memory;

use std::fmt;
use std::sync::Arc;

pub use memory::MemoryTable;

use crate::error::TableError;
use crate::value::{Value, ValueKind};

/// Handle identifying a registered listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// Called with `(key, value, is_new)` for every key creation or update
pub type ValueListener = Arc<dyn Fn(&str, &Value, bool) + Send + Sync>;

/// Called with `(connected, remote_address)` on connection transitions
pub type ConnectionListener = Arc<dyn Fn(bool, Option<&str>) + Send + Sync>;

/// A shared key-value table with change notification
pub trait Table: Send + Sync {
    /// Set the value at `key`, creating the entry if needed
    fn set_value(&self, key: &str, value: Value) -> Result<(), TableError>;

    /// Kind of the entry at `key`, if it exists
    fn entry_kind(&self, key: &str) -> Option<ValueKind>;

    /// Number of entries currently in the table
    fn entry_count(&self) -> usize;

    /// Register a global value listener. With `immediate_notify`, the listener
    /// first receives every existing entry with `is_new = true`.
    fn add_value_listener(&self, listener: ValueListener, immediate_notify: bool) -> ListenerId;

    /// Remove a value listener. Unknown ids are ignored.
    fn remove_value_listener(&self, id: ListenerId);

    /// Register a connection listener. With `immediate_notify`, the listener
    /// first receives the current connection state.
    fn add_connection_listener(
        &self,
        listener: ConnectionListener,
        immediate_notify: bool,
    ) -> ListenerId;

    /// Remove a connection listener. Unknown ids are ignored.
    fn remove_connection_listener(&self, id: ListenerId);

    /// Address of the connected remote, if connected
    fn remote_address(&self) -> Option<String>;

    /// Disconnect from the current remote
    fn shutdown(&self);

    /// Connect to a remote at `address`
    fn initialize(&self, address: &str) -> Result<(), TableError>;
}
