//! Table subscription
//!
//! Registers the value and connection listeners that turn table
//! notifications into update records. Both are registered with immediate
//! notify, so a new subscription first reports the current connection state
//! and then replays every existing entry.

use std::sync::Arc;

use tracing::debug;

use super::dispatch::RecordSink;
use crate::table::{ListenerId, Table};
use crate::value::Value;
use crate::wire::UpdateRecord;

/// A pair of registered listeners feeding one sink
pub struct Subscription {
    table: Arc<dyn Table>,
    value_listener: Option<ListenerId>,
    connection_listener: Option<ListenerId>,
}

impl Subscription {
    /// Subscribe `sink` to every value change and connection transition
    pub fn subscribe<S: RecordSink>(table: Arc<dyn Table>, sink: S) -> Self {
        let sink = Arc::new(sink);

        let connections = Arc::clone(&sink);
        let connection_listener = table.add_connection_listener(
            Arc::new(move |connected: bool, address: Option<&str>| {
                connections.post(UpdateRecord::connection_status(
                    connected,
                    address.map(str::to_string),
                ));
            }),
            true,
        );

        let values = sink;
        let value_listener = table.add_value_listener(
            Arc::new(move |key: &str, value: &Value, is_new: bool| {
                values.post(UpdateRecord::value_changed(key, value.clone(), is_new));
            }),
            true,
        );

        debug!(
            value_listener = %value_listener,
            connection_listener = %connection_listener,
            "Subscribed to table"
        );

        Self {
            table,
            value_listener: Some(value_listener),
            connection_listener: Some(connection_listener),
        }
    }

    /// Remove both listeners. Idempotent.
    pub fn unsubscribe(&mut self) {
        if let Some(id) = self.value_listener.take() {
            self.table.remove_value_listener(id);
        }
        if let Some(id) = self.connection_listener.take() {
            self.table.remove_connection_listener(id);
        }
    }

    pub fn is_active(&self) -> bool {
        self.value_listener.is_some()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
