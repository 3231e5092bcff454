//! In-process table
//!
//! A complete [`Table`] kept in memory. Each remote address it can be pointed
//! at is simulated by a stored snapshot of entries; switching remotes swaps
//! snapshots. Listener callbacks are delivered in mutation order from a
//! dedicated notifier thread, never from the caller's thread.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, info, trace};

use super::{ConnectionListener, ListenerId, Table, ValueListener};
use crate::error::TableError;
use crate::value::{Value, ValueKind};

/// A listener plus the sequence number current when it was registered.
/// Broadcast notifications older than that are not delivered to it.
struct Registered<L> {
    listener: L,
    since: u64,
}

enum Event {
    Value {
        key: String,
        value: Value,
        is_new: bool,
    },
    Connection {
        connected: bool,
        address: Option<String>,
    },
}

struct Notification {
    seq: u64,
    /// `None` broadcasts to every eligible listener
    target: Option<ListenerId>,
    event: Event,
}

#[derive(Default)]
struct State {
    entries: BTreeMap<String, Value>,
    address: Option<String>,
    remotes: HashMap<String, BTreeMap<String, Value>>,
    unreachable: HashSet<String>,
    value_listeners: BTreeMap<ListenerId, Registered<ValueListener>>,
    connection_listeners: BTreeMap<ListenerId, Registered<ConnectionListener>>,
    next_listener: u64,
    seq: u64,
}

impl State {
    fn next_id(&mut self) -> ListenerId {
        self.next_listener += 1;
        ListenerId(self.next_listener)
    }
}

/// In-memory table with a background notifier thread
pub struct MemoryTable {
    state: Arc<Mutex<State>>,
    notifier: Sender<Notification>,
}

impl MemoryTable {
    /// Create an empty, disconnected table
    pub fn new() -> Self {
        let state = Arc::new(Mutex::new(State::default()));
        let (notifier, rx) = crossbeam_channel::unbounded();

        let thread_state = Arc::clone(&state);
        thread::spawn(move || notifier_loop(thread_state, rx));

        Self { state, notifier }
    }

    /// Store the entries a remote at `address` will serve once connected
    pub fn seed_remote<I, K>(&self, address: &str, entries: I)
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let mut state = self.state.lock();
        let remote = state.remotes.entry(address.to_string()).or_default();
        remote.extend(entries.into_iter().map(|(k, v)| (k.into(), v)));
    }

    /// Make `initialize(address)` fail (or succeed again)
    pub fn set_unreachable(&self, address: &str, unreachable: bool) {
        let mut state = self.state.lock();
        if unreachable {
            state.unreachable.insert(address.to_string());
        } else {
            state.unreachable.remove(address);
        }
    }

    /// Current value at `key`
    pub fn get_value(&self, key: &str) -> Option<Value> {
        self.state.lock().entries.get(key).cloned()
    }

    /// All keys, sorted
    pub fn keys(&self) -> Vec<String> {
        self.state.lock().entries.keys().cloned().collect()
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().address.is_some()
    }

    pub fn value_listener_count(&self) -> usize {
        self.state.lock().value_listeners.len()
    }

    pub fn connection_listener_count(&self) -> usize {
        self.state.lock().connection_listeners.len()
    }

    /// Queue a notification. Must be called with the state lock held so the
    /// queue order matches mutation order.
    fn enqueue(&self, state: &mut State, target: Option<ListenerId>, event: Event) {
        state.seq += 1;
        // The receiver lives as long as the notifier thread, which outlives
        // every sender; a failed send only happens during process teardown.
        let _ = self.notifier.send(Notification {
            seq: state.seq,
            target,
            event,
        });
    }

    fn disconnect(&self, state: &mut State) {
        let Some(address) = state.address.take() else {
            return;
        };
        let entries = std::mem::take(&mut state.entries);
        state.remotes.insert(address.clone(), entries);
        info!("Table disconnected from {}", address);
        self.enqueue(
            state,
            None,
            Event::Connection {
                connected: false,
                address: None,
            },
        );
    }
}

impl Default for MemoryTable {
    fn default() -> Self {
        Self::new()
    }
}

impl Table for MemoryTable {
    fn set_value(&self, key: &str, value: Value) -> Result<(), TableError> {
        let mut state = self.state.lock();

        let is_new = match state.entries.get(key) {
            None => true,
            Some(existing) if existing.kind() != value.kind() => {
                return Err(TableError::TypeMismatch {
                    key: key.to_string(),
                    existing: existing.kind(),
                    attempted: value.kind(),
                });
            }
            Some(existing) if *existing == value => return Ok(()),
            Some(_) => false,
        };

        state.entries.insert(key.to_string(), value.clone());
        trace!(key, is_new, "Table value set");
        self.enqueue(
            &mut state,
            None,
            Event::Value {
                key: key.to_string(),
                value,
                is_new,
            },
        );
        Ok(())
    }

    fn entry_kind(&self, key: &str) -> Option<ValueKind> {
        self.state.lock().entries.get(key).map(Value::kind)
    }

    fn entry_count(&self) -> usize {
        self.state.lock().entries.len()
    }

    fn add_value_listener(&self, listener: ValueListener, immediate_notify: bool) -> ListenerId {
        let mut state = self.state.lock();
        let id = state.next_id();
        let since = state.seq;
        state
            .value_listeners
            .insert(id, Registered { listener, since });

        if immediate_notify {
            let snapshot: Vec<(String, Value)> = state
                .entries
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            for (key, value) in snapshot {
                self.enqueue(
                    &mut state,
                    Some(id),
                    Event::Value {
                        key,
                        value,
                        is_new: true,
                    },
                );
            }
        }

        debug!(listener = %id, immediate_notify, "Value listener added");
        id
    }

    fn remove_value_listener(&self, id: ListenerId) {
        if self.state.lock().value_listeners.remove(&id).is_some() {
            debug!(listener = %id, "Value listener removed");
        }
    }

    fn add_connection_listener(
        &self,
        listener: ConnectionListener,
        immediate_notify: bool,
    ) -> ListenerId {
        let mut state = self.state.lock();
        let id = state.next_id();
        let since = state.seq;
        state
            .connection_listeners
            .insert(id, Registered { listener, since });

        if immediate_notify {
            let address = state.address.clone();
            self.enqueue(
                &mut state,
                Some(id),
                Event::Connection {
                    connected: address.is_some(),
                    address,
                },
            );
        }

        debug!(listener = %id, immediate_notify, "Connection listener added");
        id
    }

    fn remove_connection_listener(&self, id: ListenerId) {
        if self.state.lock().connection_listeners.remove(&id).is_some() {
            debug!(listener = %id, "Connection listener removed");
        }
    }

    fn remote_address(&self) -> Option<String> {
        self.state.lock().address.clone()
    }

    fn shutdown(&self) {
        let mut state = self.state.lock();
        self.disconnect(&mut state);
    }

    fn initialize(&self, address: &str) -> Result<(), TableError> {
        let mut state = self.state.lock();

        if state.address.as_deref() == Some(address) {
            return Ok(());
        }
        self.disconnect(&mut state);

        if state.unreachable.contains(address) {
            return Err(TableError::Unavailable {
                address: address.to_string(),
                reason: "remote did not respond".to_string(),
            });
        }

        let remote = state.remotes.remove(address).unwrap_or_default();
        state.address = Some(address.to_string());
        info!("Table connected to {} ({} entries)", address, remote.len());

        self.enqueue(
            &mut state,
            None,
            Event::Connection {
                connected: true,
                address: Some(address.to_string()),
            },
        );

        for (key, value) in remote {
            // Remote values win over local ones written while disconnected
            let is_new = !state.entries.contains_key(&key);
            state.entries.insert(key.clone(), value.clone());
            self.enqueue(&mut state, None, Event::Value { key, value, is_new });
        }

        Ok(())
    }
}

/// Deliver notifications until every sender is gone
fn notifier_loop(state: Arc<Mutex<State>>, rx: Receiver<Notification>) {
    for notification in rx.iter() {
        let Notification { seq, target, event } = notification;

        match event {
            Event::Value { key, value, is_new } => {
                let listeners: Vec<ValueListener> = {
                    let state = state.lock();
                    eligible(&state.value_listeners, seq, target)
                };
                for listener in listeners {
                    listener(&key, &value, is_new);
                }
            }
            Event::Connection { connected, address } => {
                let listeners: Vec<ConnectionListener> = {
                    let state = state.lock();
                    eligible(&state.connection_listeners, seq, target)
                };
                for listener in listeners {
                    listener(connected, address.as_deref());
                }
            }
        }
    }
}

fn eligible<L: Clone>(
    listeners: &BTreeMap<ListenerId, Registered<L>>,
    seq: u64,
    target: Option<ListenerId>,
) -> Vec<L> {
    match target {
        Some(id) => listeners
            .get(&id)
            .map(|r| r.listener.clone())
            .into_iter()
            .collect(),
        None => listeners
            .values()
            .filter(|r| r.since < seq)
            .map(|r| r.listener.clone())
            .collect(),
    }
}
