//! Dispatch queue
//!
//! Hands records from the table's notification thread to a session's own
//! task. Posting takes a short lock and never waits, so a slow client can
//! never stall notification delivery to other subscribers.
//!
//! ## Coalescing
//!
//! A pending update (`is_new = false`) for a key is replaced by a later
//! update for the same key, and the replacement moves to the back of the
//! queue. Delivered records therefore keep the table's notification order,
//! and a client that falls behind receives the latest value of each key
//! rather than every intermediate one. Records announcing a new key are
//! never replaced, so initial-state replay reaches the client intact.
//!
//! ## Capacity and overrun
//!
//! The queue holds at most `capacity` pending records plus a reservation
//! the session sizes to the table's snapshot before subscribing. A post
//! that would exceed that marks the session overrun: the client is not
//! draining at all, the session closes, and the client resynchronizes
//! through initial-state replay on its next connection.
//!
//! ## Generations
//!
//! Every sink carries the subscription generation it was created in. After
//! a reconnect the generation advances, pending records are discarded and
//! late posts from the previous subscription are dropped.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{trace, warn};

use crate::wire::UpdateRecord;

/// Anything a table listener can hand records to
pub trait RecordSink: Send + Sync + 'static {
    fn post(&self, record: UpdateRecord) -> PostOutcome;
}

/// What happened to a posted record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostOutcome {
    /// Queued for delivery
    Queued,
    /// Replaced a pending update for the same key
    Coalesced,
    /// Discarded because the queue is closed, overrun or from an old generation
    Dropped,
    /// The queue was full; the session must resynchronize
    Overrun,
}

/// What the consuming side gets next
#[derive(Debug, Clone, PartialEq)]
pub enum Next {
    Record(UpdateRecord),
    Overrun,
    Closed,
}

#[derive(Default)]
struct Pending {
    /// Records in delivery order, keyed by sequence number
    slots: BTreeMap<u64, UpdateRecord>,
    /// Sequence number of the newest pending record per key
    by_key: HashMap<String, u64>,
    next_seq: u64,
    generation: u64,
    reserved: usize,
    closed: bool,
    overrun: bool,
}

impl Pending {
    fn clear(&mut self) -> usize {
        let discarded = self.slots.len();
        self.slots.clear();
        self.by_key.clear();
        discarded
    }

    /// Remove the pending update for `key` if it can be superseded
    fn take_update(&mut self, key: &str) -> bool {
        let Some(&seq) = self.by_key.get(key) else {
            return false;
        };
        match self.slots.get(&seq) {
            Some(UpdateRecord::ValueChanged { is_new: false, .. }) => {
                self.slots.remove(&seq);
                self.by_key.remove(key);
                true
            }
            _ => false,
        }
    }
}

struct Shared {
    capacity: usize,
    pending: Mutex<Pending>,
    wake: Notify,
    overrun: Notify,
}

/// Create a dispatch queue holding at most `capacity` undelivered records
/// beyond the current reservation
pub fn dispatch_queue(capacity: usize) -> (Dispatcher, DispatchReceiver) {
    let shared = Arc::new(Shared {
        capacity: capacity.max(1),
        pending: Mutex::new(Pending::default()),
        wake: Notify::new(),
        overrun: Notify::new(),
    });

    (
        Dispatcher {
            shared: Arc::clone(&shared),
        },
        DispatchReceiver { shared },
    )
}

/// Producer side, callable from any thread
#[derive(Clone)]
pub struct Dispatcher {
    shared: Arc<Shared>,
}

impl Dispatcher {
    /// Post a record stamped with the current generation
    pub fn post(&self, record: UpdateRecord) -> PostOutcome {
        self.post_from(self.generation(), record)
    }

    /// Post a record produced by a subscription of `generation`
    pub fn post_from(&self, generation: u64, record: UpdateRecord) -> PostOutcome {
        let mut pending = self.shared.pending.lock();
        if pending.closed || pending.overrun {
            return PostOutcome::Dropped;
        }
        if generation != pending.generation {
            trace!(
                generation,
                current = pending.generation,
                "Dropping record from previous subscription"
            );
            return PostOutcome::Dropped;
        }

        let coalesced = match &record {
            UpdateRecord::ValueChanged {
                key, is_new: false, ..
            } => pending.take_update(key),
            _ => false,
        };

        let limit = self.shared.capacity + pending.reserved;
        if !coalesced && pending.slots.len() >= limit {
            pending.overrun = true;
            drop(pending);
            warn!(limit, "Dispatch queue full, session must resynchronize");
            self.shared.wake.notify_one();
            self.shared.overrun.notify_waiters();
            return PostOutcome::Overrun;
        }

        let seq = pending.next_seq;
        pending.next_seq += 1;
        if let UpdateRecord::ValueChanged { key, .. } = &record {
            pending.by_key.insert(key.clone(), seq);
        }
        pending.slots.insert(seq, record);
        drop(pending);

        self.shared.wake.notify_one();
        if coalesced {
            PostOutcome::Coalesced
        } else {
            PostOutcome::Queued
        }
    }

    /// A sink bound to the current generation, for handing to listeners
    pub fn sink(&self) -> GenerationSink {
        GenerationSink {
            dispatcher: self.clone(),
            generation: self.generation(),
        }
    }

    pub fn generation(&self) -> u64 {
        self.shared.pending.lock().generation
    }

    /// Start a new generation, discarding everything still pending
    pub fn advance_generation(&self) -> u64 {
        let mut pending = self.shared.pending.lock();
        pending.generation += 1;
        let discarded = pending.clear();
        if discarded > 0 {
            trace!(discarded, "Discarded records from previous subscription");
        }
        pending.generation
    }

    /// Make room for `entries` records on top of the base capacity. Replaces
    /// any earlier reservation.
    pub fn reserve(&self, entries: usize) {
        self.shared.pending.lock().reserved = entries;
    }

    /// Stop accepting records. Idempotent.
    pub fn close(&self) {
        self.shared.pending.lock().closed = true;
        self.shared.wake.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.pending.lock().closed
    }
}

impl RecordSink for Dispatcher {
    fn post(&self, record: UpdateRecord) -> PostOutcome {
        Dispatcher::post(self, record)
    }
}

/// A dispatcher pinned to the generation it was created in
#[derive(Clone)]
pub struct GenerationSink {
    dispatcher: Dispatcher,
    generation: u64,
}

impl GenerationSink {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl RecordSink for GenerationSink {
    fn post(&self, record: UpdateRecord) -> PostOutcome {
        self.dispatcher.post_from(self.generation, record)
    }
}

/// Consumer side, owned by the session task
pub struct DispatchReceiver {
    shared: Arc<Shared>,
}

impl DispatchReceiver {
    /// Wait for the next deliverable record
    pub async fn next(&mut self) -> Next {
        loop {
            if let Some(next) = self.try_next() {
                return next;
            }
            self.shared.wake.notified().await;
        }
    }

    /// Non-waiting variant of [`next`](Self::next); `None` when nothing is
    /// queued
    pub fn try_next(&mut self) -> Option<Next> {
        let mut pending = self.shared.pending.lock();
        if pending.closed {
            return Some(Next::Closed);
        }
        if pending.overrun {
            return Some(Next::Overrun);
        }

        let (seq, record) = pending.slots.pop_first()?;
        if let UpdateRecord::ValueChanged { key, .. } = &record {
            if pending.by_key.get(key) == Some(&seq) {
                pending.by_key.remove(key);
            }
        }
        Some(Next::Record(record))
    }

    /// Resolves once the queue has overrun. Lets a session abandon a write
    /// to a client that stopped reading.
    pub async fn overrun(&self) {
        loop {
            let notified = self.shared.overrun.notified();
            if self.shared.pending.lock().overrun {
                return;
            }
            notified.await;
        }
    }

    /// Number of records waiting for delivery
    pub fn pending(&self) -> usize {
        self.shared.pending.lock().slots.len()
    }

    /// Close the queue and throw away everything still in it. Returns the
    /// number of records discarded.
    pub fn close_and_drain(&mut self) -> usize {
        let mut pending = self.shared.pending.lock();
        pending.closed = true;
        pending.clear()
    }
}

impl Drop for DispatchReceiver {
    fn drop(&mut self) {
        self.close_and_drain();
    }
}
