//! Table to websocket bridge
//!
//! ```text
//! table listeners ──▶ Subscription ──▶ Dispatcher ══▶ DispatchReceiver ──▶ Session ──▶ websocket
//!   (notifier thread)                   (try_send)     (session task)        │
//!                                                                           ▼
//! websocket ──▶ Session ──▶ Codec::decode ──▶ Table::set_value / initialize
//! ```

mod dispatch;
mod registry;
mod session;
mod subscriber;

pub use dispatch::{
    dispatch_queue, DispatchReceiver, Dispatcher, GenerationSink, Next, PostOutcome, RecordSink,
};
pub use registry::{
    SessionRegistry, StaticResources, DEFAULT_QUEUE_CAPACITY, STATIC_MOUNT, WEBSOCKET_PATH,
};
pub use session::{CloseReason, Session, SessionHandle, SessionId, SessionState};
pub use subscriber::Subscription;
