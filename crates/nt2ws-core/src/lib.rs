//! nt2ws Core Library
//!
//! Bridges a shared key-value table with change notification (a
//! NetworkTables-style "table") to browser clients over websockets, keeping
//! both sides eventually consistent.
//!
//! # Architecture
//!
//! - **Table**: the external store, consumed through the [`Table`] trait
//! - **Bridge**: one [`Session`] per websocket; table notifications reach it
//!   through a bounded, non-blocking dispatch queue
//! - **Wire**: a selectable [`Codec`] (JSON or CBOR, optional type tags)
//!
//! # Quick Start
//!
//! ```text
//! let table = Arc::new(MemoryTable::new());
//! table.initialize("127.0.0.1")?;
//!
//! let registry = SessionRegistry::new(table, CodecConfig::json());
//!
//! // For every websocket accepted on WEBSOCKET_PATH:
//! let handle = registry.on_connection_established(ws_stream);
//! ```
//!
//! # Modules
//!
//! - `bridge`: sessions, subscriptions, dispatch queue and registry
//! - `table`: the table collaborator trait and an in-memory table
//! - `wire`: wire codec and record types
//! - `value`: table value types
//! - `config`: bridge configuration
//! - `error`: error types

pub mod bridge;
pub mod config;
pub mod error;
pub mod table;
pub mod value;
pub mod wire;

pub use bridge::{
    CloseReason, Session, SessionHandle, SessionId, SessionRegistry, SessionState,
    StaticResources, WEBSOCKET_PATH,
};
pub use config::Config;
pub use error::{BridgeError, BridgeResult, TableError};
pub use table::{ListenerId, MemoryTable, Table};
pub use value::{Value, ValueKind};
pub use wire::{ClientCommand, Codec, CodecConfig, Frame, UpdateRecord, WireFormat};
