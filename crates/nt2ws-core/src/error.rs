//! Bridge error handling
//!
//! None of these errors are fatal to the process. Only a write failure ends
//! the session it happened on; everything else is logged and the session keeps
//! serving.

use thiserror::Error;
use tokio_tungstenite::tungstenite;

use crate::value::ValueKind;

/// Errors reported by a [`Table`](crate::table::Table) implementation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TableError {
    /// The remote address could not be reached
    #[error("Table remote '{address}' is unavailable: {reason}")]
    Unavailable { address: String, reason: String },

    /// The entry exists with a different kind
    #[error("Key '{key}' holds {existing}, cannot assign {attempted}")]
    TypeMismatch {
        key: String,
        existing: ValueKind,
        attempted: ValueKind,
    },
}

/// Errors that can occur while bridging a table to a client connection
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Inbound wire data could not be decoded
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// The connection no longer accepts writes
    #[error("Write to client failed: {0}")]
    WriteFailure(#[from] tungstenite::Error),

    /// A value kind that the active wire format cannot represent
    #[error("Value kind {kind} of key '{key}' is not representable in the {format} wire format")]
    UnknownKeyType {
        key: String,
        kind: ValueKind,
        format: &'static str,
    },

    /// The table could not reach a remote address
    #[error("Table unavailable at '{address}': {reason}")]
    TableUnavailable { address: String, reason: String },

    /// An inbound value does not match the kind of the existing entry
    #[error("Key '{key}' holds {existing}, client sent {attempted}")]
    TypeMismatch {
        key: String,
        existing: ValueKind,
        attempted: ValueKind,
    },
}

impl BridgeError {
    pub fn malformed(details: impl Into<String>) -> Self {
        BridgeError::MalformedMessage(details.into())
    }

    /// Whether this error ends the session it occurred on
    pub fn is_session_fatal(&self) -> bool {
        matches!(self, BridgeError::WriteFailure(_))
    }
}

impl From<TableError> for BridgeError {
    fn from(err: TableError) -> Self {
        match err {
            TableError::Unavailable { address, reason } => {
                BridgeError::TableUnavailable { address, reason }
            }
            TableError::TypeMismatch {
                key,
                existing,
                attempted,
            } => BridgeError::TypeMismatch {
                key,
                existing,
                attempted,
            },
        }
    }
}

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;
