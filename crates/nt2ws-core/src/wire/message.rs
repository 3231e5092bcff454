//! Wire record types
//!
//! Records are exchanged as single-level maps with short field names:
//!
//! | field | meaning                                   |
//! |-------|-------------------------------------------|
//! | `k`   | table key                                 |
//! | `v`   | value                                     |
//! | `n`   | first value observed at this key          |
//! | `t`   | value type label (optional)               |
//! | `r`   | table connected to its remote             |
//! | `a`   | remote address (status) / new address     |

use tokio_tungstenite::tungstenite::Message;

use crate::value::Value;

pub(crate) mod fields {
    pub const KEY: &str = "k";
    pub const VALUE: &str = "v";
    pub const IS_NEW: &str = "n";
    pub const TYPE: &str = "t";
    pub const CONNECTED: &str = "r";
    pub const ADDRESS: &str = "a";
}

/// A record sent from the bridge to a client
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateRecord {
    /// A key was created or updated
    ValueChanged {
        key: String,
        value: Value,
        is_new: bool,
    },
    /// The table's connection to its remote went up or down
    ConnectionStatus {
        connected: bool,
        remote_address: Option<String>,
    },
}

impl UpdateRecord {
    pub fn value_changed(key: impl Into<String>, value: Value, is_new: bool) -> Self {
        UpdateRecord::ValueChanged {
            key: key.into(),
            value,
            is_new,
        }
    }

    pub fn connection_status(connected: bool, remote_address: Option<String>) -> Self {
        UpdateRecord::ConnectionStatus {
            connected,
            remote_address,
        }
    }
}

/// A command sent from a client to the bridge
#[derive(Debug, Clone, PartialEq)]
pub enum ClientCommand {
    /// Set a table value
    SetValue { key: String, value: Value },
    /// Reconnect the table to a different remote
    AddressChange { new_address: String },
}

/// One message on the connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

impl Frame {
    pub fn len(&self) -> usize {
        match self {
            Frame::Text(s) => s.len(),
            Frame::Binary(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Frame> for Message {
    fn from(frame: Frame) -> Self {
        match frame {
            Frame::Text(text) => Message::Text(text),
            Frame::Binary(data) => Message::Binary(data),
        }
    }
}
