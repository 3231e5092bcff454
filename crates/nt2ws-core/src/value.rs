//! Table value types
//!
//! A table entry holds exactly one of a fixed set of primitive kinds, or a
//! homogeneous array of one of them. There are no nested structures.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The kind of value stored at a table key
///
/// The string labels are the type names used on the wire (`"t"` field).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    #[serde(rename = "boolean")]
    Boolean,
    #[serde(rename = "double")]
    Double,
    #[serde(rename = "string")]
    String,
    #[serde(rename = "raw")]
    Raw,
    #[serde(rename = "boolean[]")]
    BooleanArray,
    #[serde(rename = "double[]")]
    DoubleArray,
    #[serde(rename = "string[]")]
    StringArray,
}

impl ValueKind {
    /// All kinds, in wire-label order
    pub const ALL: [ValueKind; 7] = [
        ValueKind::Boolean,
        ValueKind::Double,
        ValueKind::String,
        ValueKind::Raw,
        ValueKind::BooleanArray,
        ValueKind::DoubleArray,
        ValueKind::StringArray,
    ];

    /// Wire label for this kind
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueKind::Boolean => "boolean",
            ValueKind::Double => "double",
            ValueKind::String => "string",
            ValueKind::Raw => "raw",
            ValueKind::BooleanArray => "boolean[]",
            ValueKind::DoubleArray => "double[]",
            ValueKind::StringArray => "string[]",
        }
    }

    pub fn is_array(&self) -> bool {
        matches!(
            self,
            ValueKind::BooleanArray | ValueKind::DoubleArray | ValueKind::StringArray
        )
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown type label
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownKind(pub String);

impl fmt::Display for UnknownKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown value type '{}'", self.0)
    }
}

impl std::error::Error for UnknownKind {}

impl FromStr for ValueKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ValueKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownKind(s.to_string()))
    }
}

/// A table value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Boolean(bool),
    Double(f64),
    String(String),
    Raw(Vec<u8>),
    BooleanArray(Vec<bool>),
    DoubleArray(Vec<f64>),
    StringArray(Vec<String>),
}

impl Value {
    /// The kind of this value
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Boolean(_) => ValueKind::Boolean,
            Value::Double(_) => ValueKind::Double,
            Value::String(_) => ValueKind::String,
            Value::Raw(_) => ValueKind::Raw,
            Value::BooleanArray(_) => ValueKind::BooleanArray,
            Value::DoubleArray(_) => ValueKind::DoubleArray,
            Value::StringArray(_) => ValueKind::StringArray,
        }
    }

    /// Reconcile a value decoded without a type tag with the kind an entry
    /// already has.
    ///
    /// An empty array carries no element type, so it conforms to any array
    /// kind. Every other mismatch is returned unchanged as `Err`.
    pub fn conform(self, expected: ValueKind) -> Result<Value, Value> {
        if self.kind() == expected {
            return Ok(self);
        }

        let is_empty_array = match &self {
            Value::BooleanArray(v) => v.is_empty(),
            Value::DoubleArray(v) => v.is_empty(),
            Value::StringArray(v) => v.is_empty(),
            _ => false,
        };

        if !is_empty_array {
            return Err(self);
        }

        match expected {
            ValueKind::BooleanArray => Ok(Value::BooleanArray(Vec::new())),
            ValueKind::DoubleArray => Ok(Value::DoubleArray(Vec::new())),
            ValueKind::StringArray => Ok(Value::StringArray(Vec::new())),
            _ => Err(self),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Raw(v)
    }
}

impl From<Vec<bool>> for Value {
    fn from(v: Vec<bool>) -> Self {
        Value::BooleanArray(v)
    }
}

impl From<Vec<f64>> for Value {
    fn from(v: Vec<f64>) -> Self {
        Value::DoubleArray(v)
    }
}

impl From<Vec<String>> for Value {
    fn from(v: Vec<String>) -> Self {
        Value::StringArray(v)
    }
}
