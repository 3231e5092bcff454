//! Binary CBOR mapping
//!
//! Same field names as the JSON format, encoded as a CBOR map. Raw values are
//! native byte strings, so every value kind is representable with or without
//! type tags.

use ciborium::value::Value as Cbor;

use super::codec::Format;
use super::message::Frame;
use crate::error::{BridgeError, BridgeResult};
use crate::value::{Value, ValueKind};

pub(crate) struct CborFormat;

impl Format for CborFormat {
    type Node = Cbor;

    const NAME: &'static str = "cbor";

    fn encode_value(_key: &str, value: &Value, _tagged: bool) -> BridgeResult<Cbor> {
        let node = match value {
            Value::Boolean(b) => Cbor::Bool(*b),
            Value::Double(d) => Cbor::Float(*d),
            Value::String(s) => Cbor::Text(s.clone()),
            Value::Raw(bytes) => Cbor::Bytes(bytes.clone()),
            Value::BooleanArray(v) => Cbor::Array(v.iter().map(|b| Cbor::Bool(*b)).collect()),
            Value::DoubleArray(v) => Cbor::Array(v.iter().map(|d| Cbor::Float(*d)).collect()),
            Value::StringArray(v) => Cbor::Array(v.iter().cloned().map(Cbor::Text).collect()),
        };
        Ok(node)
    }

    fn decode_value(node: Cbor, tag: Option<ValueKind>) -> BridgeResult<Value> {
        match node {
            Cbor::Bool(b) => Ok(Value::Boolean(b)),
            Cbor::Float(_) | Cbor::Integer(_) => as_double(&node).map(Value::Double),
            Cbor::Text(s) => Ok(Value::String(s)),
            Cbor::Bytes(bytes) => Ok(Value::Raw(bytes)),
            Cbor::Array(items) => decode_array(items),
            Cbor::Tag(_, inner) => Self::decode_value(*inner, tag),
            Cbor::Null => Err(BridgeError::malformed("null is not a table value")),
            Cbor::Map(_) => Err(BridgeError::malformed("nested maps are not table values")),
            _ => Err(BridgeError::malformed("unsupported CBOR item")),
        }
    }

    fn boolean(b: bool) -> Cbor {
        Cbor::Bool(b)
    }

    fn text(s: &str) -> Cbor {
        Cbor::Text(s.to_string())
    }

    fn null() -> Cbor {
        Cbor::Null
    }

    fn as_bool(node: &Cbor) -> Option<bool> {
        node.as_bool()
    }

    fn as_text(node: &Cbor) -> Option<&str> {
        node.as_text()
    }

    fn is_null(node: &Cbor) -> bool {
        node.is_null()
    }

    fn write(entries: Vec<(&'static str, Cbor)>) -> BridgeResult<Frame> {
        let map = Cbor::Map(
            entries
                .into_iter()
                .map(|(field, node)| (Cbor::Text(field.to_string()), node))
                .collect(),
        );

        let mut bytes = Vec::new();
        ciborium::into_writer(&map, &mut bytes)
            .map_err(|e| BridgeError::malformed(format!("CBOR encoding failed: {}", e)))?;
        Ok(Frame::Binary(bytes))
    }

    fn read(frame: &Frame) -> BridgeResult<Vec<(String, Cbor)>> {
        let bytes = match frame {
            Frame::Binary(data) => data.as_slice(),
            Frame::Text(text) => text.as_bytes(),
        };

        let parsed: Cbor = ciborium::from_reader(bytes)
            .map_err(|e| BridgeError::malformed(format!("invalid CBOR: {}", e)))?;

        let Cbor::Map(entries) = parsed else {
            return Err(BridgeError::malformed("expected a CBOR map"));
        };

        entries
            .into_iter()
            .map(|(field, node)| match field {
                Cbor::Text(name) => Ok((name, node)),
                _ => Err(BridgeError::malformed("map keys must be text")),
            })
            .collect()
    }
}

fn as_double(node: &Cbor) -> BridgeResult<f64> {
    match node {
        Cbor::Float(f) => Ok(*f),
        Cbor::Integer(i) => Ok(i128::from(*i) as f64),
        _ => Err(BridgeError::malformed("expected a number")),
    }
}

fn decode_array(items: Vec<Cbor>) -> BridgeResult<Value> {
    let Some(first) = items.first() else {
        return Ok(Value::DoubleArray(Vec::new()));
    };

    let mixed = || BridgeError::malformed("array elements must all have the same type");

    match first {
        Cbor::Bool(_) => items
            .iter()
            .map(|item| item.as_bool().ok_or_else(mixed))
            .collect::<BridgeResult<Vec<_>>>()
            .map(Value::BooleanArray),
        Cbor::Float(_) | Cbor::Integer(_) => items
            .iter()
            .map(|item| as_double(item).map_err(|_| mixed()))
            .collect::<BridgeResult<Vec<_>>>()
            .map(Value::DoubleArray),
        Cbor::Text(_) => items
            .into_iter()
            .map(|item| match item {
                Cbor::Text(s) => Ok(s),
                _ => Err(mixed()),
            })
            .collect::<BridgeResult<Vec<_>>>()
            .map(Value::StringArray),
        _ => Err(BridgeError::malformed(
            "arrays may only hold booleans, numbers or strings",
        )),
    }
}
