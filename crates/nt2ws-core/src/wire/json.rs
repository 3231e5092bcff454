//! Text JSON mapping
//!
//! JSON has no byte-string type, so raw values travel as base64 strings and
//! need a `"t": "raw"` tag to be told apart from ordinary strings. Without
//! type tags a raw value cannot be sent at all.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::{Map, Number, Value as Json};

use super::codec::Format;
use super::message::Frame;
use crate::error::{BridgeError, BridgeResult};
use crate::value::{Value, ValueKind};

pub(crate) struct JsonFormat;

impl Format for JsonFormat {
    type Node = Json;

    const NAME: &'static str = "json";

    fn encode_value(key: &str, value: &Value, tagged: bool) -> BridgeResult<Json> {
        let node = match value {
            Value::Boolean(b) => Json::Bool(*b),
            Value::Double(d) => double(key, ValueKind::Double, *d)?,
            Value::String(s) => Json::String(s.clone()),
            Value::Raw(bytes) => {
                if !tagged {
                    return Err(BridgeError::UnknownKeyType {
                        key: key.to_string(),
                        kind: ValueKind::Raw,
                        format: Self::NAME,
                    });
                }
                Json::String(BASE64.encode(bytes))
            }
            Value::BooleanArray(v) => Json::Array(v.iter().map(|b| Json::Bool(*b)).collect()),
            Value::DoubleArray(v) => Json::Array(
                v.iter()
                    .map(|d| double(key, ValueKind::DoubleArray, *d))
                    .collect::<BridgeResult<_>>()?,
            ),
            Value::StringArray(v) => Json::Array(v.iter().cloned().map(Json::String).collect()),
        };
        Ok(node)
    }

    fn decode_value(node: Json, tag: Option<ValueKind>) -> BridgeResult<Value> {
        if tag == Some(ValueKind::Raw) {
            let Json::String(encoded) = node else {
                return Err(BridgeError::malformed("raw value must be a base64 string"));
            };
            return BASE64
                .decode(encoded.as_bytes())
                .map(Value::Raw)
                .map_err(|e| BridgeError::malformed(format!("invalid base64 raw value: {}", e)));
        }

        match node {
            Json::Bool(b) => Ok(Value::Boolean(b)),
            Json::Number(n) => as_double(&n).map(Value::Double),
            Json::String(s) => Ok(Value::String(s)),
            Json::Array(items) => decode_array(items),
            Json::Null => Err(BridgeError::malformed("null is not a table value")),
            Json::Object(_) => Err(BridgeError::malformed("nested objects are not table values")),
        }
    }

    fn boolean(b: bool) -> Json {
        Json::Bool(b)
    }

    fn text(s: &str) -> Json {
        Json::String(s.to_string())
    }

    fn null() -> Json {
        Json::Null
    }

    fn as_bool(node: &Json) -> Option<bool> {
        node.as_bool()
    }

    fn as_text(node: &Json) -> Option<&str> {
        node.as_str()
    }

    fn is_null(node: &Json) -> bool {
        node.is_null()
    }

    fn write(entries: Vec<(&'static str, Json)>) -> BridgeResult<Frame> {
        let map: Map<String, Json> = entries
            .into_iter()
            .map(|(field, node)| (field.to_string(), node))
            .collect();
        serde_json::to_string(&Json::Object(map))
            .map(Frame::Text)
            .map_err(|e| BridgeError::malformed(format!("JSON encoding failed: {}", e)))
    }

    fn read(frame: &Frame) -> BridgeResult<Vec<(String, Json)>> {
        let parsed: Json = match frame {
            Frame::Text(text) => serde_json::from_str(text),
            Frame::Binary(data) => serde_json::from_slice(data),
        }
        .map_err(|e| BridgeError::malformed(format!("invalid JSON: {}", e)))?;

        match parsed {
            Json::Object(map) => Ok(map.into_iter().collect()),
            _ => Err(BridgeError::malformed("expected a JSON object")),
        }
    }
}

/// JSON has no NaN or infinity, so a value holding one cannot be sent
fn double(key: &str, kind: ValueKind, d: f64) -> BridgeResult<Json> {
    Number::from_f64(d)
        .map(Json::Number)
        .ok_or_else(|| BridgeError::UnknownKeyType {
            key: key.to_string(),
            kind,
            format: JsonFormat::NAME,
        })
}

fn as_double(n: &Number) -> BridgeResult<f64> {
    n.as_f64()
        .ok_or_else(|| BridgeError::malformed(format!("number {} is not a double", n)))
}

fn decode_array(items: Vec<Json>) -> BridgeResult<Value> {
    let Some(first) = items.first() else {
        return Ok(Value::DoubleArray(Vec::new()));
    };

    let mixed = || BridgeError::malformed("array elements must all have the same type");

    match first {
        Json::Bool(_) => items
            .iter()
            .map(|item| item.as_bool().ok_or_else(mixed))
            .collect::<BridgeResult<Vec<_>>>()
            .map(Value::BooleanArray),
        Json::Number(_) => items
            .iter()
            .map(|item| match item {
                Json::Number(n) => as_double(n),
                _ => Err(mixed()),
            })
            .collect::<BridgeResult<Vec<_>>>()
            .map(Value::DoubleArray),
        Json::String(_) => items
            .into_iter()
            .map(|item| match item {
                Json::String(s) => Ok(s),
                _ => Err(mixed()),
            })
            .collect::<BridgeResult<Vec<_>>>()
            .map(Value::StringArray),
        _ => Err(BridgeError::malformed(
            "arrays may only hold booleans, numbers or strings",
        )),
    }
}
