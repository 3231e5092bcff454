//! Selectable wire codec
//!
//! Record layout is shared by every format. A [`Format`] only knows how to
//! map single values and flat maps onto its own data model; `Codec` assembles
//! records from those pieces, so session logic never forks per format.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::cbor::CborFormat;
use super::json::JsonFormat;
use super::message::{fields, ClientCommand, Frame, UpdateRecord};
use crate::error::{BridgeError, BridgeResult};
use crate::value::{Value, ValueKind};

/// Encoding used for outbound frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    /// One JSON object per text frame
    #[default]
    Json,
    /// One CBOR map per binary frame
    Cbor,
}

impl WireFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            WireFormat::Json => JsonFormat::NAME,
            WireFormat::Cbor => CborFormat::NAME,
        }
    }
}

impl std::str::FromStr for WireFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(WireFormat::Json),
            "cbor" => Ok(WireFormat::Cbor),
            other => Err(format!("unknown wire format '{}' (expected json or cbor)", other)),
        }
    }
}

/// Protocol choices that differ between deployments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecConfig {
    /// Outbound encoding
    pub format: WireFormat,
    /// Attach a `"t"` type label to every value
    pub type_tags: bool,
    /// Accept `{"a": <address>}` reconnect commands
    pub allow_reconnect: bool,
}

impl CodecConfig {
    /// Plain JSON: no type tags, no reconnect command
    pub fn json() -> Self {
        Self {
            format: WireFormat::Json,
            type_tags: false,
            allow_reconnect: false,
        }
    }

    /// JSON with a type label on every value
    pub fn tagged_json() -> Self {
        Self {
            type_tags: true,
            ..Self::json()
        }
    }

    /// Binary CBOR with reconnect support
    pub fn cbor() -> Self {
        Self {
            format: WireFormat::Cbor,
            type_tags: false,
            allow_reconnect: true,
        }
    }
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self::json()
    }
}

/// One wire encoding's view of values and flat maps
pub(crate) trait Format {
    type Node;

    const NAME: &'static str;

    fn encode_value(key: &str, value: &Value, tagged: bool) -> BridgeResult<Self::Node>;
    /// Decode a value node. `tag` is only a hint here; tag/value agreement is
    /// checked by the codec.
    fn decode_value(node: Self::Node, tag: Option<ValueKind>) -> BridgeResult<Value>;

    fn boolean(b: bool) -> Self::Node;
    fn text(s: &str) -> Self::Node;
    fn null() -> Self::Node;

    fn as_bool(node: &Self::Node) -> Option<bool>;
    fn as_text(node: &Self::Node) -> Option<&str>;
    fn is_null(node: &Self::Node) -> bool;

    fn write(entries: Vec<(&'static str, Self::Node)>) -> BridgeResult<Frame>;
    fn read(frame: &Frame) -> BridgeResult<Vec<(String, Self::Node)>>;
}

/// Encodes and decodes wire records
#[derive(Debug, Clone, Copy, Default)]
pub struct Codec {
    config: CodecConfig,
}

impl Codec {
    pub fn new(config: CodecConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CodecConfig {
        &self.config
    }

    /// Encode a bridge-to-client record in the configured format
    pub fn encode(&self, record: &UpdateRecord) -> BridgeResult<Frame> {
        match self.config.format {
            WireFormat::Json => encode_update::<JsonFormat>(record, self.config.type_tags),
            WireFormat::Cbor => encode_update::<CborFormat>(record, self.config.type_tags),
        }
    }

    /// Decode a client-to-bridge command
    ///
    /// Text frames are read as JSON and binary frames as CBOR, whatever the
    /// outbound format is.
    pub fn decode(&self, frame: &Frame) -> BridgeResult<ClientCommand> {
        match frame {
            Frame::Text(_) => decode_command::<JsonFormat>(frame, self.config.allow_reconnect),
            Frame::Binary(_) => decode_command::<CborFormat>(frame, self.config.allow_reconnect),
        }
    }

    /// Encode a client-to-bridge command (peer side)
    pub fn encode_command(&self, command: &ClientCommand) -> BridgeResult<Frame> {
        match self.config.format {
            WireFormat::Json => encode_command::<JsonFormat>(command, self.config.type_tags),
            WireFormat::Cbor => encode_command::<CborFormat>(command, self.config.type_tags),
        }
    }

    /// Decode a bridge-to-client record (peer side)
    pub fn decode_update(&self, frame: &Frame) -> BridgeResult<UpdateRecord> {
        match frame {
            Frame::Text(_) => decode_update::<JsonFormat>(frame),
            Frame::Binary(_) => decode_update::<CborFormat>(frame),
        }
    }
}

fn encode_update<F: Format>(record: &UpdateRecord, tagged: bool) -> BridgeResult<Frame> {
    let entries = match record {
        UpdateRecord::ValueChanged { key, value, is_new } => {
            value_entries::<F>(key, value, tagged, Some(*is_new))?
        }
        UpdateRecord::ConnectionStatus {
            connected,
            remote_address,
        } => vec![
            (fields::CONNECTED, F::boolean(*connected)),
            (
                fields::ADDRESS,
                remote_address.as_deref().map(F::text).unwrap_or_else(F::null),
            ),
        ],
    };
    F::write(entries)
}

fn encode_command<F: Format>(command: &ClientCommand, tagged: bool) -> BridgeResult<Frame> {
    let entries = match command {
        ClientCommand::SetValue { key, value } => value_entries::<F>(key, value, tagged, None)?,
        ClientCommand::AddressChange { new_address } => {
            vec![(fields::ADDRESS, F::text(new_address))]
        }
    };
    F::write(entries)
}

fn value_entries<F: Format>(
    key: &str,
    value: &Value,
    tagged: bool,
    is_new: Option<bool>,
) -> BridgeResult<Vec<(&'static str, F::Node)>> {
    let mut entries = vec![
        (fields::KEY, F::text(key)),
        (fields::VALUE, F::encode_value(key, value, tagged)?),
    ];
    if let Some(is_new) = is_new {
        entries.push((fields::IS_NEW, F::boolean(is_new)));
    }
    if tagged {
        entries.push((fields::TYPE, F::text(value.kind().as_str())));
    }
    Ok(entries)
}

fn decode_command<F: Format>(frame: &Frame, allow_reconnect: bool) -> BridgeResult<ClientCommand> {
    let mut map: HashMap<String, F::Node> = F::read(frame)?.into_iter().collect();

    // A reconnect takes precedence over a value set in the same frame
    if allow_reconnect {
        if let Some(address) = map.remove(fields::ADDRESS) {
            let new_address = F::as_text(&address)
                .ok_or_else(|| BridgeError::malformed("'a' must be a string"))?
                .to_string();
            return Ok(ClientCommand::AddressChange { new_address });
        }
    }

    if map.contains_key(fields::KEY) {
        let (key, value) = take_value::<F>(&mut map)?;
        return Ok(ClientCommand::SetValue { key, value });
    }

    if map.contains_key(fields::ADDRESS) {
        return Err(BridgeError::malformed("reconnect commands are not enabled"));
    }

    Err(BridgeError::malformed("expected a 'k' or 'a' field"))
}

fn decode_update<F: Format>(frame: &Frame) -> BridgeResult<UpdateRecord> {
    let mut map: HashMap<String, F::Node> = F::read(frame)?.into_iter().collect();

    if let Some(connected) = map.remove(fields::CONNECTED) {
        let connected =
            F::as_bool(&connected).ok_or_else(|| BridgeError::malformed("'r' must be a boolean"))?;
        let remote_address = match map.remove(fields::ADDRESS) {
            None => None,
            Some(node) if F::is_null(&node) => None,
            Some(node) => Some(
                F::as_text(&node)
                    .ok_or_else(|| BridgeError::malformed("'a' must be a string or null"))?
                    .to_string(),
            ),
        };
        return Ok(UpdateRecord::ConnectionStatus {
            connected,
            remote_address,
        });
    }

    let is_new = map
        .remove(fields::IS_NEW)
        .ok_or_else(|| BridgeError::malformed("missing 'n' field"))
        .and_then(|node| {
            F::as_bool(&node).ok_or_else(|| BridgeError::malformed("'n' must be a boolean"))
        })?;
    let (key, value) = take_value::<F>(&mut map)?;

    Ok(UpdateRecord::ValueChanged { key, value, is_new })
}

/// Pull `k`, `v` and the optional `t` out of a decoded map
fn take_value<F: Format>(map: &mut HashMap<String, F::Node>) -> BridgeResult<(String, Value)> {
    let key = map
        .remove(fields::KEY)
        .ok_or_else(|| BridgeError::malformed("missing 'k' field"))?;
    let key = F::as_text(&key)
        .ok_or_else(|| BridgeError::malformed("'k' must be a string"))?
        .to_string();

    let node = map
        .remove(fields::VALUE)
        .ok_or_else(|| BridgeError::malformed(format!("missing 'v' field for key '{}'", key)))?;

    let tag = match map.remove(fields::TYPE) {
        None => None,
        Some(tag) => {
            let label =
                F::as_text(&tag).ok_or_else(|| BridgeError::malformed("'t' must be a string"))?;
            Some(
                label
                    .parse::<ValueKind>()
                    .map_err(|e| BridgeError::malformed(e.to_string()))?,
            )
        }
    };

    let value = F::decode_value(node, tag)?;
    let value = match tag {
        None => value,
        Some(kind) => check_tag(&key, value, kind)?,
    };

    Ok((key, value))
}

/// A tagged value must already be of the tagged kind. The only allowance is an
/// empty array, which carries no element type of its own.
fn check_tag(key: &str, value: Value, kind: ValueKind) -> BridgeResult<Value> {
    value.conform(kind).map_err(|v| {
        BridgeError::malformed(format!(
            "key '{}' is tagged {} but holds {}",
            key,
            kind,
            v.kind()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn text(frame: Frame) -> serde_json::Value {
        match frame {
            Frame::Text(t) => serde_json::from_str(&t).unwrap(),
            Frame::Binary(_) => panic!("Expected text frame"),
        }
    }

    fn cbor_frame(value: &ciborium::value::Value) -> Frame {
        let mut bytes = Vec::new();
        ciborium::into_writer(value, &mut bytes).unwrap();
        Frame::Binary(bytes)
    }

    fn sample_values() -> Vec<Value> {
        vec![
            Value::Boolean(false),
            Value::Double(-12.25),
            Value::String("auto".into()),
            Value::Raw(vec![0, 7, 255]),
            Value::BooleanArray(vec![true, false]),
            Value::DoubleArray(vec![1.0, 2.5]),
            Value::StringArray(vec!["a".into(), "b".into()]),
        ]
    }

    #[test]
    fn test_encode_value_update_json() {
        let codec = Codec::new(CodecConfig::json());
        let record = UpdateRecord::value_changed("robot/enabled", Value::Boolean(false), true);
        assert_eq!(
            text(codec.encode(&record).unwrap()),
            json!({"k": "robot/enabled", "v": false, "n": true})
        );
    }

    #[test]
    fn test_encode_value_update_tagged() {
        let codec = Codec::new(CodecConfig::tagged_json());
        let record = UpdateRecord::value_changed("arm/angle", Value::Double(42.0), false);
        assert_eq!(
            text(codec.encode(&record).unwrap()),
            json!({"k": "arm/angle", "v": 42.0, "n": false, "t": "double"})
        );
    }

    #[test]
    fn test_encode_connection_status() {
        let codec = Codec::new(CodecConfig::json());

        let up = UpdateRecord::connection_status(true, Some("10.12.34.2".into()));
        assert_eq!(
            text(codec.encode(&up).unwrap()),
            json!({"r": true, "a": "10.12.34.2"})
        );

        let down = UpdateRecord::connection_status(false, None);
        assert_eq!(text(codec.encode(&down).unwrap()), json!({"r": false, "a": null}));
    }

    #[test]
    fn test_cbor_outbound_is_binary() {
        let codec = Codec::new(CodecConfig::cbor());
        let record = UpdateRecord::value_changed("x", Value::Double(1.0), true);
        assert!(matches!(codec.encode(&record).unwrap(), Frame::Binary(_)));
    }

    #[test]
    fn test_raw_untagged_json_is_unknown_type() {
        let codec = Codec::new(CodecConfig::json());
        let record = UpdateRecord::value_changed("blob", Value::Raw(vec![1]), true);
        let err = codec.encode(&record).unwrap_err();
        assert!(matches!(err, BridgeError::UnknownKeyType { .. }));
        assert!(!err.is_session_fatal());
    }

    #[test]
    fn test_decode_set_value() {
        let codec = Codec::default();
        let cmd = codec
            .decode(&Frame::Text(r#"{"k": "robot/enabled", "v": true}"#.into()))
            .unwrap();
        assert_eq!(
            cmd,
            ClientCommand::SetValue {
                key: "robot/enabled".into(),
                value: Value::Boolean(true)
            }
        );
    }

    #[test]
    fn test_decode_missing_value_is_malformed() {
        let codec = Codec::default();
        let err = codec.decode(&Frame::Text(r#"{"k": "x"}"#.into())).unwrap_err();
        assert!(matches!(err, BridgeError::MalformedMessage(_)));
        assert!(err.to_string().contains("'v'"));
    }

    #[test]
    fn test_decode_non_string_key() {
        let codec = Codec::default();
        let err = codec.decode(&Frame::Text(r#"{"k": 5, "v": 1}"#.into())).unwrap_err();
        assert!(matches!(err, BridgeError::MalformedMessage(_)));
    }

    #[test]
    fn test_decode_unknown_tag() {
        let codec = Codec::new(CodecConfig::tagged_json());
        let err = codec
            .decode(&Frame::Text(r#"{"k": "x", "v": 1, "t": "int"}"#.into()))
            .unwrap_err();
        assert!(err.to_string().contains("int"));
    }

    #[test]
    fn test_decode_tag_mismatch_is_rejected() {
        let codec = Codec::new(CodecConfig::tagged_json());
        let err = codec
            .decode(&Frame::Text(r#"{"k": "x", "v": 1, "t": "boolean"}"#.into()))
            .unwrap_err();
        assert!(matches!(err, BridgeError::MalformedMessage(_)));

        let err = codec
            .decode(&Frame::Text(r#"{"k": "x", "v": [1], "t": "string[]"}"#.into()))
            .unwrap_err();
        assert!(matches!(err, BridgeError::MalformedMessage(_)));
    }

    #[test]
    fn test_decode_tagged_empty_array() {
        let codec = Codec::new(CodecConfig::tagged_json());
        let cmd = codec
            .decode(&Frame::Text(r#"{"k": "names", "v": [], "t": "string[]"}"#.into()))
            .unwrap();
        assert_eq!(
            cmd,
            ClientCommand::SetValue {
                key: "names".into(),
                value: Value::StringArray(Vec::new())
            }
        );
    }

    #[test]
    fn test_reconnect_only_when_enabled() {
        let frame = Frame::Text(r#"{"a": "10.0.0.2"}"#.into());

        let err = Codec::new(CodecConfig::json()).decode(&frame).unwrap_err();
        assert!(matches!(err, BridgeError::MalformedMessage(_)));

        let cmd = Codec::new(CodecConfig::cbor()).decode(&frame).unwrap();
        assert_eq!(
            cmd,
            ClientCommand::AddressChange {
                new_address: "10.0.0.2".into()
            }
        );
    }

    #[test]
    fn test_reconnect_wins_over_value_in_same_frame() {
        let frame = Frame::Text(r#"{"k": "robot/enabled", "v": true, "a": "10.0.0.2"}"#.into());

        let cmd = Codec::new(CodecConfig::cbor()).decode(&frame).unwrap();
        assert_eq!(
            cmd,
            ClientCommand::AddressChange {
                new_address: "10.0.0.2".into()
            }
        );

        let cmd = Codec::new(CodecConfig::json()).decode(&frame).unwrap();
        assert_eq!(
            cmd,
            ClientCommand::SetValue {
                key: "robot/enabled".into(),
                value: Value::Boolean(true)
            }
        );
    }

    #[test]
    fn test_decode_cbor_reconnect() {
        use ciborium::value::Value as Cbor;

        let frame = cbor_frame(&Cbor::Map(vec![(
            Cbor::Text("a".into()),
            Cbor::Text("roborio-1234-frc.local".into()),
        )]));
        let cmd = Codec::new(CodecConfig::cbor()).decode(&frame).unwrap();
        assert_eq!(
            cmd,
            ClientCommand::AddressChange {
                new_address: "roborio-1234-frc.local".into()
            }
        );
    }

    #[test]
    fn test_decode_neither_key_nor_address() {
        let err = Codec::default()
            .decode(&Frame::Text(r#"{"v": 1}"#.into()))
            .unwrap_err();
        assert!(matches!(err, BridgeError::MalformedMessage(_)));
    }

    #[test]
    fn test_update_round_trip_every_kind() {
        let configs = [
            CodecConfig::tagged_json(),
            CodecConfig::cbor(),
            CodecConfig {
                type_tags: true,
                ..CodecConfig::cbor()
            },
        ];

        for config in configs {
            let codec = Codec::new(config);
            for value in sample_values() {
                let record = UpdateRecord::value_changed("k", value, true);
                let frame = codec.encode(&record).unwrap();
                assert_eq!(codec.decode_update(&frame).unwrap(), record, "{:?}", config);
            }
        }
    }

    #[test]
    fn test_untagged_json_round_trip_representable_kinds() {
        let codec = Codec::new(CodecConfig::json());
        for value in sample_values() {
            if value.kind() == ValueKind::Raw {
                continue;
            }
            let record = UpdateRecord::value_changed("k", value, false);
            let frame = codec.encode(&record).unwrap();
            assert_eq!(codec.decode_update(&frame).unwrap(), record);
        }
    }

    #[test]
    fn test_command_round_trip() {
        let tagged_json = CodecConfig {
            allow_reconnect: true,
            ..CodecConfig::tagged_json()
        };
        for config in [tagged_json, CodecConfig::cbor()] {
            let codec = Codec::new(config);
            for value in sample_values() {
                let command = ClientCommand::SetValue {
                    key: "k".into(),
                    value,
                };
                let frame = codec.encode_command(&command).unwrap();
                assert_eq!(codec.decode(&frame).unwrap(), command);
            }

            let reconnect = ClientCommand::AddressChange {
                new_address: "10.0.0.2".into(),
            };
            let frame = codec.encode_command(&reconnect).unwrap();
            assert_eq!(codec.decode(&frame).unwrap(), reconnect);
        }
    }

    #[test]
    fn test_status_round_trip() {
        for config in [CodecConfig::json(), CodecConfig::cbor()] {
            let codec = Codec::new(config);
            for record in [
                UpdateRecord::connection_status(true, Some("127.0.0.1".into())),
                UpdateRecord::connection_status(false, None),
            ] {
                let frame = codec.encode(&record).unwrap();
                assert_eq!(codec.decode_update(&frame).unwrap(), record);
            }
        }
    }

    #[test]
    fn test_wire_format_parse() {
        assert_eq!("JSON".parse::<WireFormat>().unwrap(), WireFormat::Json);
        assert_eq!("cbor".parse::<WireFormat>().unwrap(), WireFormat::Cbor);
        assert!("xml".parse::<WireFormat>().is_err());
        assert_eq!(WireFormat::Cbor.as_str(), "cbor");
    }
}
