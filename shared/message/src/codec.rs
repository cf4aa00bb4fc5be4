//! Wire codec for the message envelope
//!
//! The envelope is a flat JSON object with fields `name`, `ts`, `val`, and
//! `meta`. Decoding distinguishes body-level syntax problems from absent or
//! ill-typed fields so callers can report the precise failure.

use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::envelope::{Message, MetaMap, Value};

/// Codec error types
#[derive(Error, Debug)]
pub enum CodecError {
    /// The body is not a JSON object at all.
    #[error("invalid message body: {0}")]
    Syntax(String),

    /// The body parsed but a required field is absent.
    #[error("missing field: {field}")]
    MissingField { field: &'static str },

    /// A field is present but carries the wrong type of value.
    #[error("invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

/// Decode a message envelope from its wire bytes.
pub fn decode(body: &[u8]) -> Result<Message, CodecError> {
    let raw: JsonValue =
        serde_json::from_slice(body).map_err(|e| CodecError::Syntax(e.to_string()))?;

    let obj = raw
        .as_object()
        .ok_or_else(|| CodecError::Syntax("body is not a JSON object".to_string()))?;

    let name = obj
        .get("name")
        .ok_or(CodecError::MissingField { field: "name" })?
        .as_str()
        .ok_or_else(|| CodecError::InvalidField {
            field: "name",
            reason: "expected a string".to_string(),
        })?
        .to_string();

    let timestamp = obj
        .get("ts")
        .ok_or(CodecError::MissingField { field: "ts" })?
        .as_i64()
        .ok_or_else(|| CodecError::InvalidField {
            field: "ts",
            reason: "expected an integer nanosecond timestamp".to_string(),
        })?;

    let value = match obj.get("val") {
        None => return Err(CodecError::MissingField { field: "val" }),
        Some(JsonValue::Bool(b)) => Value::Bool(*b),
        Some(JsonValue::Number(n)) => {
            if let Some(i) = n.as_i64() {
                Value::Integer(i)
            } else if let Some(f) = n.as_f64() {
                Value::Double(f)
            } else {
                return Err(CodecError::InvalidField {
                    field: "val",
                    reason: format!("unrepresentable number {n}"),
                });
            }
        }
        Some(JsonValue::String(s)) => Value::Text(s.clone()),
        Some(other) => {
            return Err(CodecError::InvalidField {
                field: "val",
                reason: format!("expected a scalar, got {other}"),
            })
        }
    };

    let meta = match obj.get("meta") {
        None | Some(JsonValue::Null) => MetaMap::new(),
        Some(JsonValue::Object(map)) => {
            let mut meta = MetaMap::new();
            for (k, v) in map {
                let v = v.as_str().ok_or_else(|| CodecError::InvalidField {
                    field: "meta",
                    reason: format!("value for key {k:?} is not a string"),
                })?;
                meta.insert(k.clone(), v.to_string());
            }
            meta
        }
        Some(other) => {
            return Err(CodecError::InvalidField {
                field: "meta",
                reason: format!("expected an object, got {other}"),
            })
        }
    };

    Ok(Message {
        name,
        timestamp,
        value,
        meta,
    })
}

/// Encode a message envelope into its wire bytes.
pub fn encode(msg: &Message) -> Vec<u8> {
    // Message serializes to the fixed field set, so this cannot fail.
    serde_json::to_vec(msg).expect("message envelope serializes to JSON")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_full_envelope() {
        let body = br#"{"name":"env.temperature","ts":1600973660233210000,"val":31.2,"meta":{"sensor":"tmp112"}}"#;
        let msg = decode(body).unwrap();
        assert_eq!(msg.name, "env.temperature");
        assert_eq!(msg.timestamp, 1_600_973_660_233_210_000);
        assert_eq!(msg.value, Value::Double(31.2));
        assert_eq!(msg.meta.get("sensor").map(String::as_str), Some("tmp112"));
    }

    #[test]
    fn test_decode_integer_and_string_values() {
        let msg = decode(br#"{"name":"env.count.car","ts":1,"val":12}"#).unwrap();
        assert_eq!(msg.value, Value::Integer(12));

        let msg = decode(br#"{"name":"upload","ts":1,"val":"ignored"}"#).unwrap();
        assert_eq!(msg.value, Value::Text("ignored".to_string()));
    }

    #[test]
    fn test_decode_missing_meta_is_empty() {
        let msg = decode(br#"{"name":"test","ts":1,"val":1}"#).unwrap();
        assert!(msg.meta.is_empty());
    }

    #[test]
    fn test_decode_syntax_error() {
        assert!(matches!(decode(b"not json"), Err(CodecError::Syntax(_))));
        assert!(matches!(decode(b"[1,2,3]"), Err(CodecError::Syntax(_))));
    }

    #[test]
    fn test_decode_missing_fields_are_distinguished() {
        assert!(matches!(
            decode(br#"{"ts":1,"val":1}"#),
            Err(CodecError::MissingField { field: "name" })
        ));
        assert!(matches!(
            decode(br#"{"name":"test","val":1}"#),
            Err(CodecError::MissingField { field: "ts" })
        ));
        assert!(matches!(
            decode(br#"{"name":"test","ts":1}"#),
            Err(CodecError::MissingField { field: "val" })
        ));
    }

    #[test]
    fn test_decode_invalid_field_types() {
        assert!(matches!(
            decode(br#"{"name":"test","ts":"soon","val":1}"#),
            Err(CodecError::InvalidField { field: "ts", .. })
        ));
        assert!(matches!(
            decode(br#"{"name":"test","ts":1,"val":[1,2]}"#),
            Err(CodecError::InvalidField { field: "val", .. })
        ));
        assert!(matches!(
            decode(br#"{"name":"test","ts":1,"val":1,"meta":{"k":7}}"#),
            Err(CodecError::InvalidField { field: "meta", .. })
        ));
    }

    #[test]
    fn test_roundtrip() {
        let mut meta = MetaMap::new();
        meta.insert("node".to_string(), "0000000000000001".to_string());
        let msg = Message::new("env.humidity", 80.2, 1_600_973_662_457_836_000).with_meta(meta);
        let decoded = decode(&encode(&msg)).unwrap();
        assert_eq!(decoded, msg);
    }
}
