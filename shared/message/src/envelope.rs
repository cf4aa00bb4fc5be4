//! Message envelope model

use std::collections::BTreeMap;

use serde::Serialize;

/// Metadata attached to a message, ordered by key.
pub type MetaMap = BTreeMap<String, String>;

/// A scalar message value.
///
/// Upload messages have their value replaced by the canonical storage URL
/// before publishing, so `Text` is the only variant the cloud is guaranteed
/// to see for those.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Integer(i64),
    Double(f64),
    Text(String),
}

impl Value {
    /// Returns the string content for text values.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

/// One measurement published by a plugin.
///
/// Timestamps are nanoseconds since the Unix epoch. The wire field names
/// (`name`, `ts`, `val`, `meta`) are fixed by the waggle message format.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub name: String,

    #[serde(rename = "ts")]
    pub timestamp: i64,

    #[serde(rename = "val")]
    pub value: Value,

    pub meta: MetaMap,
}

impl Message {
    /// Create a message with empty metadata.
    pub fn new(name: impl Into<String>, value: impl Into<Value>, timestamp: i64) -> Self {
        Self {
            name: name.into(),
            timestamp,
            value: value.into(),
            meta: MetaMap::new(),
        }
    }

    /// Attach metadata, replacing any existing map.
    pub fn with_meta(mut self, meta: MetaMap) -> Self {
        self.meta = meta;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_conversions() {
        assert_eq!(Value::from(23i64), Value::Integer(23));
        assert_eq!(Value::from(23.1), Value::Double(23.1));
        assert_eq!(Value::from("hello"), Value::Text("hello".to_string()));
        assert_eq!(Value::from(true), Value::Bool(true));
    }

    #[test]
    fn test_as_text() {
        assert_eq!(Value::from("url").as_text(), Some("url"));
        assert_eq!(Value::from(1i64).as_text(), None);
    }

    #[test]
    fn test_with_meta() {
        let mut meta = MetaMap::new();
        meta.insert("sensor".to_string(), "bme280".to_string());
        let msg = Message::new("env.temperature", 23.1, 1_360_287_003_083_988_472).with_meta(meta);
        assert_eq!(msg.meta.get("sensor").map(String::as_str), Some("bme280"));
    }
}
