//! Attribute values
//!
//! Supported kinds:
//! - integer: 64-bit signed integer
//! - float: 64-bit floating point
//! - string: UTF-8 string
//! - boolean
//! - binary: opaque byte blob
//! - timestamp: microseconds since the Unix epoch, UTC
//! - reference: identifier of another container

use std::fmt;

use chrono::{DateTime, TimeZone, Utc};

use super::identifier::ContainerIdentifier;
use crate::schema::AttributeKind;

/// A single attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Integer(i64),
    Float(f64),
    String(String),
    Boolean(bool),
    Binary(Vec<u8>),
    /// Microseconds since 1970-01-01T00:00:00Z
    Timestamp(i64),
    Reference(ContainerIdentifier),
}

impl Value {
    /// Returns the kind of this value
    pub fn kind(&self) -> AttributeKind {
        match self {
            Value::Integer(_) => AttributeKind::Integer,
            Value::Float(_) => AttributeKind::Float,
            Value::String(_) => AttributeKind::String,
            Value::Boolean(_) => AttributeKind::Boolean,
            Value::Binary(_) => AttributeKind::Binary,
            Value::Timestamp(_) => AttributeKind::Timestamp,
            Value::Reference(_) => AttributeKind::Reference,
        }
    }

    /// Creates a timestamp value from a UTC date time (microsecond precision)
    pub fn timestamp(date_time: DateTime<Utc>) -> Self {
        Value::Timestamp(date_time.timestamp_micros())
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Binary(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_reference(&self) -> Option<&ContainerIdentifier> {
        match self {
            Value::Reference(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the timestamp as a UTC date time, if this is an in-range timestamp
    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Timestamp(micros) => Utc.timestamp_micros(*micros).single(),
            _ => None,
        }
    }

    /// Converts a JSON value into a value of the given kind.
    ///
    /// Used for attribute defaults declared in schema documents. Binary
    /// values are arrays of byte numbers, timestamps are either integer
    /// microseconds or RFC 3339 strings, references are identifier strings.
    pub fn from_json(kind: AttributeKind, json: &serde_json::Value) -> Option<Self> {
        match kind {
            AttributeKind::Integer => json.as_i64().map(Value::Integer),
            AttributeKind::Float => json.as_f64().map(Value::Float),
            AttributeKind::String => json.as_str().map(|s| Value::String(s.to_string())),
            AttributeKind::Boolean => json.as_bool().map(Value::Boolean),
            AttributeKind::Binary => {
                let items = json.as_array()?;
                items
                    .iter()
                    .map(|item| item.as_u64().and_then(|b| u8::try_from(b).ok()))
                    .collect::<Option<Vec<u8>>>()
                    .map(Value::Binary)
            }
            AttributeKind::Timestamp => match json {
                serde_json::Value::Number(n) => n.as_i64().map(Value::Timestamp),
                serde_json::Value::String(s) => DateTime::parse_from_rfc3339(s)
                    .ok()
                    .map(|dt| Value::timestamp(dt.with_timezone(&Utc))),
                _ => None,
            },
            AttributeKind::Reference => json
                .as_str()
                .and_then(|s| s.parse::<ContainerIdentifier>().ok())
                .map(Value::Reference),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{:?}", v),
            Value::String(v) => write!(f, "{:?}", v),
            Value::Boolean(v) => write!(f, "{}", v),
            Value::Binary(v) => {
                write!(f, "b\"")?;
                for byte in v {
                    write!(f, "{:02x}", byte)?;
                }
                write!(f, "\"")
            }
            Value::Timestamp(micros) => match self.as_datetime() {
                Some(dt) => write!(f, "{}", dt.to_rfc3339()),
                None => write!(f, "timestamp({})", micros),
            },
            Value::Reference(id) => write!(f, "ref({})", id),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(i64::from(v))
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Integer(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
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

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Binary(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Binary(v.to_vec())
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::timestamp(v)
    }
}

impl From<ContainerIdentifier> for Value {
    fn from(v: ContainerIdentifier) -> Self {
        Value::Reference(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kinds() {
        assert_eq!(Value::from(5i64).kind(), AttributeKind::Integer);
        assert_eq!(Value::from(1.5).kind(), AttributeKind::Float);
        assert_eq!(Value::from("x").kind(), AttributeKind::String);
        assert_eq!(Value::from(true).kind(), AttributeKind::Boolean);
        assert_eq!(Value::from(vec![1u8, 2]).kind(), AttributeKind::Binary);
        assert_eq!(Value::Timestamp(0).kind(), AttributeKind::Timestamp);
        assert_eq!(
            Value::from(ContainerIdentifier::new("event", 1)).kind(),
            AttributeKind::Reference
        );
    }

    #[test]
    fn test_timestamp_microsecond_precision() {
        let dt = Utc.with_ymd_and_hms(2021, 3, 14, 15, 9, 26).unwrap();
        let value = Value::timestamp(dt);
        assert_eq!(value.as_datetime(), Some(dt));
    }

    #[test]
    fn test_from_json_by_kind() {
        assert_eq!(
            Value::from_json(AttributeKind::Integer, &json!(0)),
            Some(Value::Integer(0))
        );
        assert_eq!(
            Value::from_json(AttributeKind::Binary, &json!([1, 255])),
            Some(Value::Binary(vec![1, 255]))
        );
        assert_eq!(Value::from_json(AttributeKind::Binary, &json!([256])), None);
        assert_eq!(
            Value::from_json(AttributeKind::Timestamp, &json!("1970-01-01T00:00:01Z")),
            Some(Value::Timestamp(1_000_000))
        );
        assert_eq!(
            Value::from_json(AttributeKind::Reference, &json!("event.4")),
            Some(Value::Reference(ContainerIdentifier::new("event", 4)))
        );
        assert_eq!(Value::from_json(AttributeKind::Boolean, &json!("yes")), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::from("a").to_string(), "\"a\"");
        assert_eq!(Value::Binary(vec![0xde, 0xad]).to_string(), "b\"dead\"");
        assert_eq!(
            Value::Reference(ContainerIdentifier::new("event", 2)).to_string(),
            "ref(event.2)"
        );
    }
}
