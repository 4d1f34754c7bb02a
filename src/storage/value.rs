//! Value types for the keyspace
//!
//! Defines the data types the server stores and their expiry metadata.

use crate::storage::stream::StreamLog;
use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

/// All value types the keyspace can hold
#[derive(Debug, Clone)]
pub enum Value {
    /// String value (bytes)
    String(Vec<u8>),

    /// List value (ordered collection)
    List(VecDeque<Vec<u8>>),

    /// Stream value (append-only timestamped log)
    Stream(StreamLog),
}

/// Value type enumeration, as reported by TYPE
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    String,
    List,
    Stream,
}

impl ValueType {
    pub fn name(&self) -> &'static str {
        match self {
            ValueType::String => "string",
            ValueType::List => "list",
            ValueType::Stream => "stream",
        }
    }
}

/// A stored entry with its value and optional absolute expiry
#[derive(Debug, Clone)]
pub struct StoredValue {
    /// The actual value
    pub value: Value,

    /// Absolute expiry timestamp in unix milliseconds, if any
    pub expires_at_ms: Option<u64>,
}

/// Current wall clock in unix milliseconds
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl Value {
    /// Get the type of this value
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::String(_) => ValueType::String,
            Value::List(_) => ValueType::List,
            Value::Stream(_) => ValueType::Stream,
        }
    }

    /// Create a string value from bytes
    pub fn string<T: Into<Vec<u8>>>(data: T) -> Self {
        Value::String(data.into())
    }

    /// Try to parse string value as integer
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::String(bytes) => std::str::from_utf8(bytes).ok()?.parse::<i64>().ok(),
            _ => None,
        }
    }

    /// Get string bytes if this is a string value
    pub fn as_string(&self) -> Option<&[u8]> {
        match self {
            Value::String(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Create an empty list
    pub fn empty_list() -> Self {
        Value::List(VecDeque::new())
    }

    /// Create an empty stream
    pub fn empty_stream() -> Self {
        Value::Stream(StreamLog::new())
    }
}

impl StoredValue {
    /// Create a value with no expiry
    pub fn new(value: Value) -> Self {
        StoredValue {
            value,
            expires_at_ms: None,
        }
    }

    /// Create a value expiring `ttl_ms` from now
    pub fn with_ttl(value: Value, ttl_ms: u64) -> Self {
        StoredValue {
            value,
            expires_at_ms: Some(now_ms() + ttl_ms),
        }
    }

    /// Create a value with an absolute expiry (snapshot bootstrap path)
    pub fn with_expiry_at(value: Value, expires_at_ms: Option<u64>) -> Self {
        StoredValue {
            value,
            expires_at_ms,
        }
    }

    /// An entry with an expiry in the past is treated as absent
    pub fn is_expired(&self) -> bool {
        self.expires_at_ms
            .map(|at| now_ms() >= at)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_types() {
        let string_val = Value::string("hello");
        assert_eq!(string_val.value_type(), ValueType::String);
        assert_eq!(string_val.value_type().name(), "string");

        let list_val = Value::empty_list();
        assert_eq!(list_val.value_type().name(), "list");

        let stream_val = Value::empty_stream();
        assert_eq!(stream_val.value_type().name(), "stream");
    }

    #[test]
    fn test_integer_parsing() {
        assert_eq!(Value::string("42").as_integer(), Some(42));
        assert_eq!(Value::string("-3").as_integer(), Some(-3));
        assert_eq!(Value::string("forty-two").as_integer(), None);
        assert_eq!(Value::empty_list().as_integer(), None);
    }

    #[test]
    fn test_expiration() {
        let stored = StoredValue::with_ttl(Value::string("test"), 1);
        assert!(!stored.is_expired());

        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(stored.is_expired());

        let eternal = StoredValue::new(Value::string("test"));
        assert!(!eternal.is_expired());
    }

    #[test]
    fn test_absolute_expiry_in_past() {
        let stored = StoredValue::with_expiry_at(Value::string("old"), Some(1));
        assert!(stored.is_expired());
    }
}
