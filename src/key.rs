//! Index key values.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A key emitted by a map function or supplied to a lookup.
///
/// A `Value` key identifies one point on the rank line. A `Range` key is an
/// inclusive interval between two point keys and is only meaningful as a
/// lookup argument; it cannot be ranked directly and a map function must not
/// emit one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Key {
    /// A single JSON value (number, string, or structured).
    Value(Value),
    /// An inclusive interval `[start, end]` of point keys.
    Range(Value, Value),
}

impl Key {
    /// Build an inclusive range key from two point values.
    pub fn range(start: impl Into<Value>, end: impl Into<Value>) -> Self {
        Key::Range(start.into(), end.into())
    }

    /// Whether this key is a range.
    pub fn is_range(&self) -> bool {
        matches!(self, Key::Range(..))
    }
}

impl From<Value> for Key {
    fn from(v: Value) -> Self {
        Key::Value(v)
    }
}

impl From<&str> for Key {
    fn from(v: &str) -> Self {
        Key::Value(Value::from(v))
    }
}

impl From<String> for Key {
    fn from(v: String) -> Self {
        Key::Value(Value::from(v))
    }
}

impl From<i64> for Key {
    fn from(v: i64) -> Self {
        Key::Value(Value::from(v))
    }
}

impl From<f64> for Key {
    fn from(v: f64) -> Self {
        Key::Value(Value::from(v))
    }
}

impl From<bool> for Key {
    fn from(v: bool) -> Self {
        Key::Value(Value::from(v))
    }
}
