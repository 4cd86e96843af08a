//! Attribute values
//!
//! Desired (`should`) and current (`is`) values share one representation.
//! `Absent` is the legitimate "does not exist" state a provider reports; it
//! is never an error.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// A desired or observed attribute value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// The managed object does not exist
    Absent,
    /// The managed object exists, in any form
    Present,
    String(String),
    Integer(i64),
    Boolean(bool),
    Array(Vec<Value>),
}

impl Value {
    /// Interpret a bare word, mapping `absent`/`present` to the sentinels
    pub fn symbol(word: &str) -> Self {
        match word {
            "absent" => Self::Absent,
            "present" => Self::Present,
            other => Self::String(other.to_string()),
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            Self::Absent => Some("absent"),
            Self::Present => Some("present"),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            Self::String(s) => match s.as_str() {
                "true" | "yes" => Some(true),
                "false" | "no" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            Self::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Elements of an array, or the value itself as a single element
    pub fn items(&self) -> Vec<&Value> {
        match self {
            Self::Array(items) => items.iter().collect(),
            other => vec![other],
        }
    }

    /// String form of every element (see [`Value::items`])
    pub fn strings(&self) -> Vec<String> {
        self.items().into_iter().map(ToString::to_string).collect()
    }

    /// Equality that also accepts matching string forms, so `644` and
    /// `"644"` compare equal. Arrays still compare element-wise.
    pub fn loosely_eq(&self, other: &Value) -> bool {
        if self == other {
            return true;
        }
        match (self, other) {
            (Self::Array(a), Self::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.loosely_eq(y))
            }
            (Self::Array(_), _) | (_, Self::Array(_)) => false,
            _ => self.to_string() == other.to_string(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Absent => write!(f, "absent"),
            Self::Present => write!(f, "present"),
            Self::String(s) => write!(f, "{s}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::Array(items)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Absent => serializer.serialize_str("absent"),
            Self::Present => serializer.serialize_str("present"),
            Self::String(s) => serializer.serialize_str(s),
            Self::Integer(i) => serializer.serialize_i64(*i),
            Self::Boolean(b) => serializer.serialize_bool(*b),
            Self::Array(items) => serializer.collect_seq(items),
        }
    }
}

/// Wire form of a value; sentinels are recovered per attribute by munging
#[derive(Deserialize)]
#[serde(untagged)]
enum RawValue {
    Boolean(bool),
    Integer(i64),
    String(String),
    Array(Vec<RawValue>),
}

impl From<RawValue> for Value {
    fn from(raw: RawValue) -> Self {
        match raw {
            RawValue::Boolean(b) => Self::Boolean(b),
            RawValue::Integer(i) => Self::Integer(i),
            RawValue::String(s) => Self::String(s),
            RawValue::Array(items) => Self::Array(items.into_iter().map(Value::from).collect()),
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        RawValue::deserialize(deserializer).map(Value::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_sentinels() {
        assert_eq!(Value::symbol("absent"), Value::Absent);
        assert_eq!(Value::symbol("present"), Value::Present);
        assert_eq!(Value::symbol("running"), Value::from("running"));
    }

    #[test]
    fn test_loose_equality() {
        assert!(Value::Integer(644).loosely_eq(&Value::from("644")));
        assert!(!Value::from("0644").loosely_eq(&Value::Integer(644)));
        assert!(
            Value::Array(vec![Value::Integer(0)]).loosely_eq(&Value::Array(vec![Value::from("0")]))
        );
        assert!(!Value::Array(vec![Value::from("a")]).loosely_eq(&Value::from("a")));
    }

    #[test]
    fn test_display_array() {
        let value = Value::Array(vec![Value::from("a"), Value::Integer(2)]);
        assert_eq!(value.to_string(), "[a, 2]");
    }

    #[test]
    fn test_deserialize_untagged() {
        let value: Value = serde_json::from_str(r#"["x", 1, true]"#).unwrap();
        assert_eq!(
            value,
            Value::Array(vec![
                Value::from("x"),
                Value::Integer(1),
                Value::Boolean(true)
            ])
        );
        // Sentinels are only produced by munging, never by the wire form
        let absent: Value = serde_json::from_str(r#""absent""#).unwrap();
        assert_eq!(absent, Value::from("absent"));
    }

    #[test]
    fn test_serialize_sentinel() {
        assert_eq!(serde_json::to_string(&Value::Absent).unwrap(), r#""absent""#);
    }
}
