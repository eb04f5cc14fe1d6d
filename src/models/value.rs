//! Column values and ordered records.
//!
//! [`Value`] is the single tagged type that crosses the Connection boundary in
//! both directions: bound parameters going out, decoded columns coming back.
//! [`Record`] keeps columns in insertion order, which is what the query
//! builder and the model rely on to render deterministic SQL.

use crate::error::{DbError, DbResult};
use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// A database value.
///
/// Bytes serialize as a base64 string. JSON cannot tell that string from
/// text, so deserializing JSON always yields `Text`; `Bytes` only comes back
/// from formats that carry raw byte data.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    /// NULL value
    Null,
    Bool(bool),
    /// Integer value (stored as i64 for maximum range)
    Int(i64),
    Float(f64),
    Text(String),
    /// Binary data (base64 encoded in JSON)
    #[serde(serialize_with = "base64_bytes::serialize")]
    Bytes(Vec<u8>),
}

/// Declared storage kind of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Bool,
    Int,
    Float,
    Text,
    Bytes,
}

impl ValueKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::Text => "text",
            Self::Bytes => "bytes",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Value {
    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the type name of this value for debugging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::Bytes(_) => "bytes",
        }
    }

    /// The kind of this value, `None` for NULL.
    pub fn kind(&self) -> Option<ValueKind> {
        match self {
            Self::Null => None,
            Self::Bool(_) => Some(ValueKind::Bool),
            Self::Int(_) => Some(ValueKind::Int),
            Self::Float(_) => Some(ValueKind::Float),
            Self::Text(_) => Some(ValueKind::Text),
            Self::Bytes(_) => Some(ValueKind::Bytes),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Bool(v) => Some(i64::from(*v)),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            Self::Int(0) => Some(false),
            Self::Int(1) => Some(true),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(v) => Some(v),
            Self::Text(v) => Some(v.as_bytes()),
            _ => None,
        }
    }

    /// Convert to `kind` when the conversion loses nothing.
    ///
    /// NULL passes through unchanged; nullability is checked by the caller.
    pub fn coerce(self, kind: ValueKind) -> DbResult<Value> {
        let converted = match (self, kind) {
            (Self::Null, _) => Self::Null,
            (v @ Self::Bool(_), ValueKind::Bool)
            | (v @ Self::Int(_), ValueKind::Int)
            | (v @ Self::Float(_), ValueKind::Float)
            | (v @ Self::Text(_), ValueKind::Text)
            | (v @ Self::Bytes(_), ValueKind::Bytes) => v,
            (Self::Int(v), ValueKind::Float) => Self::Float(v as f64),
            (Self::Int(0), ValueKind::Bool) => Self::Bool(false),
            (Self::Int(1), ValueKind::Bool) => Self::Bool(true),
            (Self::Bool(v), ValueKind::Int) => Self::Int(i64::from(v)),
            (Self::Float(v), ValueKind::Int)
                if v.fract() == 0.0 && v >= i64::MIN as f64 && v <= i64::MAX as f64 =>
            {
                Self::Int(v as i64)
            }
            (Self::Text(v), ValueKind::Bytes) => Self::Bytes(v.into_bytes()),
            (other, kind) => {
                return Err(DbError::invalid_input(format!(
                    "Cannot convert {} value to {}",
                    other.type_name(),
                    kind
                )));
            }
        };
        Ok(converted)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Bool(v) => write!(f, "{}", v),
            Self::Int(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{}", v),
            Self::Text(v) => f.write_str(v),
            Self::Bytes(v) => write!(f, "<{} bytes>", v.len()),
        }
    }
}

macro_rules! impl_from_int {
    ($($t:ty),+) => {
        $(
            impl From<$t> for Value {
                fn from(v: $t) -> Self {
                    Self::Int(i64::from(v))
                }
            }
        )+
    };
}

impl_from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Self::Float(f64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Self::Bytes(v.to_vec())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// Custom serialization for binary data as base64.
mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::Serializer;

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ValueVisitor;

        impl<'de> Visitor<'de> for ValueVisitor {
            type Value = Value;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("null, a boolean, a number, a string or bytes")
            }

            fn visit_unit<E: de::Error>(self) -> Result<Value, E> {
                Ok(Value::Null)
            }

            fn visit_none<E: de::Error>(self) -> Result<Value, E> {
                Ok(Value::Null)
            }

            fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Value, D::Error> {
                deserializer.deserialize_any(self)
            }

            fn visit_bool<E: de::Error>(self, v: bool) -> Result<Value, E> {
                Ok(Value::Bool(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Value, E> {
                Ok(Value::Int(v))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Value, E> {
                i64::try_from(v)
                    .map(Value::Int)
                    .map_err(|_| E::custom(format!("integer {} is out of range", v)))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Value, E> {
                Ok(Value::Float(v))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Value, E> {
                Ok(Value::Text(v.to_string()))
            }

            fn visit_string<E: de::Error>(self, v: String) -> Result<Value, E> {
                Ok(Value::Text(v))
            }

            fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Value, E> {
                Ok(Value::Bytes(v.to_vec()))
            }

            fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<Value, E> {
                Ok(Value::Bytes(v))
            }
        }

        deserializer.deserialize_any(ValueVisitor)
    }
}

// =============================================================================
// Record
// =============================================================================

/// An insertion-ordered mapping of column name to value.
///
/// Inserting an existing column replaces its value in place, so the column
/// keeps its original position.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    entries: Vec<(String, Value)>,
}

/// Named bindings for a parameterized statement.
pub type Bindings = Record;

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a column, returning the previous value.
    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let column = column.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(name, _)| *name == column) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.entries.push((column, value));
                None
            }
        }
    }

    /// Builder-style insert.
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(column, value);
        self
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.get(column).is_some()
    }

    pub fn remove(&mut self, column: &str) -> Option<Value> {
        let idx = self.entries.iter().position(|(name, _)| name == column)?;
        Some(self.entries.remove(idx).1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.entries.iter().map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// First value in column order.
    pub fn first_value(&self) -> Option<&Value> {
        self.entries.first().map(|(_, value)| value)
    }

    /// Entries of `self` that are absent from `other` or hold a different value.
    pub fn difference(&self, other: &Record) -> Record {
        self.iter()
            .filter(|(name, value)| other.get(name) != Some(*value))
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect()
    }

    pub fn to_json(&self) -> DbResult<String> {
        serde_json::to_string(self).map_err(|e| DbError::internal(e.to_string()))
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut record = Record::new();
        for (k, v) in iter {
            record.insert(k, v);
        }
        record
    }
}

impl IntoIterator for Record {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, value) in &self.entries {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Record {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct RecordVisitor;

        impl<'de> Visitor<'de> for RecordVisitor {
            type Value = Record;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of column names to values")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Record, A::Error> {
                let mut record = Record::new();
                while let Some((name, value)) = access.next_entry::<String, Value>()? {
                    record.insert(name, value);
                }
                Ok(record)
            }
        }

        deserializer.deserialize_map(RecordVisitor)
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(json) => f.write_str(&json),
            Err(_) => Err(fmt::Error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_insert_keeps_position() {
        let mut record = Record::new().with("a", 1).with("b", 2).with("c", 3);
        assert_eq!(record.insert("b", 20), Some(Value::Int(2)));
        assert_eq!(record.keys().collect::<Vec<_>>(), vec!["a", "b", "c"]);
        assert_eq!(record.get("b"), Some(&Value::Int(20)));
    }

    #[test]
    fn test_record_remove() {
        let mut record = Record::new().with("a", 1).with("b", 2);
        assert_eq!(record.remove("a"), Some(Value::Int(1)));
        assert_eq!(record.remove("a"), None);
        assert_eq!(record.len(), 1);
    }

    #[test]
    fn test_record_difference() {
        let original = Record::new().with("id", 1).with("title", "a");
        let current = original.clone().with("title", "b").with("body", "x");
        let diff = current.difference(&original);
        assert_eq!(diff.keys().collect::<Vec<_>>(), vec!["title", "body"]);
        assert!(original.difference(&original).is_empty());
    }

    #[test]
    fn test_record_serializes_in_order() {
        let record = Record::new()
            .with("z", 1)
            .with("a", "text")
            .with("m", Value::Null);
        assert_eq!(record.to_json().unwrap(), r#"{"z":1,"a":"text","m":null}"#);
    }

    #[test]
    fn test_record_deserialize() {
        let record: Record = serde_json::from_str(r#"{"b":true,"a":1.5,"c":"x"}"#).unwrap();
        assert_eq!(record.keys().collect::<Vec<_>>(), vec!["b", "a", "c"]);
        assert_eq!(record.get("b"), Some(&Value::Bool(true)));
        assert_eq!(record.get("a"), Some(&Value::Float(1.5)));
    }

    #[test]
    fn test_bytes_serialize_as_base64() {
        let value = Value::Bytes(b"hello world".to_vec());
        assert_eq!(
            serde_json::to_string(&value).unwrap(),
            r#""aGVsbG8gd29ybGQ=""#
        );
    }

    #[test]
    fn test_json_strings_deserialize_as_text() {
        let json = serde_json::to_string(&Value::Bytes(b"hi".to_vec())).unwrap();
        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value, Value::Text("aGk=".to_string()));

        let value: Value = serde_json::from_str("null").unwrap();
        assert_eq!(value, Value::Null);
        let value: Value = serde_json::from_str("-7").unwrap();
        assert_eq!(value, Value::Int(-7));
        assert!(serde_json::from_str::<Value>("18446744073709551615").is_err());
    }

    #[test]
    fn test_raw_bytes_deserialize_as_bytes() {
        use serde::de::value::{BytesDeserializer, Error};

        let value = Value::deserialize(BytesDeserializer::<Error>::new(b"\x00\xff")).unwrap();
        assert_eq!(value, Value::Bytes(vec![0x00, 0xff]));
    }

    #[test]
    fn test_coerce_lossless() {
        assert_eq!(Value::Int(3).coerce(ValueKind::Float).unwrap(), Value::Float(3.0));
        assert_eq!(Value::Int(1).coerce(ValueKind::Bool).unwrap(), Value::Bool(true));
        assert_eq!(Value::Float(4.0).coerce(ValueKind::Int).unwrap(), Value::Int(4));
        assert_eq!(Value::Null.coerce(ValueKind::Text).unwrap(), Value::Null);
    }

    #[test]
    fn test_coerce_rejects_lossy() {
        assert!(Value::Float(4.5).coerce(ValueKind::Int).is_err());
        assert!(Value::Int(2).coerce(ValueKind::Bool).is_err());
        assert!(Value::from("1").coerce(ValueKind::Int).is_err());
    }

    #[test]
    fn test_value_from_option() {
        assert_eq!(Value::from(None::<i32>), Value::Null);
        assert_eq!(Value::from(Some("x")), Value::Text("x".to_string()));
    }
}
