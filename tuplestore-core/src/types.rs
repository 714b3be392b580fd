//! Core types for TupleStore

use serde::{Deserialize, Serialize};
use std::fmt;

/// Zero-based entry index across the whole dataset
pub type EntryIndex = u64;

/// Runtime value of a field (or of a nested part of a field)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Bool(bool),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    Float32(f32),
    Float64(f64),
    /// UTF-8 text
    Text(String),
    /// Fixed-length array; length is part of the schema
    Array(Vec<Value>),
    /// Variable-length sequence
    Sequence(Vec<Value>),
    /// Record or tuple members, in declaration order
    Record(Vec<Value>),
    /// Active alternative of a variant
    Variant { tag: u32, value: Box<Value> },
}

impl Value {
    /// Create a text value
    pub fn text(s: impl Into<String>) -> Self {
        Value::Text(s.into())
    }

    /// Create a variant value selecting alternative `tag`
    pub fn variant(tag: u32, value: Value) -> Self {
        Value::Variant {
            tag,
            value: Box::new(value),
        }
    }

    /// Short name of the value's shape, used in error messages
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Int8(_) => "int8",
            Value::Int16(_) => "int16",
            Value::Int32(_) => "int32",
            Value::Int64(_) => "int64",
            Value::UInt8(_) => "uint8",
            Value::UInt16(_) => "uint16",
            Value::UInt32(_) => "uint32",
            Value::UInt64(_) => "uint64",
            Value::Float32(_) => "float32",
            Value::Float64(_) => "float64",
            Value::Text(_) => "text",
            Value::Array(_) => "array",
            Value::Sequence(_) => "sequence",
            Value::Record(_) => "record",
            Value::Variant { .. } => "variant",
        }
    }

    /// Get as i64 if this is an integer value that fits
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int8(v) => Some(*v as i64),
            Value::Int16(v) => Some(*v as i64),
            Value::Int32(v) => Some(*v as i64),
            Value::Int64(v) => Some(*v),
            Value::UInt8(v) => Some(*v as i64),
            Value::UInt16(v) => Some(*v as i64),
            Value::UInt32(v) => Some(*v as i64),
            Value::UInt64(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    /// Get as f64 if this is a numeric value
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float32(v) => Some(*v as f64),
            Value::Float64(v) => Some(*v),
            _ => self.as_i64().map(|v| v as f64),
        }
    }

    /// Get as text
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Elements of an array or sequence
    pub fn as_items(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) | Value::Sequence(items) => Some(items),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn list(f: &mut fmt::Formatter<'_>, open: &str, items: &[Value], close: &str) -> fmt::Result {
            write!(f, "{}", open)?;
            for (i, v) in items.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", v)?;
            }
            write!(f, "{}", close)
        }

        match self {
            Value::Bool(v) => write!(f, "{}", v),
            Value::Int8(v) => write!(f, "{}", v),
            Value::Int16(v) => write!(f, "{}", v),
            Value::Int32(v) => write!(f, "{}", v),
            Value::Int64(v) => write!(f, "{}", v),
            Value::UInt8(v) => write!(f, "{}", v),
            Value::UInt16(v) => write!(f, "{}", v),
            Value::UInt32(v) => write!(f, "{}", v),
            Value::UInt64(v) => write!(f, "{}", v),
            Value::Float32(v) => write!(f, "{}", v),
            Value::Float64(v) => write!(f, "{}", v),
            Value::Text(s) => write!(f, "{:?}", s),
            Value::Array(items) | Value::Sequence(items) => list(f, "[", items, "]"),
            Value::Record(items) => list(f, "(", items, ")"),
            Value::Variant { tag, value } => write!(f, "#{}:{}", tag, value),
        }
    }
}

macro_rules! impl_from_scalar {
    ($($t:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$t> for Value {
                fn from(v: $t) -> Self {
                    Value::$variant(v)
                }
            }
        )*
    };
}

impl_from_scalar! {
    bool => Bool,
    i8 => Int8,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    u8 => UInt8,
    u16 => UInt16,
    u32 => UInt32,
    u64 => UInt64,
    f32 => Float32,
    f64 => Float64,
    String => Text,
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

/// One entry: the values of the top-level fields passed to a single fill
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    values: Vec<(String, Value)>,
}

impl Entry {
    /// Create an empty entry
    pub fn new() -> Self {
        Self { values: Vec::new() }
    }

    /// Set a field value, builder style
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    /// Set a field value, replacing any previous value for the same name
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        match self.values.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.values.push((name, value)),
        }
    }

    /// Get a field value
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// Number of fields present
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate over (name, value) pairs
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(n, v)| (n.as_str(), v))
    }
}

/// Which top-level fields a read should materialize
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum FieldSelection {
    /// Every field of the model
    #[default]
    All,
    /// Only the named fields; other columns are never touched
    Only(Vec<String>),
}

impl FieldSelection {
    /// Select the given field names
    pub fn only<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FieldSelection::Only(names.into_iter().map(Into::into).collect())
    }

    /// Check if a field is selected
    pub fn includes(&self, name: &str) -> bool {
        match self {
            FieldSelection::All => true,
            FieldSelection::Only(names) => names.iter().any(|n| n == name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_insert_replaces() {
        let mut entry = Entry::new().with("x", 1i32).with("y", "one");
        entry.insert("x", 2i32);

        assert_eq!(entry.len(), 2);
        assert_eq!(entry.get("x"), Some(&Value::Int32(2)));
        assert_eq!(entry.get("y").and_then(Value::as_str), Some("one"));
        assert!(entry.get("z").is_none());
    }

    #[test]
    fn test_value_display() {
        let v = Value::Record(vec![
            Value::Int32(1),
            Value::Sequence(vec![Value::text("a"), Value::text("b")]),
            Value::variant(1, Value::Bool(true)),
        ]);
        assert_eq!(v.to_string(), "(1, [\"a\", \"b\"], #1:true)");
    }

    #[test]
    fn test_selection() {
        let sel = FieldSelection::only(["a", "c"]);
        assert!(sel.includes("a"));
        assert!(!sel.includes("b"));
        assert!(FieldSelection::All.includes("b"));
    }
}
