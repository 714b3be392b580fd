//! Field tree: the recursive type description of one top-level field

use crate::config::MAX_VARIANT_ALTERNATIVES;
use crate::{Result, TupleError, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Characters reserved for column path suffixes
const RESERVED_NAME_CHARS: &[char] = &['.', '[', ']', '#', ':'];

/// Primitive element kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum PrimitiveKind {
    Bool = 0,
    Int8 = 1,
    Int16 = 2,
    Int32 = 3,
    Int64 = 4,
    UInt8 = 5,
    UInt16 = 6,
    UInt32 = 7,
    UInt64 = 8,
    Float32 = 9,
    Float64 = 10,
}

impl PrimitiveKind {
    /// All kinds, in id order
    pub const ALL: [PrimitiveKind; 11] = [
        PrimitiveKind::Bool,
        PrimitiveKind::Int8,
        PrimitiveKind::Int16,
        PrimitiveKind::Int32,
        PrimitiveKind::Int64,
        PrimitiveKind::UInt8,
        PrimitiveKind::UInt16,
        PrimitiveKind::UInt32,
        PrimitiveKind::UInt64,
        PrimitiveKind::Float32,
        PrimitiveKind::Float64,
    ];

    /// Stable on-disk id
    pub fn id(self) -> u8 {
        self as u8
    }

    /// Look up a kind by its on-disk id
    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.get(id as usize).copied()
    }

    /// Logical width in bytes. Booleans are bit-packed on disk but
    /// report one byte here.
    pub fn width(self) -> usize {
        match self {
            PrimitiveKind::Bool | PrimitiveKind::Int8 | PrimitiveKind::UInt8 => 1,
            PrimitiveKind::Int16 | PrimitiveKind::UInt16 => 2,
            PrimitiveKind::Int32 | PrimitiveKind::UInt32 | PrimitiveKind::Float32 => 4,
            PrimitiveKind::Int64 | PrimitiveKind::UInt64 | PrimitiveKind::Float64 => 8,
        }
    }

    /// Canonical name
    pub fn name(self) -> &'static str {
        match self {
            PrimitiveKind::Bool => "bool",
            PrimitiveKind::Int8 => "int8",
            PrimitiveKind::Int16 => "int16",
            PrimitiveKind::Int32 => "int32",
            PrimitiveKind::Int64 => "int64",
            PrimitiveKind::UInt8 => "uint8",
            PrimitiveKind::UInt16 => "uint16",
            PrimitiveKind::UInt32 => "uint32",
            PrimitiveKind::UInt64 => "uint64",
            PrimitiveKind::Float32 => "float32",
            PrimitiveKind::Float64 => "float64",
        }
    }

    /// Check that a value carries exactly this kind
    pub fn matches(self, value: &Value) -> bool {
        matches!(
            (self, value),
            (PrimitiveKind::Bool, Value::Bool(_))
                | (PrimitiveKind::Int8, Value::Int8(_))
                | (PrimitiveKind::Int16, Value::Int16(_))
                | (PrimitiveKind::Int32, Value::Int32(_))
                | (PrimitiveKind::Int64, Value::Int64(_))
                | (PrimitiveKind::UInt8, Value::UInt8(_))
                | (PrimitiveKind::UInt16, Value::UInt16(_))
                | (PrimitiveKind::UInt32, Value::UInt32(_))
                | (PrimitiveKind::UInt64, Value::UInt64(_))
                | (PrimitiveKind::Float32, Value::Float32(_))
                | (PrimitiveKind::Float64, Value::Float64(_))
        )
    }

    /// Zero value of this kind
    pub fn default_value(self) -> Value {
        match self {
            PrimitiveKind::Bool => Value::Bool(false),
            PrimitiveKind::Int8 => Value::Int8(0),
            PrimitiveKind::Int16 => Value::Int16(0),
            PrimitiveKind::Int32 => Value::Int32(0),
            PrimitiveKind::Int64 => Value::Int64(0),
            PrimitiveKind::UInt8 => Value::UInt8(0),
            PrimitiveKind::UInt16 => Value::UInt16(0),
            PrimitiveKind::UInt32 => Value::UInt32(0),
            PrimitiveKind::UInt64 => Value::UInt64(0),
            PrimitiveKind::Float32 => Value::Float32(0.0),
            PrimitiveKind::Float64 => Value::Float64(0.0),
        }
    }
}

impl FromStr for PrimitiveKind {
    type Err = TupleError;

    fn from_str(s: &str) -> Result<Self> {
        let kind = match s {
            "bool" | "bit" => PrimitiveKind::Bool,
            "int8" | "i8" => PrimitiveKind::Int8,
            "int16" | "i16" => PrimitiveKind::Int16,
            "int32" | "i32" | "int" => PrimitiveKind::Int32,
            "int64" | "i64" => PrimitiveKind::Int64,
            "uint8" | "u8" => PrimitiveKind::UInt8,
            "uint16" | "u16" => PrimitiveKind::UInt16,
            "uint32" | "u32" => PrimitiveKind::UInt32,
            "uint64" | "u64" => PrimitiveKind::UInt64,
            "float32" | "f32" | "float" => PrimitiveKind::Float32,
            "float64" | "f64" | "double" => PrimitiveKind::Float64,
            other => {
                return Err(TupleError::Schema(format!(
                    "unsupported primitive kind: {}",
                    other
                )))
            }
        };
        Ok(kind)
    }
}

impl fmt::Display for PrimitiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A node in the schema tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Field {
    /// Single primitive value
    Scalar(PrimitiveKind),
    /// `length` elements per entry, no length column
    FixedArray { element: Box<Field>, length: usize },
    /// Variable number of elements per entry
    Sequence(Box<Field>),
    /// UTF-8 string
    Text,
    /// Named members, at least one
    Record(Vec<(String, Field)>),
    /// Positional members named `_0`, `_1`, ..., at least one
    Tuple(Vec<Field>),
    /// Exactly one active alternative per entry
    Variant(Vec<Field>),
}

impl Field {
    pub fn scalar(kind: PrimitiveKind) -> Self {
        Field::Scalar(kind)
    }

    pub fn array(element: Field, length: usize) -> Self {
        Field::FixedArray {
            element: Box::new(element),
            length,
        }
    }

    pub fn sequence(element: Field) -> Self {
        Field::Sequence(Box::new(element))
    }

    pub fn text() -> Self {
        Field::Text
    }

    pub fn record<I, S>(members: I) -> Self
    where
        I: IntoIterator<Item = (S, Field)>,
        S: Into<String>,
    {
        Field::Record(members.into_iter().map(|(n, f)| (n.into(), f)).collect())
    }

    pub fn tuple(members: Vec<Field>) -> Self {
        Field::Tuple(members)
    }

    /// Two-member tuple
    pub fn pair(first: Field, second: Field) -> Self {
        Field::Tuple(vec![first, second])
    }

    pub fn variant(alternatives: Vec<Field>) -> Self {
        Field::Variant(alternatives)
    }

    /// Check the declaration recursively
    pub fn validate(&self) -> Result<()> {
        match self {
            Field::Scalar(_) | Field::Text => Ok(()),
            Field::FixedArray { element, length } => {
                if *length == 0 {
                    return Err(TupleError::Schema("fixed array length must be at least 1".into()));
                }
                element.validate()
            }
            Field::Sequence(element) => element.validate(),
            Field::Record(members) => {
                if members.is_empty() {
                    return Err(TupleError::Schema("record needs at least one member".into()));
                }
                let mut seen = HashSet::new();
                for (name, member) in members {
                    validate_name(name)?;
                    if !seen.insert(name.as_str()) {
                        return Err(TupleError::Schema(format!(
                            "duplicate record member: {}",
                            name
                        )));
                    }
                    member.validate()?;
                }
                Ok(())
            }
            Field::Tuple(members) => {
                if members.is_empty() {
                    return Err(TupleError::Schema("tuple needs at least one member".into()));
                }
                members.iter().try_for_each(Field::validate)
            }
            Field::Variant(alternatives) => {
                if alternatives.is_empty() {
                    return Err(TupleError::Schema("variant needs at least one alternative".into()));
                }
                if alternatives.len() > MAX_VARIANT_ALTERNATIVES {
                    return Err(TupleError::Schema(format!(
                        "variant has {} alternatives, maximum is {}",
                        alternatives.len(),
                        MAX_VARIANT_ALTERNATIVES
                    )));
                }
                alternatives.iter().try_for_each(Field::validate)
            }
        }
    }

    /// Placeholder value written into inactive variant alternatives
    pub fn default_value(&self) -> Value {
        match self {
            Field::Scalar(kind) => kind.default_value(),
            Field::FixedArray { element, length } => {
                Value::Array(vec![element.default_value(); *length])
            }
            Field::Sequence(_) => Value::Sequence(Vec::new()),
            Field::Text => Value::Text(String::new()),
            Field::Record(members) => {
                Value::Record(members.iter().map(|(_, f)| f.default_value()).collect())
            }
            Field::Tuple(members) => Value::Record(members.iter().map(Field::default_value).collect()),
            Field::Variant(alternatives) => Value::Variant {
                tag: 0,
                value: Box::new(alternatives[0].default_value()),
            },
        }
    }

    /// Check that `value` has the shape of this field. `path` names the
    /// location for error messages.
    pub fn check_value(&self, value: &Value, path: &str) -> Result<()> {
        let mismatch = || {
            TupleError::Fill(format!(
                "{}: expected {}, got {}",
                path,
                self.type_name(),
                value.kind_name()
            ))
        };

        match (self, value) {
            (Field::Scalar(kind), v) => {
                if kind.matches(v) {
                    Ok(())
                } else {
                    Err(mismatch())
                }
            }
            (Field::FixedArray { element, length }, Value::Array(items)) => {
                if items.len() != *length {
                    return Err(TupleError::Fill(format!(
                        "{}: fixed array expects {} elements, got {}",
                        path,
                        length,
                        items.len()
                    )));
                }
                items
                    .iter()
                    .enumerate()
                    .try_for_each(|(i, v)| element.check_value(v, &format!("{}[{}]", path, i)))
            }
            (Field::Sequence(element), Value::Sequence(items)) => items
                .iter()
                .enumerate()
                .try_for_each(|(i, v)| element.check_value(v, &format!("{}[{}]", path, i))),
            (Field::Text, Value::Text(_)) => Ok(()),
            (Field::Record(members), Value::Record(values)) => {
                if members.len() != values.len() {
                    return Err(TupleError::Fill(format!(
                        "{}: record expects {} members, got {}",
                        path,
                        members.len(),
                        values.len()
                    )));
                }
                members
                    .iter()
                    .zip(values)
                    .try_for_each(|((name, f), v)| f.check_value(v, &format!("{}.{}", path, name)))
            }
            (Field::Tuple(members), Value::Record(values)) => {
                if members.len() != values.len() {
                    return Err(TupleError::Fill(format!(
                        "{}: tuple expects {} members, got {}",
                        path,
                        members.len(),
                        values.len()
                    )));
                }
                members
                    .iter()
                    .zip(values)
                    .enumerate()
                    .try_for_each(|(i, (f, v))| f.check_value(v, &format!("{}._{}", path, i)))
            }
            (Field::Variant(alternatives), Value::Variant { tag, value }) => {
                let alternative = alternatives.get(*tag as usize).ok_or_else(|| {
                    TupleError::Fill(format!(
                        "{}: variant alternative {} not declared ({} alternatives)",
                        path,
                        tag,
                        alternatives.len()
                    ))
                })?;
                alternative.check_value(value, &format!("{}#{}", path, tag))
            }
            _ => Err(mismatch()),
        }
    }

    /// Human-readable type name, e.g. `sequence<tuple<int32, text>>`
    pub fn type_name(&self) -> String {
        fn join<'a>(fields: impl Iterator<Item = &'a Field>) -> String {
            fields.map(Field::type_name).collect::<Vec<_>>().join(", ")
        }

        match self {
            Field::Scalar(kind) => kind.name().to_string(),
            Field::FixedArray { element, length } => {
                format!("array<{}, {}>", element.type_name(), length)
            }
            Field::Sequence(element) => format!("sequence<{}>", element.type_name()),
            Field::Text => "text".to_string(),
            Field::Record(members) => {
                let inner: Vec<String> = members
                    .iter()
                    .map(|(n, f)| format!("{}: {}", n, f.type_name()))
                    .collect();
                format!("record{{{}}}", inner.join(", "))
            }
            Field::Tuple(members) => format!("tuple<{}>", join(members.iter())),
            Field::Variant(alternatives) => format!("variant<{}>", join(alternatives.iter())),
        }
    }
}

/// Check that a field or member name is usable in a column path
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(TupleError::Schema("field name must not be empty".into()));
    }
    if name.contains(RESERVED_NAME_CHARS) {
        return Err(TupleError::Schema(format!(
            "field name {:?} contains a reserved character ({:?})",
            name, RESERVED_NAME_CHARS
        )));
    }
    if name.len() > u16::MAX as usize {
        return Err(TupleError::Schema("field name too long".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_primitive() {
        assert_eq!("int16".parse::<PrimitiveKind>().unwrap(), PrimitiveKind::Int16);
        assert_eq!("double".parse::<PrimitiveKind>().unwrap(), PrimitiveKind::Float64);
        assert!(matches!(
            "complex128".parse::<PrimitiveKind>(),
            Err(TupleError::Schema(_))
        ));
        for kind in PrimitiveKind::ALL {
            assert_eq!(PrimitiveKind::from_id(kind.id()), Some(kind));
        }
    }

    #[test]
    fn test_validate_rejects_malformed() {
        assert!(Field::tuple(vec![]).validate().is_err());
        assert!(Field::record(Vec::<(String, Field)>::new()).validate().is_err());
        assert!(Field::variant(vec![]).validate().is_err());
        assert!(Field::array(Field::Text, 0).validate().is_err());

        let dup = Field::record([
            ("pt", Field::scalar(PrimitiveKind::Float32)),
            ("pt", Field::scalar(PrimitiveKind::Float32)),
        ]);
        assert!(matches!(dup.validate(), Err(TupleError::Schema(_))));

        let bad_name = Field::record([("a.b", Field::Text)]);
        assert!(bad_name.validate().is_err());
    }

    #[test]
    fn test_check_value() {
        let field = Field::variant(vec![Field::scalar(PrimitiveKind::Int32), Field::Text]);
        assert!(field.check_value(&Value::variant(1, Value::text("two")), "v").is_ok());
        assert!(field.check_value(&Value::variant(1, Value::Int32(2)), "v").is_err());

        let err = field.check_value(&Value::variant(2, Value::Int32(2)), "v").unwrap_err();
        assert!(err.to_string().contains("alternative 2"));

        let arr = Field::array(Field::scalar(PrimitiveKind::Float32), 3);
        let short = Value::Array(vec![Value::Float32(1.0); 2]);
        assert!(matches!(arr.check_value(&short, "a"), Err(TupleError::Fill(_))));
    }

    #[test]
    fn test_default_value_round_trips_shape() {
        let field = Field::record([
            ("n", Field::scalar(PrimitiveKind::UInt8)),
            ("tags", Field::sequence(Field::Text)),
            ("pos", Field::array(Field::pair(Field::Text, Field::scalar(PrimitiveKind::Bool)), 2)),
            ("v", Field::variant(vec![Field::Text, Field::scalar(PrimitiveKind::Int64)])),
        ]);
        let default = field.default_value();
        assert!(field.check_value(&default, "r").is_ok());
    }

    #[test]
    fn test_type_name() {
        let field = Field::sequence(Field::tuple(vec![Field::scalar(PrimitiveKind::Int32), Field::Text]));
        assert_eq!(field.type_name(), "sequence<tuple<int32, text>>");
    }
}
