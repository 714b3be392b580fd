//! Decomposition of a field tree into flat leaf columns
//!
//! Recursion is depth-first in declaration order. Every container adds its
//! auxiliary column before its children:
//!
//! | Field            | Columns                                   |
//! |------------------|-------------------------------------------|
//! | Scalar           | one column at `p`                         |
//! | FixedArray(e, N) | columns of `e` at `p[N]`                  |
//! | Sequence(e)      | `p:offsets`, then columns of `e` at `p[]` |
//! | Text             | `p:offsets`, `p:bytes`                    |
//! | Record           | members at `p.name`                       |
//! | Tuple            | members at `p._i`                         |
//! | Variant          | `p:tag`, then alternative `i` at `p#i`    |

use super::field::{validate_name, Field, PrimitiveKind};
use crate::{Result, TupleError};

/// Index of a column within a model
pub type ColumnId = usize;

/// Physical element type of a leaf column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnKind {
    /// Primitive value; booleans are bit-packed
    Primitive(PrimitiveKind),
    /// Global cumulative element count (u64)
    Offset,
    /// Active variant alternative (u32)
    Tag,
    /// Raw text bytes
    Bytes,
}

impl ColumnKind {
    /// Stable on-disk id
    pub fn id(self) -> u8 {
        match self {
            ColumnKind::Primitive(kind) => kind.id(),
            ColumnKind::Offset => 11,
            ColumnKind::Tag => 12,
            ColumnKind::Bytes => 13,
        }
    }

    /// Look up a kind by its on-disk id
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            11 => Some(ColumnKind::Offset),
            12 => Some(ColumnKind::Tag),
            13 => Some(ColumnKind::Bytes),
            _ => PrimitiveKind::from_id(id).map(ColumnKind::Primitive),
        }
    }

    /// Width of one element in bytes (1 for bit-packed booleans)
    pub fn width(self) -> usize {
        match self {
            ColumnKind::Primitive(kind) => kind.width(),
            ColumnKind::Offset => 8,
            ColumnKind::Tag => 4,
            ColumnKind::Bytes => 1,
        }
    }

    /// Check if elements are bit-packed
    pub fn is_bit(self) -> bool {
        self == ColumnKind::Primitive(PrimitiveKind::Bool)
    }

    /// Bytes needed to hold `elements` values
    pub fn stored_size(self, elements: u64) -> u64 {
        if self.is_bit() {
            (elements + 7) / 8
        } else {
            elements * self.width() as u64
        }
    }
}

/// Description of one leaf column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    /// Position in the model's column list
    pub id: ColumnId,
    /// Stable path derived from nesting
    pub path: String,
    /// Element type
    pub kind: ColumnKind,
    /// Index of the owning top-level field
    pub field: usize,
}

/// Mirror of a field tree annotated with the columns each node owns
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldNode {
    Scalar {
        column: ColumnId,
        kind: PrimitiveKind,
    },
    Array {
        length: usize,
        element: Box<FieldNode>,
    },
    Sequence {
        offsets: ColumnId,
        element: Box<FieldNode>,
    },
    Text {
        offsets: ColumnId,
        bytes: ColumnId,
    },
    /// Records and tuples
    Record {
        members: Vec<FieldNode>,
    },
    Variant {
        tag: ColumnId,
        alternatives: Vec<FieldNode>,
    },
}

impl FieldNode {
    /// Number of instances of this node, given the element count of each
    /// column. A fixed array's instance spans `length` element instances.
    pub fn instances(&self, elements: &impl Fn(ColumnId) -> u64) -> u64 {
        match self {
            FieldNode::Scalar { column, .. } => elements(*column),
            FieldNode::Array { length, element } => element.instances(elements) / *length as u64,
            FieldNode::Sequence { offsets, .. } | FieldNode::Text { offsets, .. } => {
                elements(*offsets)
            }
            FieldNode::Record { members } => members.first().map_or(0, |m| m.instances(elements)),
            FieldNode::Variant { tag, .. } => elements(*tag),
        }
    }

    /// Collect every column in this subtree
    pub fn collect_columns(&self, out: &mut Vec<ColumnId>) {
        match self {
            FieldNode::Scalar { column, .. } => out.push(*column),
            FieldNode::Array { element, .. } => element.collect_columns(out),
            FieldNode::Sequence { offsets, element } => {
                out.push(*offsets);
                element.collect_columns(out);
            }
            FieldNode::Text { offsets, bytes } => {
                out.push(*offsets);
                out.push(*bytes);
            }
            FieldNode::Record { members } => {
                members.iter().for_each(|m| m.collect_columns(out));
            }
            FieldNode::Variant { tag, alternatives } => {
                out.push(*tag);
                alternatives.iter().for_each(|a| a.collect_columns(out));
            }
        }
    }
}

/// Decompose one named top-level field into its ordered column list.
///
/// Pure function of the declaration: the same field always yields the same
/// paths in the same order.
pub fn decompose(name: &str, field: &Field) -> Result<Vec<ColumnSpec>> {
    validate_name(name)?;
    field.validate()?;
    let mut columns = Vec::new();
    decompose_into(0, name.to_string(), field, &mut columns);
    Ok(columns)
}

/// Append the columns of `field` at `path` to `columns`, returning the
/// annotated node. The field must already be validated.
pub(crate) fn decompose_into(
    field_index: usize,
    path: String,
    field: &Field,
    columns: &mut Vec<ColumnSpec>,
) -> FieldNode {
    let push = |columns: &mut Vec<ColumnSpec>, path: String, kind: ColumnKind| {
        let id = columns.len();
        columns.push(ColumnSpec {
            id,
            path,
            kind,
            field: field_index,
        });
        id
    };

    match field {
        Field::Scalar(kind) => FieldNode::Scalar {
            column: push(columns, path, ColumnKind::Primitive(*kind)),
            kind: *kind,
        },
        Field::FixedArray { element, length } => FieldNode::Array {
            length: *length,
            element: Box::new(decompose_into(
                field_index,
                format!("{}[{}]", path, length),
                element,
                columns,
            )),
        },
        Field::Sequence(element) => {
            let offsets = push(columns, format!("{}:offsets", path), ColumnKind::Offset);
            let element = decompose_into(field_index, format!("{}[]", path), element, columns);
            FieldNode::Sequence {
                offsets,
                element: Box::new(element),
            }
        }
        Field::Text => {
            let offsets = push(columns, format!("{}:offsets", path), ColumnKind::Offset);
            let bytes = push(columns, format!("{}:bytes", path), ColumnKind::Bytes);
            FieldNode::Text { offsets, bytes }
        }
        Field::Record(members) => FieldNode::Record {
            members: members
                .iter()
                .map(|(name, f)| decompose_into(field_index, format!("{}.{}", path, name), f, columns))
                .collect(),
        },
        Field::Tuple(members) => FieldNode::Record {
            members: members
                .iter()
                .enumerate()
                .map(|(i, f)| decompose_into(field_index, format!("{}._{}", path, i), f, columns))
                .collect(),
        },
        Field::Variant(alternatives) => {
            let tag = push(columns, format!("{}:tag", path), ColumnKind::Tag);
            let alternatives = alternatives
                .iter()
                .enumerate()
                .map(|(i, f)| decompose_into(field_index, format!("{}#{}", path, i), f, columns))
                .collect();
            FieldNode::Variant { tag, alternatives }
        }
    }
}

/// Reject a column list with repeated paths
pub(crate) fn check_unique_paths(columns: &[ColumnSpec]) -> Result<()> {
    let mut seen = std::collections::HashSet::with_capacity(columns.len());
    for column in columns {
        if !seen.insert(column.path.as_str()) {
            return Err(TupleError::Schema(format!("duplicate column path: {}", column.path)));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(columns: &[ColumnSpec]) -> Vec<&str> {
        columns.iter().map(|c| c.path.as_str()).collect()
    }

    #[test]
    fn test_decompose_scalar_and_text() {
        let cols = decompose("one_integers", &Field::scalar(PrimitiveKind::Int32)).unwrap();
        assert_eq!(paths(&cols), vec!["one_integers"]);

        let cols = decompose("string", &Field::Text).unwrap();
        assert_eq!(paths(&cols), vec!["string:offsets", "string:bytes"]);
        assert_eq!(cols[0].kind, ColumnKind::Offset);
        assert_eq!(cols[1].kind, ColumnKind::Bytes);
    }

    #[test]
    fn test_decompose_nested_depth_first() {
        let field = Field::sequence(Field::variant(vec![
            Field::scalar(PrimitiveKind::Int64),
            Field::Text,
        ]));
        let cols = decompose("vv", &field).unwrap();
        assert_eq!(
            paths(&cols),
            vec!["vv:offsets", "vv[]:tag", "vv[]#0", "vv[]#1:offsets", "vv[]#1:bytes"]
        );
        assert!(cols.iter().enumerate().all(|(i, c)| c.id == i));
    }

    #[test]
    fn test_fixed_array_replicates_once() {
        let lv = Field::record([
            ("pt", Field::scalar(PrimitiveKind::Float32)),
            ("eta", Field::scalar(PrimitiveKind::Float32)),
        ]);
        let cols = decompose("array_lv", &Field::array(lv, 3)).unwrap();
        assert_eq!(paths(&cols), vec!["array_lv[3].pt", "array_lv[3].eta"]);
    }

    #[test]
    fn test_tuple_members() {
        let cols = decompose("pair", &Field::pair(Field::scalar(PrimitiveKind::Int32), Field::Text)).unwrap();
        assert_eq!(paths(&cols), vec!["pair._0", "pair._1:offsets", "pair._1:bytes"]);
    }

    #[test]
    fn test_decompose_is_deterministic() {
        let field = Field::record([
            ("a", Field::sequence(Field::sequence(Field::scalar(PrimitiveKind::Int32)))),
            ("b", Field::array(Field::scalar(PrimitiveKind::Bool), 4)),
        ]);
        assert_eq!(decompose("r", &field).unwrap(), decompose("r", &field).unwrap());
    }

    #[test]
    fn test_node_instances() {
        let model = crate::schema::Model::builder()
            .field(
                "a",
                Field::array(
                    Field::record([
                        ("x", Field::scalar(PrimitiveKind::Int32)),
                        ("s", Field::sequence(Field::Text)),
                    ]),
                    3,
                ),
            )
            .build()
            .unwrap();
        // a[3].x, a[3].s:offsets, a[3].s[]:offsets, a[3].s[]:bytes
        let counts = [12u64, 12, 40, 300];
        let node = model.node(0);
        assert_eq!(node.instances(&|c| counts[c]), 4);

        let FieldNode::Array { element, .. } = node else {
            panic!("expected array node");
        };
        let FieldNode::Record { members } = element.as_ref() else {
            panic!("expected record node");
        };
        let FieldNode::Sequence { element: text, .. } = &members[1] else {
            panic!("expected sequence node");
        };
        assert_eq!(text.instances(&|c| counts[c]), 40);
    }

    #[test]
    fn test_kind_ids_round_trip() {
        for id in 0..=13u8 {
            let kind = ColumnKind::from_id(id).unwrap();
            assert_eq!(kind.id(), id);
        }
        assert!(ColumnKind::from_id(14).is_none());
        assert_eq!(ColumnKind::Primitive(PrimitiveKind::Bool).stored_size(9), 2);
        assert_eq!(ColumnKind::Offset.stored_size(3), 24);
    }
}
