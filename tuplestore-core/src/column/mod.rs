//! In-memory column buffers
//!
//! The [`ColumnStore`] owns one append-only buffer per leaf column of a
//! model. Values arrive already shape-checked; the store only lays their
//! bytes out. Booleans are bit-packed, everything else is little-endian
//! fixed width (text bytes are width 1).
//!
//! Offset columns hold global cumulative counts: the running total survives
//! [`ColumnStore::snapshot`], so offsets keep increasing across clusters.

mod bitpack;

pub use bitpack::{BitPacker, BitUnpacker};

use crate::schema::{ColumnId, ColumnKind, FieldNode, Model, PrimitiveKind};
use crate::Value;
use bytes::BufMut;

/// One element handed to a column
#[derive(Debug, Clone, Copy)]
pub enum Cell<'a> {
    /// A primitive value
    Value(&'a Value),
    /// Number of child elements of one container instance
    Offset(u64),
    /// Active variant alternative
    Tag(u32),
    /// Raw text bytes (one element per byte)
    Bytes(&'a [u8]),
}

#[derive(Debug)]
enum Storage {
    Fixed(Vec<u8>),
    Bits(BitPacker),
}

/// Append-only buffer of a single column
#[derive(Debug)]
pub struct ColumnBuffer {
    kind: ColumnKind,
    storage: Storage,
    elements: u64,
    first_element: u64,
    running_offset: u64,
}

impl ColumnBuffer {
    /// Create an empty buffer for a column kind
    pub fn new(kind: ColumnKind) -> Self {
        let storage = if kind.is_bit() {
            Storage::Bits(BitPacker::new())
        } else {
            Storage::Fixed(Vec::new())
        };
        Self {
            kind,
            storage,
            elements: 0,
            first_element: 0,
            running_offset: 0,
        }
    }

    /// Element type
    pub fn kind(&self) -> ColumnKind {
        self.kind
    }

    /// Elements buffered since the last snapshot
    pub fn len(&self) -> u64 {
        self.elements
    }

    /// Check if nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.elements == 0
    }

    /// Global index of the first buffered element
    pub fn first_element(&self) -> u64 {
        self.first_element
    }

    /// Buffered bytes
    pub fn byte_size(&self) -> usize {
        match &self.storage {
            Storage::Fixed(data) => data.len(),
            Storage::Bits(bits) => bits.byte_len(),
        }
    }

    /// Append one cell. Cells must match the column kind; a mismatch is a
    /// bug in the caller and is ignored in release builds.
    pub fn push(&mut self, cell: Cell<'_>) {
        match (&mut self.storage, cell) {
            (Storage::Bits(bits), Cell::Value(Value::Bool(b))) => {
                bits.push(*b);
                self.elements += 1;
            }
            (Storage::Fixed(data), Cell::Value(value)) => {
                debug_assert!(
                    matches!(self.kind, ColumnKind::Primitive(k) if k.matches(value)),
                    "value {} does not fit column {:?}",
                    value.kind_name(),
                    self.kind
                );
                encode_primitive(value, data);
                self.elements += 1;
            }
            (Storage::Fixed(data), Cell::Offset(count)) => {
                debug_assert_eq!(self.kind, ColumnKind::Offset);
                self.running_offset += count;
                data.put_u64_le(self.running_offset);
                self.elements += 1;
            }
            (Storage::Fixed(data), Cell::Tag(tag)) => {
                debug_assert_eq!(self.kind, ColumnKind::Tag);
                data.put_u32_le(tag);
                self.elements += 1;
            }
            (Storage::Fixed(data), Cell::Bytes(bytes)) => {
                debug_assert_eq!(self.kind, ColumnKind::Bytes);
                data.extend_from_slice(bytes);
                self.elements += bytes.len() as u64;
            }
            (_, cell) => debug_assert!(false, "cell {:?} does not fit column {:?}", cell, self.kind),
        }
    }

    /// Hand the buffered elements over and start an empty run
    pub fn snapshot(&mut self) -> ColumnSnapshot {
        let data = match &mut self.storage {
            Storage::Fixed(data) => std::mem::take(data),
            Storage::Bits(bits) => bits.take(),
        };
        let snapshot = ColumnSnapshot {
            kind: self.kind,
            data,
            elements: self.elements,
            first_element: self.first_element,
        };
        self.first_element += self.elements;
        self.elements = 0;
        snapshot
    }
}

/// Buffered contents of one column, ready for page sealing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSnapshot {
    pub kind: ColumnKind,
    pub data: Vec<u8>,
    pub elements: u64,
    /// Global index of `data`'s first element
    pub first_element: u64,
}

/// Buffers for every column of a model
#[derive(Debug)]
pub struct ColumnStore {
    buffers: Vec<ColumnBuffer>,
}

impl ColumnStore {
    /// Create empty buffers for all columns of a model
    pub fn new(model: &Model) -> Self {
        Self {
            buffers: model.columns().iter().map(|c| ColumnBuffer::new(c.kind)).collect(),
        }
    }

    /// Add buffers for columns appended to the model since creation
    pub fn extend(&mut self, model: &Model) {
        for spec in &model.columns()[self.buffers.len()..] {
            self.buffers.push(ColumnBuffer::new(spec.kind));
        }
    }

    /// Number of columns
    pub fn column_count(&self) -> usize {
        self.buffers.len()
    }

    /// Access one column buffer
    pub fn column(&self, id: ColumnId) -> &ColumnBuffer {
        &self.buffers[id]
    }

    /// Append a cell to a column
    pub fn append(&mut self, column: ColumnId, cell: Cell<'_>) {
        self.buffers[column].push(cell);
    }

    /// Approximate bytes held by all buffers
    pub fn buffered_bytes(&self) -> usize {
        self.buffers.iter().map(ColumnBuffer::byte_size).sum()
    }

    /// Check if no column holds data
    pub fn is_empty(&self) -> bool {
        self.buffers.iter().all(ColumnBuffer::is_empty)
    }

    /// Lay out a value under an annotated field node.
    ///
    /// The value must already have passed `Field::check_value`. Every
    /// variant alternative receives an element per instance, the inactive
    /// ones a default, so sibling columns stay aligned.
    pub fn append_value(&mut self, node: &FieldNode, value: &Value) {
        match (node, value) {
            (FieldNode::Scalar { column, .. }, v) => self.append(*column, Cell::Value(v)),
            (FieldNode::Array { element, .. }, Value::Array(items)) => {
                for item in items {
                    self.append_value(element, item);
                }
            }
            (FieldNode::Sequence { offsets, element }, Value::Sequence(items)) => {
                for item in items {
                    self.append_value(element, item);
                }
                self.append(*offsets, Cell::Offset(items.len() as u64));
            }
            (FieldNode::Text { offsets, bytes }, Value::Text(s)) => {
                self.append(*bytes, Cell::Bytes(s.as_bytes()));
                self.append(*offsets, Cell::Offset(s.len() as u64));
            }
            (FieldNode::Record { members }, Value::Record(values)) => {
                for (member, v) in members.iter().zip(values) {
                    self.append_value(member, v);
                }
            }
            (FieldNode::Variant { tag, alternatives }, Value::Variant { tag: active, value }) => {
                self.append(*tag, Cell::Tag(*active));
                for (i, alternative) in alternatives.iter().enumerate() {
                    if i as u32 == *active {
                        self.append_value(alternative, value);
                    } else {
                        self.append_default(alternative);
                    }
                }
            }
            (node, value) => {
                debug_assert!(false, "unchecked value {} reached column store", value.kind_name());
                self.append_default(node);
            }
        }
    }

    /// Lay out the default value of a field node
    pub fn append_default(&mut self, node: &FieldNode) {
        match node {
            FieldNode::Scalar { column, kind } => {
                let value = kind.default_value();
                self.append(*column, Cell::Value(&value));
            }
            FieldNode::Array { length, element } => {
                for _ in 0..*length {
                    self.append_default(element);
                }
            }
            FieldNode::Sequence { offsets, .. } => self.append(*offsets, Cell::Offset(0)),
            FieldNode::Text { offsets, .. } => self.append(*offsets, Cell::Offset(0)),
            FieldNode::Record { members } => {
                for member in members {
                    self.append_default(member);
                }
            }
            FieldNode::Variant { tag, alternatives } => {
                self.append(*tag, Cell::Tag(0));
                for alternative in alternatives {
                    self.append_default(alternative);
                }
            }
        }
    }

    /// Snapshot and clear every column, in column order
    pub fn snapshot(&mut self) -> Vec<ColumnSnapshot> {
        self.buffers.iter_mut().map(ColumnBuffer::snapshot).collect()
    }
}

fn encode_primitive(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Bool(v) => out.put_u8(u8::from(*v)),
        Value::Int8(v) => out.put_i8(*v),
        Value::Int16(v) => out.put_i16_le(*v),
        Value::Int32(v) => out.put_i32_le(*v),
        Value::Int64(v) => out.put_i64_le(*v),
        Value::UInt8(v) => out.put_u8(*v),
        Value::UInt16(v) => out.put_u16_le(*v),
        Value::UInt32(v) => out.put_u32_le(*v),
        Value::UInt64(v) => out.put_u64_le(*v),
        Value::Float32(v) => out.put_f32_le(*v),
        Value::Float64(v) => out.put_f64_le(*v),
        _ => {}
    }
}

/// Decode one little-endian primitive element. `bytes` must hold exactly
/// `kind.width()` bytes; booleans are decoded from packed pages separately.
pub fn decode_primitive(kind: PrimitiveKind, bytes: &[u8]) -> Value {
    fn arr<const N: usize>(bytes: &[u8]) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&bytes[..N]);
        out
    }

    match kind {
        PrimitiveKind::Bool => Value::Bool(bytes[0] != 0),
        PrimitiveKind::Int8 => Value::Int8(bytes[0] as i8),
        PrimitiveKind::Int16 => Value::Int16(i16::from_le_bytes(arr(bytes))),
        PrimitiveKind::Int32 => Value::Int32(i32::from_le_bytes(arr(bytes))),
        PrimitiveKind::Int64 => Value::Int64(i64::from_le_bytes(arr(bytes))),
        PrimitiveKind::UInt8 => Value::UInt8(bytes[0]),
        PrimitiveKind::UInt16 => Value::UInt16(u16::from_le_bytes(arr(bytes))),
        PrimitiveKind::UInt32 => Value::UInt32(u32::from_le_bytes(arr(bytes))),
        PrimitiveKind::UInt64 => Value::UInt64(u64::from_le_bytes(arr(bytes))),
        PrimitiveKind::Float32 => Value::Float32(f32::from_le_bytes(arr(bytes))),
        PrimitiveKind::Float64 => Value::Float64(f64::from_le_bytes(arr(bytes))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Field;

    fn u64s(data: &[u8]) -> Vec<u64> {
        data.chunks_exact(8)
            .map(|c| u64::from_le_bytes(c.try_into().unwrap()))
            .collect()
    }

    #[test]
    fn test_offsets_are_global_across_snapshots() {
        let model = Model::builder()
            .field("v", Field::sequence(Field::scalar(PrimitiveKind::Int32)))
            .build()
            .unwrap();
        let mut store = ColumnStore::new(&model);
        let node = model.node(0).clone();

        let seq = |n: i32| Value::Sequence((0..n).map(Value::Int32).collect());
        store.append_value(&node, &seq(2));
        store.append_value(&node, &seq(0));
        store.append_value(&node, &seq(3));

        let first = store.snapshot();
        assert_eq!(u64s(&first[0].data), vec![2, 2, 5]);
        assert_eq!(first[1].elements, 5);
        assert!(store.is_empty());

        store.append_value(&node, &seq(1));
        let second = store.snapshot();
        assert_eq!(u64s(&second[0].data), vec![6]);
        assert_eq!(second[0].first_element, 3);
        assert_eq!(second[1].first_element, 5);
    }

    #[test]
    fn test_variant_fills_inactive_alternatives() {
        let model = Model::builder()
            .field(
                "v",
                Field::variant(vec![Field::scalar(PrimitiveKind::Float64), Field::Text]),
            )
            .build()
            .unwrap();
        let mut store = ColumnStore::new(&model);
        let node = model.node(0).clone();

        store.append_value(&node, &Value::variant(1, Value::text("abc")));
        store.append_value(&node, &Value::variant(0, Value::Float64(1.5)));

        // tag, #0, #1:offsets, #1:bytes
        assert_eq!(store.column(0).len(), 2);
        assert_eq!(store.column(1).len(), 2);
        assert_eq!(store.column(2).len(), 2);
        assert_eq!(store.column(3).len(), 3);

        let snap = store.snapshot();
        assert_eq!(&snap[1].data[..8], &0f64.to_le_bytes());
        assert_eq!(u64s(&snap[2].data), vec![3, 3]);
        assert_eq!(snap[3].data, b"abc");
    }

    #[test]
    fn test_bool_column_is_packed() {
        let model = Model::builder().scalar("b", PrimitiveKind::Bool).build().unwrap();
        let mut store = ColumnStore::new(&model);
        let node = model.node(0).clone();
        for i in 0..10 {
            store.append_value(&node, &Value::Bool(i % 3 == 0));
        }
        assert_eq!(store.buffered_bytes(), 2);

        let snap = store.snapshot();
        assert_eq!(snap[0].elements, 10);
        assert_eq!(snap[0].data, vec![0b0100_1001, 0b0000_0010]);
    }

    #[test]
    fn test_decode_primitive() {
        let mut buf = Vec::new();
        encode_primitive(&Value::Float32(6.6), &mut buf);
        assert_eq!(decode_primitive(PrimitiveKind::Float32, &buf), Value::Float32(6.6));

        buf.clear();
        encode_primitive(&Value::Int16(-3), &mut buf);
        assert_eq!(decode_primitive(PrimitiveKind::Int16, &buf), Value::Int16(-3));
    }
}
