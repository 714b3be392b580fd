//! Entry reconstruction from leaf columns
//!
//! Every node is read at an *instance* index. A top-level field's instance
//! is the entry index; a fixed array of length `N` maps instance `k` to
//! element instances `k*N..(k+1)*N`; a sequence or text maps instance `k` to
//! the span `[offset(k-1), offset(k))` of its offset column; record members
//! and variant alternatives share their parent's instance.

use super::Reader;
use crate::schema::{ColumnId, FieldNode};
use crate::{Result, TupleError, Value};

impl Reader {
    pub(super) fn read_node(&self, node: &FieldNode, instance: u64) -> Result<Value> {
        match node {
            FieldNode::Scalar { column, .. } => self.read_element(*column, instance),
            FieldNode::Array { length, element } => {
                let first = instance * *length as u64;
                let items = (first..first + *length as u64)
                    .map(|i| self.read_node(element, i))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Value::Array(items))
            }
            FieldNode::Sequence { offsets, element } => {
                let children = element.instances(&|c| self.column_len(c));
                let (start, end) = self.span(*offsets, instance, children)?;
                let items = (start..end)
                    .map(|i| self.read_node(element, i))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Value::Sequence(items))
            }
            FieldNode::Text { offsets, bytes } => {
                let (start, end) = self.span(*offsets, instance, self.column_len(*bytes))?;
                let raw = self.read_bytes(*bytes, start, end)?;
                String::from_utf8(raw)
                    .map(Value::Text)
                    .map_err(|_| TupleError::Corruption(format!("text in column {} is not UTF-8", bytes)))
            }
            FieldNode::Record { members } => {
                let values = members
                    .iter()
                    .map(|m| self.read_node(m, instance))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Value::Record(values))
            }
            FieldNode::Variant { tag, alternatives } => {
                let active = match self.read_element(*tag, instance)? {
                    Value::UInt32(t) => t,
                    other => {
                        return Err(TupleError::Corruption(format!(
                            "variant tag decoded as {}",
                            other.kind_name()
                        )))
                    }
                };
                let alternative = alternatives.get(active as usize).ok_or_else(|| {
                    TupleError::Corruption(format!(
                        "variant tag {} out of range for {} alternatives",
                        active,
                        alternatives.len()
                    ))
                })?;
                Ok(Value::variant(active, self.read_node(alternative, instance)?))
            }
        }
    }

    /// Child span of container instance `k`: `[offset(k-1), offset(k))`.
    /// `children` is the number of child instances stored in the file.
    fn span(&self, offsets: ColumnId, instance: u64, children: u64) -> Result<(u64, u64)> {
        let end = self.read_offset(offsets, instance)?;
        let start = match instance {
            0 => 0,
            k => self.read_offset(offsets, k - 1)?,
        };
        if start > end {
            return Err(TupleError::Corruption(format!(
                "offsets decrease at element {} of column {}",
                instance, offsets
            )));
        }
        if end > children {
            return Err(TupleError::Corruption(format!(
                "offset {} at element {} of column {} exceeds {} stored children",
                end, instance, offsets, children
            )));
        }
        Ok((start, end))
    }

    /// Elements stored for a column across all clusters
    fn column_len(&self, column: ColumnId) -> u64 {
        self.directory
            .clusters()
            .last()
            .and_then(|c| c.columns.get(column))
            .map_or(0, |r| r.first_element + r.element_count)
    }

    fn read_offset(&self, column: ColumnId, element: u64) -> Result<u64> {
        match self.read_element(column, element)? {
            Value::UInt64(v) => Ok(v),
            other => Err(TupleError::Corruption(format!(
                "offset decoded as {}",
                other.kind_name()
            ))),
        }
    }

    /// Read one element of a column by global index
    fn read_element(&self, column: ColumnId, element: u64) -> Result<Value> {
        let cluster = self.directory.find_element(column, element).ok_or_else(|| {
            TupleError::Corruption(format!("column {} has no element {}", column, element))
        })?;
        let range = &self.directory.clusters()[cluster].columns[column];
        let (page_index, page_start) = range.locate(element).ok_or_else(|| {
            TupleError::Corruption(format!("column {} has no element {}", column, element))
        })?;
        let page = self.load_page(column, &range.pages[page_index])?;
        self.decode_element(column, &page, (element - page_start) as usize)
    }

    /// Read the byte elements `[start, end)` of a bytes column, which may
    /// span several pages and clusters
    fn read_bytes(&self, column: ColumnId, start: u64, end: u64) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity((end - start) as usize);
        let mut pos = start;
        while pos < end {
            let missing = || TupleError::Corruption(format!("column {} has no element {}", column, pos));
            let cluster = self.directory.find_element(column, pos).ok_or_else(missing)?;
            let range = &self.directory.clusters()[cluster].columns[column];
            let (page_index, page_start) = range.locate(pos).ok_or_else(missing)?;
            let descriptor = &range.pages[page_index];
            let page = self.load_page(column, descriptor)?;

            let page_end = page_start + descriptor.element_count as u64;
            let take_to = end.min(page_end);
            let from = (pos - page_start) as usize;
            let to = (take_to - page_start) as usize;
            out.extend_from_slice(page.get(from..to).ok_or_else(missing)?);
            pos = take_to;
        }
        Ok(out)
    }
}
