//! File header and footer
//!
//! ```text
//! file   := header page-data* footer-body footer-crc:u32 footer-len:u64 magic
//! header := magic:"TPLS" version:u32
//! ```
//!
//! The footer body carries the schema, the column encodings and the cluster
//! directory. It is written once, at close, after all page data.

use crate::cluster::{ClusterDescriptor, ClusterDirectory, ColumnRange};
use crate::page::{CodecId, Encoding, PageDescriptor};
use crate::schema::{ColumnKind, Field, Model, PrimitiveKind};
use crate::{Result, TupleError};
use bytes::{Buf, BufMut, BytesMut};
use std::io::Cursor;

/// File magic, at the start of the header and the end of the file
pub const MAGIC: &[u8; 4] = b"TPLS";

/// Current format version
pub const FORMAT_VERSION: u32 = 1;

/// Header size in bytes
pub const HEADER_SIZE: usize = 8;

/// Trailer size: footer crc, footer length, magic
pub const TRAILER_SIZE: usize = 4 + 8 + 4;

const FLAG_PAGE_CHECKSUMS: u8 = 1;
const MAX_FIELD_DEPTH: usize = 256;

const FIELD_SCALAR: u8 = 0;
const FIELD_ARRAY: u8 = 1;
const FIELD_SEQUENCE: u8 = 2;
const FIELD_TEXT: u8 = 3;
const FIELD_RECORD: u8 = 4;
const FIELD_TUPLE: u8 = 5;
const FIELD_VARIANT: u8 = 6;

/// Serialize the file header
pub fn header() -> [u8; HEADER_SIZE] {
    let mut buf = [0u8; HEADER_SIZE];
    buf[..4].copy_from_slice(MAGIC);
    buf[4..].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
    buf
}

/// Check a file header
pub fn check_header(data: &[u8]) -> Result<()> {
    if data.len() < HEADER_SIZE || &data[..4] != MAGIC {
        return Err(TupleError::Corruption("missing file magic".into()));
    }
    let version = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
    if version != FORMAT_VERSION {
        return Err(TupleError::Corruption(format!("unsupported format version {}", version)));
    }
    Ok(())
}

/// Physical description of one column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnInfo {
    pub kind: ColumnKind,
    pub encoding: Encoding,
}

/// Decoded trailer: where the footer body lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trailer {
    pub checksum: u32,
    pub length: u64,
}

impl Trailer {
    /// Parse the last [`TRAILER_SIZE`] bytes of a file
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() != TRAILER_SIZE {
            return Err(TupleError::Corruption("file too short for trailer".into()));
        }
        if &data[12..] != MAGIC {
            return Err(TupleError::Corruption("missing trailing magic".into()));
        }
        let mut cursor = Cursor::new(data);
        Ok(Self {
            checksum: cursor.get_u32_le(),
            length: cursor.get_u64_le(),
        })
    }
}

/// Everything needed to read a dataset back
#[derive(Debug, Clone, PartialEq)]
pub struct Footer {
    pub codec: CodecId,
    pub page_checksums: bool,
    pub page_size: u32,
    pub total_rows: u64,
    pub fields: Vec<(String, Field)>,
    pub columns: Vec<ColumnInfo>,
    pub clusters: Vec<ClusterDescriptor>,
}

impl Footer {
    /// Serialize body and trailer
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(1024);
        buf.put_u32_le(FORMAT_VERSION);
        buf.put_u8(self.codec.id());
        buf.put_u8(if self.page_checksums { FLAG_PAGE_CHECKSUMS } else { 0 });
        buf.put_u32_le(self.page_size);
        buf.put_u64_le(self.total_rows);

        buf.put_u32_le(self.fields.len() as u32);
        for (name, field) in &self.fields {
            put_name(&mut buf, name);
            put_field(&mut buf, field);
        }

        buf.put_u32_le(self.columns.len() as u32);
        for column in &self.columns {
            buf.put_u8(column.kind.id());
            buf.put_u8(column.kind.width() as u8);
            buf.put_u8(column.encoding.id());
        }

        buf.put_u32_le(self.clusters.len() as u32);
        for cluster in &self.clusters {
            buf.put_u64_le(cluster.first_row);
            buf.put_u64_le(cluster.row_count);
            for range in &cluster.columns {
                buf.put_u64_le(range.first_element);
                buf.put_u64_le(range.element_count);
                buf.put_u32_le(range.pages.len() as u32);
                for page in &range.pages {
                    buf.put_u32_le(page.element_count);
                    buf.put_u32_le(page.uncompressed_size);
                    buf.put_u32_le(page.compressed_size);
                    buf.put_u8(page.codec.id());
                    buf.put_u64_le(page.offset);
                }
            }
        }

        let body_len = buf.len() as u64;
        let checksum = crc32fast::hash(&buf);
        buf.put_u32_le(checksum);
        buf.put_u64_le(body_len);
        buf.put_slice(MAGIC);
        buf.to_vec()
    }

    /// Parse a footer body, verifying it against the trailer checksum
    pub fn from_body(body: &[u8], trailer: &Trailer) -> Result<Self> {
        let actual = crc32fast::hash(body);
        if actual != trailer.checksum {
            return Err(TupleError::Corruption(format!(
                "footer checksum mismatch: expected {}, got {}",
                trailer.checksum, actual
            )));
        }

        let mut r = BodyReader::new(body);
        let version = r.u32()?;
        if version != FORMAT_VERSION {
            return Err(TupleError::Corruption(format!("unsupported footer version {}", version)));
        }
        let codec_id = r.u8()?;
        let codec = CodecId::from_id(codec_id)
            .ok_or_else(|| TupleError::Corruption(format!("unknown codec id {}", codec_id)))?;
        let page_checksums = r.u8()? & FLAG_PAGE_CHECKSUMS != 0;
        let page_size = r.u32()?;
        let total_rows = r.u64()?;

        let field_count = r.count(3)?;
        let mut fields = Vec::with_capacity(field_count);
        for _ in 0..field_count {
            let name = r.name()?;
            let field = r.field(0)?;
            fields.push((name, field));
        }

        let column_count = r.count(3)?;
        let mut columns = Vec::with_capacity(column_count);
        for _ in 0..column_count {
            let kind_id = r.u8()?;
            let width = r.u8()?;
            let encoding_id = r.u8()?;
            let kind = ColumnKind::from_id(kind_id)
                .ok_or_else(|| TupleError::Corruption(format!("unknown column kind {}", kind_id)))?;
            if kind.width() != width as usize {
                return Err(TupleError::Corruption(format!(
                    "column kind {:?} stored with width {}",
                    kind, width
                )));
            }
            let encoding = Encoding::from_id(encoding_id)
                .ok_or_else(|| TupleError::Corruption(format!("unknown encoding {}", encoding_id)))?;
            columns.push(ColumnInfo { kind, encoding });
        }

        let cluster_count = r.count(16)?;
        let mut clusters = Vec::with_capacity(cluster_count);
        for _ in 0..cluster_count {
            let first_row = r.u64()?;
            let row_count = r.u64()?;
            let mut ranges = Vec::with_capacity(column_count);
            for _ in 0..column_count {
                let first_element = r.u64()?;
                let element_count = r.u64()?;
                let page_count = r.count(21)?;
                let mut pages = Vec::with_capacity(page_count);
                for _ in 0..page_count {
                    let element_count = r.u32()?;
                    let uncompressed_size = r.u32()?;
                    let compressed_size = r.u32()?;
                    let codec_id = r.u8()?;
                    let codec = CodecId::from_id(codec_id)
                        .ok_or_else(|| TupleError::Corruption(format!("unknown codec id {}", codec_id)))?;
                    let offset = r.u64()?;
                    pages.push(PageDescriptor {
                        element_count,
                        uncompressed_size,
                        compressed_size,
                        codec,
                        offset,
                    });
                }
                if first_element.checked_add(element_count).is_none() {
                    return Err(TupleError::Corruption(format!(
                        "element range {}+{} overflows",
                        first_element, element_count
                    )));
                }
                let range = ColumnRange::new(first_element, pages);
                if range.element_count != element_count {
                    return Err(TupleError::Corruption(format!(
                        "pages hold {} elements, range says {}",
                        range.element_count, element_count
                    )));
                }
                ranges.push(range);
            }
            clusters.push(ClusterDescriptor {
                first_row,
                row_count,
                columns: ranges,
            });
        }

        if r.remaining() != 0 {
            return Err(TupleError::Corruption(format!(
                "{} trailing bytes in footer",
                r.remaining()
            )));
        }

        Ok(Self {
            codec,
            page_checksums,
            page_size,
            total_rows,
            fields,
            columns,
            clusters,
        })
    }

    /// Rebuild the model and cross-check everything the reader relies on.
    /// `data_end` is the file offset where the footer body starts.
    pub fn validate(&self, data_end: u64) -> Result<(Model, ClusterDirectory)> {
        let model = Model::new(self.fields.clone()).map_err(|e| {
            TupleError::Corruption(format!("stored schema is invalid: {}", e))
        })?;

        if model.columns().len() != self.columns.len() {
            return Err(TupleError::Corruption(format!(
                "schema decomposes into {} columns, footer lists {}",
                model.columns().len(),
                self.columns.len()
            )));
        }
        for (spec, info) in model.columns().iter().zip(&self.columns) {
            if spec.kind != info.kind {
                return Err(TupleError::Corruption(format!(
                    "column {} is {:?} in the schema but {:?} in the footer",
                    spec.path, spec.kind, info.kind
                )));
            }
        }

        let directory = ClusterDirectory::from_clusters(self.clusters.clone());
        directory.validate(self.columns.len(), self.total_rows)?;

        for cluster in directory.clusters() {
            cluster.check_element_counts(model.nodes())?;
            for page in cluster.columns.iter().flat_map(|c| c.pages.iter()) {
                let end = page.offset.checked_add(page.stored_size(self.page_checksums));
                if page.offset < HEADER_SIZE as u64 || end.map_or(true, |end| end > data_end) {
                    return Err(TupleError::Corruption(format!(
                        "page at offset {} runs outside the data region",
                        page.offset
                    )));
                }
            }
        }

        Ok((model, directory))
    }
}

fn put_name(buf: &mut BytesMut, name: &str) {
    buf.put_u16_le(name.len() as u16);
    buf.put_slice(name.as_bytes());
}

fn put_field(buf: &mut BytesMut, field: &Field) {
    match field {
        Field::Scalar(kind) => {
            buf.put_u8(FIELD_SCALAR);
            buf.put_u8(kind.id());
            buf.put_u8(kind.width() as u8);
        }
        Field::FixedArray { element, length } => {
            buf.put_u8(FIELD_ARRAY);
            buf.put_u32_le(*length as u32);
            put_field(buf, element);
        }
        Field::Sequence(element) => {
            buf.put_u8(FIELD_SEQUENCE);
            put_field(buf, element);
        }
        Field::Text => buf.put_u8(FIELD_TEXT),
        Field::Record(members) => {
            buf.put_u8(FIELD_RECORD);
            buf.put_u32_le(members.len() as u32);
            for (name, member) in members {
                put_name(buf, name);
                put_field(buf, member);
            }
        }
        Field::Tuple(members) => {
            buf.put_u8(FIELD_TUPLE);
            buf.put_u32_le(members.len() as u32);
            members.iter().for_each(|m| put_field(buf, m));
        }
        Field::Variant(alternatives) => {
            buf.put_u8(FIELD_VARIANT);
            buf.put_u32_le(alternatives.len() as u32);
            alternatives.iter().for_each(|a| put_field(buf, a));
        }
    }
}

/// Bounds-checked cursor over a footer body
struct BodyReader<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> BodyReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self {
            cursor: Cursor::new(data),
        }
    }

    fn remaining(&self) -> usize {
        self.cursor.remaining()
    }

    fn need(&self, n: usize) -> Result<()> {
        if self.cursor.remaining() < n {
            return Err(TupleError::Corruption("footer truncated".into()));
        }
        Ok(())
    }

    fn u8(&mut self) -> Result<u8> {
        self.need(1)?;
        Ok(self.cursor.get_u8())
    }

    fn u16(&mut self) -> Result<u16> {
        self.need(2)?;
        Ok(self.cursor.get_u16_le())
    }

    fn u32(&mut self) -> Result<u32> {
        self.need(4)?;
        Ok(self.cursor.get_u32_le())
    }

    fn u64(&mut self) -> Result<u64> {
        self.need(8)?;
        Ok(self.cursor.get_u64_le())
    }

    /// Read an item count, rejecting counts the remaining bytes cannot hold
    /// at `min_item_size` bytes per item
    fn count(&mut self, min_item_size: usize) -> Result<usize> {
        let n = self.u32()? as usize;
        if n.saturating_mul(min_item_size) > self.remaining() {
            return Err(TupleError::Corruption(format!("count {} exceeds footer size", n)));
        }
        Ok(n)
    }

    fn name(&mut self) -> Result<String> {
        let len = self.u16()? as usize;
        self.need(len)?;
        let mut bytes = vec![0u8; len];
        self.cursor.copy_to_slice(&mut bytes);
        String::from_utf8(bytes).map_err(|_| TupleError::Corruption("field name is not UTF-8".into()))
    }

    fn field(&mut self, depth: usize) -> Result<Field> {
        if depth > MAX_FIELD_DEPTH {
            return Err(TupleError::Corruption("field tree nested too deeply".into()));
        }
        let tag = self.u8()?;
        Ok(match tag {
            FIELD_SCALAR => {
                let id = self.u8()?;
                let width = self.u8()?;
                let kind = PrimitiveKind::from_id(id)
                    .ok_or_else(|| TupleError::Corruption(format!("unknown primitive id {}", id)))?;
                if kind.width() != width as usize {
                    return Err(TupleError::Corruption(format!(
                        "{} stored with width {}",
                        kind, width
                    )));
                }
                Field::Scalar(kind)
            }
            FIELD_ARRAY => {
                let length = self.u32()? as usize;
                Field::FixedArray {
                    element: Box::new(self.field(depth + 1)?),
                    length,
                }
            }
            FIELD_SEQUENCE => Field::Sequence(Box::new(self.field(depth + 1)?)),
            FIELD_TEXT => Field::Text,
            FIELD_RECORD => {
                let n = self.count(3)?;
                let mut members = Vec::with_capacity(n);
                for _ in 0..n {
                    let name = self.name()?;
                    members.push((name, self.field(depth + 1)?));
                }
                Field::Record(members)
            }
            FIELD_TUPLE => {
                let n = self.count(1)?;
                let members = (0..n)
                    .map(|_| self.field(depth + 1))
                    .collect::<Result<Vec<_>>>()?;
                Field::Tuple(members)
            }
            FIELD_VARIANT => {
                let n = self.count(1)?;
                let alternatives = (0..n)
                    .map(|_| self.field(depth + 1))
                    .collect::<Result<Vec<_>>>()?;
                Field::Variant(alternatives)
            }
            other => {
                return Err(TupleError::Corruption(format!("unknown field tag {}", other)));
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Footer {
        let fields = vec![
            ("n".to_string(), Field::scalar(PrimitiveKind::UInt32)),
            (
                "v".to_string(),
                Field::sequence(Field::variant(vec![Field::Text, Field::scalar(PrimitiveKind::Bool)])),
            ),
        ];
        let model = Model::new(fields.clone()).unwrap();
        let columns = model
            .columns()
            .iter()
            .map(|c| ColumnInfo {
                kind: c.kind,
                encoding: Encoding::for_kind(c.kind, true),
            })
            .collect::<Vec<_>>();
        let page = |uncompressed_size, offset| PageDescriptor {
            element_count: 2,
            uncompressed_size,
            compressed_size: uncompressed_size,
            codec: CodecId::None,
            offset,
        };
        // two entries with empty `v` sequences
        let mut ranges = vec![
            ColumnRange::new(0, vec![page(8, HEADER_SIZE as u64)]),
            ColumnRange::new(0, vec![page(16, HEADER_SIZE as u64 + 8)]),
        ];
        ranges.extend((2..columns.len()).map(|_| ColumnRange::new(0, Vec::new())));
        Footer {
            codec: CodecId::Lz4,
            page_checksums: false,
            page_size: 65536,
            total_rows: 2,
            fields,
            columns,
            clusters: vec![ClusterDescriptor {
                first_row: 0,
                row_count: 2,
                columns: ranges,
            }],
        }
    }

    fn parse(bytes: &[u8]) -> Result<Footer> {
        let trailer = Trailer::from_bytes(&bytes[bytes.len() - TRAILER_SIZE..])?;
        let body_end = bytes.len() - TRAILER_SIZE;
        let body_start = body_end - trailer.length as usize;
        Footer::from_body(&bytes[body_start..body_end], &trailer)
    }

    #[test]
    fn test_footer_round_trip_and_validate() {
        let footer = sample();
        let bytes = footer.to_bytes();
        let decoded = parse(&bytes).unwrap();
        assert_eq!(decoded, footer);

        let (model, directory) = decoded.validate(HEADER_SIZE as u64 + 24).unwrap();
        assert_eq!(model.columns().len(), 6);
        assert_eq!(directory.total_rows(), 2);

        // page would overlap the footer
        assert!(decoded.validate(HEADER_SIZE as u64 + 20).is_err());
    }

    #[test]
    fn test_validate_rejects_offset_overflow() {
        let mut footer = sample();
        footer.clusters[0].columns[1].pages[0].offset = u64::MAX - 4;
        let err = footer.validate(u64::MAX).unwrap_err();
        assert!(matches!(err, TupleError::Corruption(_)));
    }

    #[test]
    fn test_validate_rejects_inconsistent_element_counts() {
        // `n` holds two elements, so the cluster cannot hold three entries
        let mut footer = sample();
        footer.total_rows = 3;
        footer.clusters[0].row_count = 3;
        let err = footer.validate(HEADER_SIZE as u64 + 24).unwrap_err();
        assert!(err.is_corruption());

        // a variant tag without elements in its alternatives
        let mut footer = sample();
        let extra = ColumnRange::new(
            0,
            vec![PageDescriptor {
                element_count: 1,
                uncompressed_size: 4,
                compressed_size: 4,
                codec: CodecId::None,
                offset: HEADER_SIZE as u64 + 24,
            }],
        );
        footer.clusters[0].columns[2] = extra;
        assert!(footer.validate(HEADER_SIZE as u64 + 28).is_err());
    }

    #[test]
    fn test_from_body_rejects_range_overflow() {
        let mut footer = sample();
        footer.clusters[0].columns[5] = ColumnRange::new(u64::MAX, Vec::new());
        footer.clusters[0].columns[5].element_count = 1;
        let err = parse(&footer.to_bytes()).unwrap_err();
        assert!(matches!(err, TupleError::Corruption(_)));
    }

    #[test]
    fn test_footer_corruption_detected() {
        let mut bytes = sample().to_bytes();
        bytes[10] ^= 0xff;
        let err = parse(&bytes).unwrap_err();
        assert!(matches!(err, TupleError::Corruption(_)));

        let mut bytes = sample().to_bytes();
        let last = bytes.len() - 1;
        bytes[last] = b'X';
        assert!(parse(&bytes).is_err());
    }

    #[test]
    fn test_header() {
        let h = header();
        assert!(check_header(&h).is_ok());
        assert!(check_header(b"TPLS\x02\x00\x00\x00").is_err());
        assert!(check_header(b"FLUX").is_err());
    }
}
