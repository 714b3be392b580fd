//! Random-access dataset reader
//!
//! Opening a dataset reads only the header and footer. Pages are fetched
//! and decoded on demand and shared through a [`PageCache`]; a reader is
//! `Sync`, so any number of threads may call [`Reader::get_entry`] at once.

mod assemble;
mod cache;
mod source;

pub use cache::PageCache;
pub use source::{ByteSource, FileSource};

use crate::cluster::{ClusterDescriptor, ClusterDirectory};
use crate::column::{decode_primitive, BitUnpacker};
use crate::format::{self, ColumnInfo, Footer, Trailer};
use crate::page::{self, PageDescriptor};
use crate::schema::{ColumnId, ColumnKind, ColumnSpec, Model};
use crate::{config, Entry, EntryIndex, FieldSelection, Result, TupleError, Value};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Reader configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadOptions {
    /// Decoded page cache budget in bytes (0 disables the cache)
    pub cache_bytes: usize,
    /// Verify page checksums when present
    pub verify_checksums: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            cache_bytes: config::PAGE_CACHE_BYTES,
            verify_checksums: true,
        }
    }
}

impl ReadOptions {
    /// Load options from JSON; missing keys keep their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| TupleError::Config(e.to_string()))
    }

    pub fn with_cache_bytes(mut self, bytes: usize) -> Self {
        self.cache_bytes = bytes;
        self
    }

    pub fn with_verify_checksums(mut self, verify: bool) -> Self {
        self.verify_checksums = verify;
        self
    }
}

/// Storage statistics of one column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnStats {
    pub path: String,
    pub kind: ColumnKind,
    pub elements: u64,
    pub pages: usize,
    pub compressed_bytes: u64,
    pub uncompressed_bytes: u64,
}

/// Storage statistics of a dataset
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetStats {
    pub rows: u64,
    pub clusters: usize,
    pub file_bytes: u64,
    pub columns: Vec<ColumnStats>,
}

impl DatasetStats {
    /// Uncompressed over compressed page bytes
    pub fn compression_ratio(&self) -> f64 {
        let compressed: u64 = self.columns.iter().map(|c| c.compressed_bytes).sum();
        let uncompressed: u64 = self.columns.iter().map(|c| c.uncompressed_bytes).sum();
        if compressed == 0 {
            1.0
        } else {
            uncompressed as f64 / compressed as f64
        }
    }
}

/// Reads entries of a closed dataset by index
pub struct Reader {
    source: Box<dyn ByteSource>,
    model: Model,
    columns: Vec<ColumnInfo>,
    directory: ClusterDirectory,
    total_rows: u64,
    page_checksums: bool,
    cache: PageCache,
    options: ReadOptions,
}

impl Reader {
    /// Open a dataset from any byte source
    pub fn open(source: impl ByteSource + 'static, options: ReadOptions) -> Result<Self> {
        let len = source.len();
        let min_len = (format::HEADER_SIZE + format::TRAILER_SIZE) as u64;
        if len < min_len {
            return Err(TupleError::Corruption(format!(
                "{} bytes is too short for a dataset",
                len
            )));
        }

        format::check_header(&source.read_at(0, format::HEADER_SIZE)?)?;
        let trailer_start = len - format::TRAILER_SIZE as u64;
        let trailer = Trailer::from_bytes(&source.read_at(trailer_start, format::TRAILER_SIZE)?)?;
        if trailer.length > trailer_start - format::HEADER_SIZE as u64 {
            return Err(TupleError::Corruption(format!(
                "footer length {} exceeds file size {}",
                trailer.length, len
            )));
        }

        let body_start = trailer_start - trailer.length;
        let body = source.read_at(body_start, trailer.length as usize)?;
        let footer = Footer::from_body(&body, &trailer)?;
        let (model, directory) = footer.validate(body_start).map_err(|e| {
            warn!("Rejecting dataset footer: {}", e);
            e
        })?;

        info!(
            "Opened dataset: {} entries, {} clusters, {} columns",
            footer.total_rows,
            directory.len(),
            footer.columns.len()
        );

        Ok(Self {
            source: Box::new(source),
            model,
            columns: footer.columns,
            directory,
            total_rows: footer.total_rows,
            page_checksums: footer.page_checksums,
            cache: PageCache::new(options.cache_bytes),
            options,
        })
    }

    /// Open a dataset file
    pub fn open_path(path: impl AsRef<Path>, options: ReadOptions) -> Result<Self> {
        Self::open(FileSource::open(path)?, options)
    }

    /// Number of entries
    pub fn row_count(&self) -> u64 {
        self.total_rows
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    /// Leaf columns in decomposition order
    pub fn columns(&self) -> &[ColumnSpec] {
        self.model.columns()
    }

    pub fn clusters(&self) -> &[ClusterDescriptor] {
        self.directory.clusters()
    }

    /// Index of the cluster holding an entry
    pub fn cluster_for_row(&self, row: EntryIndex) -> Option<usize> {
        self.directory.find(row)
    }

    pub fn cache(&self) -> &PageCache {
        &self.cache
    }

    /// Reconstruct one entry. Columns outside the selection are not read.
    pub fn get_entry(&self, index: EntryIndex, selection: &FieldSelection) -> Result<Entry> {
        if index >= self.total_rows {
            return Err(TupleError::OutOfRange {
                index,
                rows: self.total_rows,
            });
        }
        if let FieldSelection::Only(names) = selection {
            if let Some(name) = names.iter().find(|n| self.model.field_index(n).is_none()) {
                return Err(TupleError::Schema(format!("unknown field: {}", name)));
            }
        }

        let cluster = self
            .directory
            .find(index)
            .ok_or_else(|| TupleError::Corruption(format!("no cluster holds entry {}", index)))?;
        debug!("Reading entry {} from cluster {}", index, cluster);

        let mut entry = Entry::new();
        for (i, (name, _)) in self.model.fields().iter().enumerate() {
            if selection.includes(name) {
                let value = self.read_node(self.model.node(i), index)?;
                entry.insert(name.clone(), value);
            }
        }
        Ok(entry)
    }

    /// Decode every element of one leaf column, in order. Offsets decode
    /// as `UInt64`, tags as `UInt32` and text bytes as `UInt8`.
    pub fn read_column_values(&self, path: &str) -> Result<Vec<Value>> {
        let spec = self
            .model
            .column_by_path(path)
            .ok_or_else(|| TupleError::Schema(format!("unknown column: {}", path)))?;
        let mut values = Vec::new();
        for cluster in self.directory.clusters() {
            for descriptor in &cluster.columns[spec.id].pages {
                let page = self.load_page(spec.id, descriptor)?;
                for i in 0..descriptor.element_count as usize {
                    values.push(self.decode_element(spec.id, &page, i)?);
                }
            }
        }
        Ok(values)
    }

    /// Per-column storage statistics
    pub fn stats(&self) -> DatasetStats {
        let columns = self
            .model
            .columns()
            .iter()
            .map(|spec| {
                let pages = self
                    .directory
                    .clusters()
                    .iter()
                    .flat_map(|c| c.columns[spec.id].pages.iter());
                let mut stats = ColumnStats {
                    path: spec.path.clone(),
                    kind: spec.kind,
                    elements: 0,
                    pages: 0,
                    compressed_bytes: 0,
                    uncompressed_bytes: 0,
                };
                for page in pages {
                    stats.elements += page.element_count as u64;
                    stats.pages += 1;
                    stats.compressed_bytes += page.compressed_size as u64;
                    stats.uncompressed_bytes += page.uncompressed_size as u64;
                }
                stats
            })
            .collect();

        DatasetStats {
            rows: self.total_rows,
            clusters: self.directory.len(),
            file_bytes: self.source.len(),
            columns,
        }
    }

    /// Fetch and decode a page, going through the cache
    fn load_page(&self, column: ColumnId, descriptor: &PageDescriptor) -> Result<Arc<Vec<u8>>> {
        if let Some(page) = self.cache.get(descriptor.offset) {
            return Ok(page);
        }

        debug!("Page cache miss: column {} at offset {}", column, descriptor.offset);
        let stored = self.source.read_at(
            descriptor.offset,
            descriptor.stored_size(self.page_checksums) as usize,
        )?;
        let info = self.columns[column];
        let decoded = page::open_page(
            &stored,
            descriptor,
            info.kind,
            info.encoding,
            self.page_checksums,
            self.options.verify_checksums,
        )?;
        Ok(self.cache.insert(descriptor.offset, decoded))
    }

    /// Decode element `index` of a decoded page
    fn decode_element(&self, column: ColumnId, page: &[u8], index: usize) -> Result<Value> {
        let kind = self.columns[column].kind;
        let out_of_page = || {
            TupleError::Corruption(format!("element {} outside page of column {}", index, column))
        };

        if kind.is_bit() {
            return BitUnpacker::new(page)
                .get(index)
                .map(Value::Bool)
                .ok_or_else(out_of_page);
        }

        let width = kind.width();
        let bytes = page
            .get(index * width..(index + 1) * width)
            .ok_or_else(out_of_page)?;
        Ok(match kind {
            ColumnKind::Primitive(prim) => decode_primitive(prim, bytes),
            ColumnKind::Offset => Value::UInt64(u64::from_le_bytes([
                bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
            ])),
            ColumnKind::Tag => Value::UInt32(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
            ColumnKind::Bytes => Value::UInt8(bytes[0]),
        })
    }
}
