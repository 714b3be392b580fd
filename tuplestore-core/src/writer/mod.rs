//! Streaming dataset writer
//!
//! A writer accepts entries one at a time, buffers them column-wise and
//! commits a cluster whenever the boundary policy fires. Entries are only
//! guaranteed durable once a cluster containing them is committed; the
//! footer written by [`Writer::close`] makes the dataset readable.
//!
//! States: `Open` (schema may still grow) → `Filling` → `Closed`. An I/O
//! failure moves the writer to `Failed`; every later call returns
//! [`TupleError::Closed`].

mod options;

pub use options::WriteOptions;

use crate::cluster::ClusterManager;
use crate::column::ColumnStore;
use crate::format::{self, ColumnInfo, Footer};
use crate::page::Encoding;
use crate::schema::{Field, Model};
use crate::{Entry, Result, TupleError, Value};
use std::io::Write;
use tracing::{info, warn};

/// Lifecycle of a writer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    /// No entry written yet; fields may be added
    Open,
    /// At least one entry written; schema is frozen
    Filling,
    /// Footer written
    Closed,
    /// A write to the sink failed; the output is unusable
    Failed,
}

/// Result of a successful close
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteSummary {
    pub rows: u64,
    pub clusters: usize,
    pub bytes_written: u64,
    pub columns: usize,
}

/// Writes entries of a fixed model to a byte sink
pub struct Writer<W: Write> {
    sink: W,
    model: Model,
    options: WriteOptions,
    store: ColumnStore,
    clusters: ClusterManager,
    offset: u64,
    state: WriterState,
}

impl<W: Write> Writer<W> {
    /// Create a writer and write the file header
    pub fn create(model: Model, mut sink: W, options: WriteOptions) -> Result<Self> {
        options.validate()?;
        sink.write_all(&format::header())?;

        let store = ColumnStore::new(&model);
        let clusters = ClusterManager::new(
            options.cluster_policy(),
            options.page_settings(),
            column_encodings(&model, &options),
            options.workers,
        );

        Ok(Self {
            sink,
            model,
            options,
            store,
            clusters,
            offset: format::HEADER_SIZE as u64,
            state: WriterState::Open,
        })
    }

    /// Add a top-level field. Only allowed before the first entry.
    pub fn add_field(&mut self, name: impl Into<String>, field: Field) -> Result<()> {
        match self.state {
            WriterState::Open => {}
            WriterState::Filling => {
                return Err(TupleError::Schema(
                    "fields cannot be added after the first entry".into(),
                ))
            }
            WriterState::Closed | WriterState::Failed => return Err(TupleError::Closed),
        }

        self.model = self.model.with_field(name, field)?;
        self.store.extend(&self.model);
        self.clusters
            .set_encodings(column_encodings(&self.model, &self.options));
        Ok(())
    }

    /// Append one entry. A rejected entry leaves no trace in any column.
    pub fn fill(&mut self, entry: &Entry) -> Result<()> {
        self.ensure_writable()?;
        let values = self.check_entry(entry)?;

        for (i, value) in values.iter().enumerate() {
            self.store.append_value(self.model.node(i), value);
        }
        self.clusters.record_row();
        self.state = WriterState::Filling;

        if self.clusters.is_due(&self.store) {
            self.commit_cluster()?;
        }
        Ok(())
    }

    /// Commit the open cluster now. A no-op when it holds no entries.
    pub fn commit_cluster(&mut self) -> Result<()> {
        self.ensure_writable()?;
        let result = self
            .clusters
            .commit(&mut self.store, &mut self.sink, &mut self.offset)
            .map(|_| ());
        if result.is_err() {
            self.state = WriterState::Failed;
        }
        result
    }

    /// Commit remaining entries, write the footer and flush
    pub fn close(&mut self) -> Result<WriteSummary> {
        self.commit_cluster()?;

        let footer = Footer {
            codec: self.options.codec,
            page_checksums: self.options.page_checksums,
            page_size: self.options.page_size as u32,
            total_rows: self.clusters.total_rows(),
            fields: self.model.fields().to_vec(),
            columns: self
                .model
                .columns()
                .iter()
                .zip(self.clusters.encodings())
                .map(|(c, e)| ColumnInfo {
                    kind: c.kind,
                    encoding: *e,
                })
                .collect(),
            clusters: self.clusters.directory().clusters().to_vec(),
        };
        let bytes = footer.to_bytes();

        if let Err(e) = self.sink.write_all(&bytes).and_then(|_| self.sink.flush()) {
            warn!("Failed to write footer: {}", e);
            self.state = WriterState::Failed;
            return Err(e.into());
        }
        self.offset += bytes.len() as u64;
        self.state = WriterState::Closed;

        let summary = WriteSummary {
            rows: footer.total_rows,
            clusters: footer.clusters.len(),
            bytes_written: self.offset,
            columns: footer.columns.len(),
        };
        info!(
            "Closed dataset: {} entries in {} clusters, {} bytes",
            summary.rows, summary.clusters, summary.bytes_written
        );
        Ok(summary)
    }

    /// Entries accepted so far
    pub fn rows_written(&self) -> u64 {
        self.clusters.total_rows()
    }

    /// Clusters committed so far
    pub fn clusters_committed(&self) -> usize {
        self.clusters.directory().len()
    }

    /// Current model
    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn state(&self) -> WriterState {
        self.state
    }

    /// Bytes handed to the sink so far
    pub fn bytes_written(&self) -> u64 {
        self.offset
    }

    /// Give back the sink
    pub fn into_inner(self) -> W {
        self.sink
    }

    fn ensure_writable(&self) -> Result<()> {
        match self.state {
            WriterState::Open | WriterState::Filling => Ok(()),
            WriterState::Closed | WriterState::Failed => Err(TupleError::Closed),
        }
    }

    /// Match entry values to model fields and check their shapes
    fn check_entry<'e>(&self, entry: &'e Entry) -> Result<Vec<&'e Value>> {
        if let Some((name, _)) = entry.iter().find(|(n, _)| self.model.field_index(n).is_none()) {
            return Err(TupleError::Fill(format!("unknown field: {}", name)));
        }

        self.model
            .fields()
            .iter()
            .map(|(name, field)| -> Result<&'e Value> {
                let value = entry
                    .get(name)
                    .ok_or_else(|| TupleError::Fill(format!("missing field: {}", name)))?;
                field.check_value(value, name)?;
                Ok(value)
            })
            .collect()
    }
}

fn column_encodings(model: &Model, options: &WriteOptions) -> Vec<Encoding> {
    model
        .columns()
        .iter()
        .map(|c| Encoding::for_kind(c.kind, options.split_encoding))
        .collect()
}
