//! Cluster boundaries and the cluster directory
//!
//! A cluster covers a contiguous range of entries. Committing one seals the
//! buffered run of every column into pages, writes the pages in column
//! order and records where each column's run lives.

use crate::column::{ColumnSnapshot, ColumnStore};
use crate::page::{self, Encoding, PageDescriptor, PageSettings, SealedPage};
use crate::schema::{ColumnId, FieldNode};
use crate::{config, EntryIndex, Result, TupleError};
use std::io::Write;
use tracing::{debug, info};

/// When to close the open cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterPolicy {
    /// Entries per cluster
    pub max_rows: u64,
    /// Approximate buffered bytes per cluster
    pub max_bytes: usize,
}

impl Default for ClusterPolicy {
    fn default() -> Self {
        Self {
            max_rows: config::CLUSTER_ROWS,
            max_bytes: config::CLUSTER_BYTES,
        }
    }
}

impl ClusterPolicy {
    /// Check if a cluster holding `rows` entries and `bytes` buffered bytes
    /// is due
    pub fn is_due(&self, rows: u64, bytes: usize) -> bool {
        rows > 0 && (rows >= self.max_rows || bytes >= self.max_bytes)
    }
}

/// Pages of one column inside one cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRange {
    /// Global index of the first element
    pub first_element: u64,
    pub element_count: u64,
    pub pages: Vec<PageDescriptor>,
    page_starts: Vec<u64>,
}

impl ColumnRange {
    /// Create a range from its page list
    pub fn new(first_element: u64, pages: Vec<PageDescriptor>) -> Self {
        let mut page_starts = Vec::with_capacity(pages.len());
        let mut next = first_element;
        for page in &pages {
            page_starts.push(next);
            next = next.saturating_add(page.element_count as u64);
        }
        Self {
            first_element,
            element_count: next - first_element,
            pages,
            page_starts,
        }
    }

    /// Check if a global element index falls inside this range
    pub fn contains(&self, element: u64) -> bool {
        element >= self.first_element && element < self.first_element + self.element_count
    }

    /// Page holding a global element index, with the page's first element
    pub fn locate(&self, element: u64) -> Option<(usize, u64)> {
        if !self.contains(element) {
            return None;
        }
        let idx = self.page_starts.partition_point(|start| *start <= element) - 1;
        Some((idx, self.page_starts[idx]))
    }
}

/// Checkpoint over a contiguous range of entries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterDescriptor {
    pub first_row: EntryIndex,
    pub row_count: u64,
    /// One range per column, in column order
    pub columns: Vec<ColumnRange>,
}

impl ClusterDescriptor {
    /// Check if an entry belongs to this cluster
    pub fn contains_row(&self, row: EntryIndex) -> bool {
        row >= self.first_row && row < self.first_row + self.row_count
    }

    /// Total stored bytes of all pages
    pub fn stored_bytes(&self, checksums: bool) -> u64 {
        self.columns
            .iter()
            .flat_map(|c| c.pages.iter())
            .map(|p| p.stored_size(checksums))
            .sum()
    }

    /// Check that every column holds as many elements as the field tree
    /// implies for `row_count` entries. Columns must match the model.
    pub fn check_element_counts(&self, nodes: &[FieldNode]) -> Result<()> {
        nodes
            .iter()
            .try_for_each(|node| self.check_node(node, self.row_count))
    }

    fn check_node(&self, node: &FieldNode, instances: u64) -> Result<()> {
        let count = |column: ColumnId| self.columns.get(column).map_or(0, |r| r.element_count);
        let expect = |column: ColumnId, expected: u64| {
            if count(column) == expected {
                Ok(())
            } else {
                Err(TupleError::Corruption(format!(
                    "column {} holds {} elements in the cluster at entry {}, expected {}",
                    column,
                    count(column),
                    self.first_row,
                    expected
                )))
            }
        };

        match node {
            FieldNode::Scalar { column, .. } => expect(*column, instances),
            FieldNode::Array { length, element } => {
                let elements = instances.checked_mul(*length as u64).ok_or_else(|| {
                    TupleError::Corruption(format!(
                        "{} instances of a {}-element array overflow",
                        instances, length
                    ))
                })?;
                self.check_node(element, elements)
            }
            FieldNode::Sequence { offsets, element } => {
                expect(*offsets, instances)?;
                self.check_node(element, element.instances(&count))
            }
            FieldNode::Text { offsets, .. } => expect(*offsets, instances),
            FieldNode::Record { members } => members
                .iter()
                .try_for_each(|m| self.check_node(m, instances)),
            FieldNode::Variant { tag, alternatives } => {
                expect(*tag, instances)?;
                alternatives
                    .iter()
                    .try_for_each(|a| self.check_node(a, instances))
            }
        }
    }
}

/// Ordered list of committed clusters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterDirectory {
    clusters: Vec<ClusterDescriptor>,
}

impl ClusterDirectory {
    /// Create a directory from clusters already in row order
    pub fn from_clusters(clusters: Vec<ClusterDescriptor>) -> Self {
        Self { clusters }
    }

    pub fn push(&mut self, cluster: ClusterDescriptor) {
        self.clusters.push(cluster);
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ClusterDescriptor> {
        self.clusters.get(index)
    }

    pub fn clusters(&self) -> &[ClusterDescriptor] {
        &self.clusters
    }

    /// Entries covered by all clusters
    pub fn total_rows(&self) -> u64 {
        self.clusters.last().map_or(0, |c| c.first_row + c.row_count)
    }

    /// Cluster containing an entry
    pub fn find(&self, row: EntryIndex) -> Option<usize> {
        let idx = self
            .clusters
            .partition_point(|c| c.first_row + c.row_count <= row);
        self.clusters
            .get(idx)
            .filter(|c| c.contains_row(row))
            .map(|_| idx)
    }

    /// Cluster holding a global element of a column
    pub fn find_element(&self, column: usize, element: u64) -> Option<usize> {
        let idx = self.clusters.partition_point(|c| {
            c.columns
                .get(column)
                .map_or(true, |r| r.first_element + r.element_count <= element)
        });
        self.clusters
            .get(idx)
            .and_then(|c| c.columns.get(column))
            .filter(|r| r.contains(element))
            .map(|_| idx)
    }

    /// Check the directory describes a gap-free run of entries and elements
    pub fn validate(&self, column_count: usize, total_rows: u64) -> Result<()> {
        let mut next_row = 0u64;
        let mut next_element = vec![0u64; column_count];
        for (i, cluster) in self.clusters.iter().enumerate() {
            if cluster.first_row != next_row {
                return Err(TupleError::Corruption(format!(
                    "cluster {} starts at entry {}, expected {}",
                    i, cluster.first_row, next_row
                )));
            }
            if cluster.columns.len() != column_count {
                return Err(TupleError::Corruption(format!(
                    "cluster {} describes {} columns, model has {}",
                    i,
                    cluster.columns.len(),
                    column_count
                )));
            }
            for (c, range) in cluster.columns.iter().enumerate() {
                if range.first_element != next_element[c] {
                    return Err(TupleError::Corruption(format!(
                        "column {} in cluster {} starts at element {}, expected {}",
                        c, i, range.first_element, next_element[c]
                    )));
                }
                next_element[c] = next_element[c]
                    .checked_add(range.element_count)
                    .ok_or_else(|| {
                        TupleError::Corruption(format!(
                            "element count of column {} overflows in cluster {}",
                            c, i
                        ))
                    })?;
            }
            next_row = next_row.checked_add(cluster.row_count).ok_or_else(|| {
                TupleError::Corruption(format!("entry count overflows in cluster {}", i))
            })?;
        }
        if next_row != total_rows {
            return Err(TupleError::Corruption(format!(
                "clusters cover {} entries, footer says {}",
                next_row, total_rows
            )));
        }
        Ok(())
    }
}

/// Tracks the open cluster and commits it to a sink
#[derive(Debug)]
pub struct ClusterManager {
    policy: ClusterPolicy,
    settings: PageSettings,
    encodings: Vec<Encoding>,
    workers: usize,
    directory: ClusterDirectory,
    open_first_row: EntryIndex,
    open_rows: u64,
}

impl ClusterManager {
    /// Create a manager; `encodings` holds one entry per column
    pub fn new(
        policy: ClusterPolicy,
        settings: PageSettings,
        encodings: Vec<Encoding>,
        workers: usize,
    ) -> Self {
        Self {
            policy,
            settings,
            encodings,
            workers: workers.max(1),
            directory: ClusterDirectory::default(),
            open_first_row: 0,
            open_rows: 0,
        }
    }

    /// Replace the per-column encodings; only valid before the first entry
    pub fn set_encodings(&mut self, encodings: Vec<Encoding>) {
        self.encodings = encodings;
    }

    pub fn encodings(&self) -> &[Encoding] {
        &self.encodings
    }

    pub fn settings(&self) -> &PageSettings {
        &self.settings
    }

    /// Count one more entry in the open cluster
    pub fn record_row(&mut self) {
        self.open_rows += 1;
    }

    /// Entries in the open cluster
    pub fn open_rows(&self) -> u64 {
        self.open_rows
    }

    /// Entries written so far, committed or not
    pub fn total_rows(&self) -> u64 {
        self.open_first_row + self.open_rows
    }

    /// Committed clusters
    pub fn directory(&self) -> &ClusterDirectory {
        &self.directory
    }

    pub fn into_directory(self) -> ClusterDirectory {
        self.directory
    }

    /// Check the boundary policy against the open cluster
    pub fn is_due(&self, store: &ColumnStore) -> bool {
        self.policy.is_due(self.open_rows, store.buffered_bytes())
    }

    /// Seal and write the open cluster. `offset` is the sink position and is
    /// advanced past the written pages. An empty cluster is not recorded.
    pub fn commit<W: Write>(
        &mut self,
        store: &mut ColumnStore,
        sink: &mut W,
        offset: &mut u64,
    ) -> Result<Option<&ClusterDescriptor>> {
        if self.open_rows == 0 {
            return Ok(None);
        }

        let snapshots = store.snapshot();
        let sealed = self.seal_all(&snapshots)?;

        let mut columns = Vec::with_capacity(sealed.len());
        for (snapshot, pages) in snapshots.iter().zip(sealed) {
            let mut descriptors = Vec::with_capacity(pages.len());
            for page in pages {
                let mut descriptor = page.descriptor;
                descriptor.offset = *offset;
                sink.write_all(&page.bytes)?;
                *offset += page.bytes.len() as u64;
                descriptors.push(descriptor);
            }
            columns.push(ColumnRange::new(snapshot.first_element, descriptors));
        }

        let cluster = ClusterDescriptor {
            first_row: self.open_first_row,
            row_count: self.open_rows,
            columns,
        };
        info!(
            "Committed cluster {}: entries {}..{}, {} bytes",
            self.directory.len(),
            cluster.first_row,
            cluster.first_row + cluster.row_count,
            cluster.stored_bytes(self.settings.checksums)
        );

        self.open_first_row += self.open_rows;
        self.open_rows = 0;
        self.directory.push(cluster);
        Ok(self.directory.clusters.last())
    }

    /// Seal every column snapshot, spreading columns over the worker pool
    fn seal_all(&self, snapshots: &[ColumnSnapshot]) -> Result<Vec<Vec<SealedPage>>> {
        if snapshots.len() != self.encodings.len() {
            return Err(TupleError::Corruption(format!(
                "{} column buffers for {} encodings",
                snapshots.len(),
                self.encodings.len()
            )));
        }

        let workers = self.workers.min(snapshots.len());
        if workers <= 1 {
            return snapshots
                .iter()
                .zip(&self.encodings)
                .map(|(s, e)| page::seal(s, *e, &self.settings))
                .collect();
        }

        debug!("Sealing {} columns on {} workers", snapshots.len(), workers);
        let (job_tx, job_rx) = crossbeam_channel::unbounded::<usize>();
        let (done_tx, done_rx) = crossbeam_channel::unbounded();
        for column in 0..snapshots.len() {
            if job_tx.send(column).is_err() {
                break;
            }
        }
        drop(job_tx);

        let encodings = &self.encodings;
        let settings = &self.settings;
        std::thread::scope(|scope| {
            for _ in 0..workers {
                let job_rx = job_rx.clone();
                let done_tx = done_tx.clone();
                scope.spawn(move || {
                    for column in job_rx.iter() {
                        let result = page::seal(&snapshots[column], encodings[column], settings);
                        if done_tx.send((column, result)).is_err() {
                            break;
                        }
                    }
                });
            }
        });
        drop(done_tx);

        let mut sealed: Vec<Option<Vec<SealedPage>>> = (0..snapshots.len()).map(|_| None).collect();
        for (column, result) in done_rx.iter() {
            sealed[column] = Some(result?);
        }
        sealed
            .into_iter()
            .enumerate()
            .map(|(column, pages)| {
                pages.ok_or_else(|| TupleError::Corruption(format!("column {} was not sealed", column)))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::CodecId;
    use crate::schema::{Field, Model, PrimitiveKind};
    use crate::Value;

    fn settings(page_size: usize) -> PageSettings {
        PageSettings {
            page_size,
            codec: CodecId::Lz4,
            checksums: true,
        }
    }

    fn model() -> Model {
        Model::builder()
            .scalar("x", PrimitiveKind::Int64)
            .field("s", Field::sequence(Field::scalar(PrimitiveKind::Float32)))
            .build()
            .unwrap()
    }

    fn fill(store: &mut ColumnStore, manager: &mut ClusterManager, model: &Model, i: i64) {
        store.append_value(model.node(0), &Value::Int64(i));
        let items = (0..i % 4).map(|v| Value::Float32(v as f32)).collect();
        store.append_value(model.node(1), &Value::Sequence(items));
        manager.record_row();
    }

    #[test]
    fn test_policy() {
        let policy = ClusterPolicy {
            max_rows: 10,
            max_bytes: 100,
        };
        assert!(!policy.is_due(0, 1000));
        assert!(!policy.is_due(9, 99));
        assert!(policy.is_due(10, 0));
        assert!(policy.is_due(1, 100));
    }

    #[test]
    fn test_commit_writes_pages_in_column_order() {
        let model = model();
        let encodings: Vec<Encoding> = model
            .columns()
            .iter()
            .map(|c| Encoding::for_kind(c.kind, true))
            .collect();
        let mut store = ColumnStore::new(&model);
        let mut manager = ClusterManager::new(ClusterPolicy::default(), settings(64), encodings, 1);
        let mut sink = Vec::new();
        let mut offset = 0u64;

        assert!(manager.commit(&mut store, &mut sink, &mut offset).unwrap().is_none());

        for i in 0..20 {
            fill(&mut store, &mut manager, &model, i);
        }
        let cluster = manager.commit(&mut store, &mut sink, &mut offset).unwrap().unwrap().clone();
        assert_eq!(cluster.row_count, 20);
        assert_eq!(cluster.columns.len(), 3);
        assert_eq!(offset, sink.len() as u64);

        let all: Vec<&PageDescriptor> = cluster.columns.iter().flat_map(|c| c.pages.iter()).collect();
        assert!(all.windows(2).all(|w| w[0].offset < w[1].offset));
        assert_eq!(cluster.columns[0].pages.len(), 3);

        for i in 20..25 {
            fill(&mut store, &mut manager, &model, i);
        }
        manager.commit(&mut store, &mut sink, &mut offset).unwrap();

        let dir = manager.directory();
        assert_eq!(dir.len(), 2);
        assert_eq!(dir.total_rows(), 25);
        assert_eq!(dir.find(19), Some(0));
        assert_eq!(dir.find(20), Some(1));
        assert_eq!(dir.find(25), None);
        assert!(dir.validate(3, 25).is_ok());
        assert!(dir.validate(3, 26).is_err());

        // sequence elements: sum of i % 4 over 0..20 is 30
        assert_eq!(dir.find_element(2, 29), Some(0));
        assert_eq!(dir.find_element(2, 30), Some(1));
    }

    #[test]
    fn test_parallel_sealing_matches_inline() {
        let model = model();
        let encodings: Vec<Encoding> = model
            .columns()
            .iter()
            .map(|c| Encoding::for_kind(c.kind, true))
            .collect();

        let mut outputs = Vec::new();
        for workers in [1, 4] {
            let mut store = ColumnStore::new(&model);
            let mut manager = ClusterManager::new(ClusterPolicy::default(), settings(128), encodings.clone(), workers);
            let mut sink = Vec::new();
            let mut offset = 0;
            for i in 0..500 {
                fill(&mut store, &mut manager, &model, i);
            }
            manager.commit(&mut store, &mut sink, &mut offset).unwrap();
            outputs.push((sink, manager.into_directory()));
        }
        assert_eq!(outputs[0], outputs[1]);
    }

    #[test]
    fn test_element_counts_follow_field_tree() {
        let model = model();
        let encodings = vec![Encoding::Plain; 3];
        let mut store = ColumnStore::new(&model);
        let mut manager = ClusterManager::new(ClusterPolicy::default(), settings(64), encodings, 1);
        let mut sink = Vec::new();
        let mut offset = 0;
        for i in 0..10 {
            fill(&mut store, &mut manager, &model, i);
        }
        let mut cluster = manager.commit(&mut store, &mut sink, &mut offset).unwrap().unwrap().clone();
        assert!(cluster.check_element_counts(model.nodes()).is_ok());

        cluster.row_count += 1;
        let err = cluster.check_element_counts(model.nodes()).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_directory_overflow_is_corruption() {
        let cluster = |first_row, row_count| ClusterDescriptor {
            first_row,
            row_count,
            columns: vec![ColumnRange::new(0, Vec::new())],
        };
        let dir = ClusterDirectory::from_clusters(vec![cluster(0, u64::MAX), cluster(u64::MAX, 2)]);
        assert!(matches!(dir.validate(1, 1), Err(TupleError::Corruption(_))));
    }

    #[test]
    fn test_column_range_locate() {
        let page = |n| PageDescriptor {
            element_count: n,
            uncompressed_size: n * 4,
            compressed_size: n * 4,
            codec: CodecId::None,
            offset: 0,
        };
        let range = ColumnRange::new(100, vec![page(10), page(10), page(5)]);
        assert_eq!(range.element_count, 25);
        assert_eq!(range.locate(99), None);
        assert_eq!(range.locate(100), Some((0, 100)));
        assert_eq!(range.locate(119), Some((1, 110)));
        assert_eq!(range.locate(124), Some((2, 120)));
        assert_eq!(range.locate(125), None);
    }
}
