//! TupleStore Core - Columnar Storage Engine for Nested Tuple Datasets
//!
//! A Rust-based columnar store optimized for:
//! - Arbitrarily nested schemas (sequences, records, tuples, variants)
//! - Independently compressed, size-bounded pages
//! - Random access to any entry without scanning earlier clusters
//!
//! # Architecture
//!
//! A dataset is written once, front to back, and read back by entry index:
//!
//! - **Schema**: a field tree decomposed into flat, typed leaf columns
//! - **ColumnStore**: append-only in-memory buffers, one per leaf column
//! - **Pages**: size-bounded runs of a column, compressed independently
//! - **Clusters**: checkpoints over contiguous entry ranges, sealing one
//!   page run per column
//! - **Reader**: footer directory + lazy page decompression with a shared
//!   page cache

pub mod cluster;
pub mod column;
pub mod dataset;
pub mod format;
pub mod page;
pub mod reader;
pub mod schema;
pub mod writer;

mod error;
mod types;


pub use error::{Result, TupleError};
pub use reader::{ReadOptions, Reader};
pub use schema::{Field, Model, ModelBuilder, PrimitiveKind};
pub use types::*;
pub use writer::{WriteOptions, WriteSummary, Writer};

/// TupleStore version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod config {
    /// Maximum uncompressed page size (64KB)
    pub const PAGE_SIZE: usize = 64 * 1024;

    /// Smallest page size; every element kind fits in one page
    pub const MIN_PAGE_SIZE: usize = 8;

    /// Entries buffered before a cluster is committed
    pub const CLUSTER_ROWS: u64 = 1_000_000;

    /// Approximate buffered bytes before a cluster is committed (100MB)
    pub const CLUSTER_BYTES: usize = 100 * 1024 * 1024;

    /// Decompressed page cache budget per reader (64MB)
    pub const PAGE_CACHE_BYTES: usize = 64 * 1024 * 1024;

    /// Maximum alternatives in a variant field
    pub const MAX_VARIANT_ALTERNATIVES: usize = 255;
}
