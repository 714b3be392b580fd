//! Writer configuration

use crate::cluster::ClusterPolicy;
use crate::page::{CodecId, PageSettings};
use crate::{config, Result, TupleError};
use serde::{Deserialize, Serialize};

/// Writer configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriteOptions {
    /// Maximum uncompressed page size in bytes
    pub page_size: usize,
    /// Entries per cluster
    pub cluster_rows: u64,
    /// Approximate buffered bytes per cluster
    pub cluster_bytes: usize,
    /// Page codec
    pub codec: CodecId,
    /// Byte-split fixed-width columns wider than one byte
    pub split_encoding: bool,
    /// Append a CRC32 to every page
    pub page_checksums: bool,
    /// Threads sealing pages at cluster commit (1 seals inline)
    pub workers: usize,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            page_size: config::PAGE_SIZE,
            cluster_rows: config::CLUSTER_ROWS,
            cluster_bytes: config::CLUSTER_BYTES,
            codec: CodecId::Lz4,
            split_encoding: true,
            page_checksums: true,
            workers: 1,
        }
    }
}

impl WriteOptions {
    /// Load options from JSON; missing keys keep their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let options: Self =
            serde_json::from_str(json).map_err(|e| TupleError::Config(e.to_string()))?;
        options.validate()?;
        Ok(options)
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_cluster_rows(mut self, rows: u64) -> Self {
        self.cluster_rows = rows;
        self
    }

    pub fn with_cluster_bytes(mut self, bytes: usize) -> Self {
        self.cluster_bytes = bytes;
        self
    }

    pub fn with_codec(mut self, codec: CodecId) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_split_encoding(mut self, split: bool) -> Self {
        self.split_encoding = split;
        self
    }

    pub fn with_page_checksums(mut self, checksums: bool) -> Self {
        self.page_checksums = checksums;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Reject options the writer cannot honor
    pub fn validate(&self) -> Result<()> {
        if self.page_size < config::MIN_PAGE_SIZE || self.page_size > u32::MAX as usize {
            return Err(TupleError::Config(format!(
                "page_size must be in {}..={}, got {}",
                config::MIN_PAGE_SIZE,
                u32::MAX,
                self.page_size
            )));
        }
        if self.cluster_rows == 0 {
            return Err(TupleError::Config("cluster_rows must be positive".into()));
        }
        if self.cluster_bytes == 0 {
            return Err(TupleError::Config("cluster_bytes must be positive".into()));
        }
        if self.workers == 0 {
            return Err(TupleError::Config("workers must be at least 1".into()));
        }
        Ok(())
    }

    pub(crate) fn page_settings(&self) -> PageSettings {
        PageSettings {
            page_size: self.page_size,
            codec: self.codec,
            checksums: self.page_checksums,
        }
    }

    pub(crate) fn cluster_policy(&self) -> ClusterPolicy {
        ClusterPolicy {
            max_rows: self.cluster_rows,
            max_bytes: self.cluster_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = WriteOptions::default();
        assert_eq!(options.page_size, 64 * 1024);
        assert_eq!(options.cluster_rows, 1_000_000);
        assert_eq!(options.codec, CodecId::Lz4);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_from_json_partial() {
        let options = WriteOptions::from_json(r#"{"cluster_rows": 500, "codec": "none"}"#).unwrap();
        assert_eq!(options.cluster_rows, 500);
        assert_eq!(options.codec, CodecId::None);
        assert_eq!(options.page_size, config::PAGE_SIZE);

        let err = WriteOptions::from_json(r#"{"page_size": 0}"#).unwrap_err();
        assert!(matches!(err, TupleError::Config(_)));
        assert!(WriteOptions::from_json("not json").is_err());
    }

    #[test]
    fn test_validate() {
        assert!(WriteOptions::default().with_workers(0).validate().is_err());
        assert!(WriteOptions::default().with_cluster_bytes(0).validate().is_err());
        assert!(WriteOptions::default().with_cluster_rows(0).validate().is_err());
        assert!(WriteOptions::default().with_page_size(7).validate().is_err());
        assert!(WriteOptions::default().with_page_size(8).validate().is_ok());
    }
}
