//! Error types for TupleStore

use thiserror::Error;

/// Result type alias for TupleStore operations
pub type Result<T> = std::result::Result<T, TupleError>;

/// TupleStore error types
#[derive(Error, Debug)]
pub enum TupleError {
    /// Invalid schema declaration
    #[error("Schema error: {0}")]
    Schema(String),

    /// Entry does not match the model
    #[error("Fill error: {0}")]
    Fill(String),

    /// Codec failure on a page
    #[error("Compression error: {0}")]
    Compression(String),

    /// Underlying storage write or read failed
    #[error("IO error: {0}")]
    WriteIo(#[from] std::io::Error),

    /// Footer or page structure is inconsistent
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// Checksum mismatch
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    /// Entry index past the end of the dataset
    #[error("Entry {index} out of range ({rows} entries)")]
    OutOfRange { index: u64, rows: u64 },

    /// Writer is closed or unusable after a fatal failure
    #[error("Writer is closed")]
    Closed,

    /// Invalid options
    #[error("Configuration error: {0}")]
    Config(String),
}

impl TupleError {
    /// Check if the caller can keep using the object that returned the error
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            TupleError::Schema(_)
                | TupleError::Fill(_)
                | TupleError::OutOfRange { .. }
                | TupleError::Config(_)
        )
    }

    /// Check if error indicates corruption
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            TupleError::Corruption(_) | TupleError::ChecksumMismatch { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(TupleError::Fill("x".into()).is_recoverable());
        assert!(TupleError::OutOfRange { index: 3, rows: 2 }.is_recoverable());
        assert!(!TupleError::Closed.is_recoverable());

        let err = TupleError::ChecksumMismatch { expected: 1, actual: 2 };
        assert!(err.is_corruption());
        assert!(!err.is_recoverable());
        assert_eq!(err.to_string(), "Checksum mismatch: expected 1, got 2");
    }
}
