//! Page compression codecs

use crate::{Result, TupleError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Codec identifier stored per page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum CodecId {
    /// Stored as-is
    None = 0,
    /// LZ4 block format
    #[default]
    Lz4 = 1,
}

impl CodecId {
    /// Stable on-disk id
    pub fn id(self) -> u8 {
        self as u8
    }

    /// Look up a codec by its on-disk id
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(CodecId::None),
            1 => Some(CodecId::Lz4),
            _ => None,
        }
    }
}

impl fmt::Display for CodecId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecId::None => write!(f, "none"),
            CodecId::Lz4 => write!(f, "lz4"),
        }
    }
}

/// Block compressor for page payloads
pub trait Codec: Send + Sync {
    /// Identifier recorded in page descriptors
    fn id(&self) -> CodecId;

    /// Compress a page payload
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// Decompress a page payload of known uncompressed size
    fn decompress(&self, data: &[u8], uncompressed_size: usize) -> Result<Vec<u8>>;
}

/// Identity codec
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCodec;

impl Codec for NoCodec {
    fn id(&self) -> CodecId {
        CodecId::None
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn decompress(&self, data: &[u8], uncompressed_size: usize) -> Result<Vec<u8>> {
        if data.len() != uncompressed_size {
            return Err(TupleError::Corruption(format!(
                "stored page holds {} bytes, descriptor says {}",
                data.len(),
                uncompressed_size
            )));
        }
        Ok(data.to_vec())
    }
}

/// LZ4 block codec. The uncompressed size lives in the page descriptor,
/// so no size prefix is stored.
#[derive(Debug, Clone, Copy, Default)]
pub struct Lz4Codec;

impl Codec for Lz4Codec {
    fn id(&self) -> CodecId {
        CodecId::Lz4
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(lz4_flex::block::compress(data))
    }

    fn decompress(&self, data: &[u8], uncompressed_size: usize) -> Result<Vec<u8>> {
        lz4_flex::block::decompress(data, uncompressed_size)
            .map_err(|e| TupleError::Compression(e.to_string()))
    }
}

/// Codec implementation for an id
pub fn codec_for(id: CodecId) -> &'static dyn Codec {
    match id {
        CodecId::None => &NoCodec,
        CodecId::Lz4 => &Lz4Codec,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lz4_shrinks_repetitive_data() {
        let data: Vec<u8> = (0..4096).map(|i| (i % 7) as u8).collect();
        let codec = codec_for(CodecId::Lz4);
        let compressed = codec.compress(&data).unwrap();
        assert!(compressed.len() < data.len());
        assert_eq!(codec.decompress(&compressed, data.len()).unwrap(), data);
    }

    #[test]
    fn test_lz4_rejects_garbage() {
        let codec = Lz4Codec;
        assert!(codec.decompress(&[0xff, 0xff, 0xff, 0xff], 64).is_err());
    }

    #[test]
    fn test_codec_ids() {
        assert_eq!(CodecId::from_id(CodecId::Lz4.id()), Some(CodecId::Lz4));
        assert_eq!(CodecId::from_id(7), None);
        assert_eq!(CodecId::default(), CodecId::Lz4);
        assert_eq!(serde_json::to_string(&CodecId::None).unwrap(), "\"none\"");
    }
}
