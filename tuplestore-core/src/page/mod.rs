//! Page sealing and opening
//!
//! A page is a contiguous run of one column's elements, bounded by the
//! configured page size and compressed independently. Pages never split an
//! element; boolean pages hold a whole number of bytes.
//!
//! Stored layout of a page:
//!
//! ```text
//! compressed-bytes | crc32:u32 (only when checksums are enabled)
//! ```

mod codec;

pub use codec::{codec_for, Codec, CodecId, Lz4Codec, NoCodec};

use crate::column::ColumnSnapshot;
use crate::schema::ColumnKind;
use crate::{Result, TupleError};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Byte layout of a column's page payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Encoding {
    /// Elements stored back to back
    Plain = 0,
    /// Byte `b` of every element grouped together, for `b` in `0..width`
    Split = 1,
}

impl Encoding {
    /// Encoding used for a column kind
    pub fn for_kind(kind: ColumnKind, split: bool) -> Self {
        if split && !kind.is_bit() && kind.width() > 1 {
            Encoding::Split
        } else {
            Encoding::Plain
        }
    }

    /// Stable on-disk id
    pub fn id(self) -> u8 {
        self as u8
    }

    /// Look up an encoding by its on-disk id
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(Encoding::Plain),
            1 => Some(Encoding::Split),
            _ => None,
        }
    }
}

/// Location and shape of one stored page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageDescriptor {
    pub element_count: u32,
    pub uncompressed_size: u32,
    /// Size of the compressed payload, excluding the checksum
    pub compressed_size: u32,
    pub codec: CodecId,
    /// Absolute file offset of the page
    pub offset: u64,
}

impl PageDescriptor {
    /// Bytes occupied in the file
    pub fn stored_size(&self, checksums: bool) -> u64 {
        self.compressed_size as u64 + if checksums { 4 } else { 0 }
    }
}

/// Page sealing settings shared by every column of a writer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageSettings {
    pub page_size: usize,
    pub codec: CodecId,
    pub checksums: bool,
}

/// A page ready to be written: its descriptor (offset still unset) and the
/// stored bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedPage {
    pub descriptor: PageDescriptor,
    pub bytes: Vec<u8>,
}

/// Elements that fit in one page of `page_size` bytes
pub fn elements_per_page(kind: ColumnKind, page_size: usize) -> usize {
    if kind.is_bit() {
        page_size.max(1) * 8
    } else {
        (page_size / kind.width()).max(1)
    }
}

/// Cut a column snapshot into compressed pages
pub fn seal(
    snapshot: &ColumnSnapshot,
    encoding: Encoding,
    settings: &PageSettings,
) -> Result<Vec<SealedPage>> {
    let kind = snapshot.kind;
    let per_page = elements_per_page(kind, settings.page_size) as u64;
    let mut pages = Vec::with_capacity((snapshot.elements / per_page + 1) as usize);

    let mut start = 0u64;
    while start < snapshot.elements {
        let count = per_page.min(snapshot.elements - start);
        let begin = kind.stored_size(start) as usize;
        let end = begin + kind.stored_size(count) as usize;
        let raw = snapshot.data.get(begin..end).ok_or_else(|| {
            TupleError::Corruption(format!(
                "column buffer holds {} bytes, expected at least {}",
                snapshot.data.len(),
                end
            ))
        })?;
        pages.push(seal_page(raw, count as u32, kind, encoding, settings)?);
        start += count;
    }

    Ok(pages)
}

fn seal_page(
    raw: &[u8],
    element_count: u32,
    kind: ColumnKind,
    encoding: Encoding,
    settings: &PageSettings,
) -> Result<SealedPage> {
    let payload = match encoding {
        Encoding::Split => split_bytes(raw, kind.width()),
        Encoding::Plain => raw.to_vec(),
    };

    let (codec, mut bytes) = compress(payload, settings.codec);
    let compressed_size = bytes.len() as u32;
    if settings.checksums {
        let checksum = crc32fast::hash(&bytes);
        bytes.extend_from_slice(&checksum.to_le_bytes());
    }

    Ok(SealedPage {
        descriptor: PageDescriptor {
            element_count,
            uncompressed_size: raw.len() as u32,
            compressed_size,
            codec,
            offset: 0,
        },
        bytes,
    })
}

/// Compress with the requested codec, keeping the raw payload when the codec
/// fails or does not help
fn compress(payload: Vec<u8>, requested: CodecId) -> (CodecId, Vec<u8>) {
    if requested == CodecId::None || payload.is_empty() {
        return (CodecId::None, payload);
    }
    match codec_for(requested).compress(&payload) {
        Ok(compressed) if compressed.len() < payload.len() => (requested, compressed),
        Ok(_) => (CodecId::None, payload),
        Err(e) => {
            warn!("{} compression failed, storing page uncompressed: {}", requested, e);
            (CodecId::None, payload)
        }
    }
}

/// Verify, decompress and decode a stored page back to plain element bytes
pub fn open_page(
    stored: &[u8],
    descriptor: &PageDescriptor,
    kind: ColumnKind,
    encoding: Encoding,
    checksums: bool,
    verify: bool,
) -> Result<Vec<u8>> {
    let expected_len = descriptor.stored_size(checksums) as usize;
    if stored.len() != expected_len {
        return Err(TupleError::Corruption(format!(
            "page at offset {} is {} bytes, expected {}",
            descriptor.offset,
            stored.len(),
            expected_len
        )));
    }

    let (payload, trailer) = stored.split_at(descriptor.compressed_size as usize);
    if checksums && verify {
        let expected = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
        let actual = crc32fast::hash(payload);
        if expected != actual {
            return Err(TupleError::ChecksumMismatch { expected, actual });
        }
    }

    let size = descriptor.uncompressed_size as usize;
    if size as u64 != kind.stored_size(descriptor.element_count as u64) {
        return Err(TupleError::Corruption(format!(
            "page of {} {:?} elements cannot hold {} bytes",
            descriptor.element_count, kind, size
        )));
    }

    let decoded = codec_for(descriptor.codec)
        .decompress(payload, size)
        .map_err(|e| match e {
            TupleError::Compression(msg) => TupleError::Corruption(format!(
                "{} page at offset {} does not decode: {}",
                descriptor.codec, descriptor.offset, msg
            )),
            other => other,
        })?;
    if decoded.len() != size {
        return Err(TupleError::Corruption(format!(
            "page decompressed to {} bytes, expected {}",
            decoded.len(),
            size
        )));
    }

    Ok(match encoding {
        Encoding::Split => unsplit_bytes(&decoded, kind.width()),
        Encoding::Plain => decoded,
    })
}

/// Transpose `width`-byte elements into byte planes
fn split_bytes(data: &[u8], width: usize) -> Vec<u8> {
    let count = data.len() / width;
    let mut out = vec![0u8; data.len()];
    for (i, element) in data.chunks_exact(width).enumerate() {
        for (b, byte) in element.iter().enumerate() {
            out[b * count + i] = *byte;
        }
    }
    out
}

/// Inverse of [`split_bytes`]
fn unsplit_bytes(data: &[u8], width: usize) -> Vec<u8> {
    let count = data.len() / width;
    let mut out = vec![0u8; data.len()];
    for (b, plane) in data.chunks_exact(count.max(1)).enumerate().take(width) {
        for (i, byte) in plane.iter().enumerate() {
            out[i * width + b] = *byte;
        }
    }
    out
}
