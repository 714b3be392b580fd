//! Random-access byte sources

use crate::{Result, TupleError};
use bytes::Bytes;
use parking_lot::Mutex;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

/// Positional reads over a finished dataset
pub trait ByteSource: Send + Sync {
    /// Total length in bytes
    fn len(&self) -> u64;

    /// Read exactly `len` bytes starting at `offset`
    fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn slice_at(data: &[u8], offset: u64, len: usize) -> Result<Vec<u8>> {
    let start = usize::try_from(offset).ok();
    start
        .and_then(|s| s.checked_add(len).map(|e| (s, e)))
        .and_then(|(s, e)| data.get(s..e))
        .map(<[u8]>::to_vec)
        .ok_or_else(|| {
            TupleError::Corruption(format!(
                "read of {} bytes at {} past end of {}-byte source",
                len,
                offset,
                data.len()
            ))
        })
}

impl ByteSource for Vec<u8> {
    fn len(&self) -> u64 {
        self.as_slice().len() as u64
    }

    fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        slice_at(self, offset, len)
    }
}

impl ByteSource for Bytes {
    fn len(&self) -> u64 {
        self.as_ref().len() as u64
    }

    fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        slice_at(self, offset, len)
    }
}

/// A file opened for shared positional reads
#[derive(Debug)]
pub struct FileSource {
    file: Mutex<File>,
    len: u64,
}

impl FileSource {
    /// Open a file
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            file: Mutex::new(file),
            len,
        })
    }
}

impl ByteSource for FileSource {
    fn len(&self) -> u64 {
        self.len
    }

    fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        if offset.saturating_add(len as u64) > self.len {
            return Err(TupleError::Corruption(format!(
                "read of {} bytes at {} past end of {}-byte file",
                len, offset, self.len
            )));
        }
        let mut data = vec![0u8; len];
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut data)?;
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_memory_sources() {
        let data: Vec<u8> = (0..10).collect();
        assert_eq!(data.read_at(2, 3).unwrap(), vec![2, 3, 4]);
        assert!(data.read_at(8, 3).is_err());
        assert!(data.read_at(u64::MAX, 1).is_err());

        let bytes = Bytes::from(data);
        assert_eq!(ByteSource::len(&bytes), 10);
        assert_eq!(bytes.read_at(9, 1).unwrap(), vec![9]);
    }

    #[test]
    fn test_file_source() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"hello columns").unwrap();
        file.flush().unwrap();

        let source = FileSource::open(file.path()).unwrap();
        assert_eq!(source.len(), 13);
        assert_eq!(source.read_at(6, 7).unwrap(), b"columns".to_vec());
        assert!(source.read_at(10, 4).is_err());
    }
}
