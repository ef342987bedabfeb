use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

/// Reads exact byte ranges of a file for chunked upload.
///
/// Stateless between reads: every call seeks, so resuming at an arbitrary
/// offset after a restart needs no bookkeeping here.
pub struct ChunkReader {
    file: std::fs::File,
    total_size: u64,
}

impl ChunkReader {
    /// Opens `path` for chunked reading.
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let file = std::fs::File::open(path)?;
        let total_size = file.metadata()?.len();
        Ok(Self { file, total_size })
    }

    /// Total file size in bytes.
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Reads exactly `len` bytes starting at `offset`.
    ///
    /// The upload protocol identifies chunks by exact byte range, so a short
    /// read is an error, not a smaller chunk.
    pub fn read_range(&mut self, offset: u64, len: usize) -> std::io::Result<Vec<u8>> {
        self.file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; len];
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }
}
