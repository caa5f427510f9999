//! Backing stores for the ring buffer.
//!
//! A store is a flat, position-addressed byte region. The ring buffer
//! guarantees that every access stays within `[0, capacity)` and never
//! crosses the wrap boundary in a single call, so stores do not need any
//! bounds logic of their own.

use std::fs::File;
use std::io;
use std::os::unix::fs::FileExt;
use std::path::Path;

/// Position-addressed storage underneath a [`super::CircularBuffer`].
///
/// Implementations may return short counts; the buffer retries with the
/// remaining span. Errors are propagated to the buffer caller untouched.
pub trait BufferStore: Send {
    /// Read up to `buf.len()` bytes starting at `pos`.
    fn read_at(&mut self, pos: usize, buf: &mut [u8]) -> io::Result<usize>;

    /// Write up to `data.len()` bytes starting at `pos`.
    fn write_at(&mut self, pos: usize, data: &[u8]) -> io::Result<usize>;
}

/// Heap-backed store for small rings.
pub struct MemoryStore {
    block: Vec<u8>,
}

impl MemoryStore {
    /// Allocate a zeroed block of `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            block: vec![0; capacity],
        }
    }
}

impl BufferStore for MemoryStore {
    fn read_at(&mut self, pos: usize, buf: &mut [u8]) -> io::Result<usize> {
        buf.copy_from_slice(&self.block[pos..pos + buf.len()]);
        Ok(buf.len())
    }

    fn write_at(&mut self, pos: usize, data: &[u8]) -> io::Result<usize> {
        self.block[pos..pos + data.len()].copy_from_slice(data);
        Ok(data.len())
    }
}

/// Store spilled to an anonymous temporary file.
///
/// The file is created already unlinked, so it disappears with the process
/// no matter how the process exits.
pub struct FileStore {
    file: File,
}

impl FileStore {
    /// Create an unlinked backing file in `dir`.
    pub fn new_in(dir: impl AsRef<Path>) -> io::Result<Self> {
        Ok(Self {
            file: tempfile::tempfile_in(dir)?,
        })
    }

    /// Create an unlinked backing file in the system temp directory.
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            file: tempfile::tempfile()?,
        })
    }
}

impl BufferStore for FileStore {
    fn read_at(&mut self, pos: usize, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read_at(buf, pos as u64)
    }

    fn write_at(&mut self, pos: usize, data: &[u8]) -> io::Result<usize> {
        self.file.write_at(data, pos as u64)
    }
}
