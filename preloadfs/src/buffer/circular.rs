//! Fixed-capacity circular byte buffer.

use std::io;

use super::store::BufferStore;

/// Ring buffer with byte-granular `put`/`get`/`advance` semantics.
///
/// Both cursors live in `[0, capacity)`. When they are equal the buffer is
/// either empty or full; the `empty`/`full` flags disambiguate. A transfer
/// that straddles the end of the store is split into two bounded sub-copies,
/// never a single copy across the boundary.
pub struct CircularBuffer {
    store: Box<dyn BufferStore>,
    capacity: usize,
    read_cursor: usize,
    write_cursor: usize,
    full: bool,
    empty: bool,
}

impl CircularBuffer {
    /// Create an empty buffer of `capacity` bytes over `store`.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(store: Box<dyn BufferStore>, capacity: usize) -> Self {
        assert!(capacity > 0, "ring buffer capacity must be non-zero");
        Self {
            store,
            capacity,
            read_cursor: 0,
            write_cursor: 0,
            full: false,
            empty: true,
        }
    }

    /// Create a memory-backed buffer.
    pub fn in_memory(capacity: usize) -> Self {
        Self::new(Box::new(super::MemoryStore::new(capacity)), capacity)
    }

    /// Create a buffer spilled to an unlinked temp file in `dir`.
    pub fn file_backed(dir: impl AsRef<std::path::Path>, capacity: usize) -> io::Result<Self> {
        Ok(Self::new(
            Box::new(super::FileStore::new_in(dir)?),
            capacity,
        ))
    }

    /// Reset both cursors; the buffer becomes empty.
    pub fn clear(&mut self) {
        self.read_cursor = 0;
        self.write_cursor = 0;
        self.full = false;
        self.empty = true;
    }

    /// Append up to `min(data.len(), free())` bytes at the write cursor.
    ///
    /// Returns the number of bytes actually stored. A short count below the
    /// clamped length means the backing store wrote short.
    pub fn put(&mut self, data: &[u8]) -> io::Result<usize> {
        let want = data.len().min(self.free());
        let mut written = 0;
        while written < want {
            let span = (want - written).min(self.capacity - self.write_cursor);
            let n = self
                .store
                .write_at(self.write_cursor, &data[written..written + span])?;
            if n == 0 {
                break;
            }
            written += n;
            self.write_cursor += n;
            if self.write_cursor >= self.capacity {
                self.write_cursor -= self.capacity;
            }
            self.full = self.write_cursor == self.read_cursor;
            self.empty = false;
        }
        Ok(written)
    }

    /// Copy up to `min(out.len(), occupied())` bytes from the read cursor.
    ///
    /// Returns `Ok(0)` when the buffer is empty; that is not an error.
    pub fn get(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let want = out.len().min(self.occupied());
        let mut read = 0;
        while read < want {
            let span = (want - read).min(self.capacity - self.read_cursor);
            let n = self
                .store
                .read_at(self.read_cursor, &mut out[read..read + span])?;
            if n == 0 {
                break;
            }
            read += n;
            self.read_cursor += n;
            if self.read_cursor >= self.capacity {
                self.read_cursor -= self.capacity;
            }
            self.empty = self.read_cursor == self.write_cursor;
            self.full = false;
        }
        Ok(read)
    }

    /// Discard `n` bytes from the front without copying them out.
    ///
    /// # Panics
    ///
    /// Panics if `n > occupied()`; that is a logic defect in the caller,
    /// not a runtime condition to recover from.
    pub fn advance(&mut self, n: usize) {
        assert!(
            n <= self.occupied(),
            "advance past occupied region: {} > {}",
            n,
            self.occupied()
        );
        if n == 0 {
            return;
        }
        self.read_cursor = (self.read_cursor + n) % self.capacity;
        self.empty = self.read_cursor == self.write_cursor;
        self.full = false;
    }

    /// Bytes of free space.
    pub fn free(&self) -> usize {
        if self.full {
            0
        } else if self.empty {
            self.capacity
        } else if self.read_cursor < self.write_cursor {
            self.capacity - self.write_cursor + self.read_cursor
        } else {
            self.read_cursor - self.write_cursor
        }
    }

    /// Bytes of buffered content.
    pub fn occupied(&self) -> usize {
        self.capacity - self.free()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.empty
    }

    pub fn is_full(&self) -> bool {
        self.full
    }

    /// True once occupancy reaches three quarters of capacity.
    ///
    /// Used as the refill hysteresis threshold: the producer stops filling
    /// here and resumes only after the consumer drains back below it.
    pub fn is_almost_full(&self) -> bool {
        self.occupied() * 4 >= self.capacity * 3
    }
}
