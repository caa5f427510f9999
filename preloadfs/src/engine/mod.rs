//! Prefetch engine: one producer thread filling a ring buffer ahead of one
//! consumer.
//!
//! The engine owns a [`CircularBuffer`] and a [`Device`]. A dedicated
//! background thread pulls the device sequentially and pushes into the
//! buffer; consumer reads are served from the buffer, with seeks reconciled
//! against what is already buffered. Shared state sits behind a single
//! mutex; two condition variables coordinate "new data" (producer to
//! consumer) and "room or seek" (consumer to producer), plus one for the
//! size becoming known. Device I/O never happens under the lock.
//!
//! # Refill policy
//!
//! The producer fills until the buffer is almost full (three quarters) and
//! then parks until the consumer drains back below that threshold, not
//! merely below capacity. The consumer in turn waits for the buffer to
//! reach the threshold once before its first copy, so reads start against a
//! warm window; after the buffer has been almost full once (latched until
//! the next seek), any buffered byte lets the consumer proceed.

use std::io;
use std::sync::Arc;
use std::thread;

use parking_lot::{Condvar, Mutex};
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::buffer::CircularBuffer;
use crate::device::Device;

/// Largest single fetch issued to the device.
const CHUNK_SIZE: usize = 64 * 1024;

/// Name of the status side-channel entry.
pub const STAT_NAME: &str = ".stat";

/// Nominal size reported for the status entry.
const STAT_SIZE: u64 = 1024;

/// Errors surfaced to the filesystem bridge.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum EngineError {
    /// The name does not refer to the mounted entry.
    #[error("no such entry")]
    NotFound,

    /// Write access requested, or a second concurrent open.
    #[error("permission denied")]
    PermissionDenied,

    /// Latched device or buffer failure, carrying an errno.
    #[error("I/O error (errno {0})")]
    Io(i32),
}

impl EngineError {
    /// Errno for FUSE replies.
    pub fn errno(&self) -> i32 {
        match self {
            EngineError::NotFound => libc::ENOENT,
            EngineError::PermissionDenied => libc::EACCES,
            EngineError::Io(code) => *code,
        }
    }
}

/// Attributes of a mounted entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStats {
    /// Size in bytes. For the mounted file this blocks until the device
    /// has resolved it.
    pub size: u64,
}

/// Latched stream-stopping condition.
///
/// Prevents the producer from fetching until resolved by a seek (or a
/// clean reopen). `EndOfStream` is a sentinel, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Terminal {
    EndOfStream,
    Io(i32),
}

/// State shared between consumer calls and the producer thread.
struct State {
    buffer: CircularBuffer,
    /// Offset the consumer's next sequential read continues from. Doubles
    /// as the producer's retarget point after a seek.
    stream_offset: u64,
    /// Set by the consumer's seek path, cleared by the producer when it
    /// discards stale in-flight data.
    seek_requested: bool,
    terminal: Option<Terminal>,
    /// Resolved device size; `None` until the producer opened the device.
    size: Option<u64>,
    /// Concurrent logical opens of the mounted entry.
    refs: u32,
    /// Cooperative shutdown flag, checked at producer yield points.
    stop: bool,
    /// True once the buffer crossed the almost-full threshold since the
    /// last slow-path seek.
    was_almost_full: bool,
}

struct Inner {
    state: Mutex<State>,
    /// Producer -> consumer: bytes (or a terminal) were posted.
    data_available: Condvar,
    /// Consumer -> producer: room freed, seek posted, or shutdown.
    space_available: Condvar,
    /// Producer -> stat waiters: size resolved (or open failed).
    stat_available: Condvar,
}

/// Thread handle and the not-yet-started device.
struct Control {
    thread: Option<thread::JoinHandle<()>>,
    device: Option<Box<dyn Device>>,
}

/// Prefetching read engine for a single mounted entry.
pub struct PrefetchEngine {
    inner: Arc<Inner>,
    control: Mutex<Control>,
    entry_name: String,
    chunk_size: usize,
}

impl PrefetchEngine {
    /// Create an engine over an explicit device and buffer.
    ///
    /// The visible entry name is the final path component of `locator`.
    /// Nothing runs until [`init`](Self::init).
    pub fn new(locator: &str, device: Box<dyn Device>, buffer: CircularBuffer) -> Self {
        let chunk_size = CHUNK_SIZE.min(buffer.capacity());
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    buffer,
                    stream_offset: 0,
                    seek_requested: false,
                    terminal: None,
                    size: None,
                    refs: 0,
                    stop: false,
                    was_almost_full: false,
                }),
                data_available: Condvar::new(),
                space_available: Condvar::new(),
                stat_available: Condvar::new(),
            }),
            control: Mutex::new(Control {
                thread: None,
                device: Some(device),
            }),
            entry_name: entry_name(locator),
            chunk_size,
        }
    }

    /// Create an engine, picking the device from the locator scheme.
    pub fn for_locator(
        locator: &str,
        buffer: CircularBuffer,
    ) -> Result<Self, crate::device::DeviceError> {
        let device = crate::device::for_locator(locator)?;
        Ok(Self::new(locator, device, buffer))
    }

    /// Name under which the mounted entry appears.
    pub fn entry_name(&self) -> &str {
        &self.entry_name
    }

    /// Start the producer thread. Idempotent.
    pub fn init(&self) -> io::Result<()> {
        let mut control = self.control.lock();
        if control.thread.is_some() {
            return Ok(());
        }
        let Some(device) = control.device.take() else {
            // Already ran once and was shut down; a fresh engine is needed.
            return Ok(());
        };
        let inner = Arc::clone(&self.inner);
        let chunk_size = self.chunk_size;
        let handle = thread::Builder::new()
            .name("preloadfs-producer".into())
            .spawn(move || producer_loop(inner, device, chunk_size))?;
        control.thread = Some(handle);
        Ok(())
    }

    /// Stop and join the producer thread, releasing the device. Idempotent.
    ///
    /// The stop flag is observed at the producer's yield points; an
    /// in-flight device read is waited out, not cancelled.
    pub fn shutdown(&self) {
        let mut control = self.control.lock();
        let Some(handle) = control.thread.take() else {
            return;
        };
        {
            let mut state = self.inner.state.lock();
            state.stop = true;
        }
        self.inner.space_available.notify_all();
        self.inner.data_available.notify_all();
        if handle.join().is_err() {
            warn!("producer thread panicked during shutdown");
        }
    }

    /// Attributes of `name`, blocking until the mounted entry's size is
    /// known (a failed device open posts size zero and shows up on read).
    pub fn attributes_of(&self, name: &str) -> Result<FileStats, EngineError> {
        if name == self.entry_name {
            let mut state = self.inner.state.lock();
            while state.size.is_none() && state.terminal.is_none() {
                self.inner.stat_available.wait(&mut state);
            }
            Ok(FileStats {
                size: state.size.unwrap_or(0),
            })
        } else if name == STAT_NAME {
            Ok(FileStats { size: STAT_SIZE })
        } else {
            Err(EngineError::NotFound)
        }
    }

    /// Open `name`. The mounted entry is read-only and admits one reader
    /// at a time; the status entry opens freely.
    pub fn open(&self, name: &str, read_only: bool) -> Result<(), EngineError> {
        if name == self.entry_name {
            if !read_only {
                return Err(EngineError::PermissionDenied);
            }
            let mut state = self.inner.state.lock();
            if state.refs > 0 {
                debug!("rejecting second concurrent open");
                return Err(EngineError::PermissionDenied);
            }
            state.refs += 1;
            Ok(())
        } else if name == STAT_NAME {
            Ok(())
        } else {
            Err(EngineError::NotFound)
        }
    }

    /// Release an open of `name`. When the last reference goes away the
    /// terminal and seek flags reset so a subsequent open starts clean.
    pub fn release(&self, name: &str) {
        if name != self.entry_name {
            return;
        }
        let mut state = self.inner.state.lock();
        state.refs = state.refs.saturating_sub(1);
        if state.refs == 0 {
            state.seek_requested = false;
            state.was_almost_full = false;
            state.terminal = None;
            // The producer may have parked on the terminal; let it retry.
            self.inner.space_available.notify_one();
        }
    }

    /// Read from the mounted entry at `offset` into `out`.
    ///
    /// Blocks until data is available or a terminal condition is reached.
    /// A short count means end of stream, or a deferred I/O error that the
    /// next call will surface.
    pub fn read(&self, offset: u64, out: &mut [u8]) -> Result<usize, EngineError> {
        let inner = &self.inner;
        let mut state = inner.state.lock();

        if state.stream_offset != offset {
            self.seek(&mut state, offset);
        }

        let mut copied = 0;
        while copied < out.len() {
            // Wait until the prefetch window has warmed up (or has done so
            // once since the last seek), or a terminal was posted.
            while state.terminal.is_none()
                && (state.buffer.is_empty()
                    || (!state.was_almost_full && !state.buffer.is_almost_full()))
            {
                inner.space_available.notify_one();
                inner.data_available.wait(&mut state);
            }
            if state.buffer.is_almost_full() {
                state.was_almost_full = true;
            }

            let n = match state.buffer.get(&mut out[copied..]) {
                Ok(n) => n,
                Err(e) => {
                    warn!(error = %e, "buffer backing store failed on read");
                    if copied > 0 {
                        break;
                    }
                    return Err(EngineError::Io(e.raw_os_error().unwrap_or(libc::EIO)));
                }
            };
            copied += n;
            state.stream_offset += n as u64;

            if n == 0 {
                match state.terminal {
                    Some(Terminal::Io(code)) => {
                        if copied == 0 {
                            return Err(EngineError::Io(code));
                        }
                        // Partial success; the error surfaces on the next call.
                        break;
                    }
                    // End of stream: the short read is the result.
                    _ => break,
                }
            }
            inner.space_available.notify_one();
        }

        trace!(offset, copied, "read served");
        Ok(copied)
    }

    /// Reconcile a read at `offset` against the current stream position.
    /// Caller holds the state lock.
    fn seek(&self, state: &mut State, offset: u64) {
        let stream_offset = state.stream_offset;
        if offset > stream_offset && stream_offset + state.buffer.occupied() as u64 > offset {
            // Fast path: the target is already buffered; skip up to it.
            trace!(from = stream_offset, to = offset, "seek within buffered span");
            state.buffer.advance((offset - stream_offset) as usize);
        } else {
            // Slow path: drop everything and retarget the producer. A seek
            // also resurrects a stream that ended or errored, since the new
            // offset may be readable.
            trace!(from = stream_offset, to = offset, "seek outside buffered span");
            state.buffer.clear();
            state.seek_requested = true;
            state.terminal = None;
            state.was_almost_full = false;
        }
        state.stream_offset = offset;
        self.inner.space_available.notify_one();
    }

    /// One-line occupancy snapshot backing the status entry.
    pub fn status_report(&self) -> String {
        let state = self.inner.state.lock();
        format!(
            "free: {}, occupied: {}, capacity: {}\n",
            state.buffer.free(),
            state.buffer.occupied(),
            state.buffer.capacity()
        )
    }
}

impl Drop for PrefetchEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Body of the producer thread.
fn producer_loop(inner: Arc<Inner>, mut device: Box<dyn Device>, chunk_size: usize) {
    // Opening may resolve redirects or hit the network; failures latch as a
    // terminal so stat and read callers are not left hanging.
    match device.open() {
        Ok(()) => {
            let size = device.size();
            debug!(size, "device opened");
            let mut state = inner.state.lock();
            state.size = Some(size);
            inner.stat_available.notify_all();
        }
        Err(e) => {
            warn!(error = %e, "device open failed");
            let mut state = inner.state.lock();
            state.size = Some(0);
            state.terminal = Some(Terminal::Io(e.errno()));
            inner.stat_available.notify_all();
            inner.data_available.notify_all();
        }
    }

    let mut chunk = vec![0u8; chunk_size];
    let mut offset: u64 = 0;

    loop {
        let want;
        {
            let mut state = inner.state.lock();
            // Hysteresis: once almost full, stay parked until the consumer
            // drains below the threshold. A pending seek or shutdown always
            // breaks the wait.
            while !state.stop
                && !state.seek_requested
                && (state.terminal.is_some() || state.buffer.is_almost_full())
            {
                inner.space_available.wait(&mut state);
            }
            if state.stop {
                break;
            }
            if state.seek_requested {
                state.seek_requested = false;
                offset = state.stream_offset;
            }
            want = chunk_size.min(state.buffer.free());
        }

        // The fetch may take arbitrarily long; never hold the lock here.
        let result = device.read_at(&mut chunk[..want], offset);

        let mut state = inner.state.lock();
        if state.stop {
            break;
        }
        if state.seek_requested {
            // The consumer seeked while we were fetching; the chunk is for
            // a stale offset. Discard it and start over.
            state.seek_requested = false;
            offset = state.stream_offset;
            trace!(offset, "discarding stale chunk after seek");
            continue;
        }

        match result {
            Err(e) => {
                warn!(error = %e, offset, "device read failed");
                state.terminal = Some(Terminal::Io(e.errno()));
            }
            Ok(0) => {
                debug!(offset, "end of stream");
                state.terminal = Some(Terminal::EndOfStream);
            }
            Ok(n) => {
                offset += n as u64;
                match state.buffer.put(&chunk[..n]) {
                    Ok(stored) => debug_assert_eq!(stored, n),
                    Err(e) => {
                        warn!(error = %e, "buffer backing store failed on write");
                        state.terminal = Some(Terminal::Io(e.raw_os_error().unwrap_or(libc::EIO)));
                    }
                }
                if state.buffer.is_almost_full() {
                    state.was_almost_full = true;
                }
            }
        }
        inner.data_available.notify_one();
    }
    debug!("producer thread stopped");
}

/// Final path component of a locator, used as the visible entry name.
fn entry_name(locator: &str) -> String {
    let trimmed = locator.trim_end_matches('/');
    let name = trimmed
        .rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty())
        .unwrap_or("stream");
    name.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_name_from_path() {
        assert_eq!(entry_name("/data/movies/film.mkv"), "film.mkv");
        assert_eq!(entry_name("relative.bin"), "relative.bin");
    }

    #[test]
    fn test_entry_name_from_url() {
        assert_eq!(entry_name("http://host/dir/file.iso"), "file.iso");
        assert_eq!(entry_name("http://host/dir/"), "dir");
    }

    #[test]
    fn test_entry_name_fallback() {
        assert_eq!(entry_name("///"), "stream");
        assert_eq!(entry_name(""), "stream");
    }

    #[test]
    fn test_engine_error_errnos() {
        assert_eq!(EngineError::NotFound.errno(), libc::ENOENT);
        assert_eq!(EngineError::PermissionDenied.errno(), libc::EACCES);
        assert_eq!(EngineError::Io(libc::ETIMEDOUT).errno(), libc::ETIMEDOUT);
    }
}
