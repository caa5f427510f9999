//! PreloadFS - prefetched single-file virtual filesystem.
//!
//! Exposes one slow local or remote file as a virtual file, transparently
//! read ahead by a background thread into a bounded ring buffer so that
//! sequential consumers (media players, extractors) stream smoothly over
//! high-latency backing storage.
//!
//! The pieces, leaves first:
//!
//! - [`buffer`] - fixed-capacity circular buffer over a memory or
//!   temp-file backing store.
//! - [`device`] - byte-range sources: local files and HTTP resources with
//!   redirect-aware, retrying range requests.
//! - [`engine`] - the prefetch engine: producer thread, seek
//!   reconciliation, terminal latching, refill hysteresis.
//! - [`fuse`] - the `fuser::Filesystem` bridge mapping filesystem calls
//!   onto the engine.

pub mod buffer;
pub mod device;
pub mod engine;
pub mod fuse;

pub use buffer::CircularBuffer;
pub use device::{Device, DeviceError, FileDevice, HttpDevice};
pub use engine::{EngineError, FileStats, PrefetchEngine};
pub use fuse::PreloadFs;
