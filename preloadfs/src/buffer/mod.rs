//! Bounded ring buffer shared between the prefetch producer and the consumer.
//!
//! The buffer is a fixed-capacity byte ring over a pluggable backing store:
//! either a heap block ([`MemoryStore`]) or an anonymous, already-unlinked
//! temporary file ([`FileStore`]) for rings too large to hold in memory. The
//! store kind is chosen once at construction; all cursor and wraparound
//! arithmetic lives inside [`CircularBuffer`] so no caller ever performs
//! modulo math on buffer positions.

mod circular;
mod store;

pub use circular::CircularBuffer;
pub use store::{BufferStore, FileStore, MemoryStore};
