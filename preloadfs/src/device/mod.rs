//! Byte-range data sources behind the prefetch engine.
//!
//! A [`Device`] is an absolute-offset, synchronous byte source. Two variants
//! exist: [`FileDevice`] for local files and [`HttpDevice`] for remote
//! resources fetched with ranged GETs. The concrete variant is selected once
//! from the locator's scheme by [`for_locator`], never per call.

mod file;
mod http;

use std::io;

use thiserror::Error;

pub use file::FileDevice;
pub use http::HttpDevice;

/// Errors reported by a device.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// Underlying I/O failure (file access, socket read).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// HTTP transport failure (connect, TLS, request send).
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// Terminal HTTP status outside the 2xx/3xx classes.
    #[error("unexpected HTTP status {0}")]
    Status(u16),

    /// Malformed or unexpected response.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Redirect chain exceeded the hop limit.
    #[error("too many redirects (limit {0})")]
    TooManyRedirects(usize),
}

impl DeviceError {
    /// Map the error onto an errno for latching in the engine.
    pub fn errno(&self) -> i32 {
        match self {
            DeviceError::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
            DeviceError::Status(404) | DeviceError::Status(410) => libc::ENOENT,
            DeviceError::Status(401) | DeviceError::Status(403) => libc::EACCES,
            _ => libc::EIO,
        }
    }
}

/// Absolute-offset byte source.
///
/// `size` is stable for the lifetime of an opened handle: the resource is
/// treated as immutable in length, though content reads may be retried
/// internally. `read_at` must not assume sequential calls.
pub trait Device: Send {
    /// Resolve and open the resource. Must be called before `size` or
    /// `read_at`.
    fn open(&mut self) -> Result<(), DeviceError>;

    /// Total byte length, resolved at open time.
    fn size(&self) -> u64;

    /// Read up to `buf.len()` bytes at `offset` into `buf`.
    ///
    /// `Ok(0)` signals end of data. A short count is not an error.
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize, DeviceError>;
}

/// Pick a device implementation from the locator's scheme.
///
/// `http://` and `https://` locators (case-insensitive) map to
/// [`HttpDevice`]; everything else is treated as a local path.
pub fn for_locator(locator: &str) -> Result<Box<dyn Device>, DeviceError> {
    if has_scheme(locator, "http://") || has_scheme(locator, "https://") {
        Ok(Box::new(HttpDevice::new(locator)?))
    } else {
        Ok(Box::new(FileDevice::new(locator)))
    }
}

fn has_scheme(locator: &str, scheme: &str) -> bool {
    locator.len() >= scheme.len() && locator[..scheme.len()].eq_ignore_ascii_case(scheme)
}
