//! Local file device.

use std::fs::File;
use std::io;
use std::os::unix::fs::FileExt;
use std::path::PathBuf;

use super::{Device, DeviceError};

/// Thin wrapper over positioned reads on a local file.
pub struct FileDevice {
    path: PathBuf,
    file: Option<File>,
    size: u64,
}

impl FileDevice {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: None,
            size: 0,
        }
    }
}

impl Device for FileDevice {
    fn open(&mut self) -> Result<(), DeviceError> {
        let file = File::open(&self.path)?;
        self.size = file.metadata()?.len();
        self.file = Some(file);
        Ok(())
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize, DeviceError> {
        let file = self
            .file
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "device not opened"))?;
        Ok(file.read_at(buf, offset)?)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn fixture(content: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_open_resolves_size() {
        let file = fixture(b"0123456789");
        let mut dev = FileDevice::new(file.path());
        dev.open().unwrap();
        assert_eq!(dev.size(), 10);
    }

    #[test]
    fn test_read_at_absolute_offsets() {
        let file = fixture(b"0123456789");
        let mut dev = FileDevice::new(file.path());
        dev.open().unwrap();

        let mut buf = [0u8; 4];
        assert_eq!(dev.read_at(&mut buf, 3).unwrap(), 4);
        assert_eq!(&buf, b"3456");

        // Offsets are absolute; going backwards is fine.
        assert_eq!(dev.read_at(&mut buf, 0).unwrap(), 4);
        assert_eq!(&buf, b"0123");
    }

    #[test]
    fn test_read_past_end_returns_zero() {
        let file = fixture(b"abc");
        let mut dev = FileDevice::new(file.path());
        dev.open().unwrap();

        let mut buf = [0u8; 4];
        assert_eq!(dev.read_at(&mut buf, 3).unwrap(), 0);
        assert_eq!(dev.read_at(&mut buf, 100).unwrap(), 0);
    }

    #[test]
    fn test_open_missing_file_fails() {
        let mut dev = FileDevice::new("/nonexistent/preloadfs-test-file");
        let err = dev.open().unwrap_err();
        assert_eq!(err.errno(), libc::ENOENT);
    }

    #[test]
    fn test_read_before_open_fails() {
        let mut dev = FileDevice::new("/tmp/whatever");
        let mut buf = [0u8; 1];
        assert!(dev.read_at(&mut buf, 0).is_err());
    }
}
