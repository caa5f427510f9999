//! Integration tests for the prefetch engine against a scripted device.

use std::sync::{Arc, Mutex};

use preloadfs::buffer::CircularBuffer;
use preloadfs::device::{Device, DeviceError};
use preloadfs::engine::{EngineError, PrefetchEngine};

/// Deterministic content: byte i is a function of its offset.
fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

/// In-memory device that records the offset of every fetch.
struct MockDevice {
    data: Vec<u8>,
    fetch_log: Arc<Mutex<Vec<u64>>>,
    /// Reads at or past this offset fail with `ECONNRESET`.
    fail_from: Option<u64>,
    fail_open: bool,
}

impl MockDevice {
    fn new(data: Vec<u8>) -> (Self, Arc<Mutex<Vec<u64>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                data,
                fetch_log: Arc::clone(&log),
                fail_from: None,
                fail_open: false,
            },
            log,
        )
    }
}

impl Device for MockDevice {
    fn open(&mut self) -> Result<(), DeviceError> {
        if self.fail_open {
            return Err(DeviceError::Io(std::io::Error::from_raw_os_error(
                libc::ENOENT,
            )));
        }
        Ok(())
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize, DeviceError> {
        self.fetch_log.lock().unwrap().push(offset);
        if let Some(fail_from) = self.fail_from {
            if offset >= fail_from {
                return Err(DeviceError::Io(std::io::Error::from_raw_os_error(
                    libc::ECONNRESET,
                )));
            }
        }
        if offset >= self.data.len() as u64 {
            return Ok(0);
        }
        let start = offset as usize;
        let n = buf.len().min(self.data.len() - start);
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        Ok(n)
    }
}

fn engine_over(device: MockDevice, capacity: usize) -> PrefetchEngine {
    let engine = PrefetchEngine::new(
        "/remote/archive.bin",
        Box::new(device),
        CircularBuffer::in_memory(capacity),
    );
    engine.init().unwrap();
    engine
}

#[test]
fn sequential_reads_drain_the_whole_resource() {
    let data = pattern(100_000);
    let (device, _) = MockDevice::new(data.clone());
    let engine = engine_over(device, 8 * 1024);

    let mut collected = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = engine.read(collected.len() as u64, &mut chunk).unwrap();
        if n == 0 {
            break;
        }
        collected.extend_from_slice(&chunk[..n]);
    }

    assert_eq!(collected.len(), data.len());
    assert_eq!(collected, data);
    // End of stream stays a clean zero-length result, never an error.
    assert_eq!(engine.read(collected.len() as u64, &mut chunk).unwrap(), 0);
    engine.shutdown();
}

#[test]
fn attributes_report_resolved_size() {
    let (device, _) = MockDevice::new(pattern(12_345));
    let engine = engine_over(device, 4096);

    let stats = engine.attributes_of("archive.bin").unwrap();
    assert_eq!(stats.size, 12_345);

    assert_eq!(
        engine.attributes_of("no-such-entry"),
        Err(EngineError::NotFound)
    );

    // The status side channel always stats.
    assert!(engine.attributes_of(".stat").unwrap().size > 0);
    engine.shutdown();
}

#[test]
fn attributes_after_failed_open_report_zero_size() {
    let (mut device, _) = MockDevice::new(pattern(500));
    device.fail_open = true;
    let engine = engine_over(device, 4096);

    assert_eq!(engine.attributes_of("archive.bin").unwrap().size, 0);

    let mut buf = [0u8; 16];
    assert_eq!(
        engine.read(0, &mut buf),
        Err(EngineError::Io(libc::ENOENT))
    );
    engine.shutdown();
}

#[test]
fn second_concurrent_open_is_rejected() {
    let (device, _) = MockDevice::new(pattern(100));
    let engine = engine_over(device, 4096);

    engine.open("archive.bin", true).unwrap();
    assert_eq!(
        engine.open("archive.bin", true),
        Err(EngineError::PermissionDenied)
    );

    engine.release("archive.bin");
    engine.open("archive.bin", true).unwrap();
    engine.release("archive.bin");
    engine.shutdown();
}

#[test]
fn write_access_is_rejected() {
    let (device, _) = MockDevice::new(pattern(100));
    let engine = engine_over(device, 4096);

    assert_eq!(
        engine.open("archive.bin", false),
        Err(EngineError::PermissionDenied)
    );
    assert_eq!(
        engine.open("unknown", true),
        Err(EngineError::NotFound)
    );
    engine.shutdown();
}

#[test]
fn forward_seek_into_buffered_span_does_not_refetch() {
    // The whole 16 KiB resource fits the 64 KiB ring, so after the first
    // read everything is buffered.
    let data = pattern(16 * 1024);
    let (device, log) = MockDevice::new(data.clone());
    let engine = engine_over(device, 64 * 1024);

    let mut buf = [0u8; 1024];
    assert_eq!(engine.read(0, &mut buf).unwrap(), 1024);
    assert_eq!(buf[..], data[..1024]);

    let fetched_before = log.lock().unwrap().clone();

    // Jump forward into the buffered span.
    assert_eq!(engine.read(8192, &mut buf).unwrap(), 1024);
    assert_eq!(buf[..], data[8192..8192 + 1024]);

    // No new device traffic for the skipped span.
    let fetched_after = log.lock().unwrap().clone();
    assert_eq!(fetched_before, fetched_after);
    engine.shutdown();
}

#[test]
fn seek_outside_buffered_span_refetches_from_target() {
    let data = pattern(1024 * 1024);
    let (device, log) = MockDevice::new(data.clone());
    let engine = engine_over(device, 8 * 1024);

    let mut buf = [0u8; 1024];
    assert_eq!(engine.read(0, &mut buf).unwrap(), 1024);

    // Far beyond anything the 8 KiB ring can hold.
    let target = 500_000u64;
    assert_eq!(engine.read(target, &mut buf).unwrap(), 1024);
    assert_eq!(buf[..], data[target as usize..target as usize + 1024]);
    assert!(log.lock().unwrap().contains(&target));

    // Backward seek takes the slow path too.
    assert_eq!(engine.read(100, &mut buf).unwrap(), 1024);
    assert_eq!(buf[..], data[100..100 + 1024]);
    assert!(log.lock().unwrap().contains(&100));
    engine.shutdown();
}

#[test]
fn device_error_is_deferred_past_buffered_bytes() {
    let data = pattern(16 * 1024);
    let (mut device, _) = MockDevice::new(data.clone());
    // The ring holds 8 KiB; everything past it fails.
    device.fail_from = Some(8192);
    let engine = engine_over(device, 8 * 1024);

    // One big read: the buffered 8 KiB come back as a short read, with the
    // error deferred.
    let mut buf = vec![0u8; 12 * 1024];
    assert_eq!(engine.read(0, &mut buf).unwrap(), 8192);
    assert_eq!(buf[..8192], data[..8192]);

    // The next read starts at the failed position with nothing buffered.
    assert_eq!(
        engine.read(8192, &mut buf),
        Err(EngineError::Io(libc::ECONNRESET))
    );

    // A seek clears the latched error and the producer retries from the
    // new offset.
    let mut small = [0u8; 256];
    assert_eq!(engine.read(0, &mut small).unwrap(), 256);
    assert_eq!(small[..], data[..256]);
    engine.shutdown();
}

#[test]
fn release_resets_terminal_state_for_a_fresh_open() {
    let data = pattern(4096);
    let (device, _) = MockDevice::new(data.clone());
    let engine = engine_over(device, 16 * 1024);

    engine.open("archive.bin", true).unwrap();
    let mut buf = vec![0u8; 8192];
    assert_eq!(engine.read(0, &mut buf).unwrap(), 4096);
    // End of stream is now latched.
    assert_eq!(engine.read(4096, &mut buf).unwrap(), 0);
    engine.release("archive.bin");

    // A fresh open starts clean and can read from the top again.
    engine.open("archive.bin", true).unwrap();
    assert_eq!(engine.read(0, &mut buf).unwrap(), 4096);
    assert_eq!(buf[..4096], data[..]);
    engine.release("archive.bin");
    engine.shutdown();
}

#[test]
fn status_report_shows_occupancy() {
    let (device, _) = MockDevice::new(pattern(100));
    let engine = engine_over(device, 4096);

    let report = engine.status_report();
    assert!(report.contains("free:"));
    assert!(report.contains("occupied:"));
    engine.shutdown();
}

#[test]
fn init_and_shutdown_are_idempotent() {
    let (device, _) = MockDevice::new(pattern(100));
    let engine = PrefetchEngine::new(
        "/remote/archive.bin",
        Box::new(device),
        CircularBuffer::in_memory(4096),
    );
    engine.init().unwrap();
    engine.init().unwrap();
    engine.shutdown();
    engine.shutdown();
}
