//! FUSE bridge over the prefetch engine.
//!
//! Exposes a flat, read-only mount with exactly three entries: the root
//! directory, the mounted file (named after the locator's final path
//! component) and a `.stat` side channel reporting buffer occupancy. All
//! metadata is synthesized here; open/read/release semantics come from the
//! engine.

use std::ffi::OsStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use fuser::{
    FileAttr, FileType, Filesystem, ReplyAttr, ReplyData, ReplyDirectory, ReplyEmpty, ReplyEntry,
    ReplyOpen, Request,
};
use tracing::debug;

use crate::engine::{PrefetchEngine, STAT_NAME};

const ROOT_INO: u64 = 1;
const STAT_INO: u64 = 2;
const FILE_INO: u64 = 3;

const TTL: Duration = Duration::from_secs(1);

/// Filesystem with a single prefetched file.
pub struct PreloadFs {
    engine: Arc<PrefetchEngine>,
    mounted_at: SystemTime,
}

impl PreloadFs {
    pub fn new(engine: Arc<PrefetchEngine>) -> Self {
        Self {
            engine,
            mounted_at: SystemTime::now(),
        }
    }

    fn attr(&self, ino: u64, size: u64, kind: FileType, uid: u32, gid: u32) -> FileAttr {
        let perm = match kind {
            FileType::Directory => 0o555,
            _ => 0o444,
        };
        FileAttr {
            ino,
            size,
            blocks: size.div_ceil(512),
            atime: self.mounted_at,
            mtime: self.mounted_at,
            ctime: self.mounted_at,
            crtime: self.mounted_at,
            kind,
            perm,
            nlink: 1,
            uid,
            gid,
            rdev: 0,
            blksize: 512,
            flags: 0,
        }
    }

    /// Attributes for an inode, blocking on the mounted file until its
    /// size is resolved.
    fn attr_of_ino(&self, ino: u64, uid: u32, gid: u32) -> Option<FileAttr> {
        match ino {
            ROOT_INO => Some(self.attr(ROOT_INO, 0, FileType::Directory, uid, gid)),
            STAT_INO => {
                let stats = self.engine.attributes_of(STAT_NAME).ok()?;
                Some(self.attr(STAT_INO, stats.size, FileType::RegularFile, uid, gid))
            }
            FILE_INO => {
                let stats = self.engine.attributes_of(self.engine.entry_name()).ok()?;
                Some(self.attr(FILE_INO, stats.size, FileType::RegularFile, uid, gid))
            }
            _ => None,
        }
    }
}

impl Filesystem for PreloadFs {
    fn lookup(&mut self, req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        if parent != ROOT_INO {
            reply.error(libc::ENOENT);
            return;
        }
        let ino = match name.to_str() {
            Some(STAT_NAME) => STAT_INO,
            Some(n) if n == self.engine.entry_name() => FILE_INO,
            _ => {
                reply.error(libc::ENOENT);
                return;
            }
        };
        match self.attr_of_ino(ino, req.uid(), req.gid()) {
            Some(attr) => reply.entry(&TTL, &attr, 0),
            None => reply.error(libc::ENOENT),
        }
    }

    fn getattr(&mut self, req: &Request<'_>, ino: u64, reply: ReplyAttr) {
        match self.attr_of_ino(ino, req.uid(), req.gid()) {
            Some(attr) => reply.attr(&TTL, &attr),
            None => reply.error(libc::ENOENT),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        if ino != ROOT_INO {
            reply.error(libc::ENOTDIR);
            return;
        }
        let entry_name = self.engine.entry_name().to_string();
        let entries: [(u64, FileType, &str); 4] = [
            (ROOT_INO, FileType::Directory, "."),
            (ROOT_INO, FileType::Directory, ".."),
            (STAT_INO, FileType::RegularFile, STAT_NAME),
            (FILE_INO, FileType::RegularFile, &entry_name),
        ];
        for (i, (ino, kind, name)) in entries.iter().enumerate().skip(offset as usize) {
            if reply.add(*ino, (i + 1) as i64, *kind, name) {
                break;
            }
        }
        reply.ok();
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        let read_only = flags & libc::O_ACCMODE == libc::O_RDONLY;
        let name = match ino {
            FILE_INO => self.engine.entry_name().to_string(),
            STAT_INO => STAT_NAME.to_string(),
            _ => {
                reply.error(libc::ENOENT);
                return;
            }
        };
        match self.engine.open(&name, read_only) {
            Ok(()) => reply.opened(0, 0),
            Err(e) => {
                debug!(name, error = %e, "open rejected");
                reply.error(e.errno());
            }
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        match ino {
            STAT_INO => {
                let report = self.engine.status_report().into_bytes();
                let start = (offset as usize).min(report.len());
                let end = (start + size as usize).min(report.len());
                reply.data(&report[start..end]);
            }
            FILE_INO => {
                let mut buf = vec![0u8; size as usize];
                match self.engine.read(offset as u64, &mut buf) {
                    Ok(n) => reply.data(&buf[..n]),
                    Err(e) => reply.error(e.errno()),
                }
            }
            _ => reply.error(libc::ENOENT),
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        if ino == FILE_INO {
            self.engine.release(self.engine.entry_name());
        }
        reply.ok();
    }
}
