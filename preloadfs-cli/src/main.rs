//! PreloadFS CLI - mount a prefetched file.

use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;

use clap::Parser;
use fuser::MountOption;
use preloadfs::{CircularBuffer, PrefetchEngine, PreloadFs};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Mount a single local or remote file as a virtual file, prefetched
/// through a bounded ring buffer.
#[derive(Parser, Debug)]
#[command(name = "preloadfs", version, about)]
struct Args {
    /// Path or http(s):// URL of the file to mount.
    source: String,

    /// Directory to mount the virtual filesystem on.
    mountpoint: PathBuf,

    /// Spill the ring buffer to an unlinked temp file in this directory
    /// instead of keeping it in memory.
    #[arg(long, value_name = "DIR")]
    tmp_dir: Option<PathBuf>,

    /// Ring buffer capacity in KiB.
    #[arg(long, default_value_t = 4096, value_name = "KIB")]
    buffer_size_kib: usize,

    /// Allow other users to access the mount.
    #[arg(long)]
    allow_other: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    if let Err(e) = run(args) {
        eprintln!("preloadfs: {e}");
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let capacity = args
        .buffer_size_kib
        .checked_mul(1024)
        .filter(|c| *c > 0)
        .ok_or("buffer size must be a positive number of KiB")?;

    let buffer = match &args.tmp_dir {
        Some(dir) => CircularBuffer::file_backed(dir, capacity)?,
        None => CircularBuffer::in_memory(capacity),
    };

    let engine = Arc::new(PrefetchEngine::for_locator(&args.source, buffer)?);
    engine.init()?;

    let mut options = vec![
        MountOption::RO,
        MountOption::FSName("preloadfs".into()),
        MountOption::DefaultPermissions,
    ];
    if args.allow_other {
        options.push(MountOption::AllowOther);
    }

    let fs = PreloadFs::new(Arc::clone(&engine));
    let session = fuser::spawn_mount2(fs, &args.mountpoint, &options)?;
    info!(
        source = %args.source,
        mountpoint = %args.mountpoint.display(),
        entry = engine.entry_name(),
        "mounted"
    );

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })?;
    rx.recv()?;

    info!("unmounting");
    session.join();
    engine.shutdown();
    Ok(())
}
