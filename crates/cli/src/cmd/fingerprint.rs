//! Content fingerprint of a file
//!
//! The async mode keeps a window of reads in flight on the worker pool and
//! hashes completions in file order.

use crate::util::load_config;
use anyhow::{bail, Context, Result};
use localfs_core::fingerprint::IncrementalHasher;
use localfs_core::platform::os_to_local;
use localfs_core::{
    AsyncIOContext, FileAccess, FileFingerprint, FileSystemAccess, NativeFileSystemAccess,
    NodeType, Waiter,
};
use owo_colors::OwoColorize;
use std::collections::VecDeque;
use std::path::Path;
use tracing::debug;

const CHUNK_SIZE: usize = 256 * 1024;
const READ_WINDOW: usize = 4;

pub async fn run(config_path: Option<&Path>, path: &Path, use_async: bool) -> Result<()> {
    let config = load_config(config_path)?;
    let fs = NativeFileSystemAccess::new(&config).context("Failed to start async I/O workers")?;
    let waiter = Waiter::new();
    let mut fa = fs.new_file_access(&waiter);
    let local = os_to_local(path);

    let fingerprint = if use_async {
        let opened = fa.asyncfopen(&local);
        opened
            .finish()
            .with_context(|| format!("Cannot stat {}", path.display()))?;
        if fa.node_type() != NodeType::File {
            bail!("{} is not a file", path.display());
        }
        fingerprint_async(&mut fa).with_context(|| format!("Failed to read {}", path.display()))?
    } else {
        fa.fopen(&local)
            .with_context(|| format!("Cannot stat {}", path.display()))?;
        if fa.node_type() != NodeType::File {
            bail!("{} is not a file", path.display());
        }
        FileFingerprint::generate(&mut fa)
            .with_context(|| format!("Failed to read {}", path.display()))?
    };

    println!("{}  {}", fingerprint.content, path.display());
    println!(
        "{}",
        format!("size {} mtime {}", fingerprint.size, fingerprint.mtime).dimmed()
    );
    Ok(())
}

fn fingerprint_async(fa: &mut FileAccess) -> Result<FileFingerprint> {
    let size = fa.size();
    let mut hasher = IncrementalHasher::new();
    let mut pending: VecDeque<AsyncIOContext> = VecDeque::new();
    let mut pos = 0u64;

    loop {
        while pos < size && pending.len() < READ_WINDOW {
            let len = (size - pos).min(CHUNK_SIZE as u64) as usize;
            pending.push_back(fa.asyncfread(len, 0, pos));
            pos += len as u64;
        }

        let Some(mut context) = pending.pop_front() else {
            break;
        };
        if let Err(failure) = context.finish() {
            bail!("Read at offset {} failed: {}", context.pos(), failure);
        }
        debug!(
            pos = context.pos(),
            len = context.len(),
            readers = fa.async_readers(),
            "Chunk read"
        );
        let data = context.take_buffer();
        hasher.update(&data[..context.len()]);
    }

    Ok(FileFingerprint {
        size,
        mtime: fa.mtime(),
        content: hasher.finalize(),
    })
}
