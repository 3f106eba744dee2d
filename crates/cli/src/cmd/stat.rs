//! Show what the filesystem layer sees at a path

use crate::util::{format_relative_time, node_type_label};
use anyhow::{Context, Result};
use localfs_core::platform::os_to_local;
use localfs_core::{FileSystemAccess, NativeFileSystemAccess, Waiter};
use owo_colors::OwoColorize;
use std::path::Path;

pub async fn run(path: &Path) -> Result<()> {
    let fs = NativeFileSystemAccess::without_async();
    let waiter = Waiter::new();
    let mut fa = fs.new_file_access(&waiter);

    fa.fopen(&os_to_local(path))
        .with_context(|| format!("Cannot stat {}", path.display()))?;

    println!("{}", path.display().bold());
    println!("  {}: {}", "type".cyan(), node_type_label(fa.node_type()));
    println!("  {}: {}", "size".cyan(), fa.size());
    println!(
        "  {}: {} {}",
        "mtime".cyan(),
        fa.mtime(),
        format!("({})", format_relative_time(fa.mtime())).dimmed()
    );
    match fa.fsid() {
        Some(fsid) => println!("  {}: {}", "fsid".cyan(), fsid),
        None => println!("  {}: {}", "fsid".cyan(), "unavailable".dimmed()),
    }

    Ok(())
}
