//! Name conversion commands: escape, unescape, normalize

use anyhow::Result;
use localfs_core::{FileSystemAccess, NativeFileSystemAccess};
use owo_colors::OwoColorize;

pub async fn run_escape(name: &str) -> Result<()> {
    let fs = NativeFileSystemAccess::without_async();
    println!("{}", fs.escape_fs_incompatible(name));
    Ok(())
}

pub async fn run_unescape(name: &str) -> Result<()> {
    let fs = NativeFileSystemAccess::without_async();
    println!("{}", fs.unescape_fs_incompatible(name));
    Ok(())
}

/// Print the NFC form of `name`, noting on stderr when it differs
pub async fn run_normalize(name: &str) -> Result<()> {
    let fs = NativeFileSystemAccess::without_async();
    let mut bytes = name.as_bytes().to_vec();
    fs.normalize(&mut bytes);
    let normalized = String::from_utf8(bytes)?;

    println!("{}", normalized);
    if normalized != name {
        eprintln!(
            "{}",
            format!("normalized: {} -> {} bytes", name.len(), normalized.len()).dimmed()
        );
    }
    Ok(())
}
