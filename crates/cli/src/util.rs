//! Shared utilities for CLI commands

use anyhow::{Context, Result};
use localfs_core::config::FsConfig;
use localfs_core::NodeType;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Config file location: the `--config` override or the platform default
pub fn config_file_path(override_path: Option<&Path>) -> Result<PathBuf> {
    match override_path {
        Some(path) => Ok(path.to_path_buf()),
        None => FsConfig::default_path().context("Could not determine config file path"),
    }
}

/// Load the config, falling back to defaults if the file does not exist
pub fn load_config(override_path: Option<&Path>) -> Result<FsConfig> {
    let path = config_file_path(override_path)?;
    FsConfig::load(&path).with_context(|| format!("Failed to load {}", path.display()))
}

/// Default node cache directory for a sync root
///
/// Keyed by a hash of the canonical root so every root gets its own cache.
pub fn default_state_dir(root: &Path) -> Result<PathBuf> {
    let base = dirs::data_local_dir().context("Could not determine local data directory")?;
    let key = localfs_core::fingerprint::hash_bytes(root.as_os_str().as_encoded_bytes()).to_hex();
    Ok(base.join("localfs").join("roots").join(&key[..16]))
}

pub fn node_type_label(node_type: NodeType) -> &'static str {
    match node_type {
        NodeType::File => "file",
        NodeType::Folder => "folder",
        NodeType::Unknown => "unknown",
    }
}

/// Format a unix timestamp as relative time ("2 hours ago")
pub fn format_relative_time(secs: i64) -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);

    let elapsed = now - secs;
    if elapsed < 0 {
        return "in the future".to_string();
    }

    match elapsed {
        0..=59 => format!("{} seconds ago", elapsed),
        60..=3599 => format!("{} minutes ago", elapsed / 60),
        3600..=86_399 => format!("{} hours ago", elapsed / 3600),
        _ => format!("{} days ago", elapsed / 86_400),
    }
}
