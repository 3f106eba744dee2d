//! Periodic rescan fallback
//!
//! Used when the native watcher is FAILED or reported lost events. Walks the
//! subtree on an interval and reports paths modified since the previous pass.

use anyhow::Result;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Metadata folders of version control systems, never reported
const METADATA_DIRS: &[&str] = &[".git", ".hg", ".svn"];

/// Mtime-based periodic scanner of one subtree
pub struct PeriodicRescan {
    /// Root of the watched subtree
    root: PathBuf,

    /// Scan interval
    interval: Duration,

    /// Top-level folder under `root` to skip
    ignore_dir: String,

    /// Start of the previous pass; entries modified after it are reported
    last_scan: SystemTime,

    /// Sender for relative paths of changed entries
    change_tx: mpsc::Sender<Vec<PathBuf>>,
}

impl PeriodicRescan {
    pub fn new(
        root: PathBuf,
        interval: Duration,
        ignore_dir: impl Into<String>,
        change_tx: mpsc::Sender<Vec<PathBuf>>,
    ) -> Self {
        Self {
            root,
            interval,
            ignore_dir: ignore_dir.into(),
            last_scan: SystemTime::now(),
            change_tx,
        }
    }

    /// Run the rescan loop until the receiver is dropped
    pub async fn run(mut self) -> Result<()> {
        let mut timer = interval(self.interval);

        info!("Starting periodic rescan (interval: {:?})", self.interval);

        loop {
            timer.tick().await;

            let started = SystemTime::now();
            match self.scan_for_changes() {
                Ok(changed) => {
                    self.last_scan = started;
                    if changed.is_empty() {
                        debug!("Periodic rescan: no changes");
                        continue;
                    }

                    info!("Periodic rescan found {} changed entries", changed.len());
                    if self.change_tx.send(changed).await.is_err() {
                        debug!("Rescan receiver dropped, stopping");
                        return Ok(());
                    }
                }
                Err(e) => {
                    warn!("Periodic rescan failed: {}", e);
                }
            }
        }
    }

    /// Relative paths of entries modified after the previous pass
    ///
    /// Folders are included, the root as an empty path: their mtime moves
    /// when children are added, removed or renamed, which is how deletions
    /// surface.
    pub fn scan_for_changes(&self) -> Result<Vec<PathBuf>> {
        let mut changed = Vec::new();

        for entry in WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| !self.should_ignore(e.path()))
        {
            let entry = match entry {
                Ok(entry) => entry,
                // Entries vanishing mid-walk are reported by the next pass's parent mtime
                Err(e) if e.io_error().map(io::Error::kind) == Some(io::ErrorKind::NotFound) => {
                    continue
                }
                Err(e) => return Err(e.into()),
            };

            let mtime = match entry.metadata() {
                Ok(meta) => meta.modified()?,
                Err(_) => continue,
            };

            if mtime > self.last_scan {
                changed.push(entry.path().strip_prefix(&self.root)?.to_path_buf());
            }
        }

        Ok(changed)
    }

    /// Check if path should be skipped
    fn should_ignore(&self, path: &Path) -> bool {
        let Ok(relative) = path.strip_prefix(&self.root) else {
            return false;
        };

        if let Some(first) = relative.components().next() {
            if first.as_os_str() == self.ignore_dir.as_str() {
                return true;
            }
        }

        relative
            .components()
            .any(|c| METADATA_DIRS.iter().any(|dir| c.as_os_str() == *dir))
    }
}
