//! Directory change notification for localfs
//!
//! This crate provides:
//! - `DirNotify`, per-subtree notification queues with tail-merge dedup
//! - Self-notification suppression against the engine's `SyncContext`
//! - A native backend on the `notify` crate, drained on the engine thread
//! - Debounced draining and a periodic rescan fallback

pub mod context;
pub mod debounce;
pub mod dirnotify;
pub mod platform;
pub mod rescan;

use std::path::PathBuf;
use thiserror::Error;

pub use context::{LocalNodeId, LocalNodeView, RemoteNodeView, SyncContext};
pub use dirnotify::{DirNotify, Notification, NotifyQueue};
pub use rescan::PeriodicRescan;

/// Watcher setup failures
///
/// A `DirNotify` that hits one of these stays usable in the FAILED state.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("Watch root {path} is not accessible: {source}")]
    Root {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to start native watcher on {path}: {source}")]
    Backend {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
}
