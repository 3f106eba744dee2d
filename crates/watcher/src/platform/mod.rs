//! Native change-notification backend
//!
//! The `notify` crate picks the mechanism per target (inotify, FSEvents,
//! ReadDirectoryChangesW). Its callback thread only forwards raw paths into
//! a bounded channel and wakes the engine; translation into queue entries
//! happens in `DirNotify::pump` on the engine thread.

use crate::WatchError;
use crossbeam_channel::{Receiver, Sender, TrySendError};
use localfs_core::platform::volume_id;
use localfs_core::Waiter;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Raw paths buffered between two pumps before events are considered lost
const RAW_QUEUE_CAPACITY: usize = 16 * 1024;

pub(crate) struct NotifyBackend {
    _watcher: RecommendedWatcher,
    rx: Receiver<PathBuf>,
    overflowed: Arc<AtomicBool>,
    fingerprint: Option<u64>,
}

fn forward(
    tx: &Sender<PathBuf>,
    overflowed: &AtomicBool,
    waiter: &Waiter,
    res: notify::Result<Event>,
) {
    match res {
        Ok(event) => {
            if event.need_rescan() {
                overflowed.store(true, Ordering::Release);
            }
            for path in event.paths {
                match tx.try_send(path) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => overflowed.store(true, Ordering::Release),
                    Err(TrySendError::Disconnected(_)) => return,
                }
            }
        }
        Err(err) => {
            warn!("Filesystem watcher error: {}", err);
            overflowed.store(true, Ordering::Release);
        }
    }
    waiter.notify();
}

impl NotifyBackend {
    pub(crate) fn start(root: &Path, waiter: Waiter) -> Result<Self, WatchError> {
        let meta = std::fs::metadata(root).map_err(|source| WatchError::Root {
            path: root.to_path_buf(),
            source,
        })?;

        let (tx, rx) = crossbeam_channel::bounded(RAW_QUEUE_CAPACITY);
        let overflowed = Arc::new(AtomicBool::new(false));

        let flag = overflowed.clone();
        let handler = move |res: notify::Result<Event>| forward(&tx, &flag, &waiter, res);
        let mut watcher = notify::recommended_watcher(handler)
            .map_err(|source| WatchError::Backend {
                path: root.to_path_buf(),
                source,
            })?;
        watcher
            .watch(root, RecursiveMode::Recursive)
            .map_err(|source| WatchError::Backend {
                path: root.to_path_buf(),
                source,
            })?;

        Ok(Self {
            _watcher: watcher,
            rx,
            overflowed,
            fingerprint: volume_id(root, &meta).map(|dev| dev.wrapping_add(1)),
        })
    }

    /// Device id + 1 of the watched volume
    pub(crate) fn fingerprint(&self) -> Option<u64> {
        self.fingerprint
    }

    /// Raw paths received so far, and whether any were lost
    pub(crate) fn drain(&self) -> (Vec<PathBuf>, bool) {
        let paths = self.rx.try_iter().collect();
        let overflowed = self.overflowed.swap(false, Ordering::AcqRel);
        (paths, overflowed)
    }
}
