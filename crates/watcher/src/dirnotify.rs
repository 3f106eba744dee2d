//! Per-subtree notification queues
//!
//! Raw change events enter through [`DirNotify::notify`], either from the
//! native backend (see [`DirNotify::pump`]) or from the engine itself. Two
//! filters run before an event is queued: a repeat of the queue's tail entry
//! only refreshes that entry's timestamp, and a `DirEvents` event whose
//! on-disk state still matches what the engine last recorded is dropped as a
//! self notification.

use crate::context::{LocalNodeId, LocalNodeView, SyncContext};
use crate::platform::NotifyBackend;
use crate::WatchError;
use localfs_core::platform::{local_to_os, os_to_local};
use localfs_core::{Ds, FileAccess, FileStat, FileSystemAccess, LocalPath, NodeType, Waiter};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Notification queues of a watched subtree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotifyQueue {
    /// Changes reported by the filesystem
    DirEvents,
    /// Entries the engine re-queues after a transient failure
    Retry,
    /// Changes the engine injects itself
    Extra,
}

impl NotifyQueue {
    pub const ALL: [NotifyQueue; 3] =
        [NotifyQueue::DirEvents, NotifyQueue::Retry, NotifyQueue::Extra];

    fn index(self) -> usize {
        match self {
            NotifyQueue::DirEvents => 0,
            NotifyQueue::Retry => 1,
            NotifyQueue::Extra => 2,
        }
    }

    fn merges_repeats(self) -> bool {
        matches!(self, NotifyQueue::DirEvents | NotifyQueue::Extra)
    }
}

/// A queued change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Debounce tick of the event, 0 for "process immediately"
    pub timestamp: Ds,
    /// Node the path is relative to
    pub local_node: Option<LocalNodeId>,
    pub path: LocalPath,
}

/// Watcher of one synced subtree
pub struct DirNotify {
    fs: Arc<dyn FileSystemAccess>,
    waiter: Waiter,
    base: LocalPath,
    ignore: LocalPath,
    queues: [VecDeque<Notification>; 3],
    failed: bool,
    fail_reason: String,
    rescan: bool,
    ctx: Option<Arc<dyn SyncContext>>,
    backend: Option<NotifyBackend>,
    fingerprint: Option<u64>,
}

impl DirNotify {
    /// Watcher for `base`, ignoring events under `ignore` (relative to `base`)
    ///
    /// Starts FAILED until [`DirNotify::start`] succeeds.
    pub fn new(
        fs: Arc<dyn FileSystemAccess>,
        waiter: Waiter,
        base: LocalPath,
        ignore: LocalPath,
    ) -> Self {
        let mut base = base;
        if base.len() > fs.local_separator().len() {
            base.trim_trailing_separator(fs.as_ref());
        }

        Self {
            fs,
            waiter,
            base,
            ignore,
            queues: Default::default(),
            failed: true,
            fail_reason: "Not initialized".to_string(),
            rescan: false,
            ctx: None,
            backend: None,
            fingerprint: None,
        }
    }

    /// Attach the engine context used for self-notification checks
    pub fn attach(&mut self, ctx: Arc<dyn SyncContext>) {
        self.ctx = Some(ctx);
    }

    pub fn base(&self) -> &LocalPath {
        &self.base
    }

    /// Queue a change of `path` relative to `node`
    pub fn notify(
        &mut self,
        q: NotifyQueue,
        node: Option<LocalNodeId>,
        path: LocalPath,
        immediate: bool,
    ) {
        let timestamp = if immediate { 0 } else { self.waiter.ds() };
        let queue = &mut self.queues[q.index()];

        if q.merges_repeats() {
            if let Some(tail) = queue.back_mut() {
                if tail.local_node == node && tail.path == path {
                    if tail.timestamp != 0 {
                        tail.timestamp = timestamp;
                    }
                    debug!("Repeated notification skipped");
                    return;
                }
            }
        }

        if !immediate && q == NotifyQueue::DirEvents {
            if let Some(ctx) = &self.ctx {
                if !ctx.is_initializing() && self.is_self_notification(ctx.as_ref(), node, &path) {
                    debug!("Self filesystem notification skipped");
                    return;
                }
            }
        }

        if q.merges_repeats() {
            if let Some(ctx) = &self.ctx {
                ctx.record_activity();
            }
        }

        self.queues[q.index()].push_back(Notification {
            timestamp,
            local_node: node,
            path,
        });
    }

    fn is_self_notification(
        &self,
        ctx: &dyn SyncContext,
        node: Option<LocalNodeId>,
        path: &LocalPath,
    ) -> bool {
        let mut full = match node {
            Some(node) => ctx.local_path(node),
            None => LocalPath::new(),
        };
        if !path.is_empty() {
            full.child_append(path, self.fs.as_ref());
        }

        let mut fa = self.fs.new_file_access(&self.waiter);
        let on_disk = fa.fopen(&full).is_ok();
        let tracked = ctx.local_node_by_path(node, path);

        matches_recorded_state(tracked.as_ref(), &fa, on_disk)
    }

    /// Entries of queue `q`, oldest first
    pub fn queue(&self, q: NotifyQueue) -> &VecDeque<Notification> {
        &self.queues[q.index()]
    }

    /// Remove and return the oldest entry of queue `q`
    pub fn pop(&mut self, q: NotifyQueue) -> Option<Notification> {
        self.queues[q.index()].pop_front()
    }

    pub fn is_failed(&self) -> bool {
        self.failed
    }

    /// Why the watcher is failed, empty when it is not
    pub fn fail_reason(&self) -> &str {
        &self.fail_reason
    }

    pub fn set_failed(&mut self, reason: impl Into<String>) {
        self.failed = true;
        self.fail_reason = reason.into();
    }

    pub fn clear_failure(&mut self) {
        self.failed = false;
        self.fail_reason.clear();
    }

    /// Whether events were lost since the last call; clears the flag
    pub fn take_rescan_request(&mut self) -> bool {
        std::mem::take(&mut self.rescan)
    }

    /// Stable per-volume fingerprint, when the backend can supply one
    pub fn fs_fingerprint(&self) -> Option<u64> {
        self.fingerprint
    }

    /// Whether filesystem ids survive renames
    pub fn fs_stable_ids(&self) -> bool {
        true
    }

    /// Start the native recursive watch on the base path
    ///
    /// On failure the watcher stays FAILED with the error as reason.
    pub fn start(&mut self) -> Result<(), WatchError> {
        let root = local_to_os(&self.base);
        match NotifyBackend::start(&root, self.waiter.clone()) {
            Ok(backend) => {
                info!(root = %root.display(), "Filesystem watcher started");
                self.fingerprint = backend.fingerprint();
                self.backend = Some(backend);
                self.clear_failure();
                Ok(())
            }
            Err(err) => {
                warn!(root = %root.display(), "Filesystem watcher unavailable: {}", err);
                self.set_failed(err.to_string());
                Err(err)
            }
        }
    }

    /// Feed raw backend events into the `DirEvents` queue relative to `root`
    ///
    /// Returns the number of events passed to `notify`.
    pub fn pump(&mut self, root: Option<LocalNodeId>) -> usize {
        let Some(backend) = &self.backend else {
            return 0;
        };
        let (paths, overflowed) = backend.drain();

        if overflowed {
            warn!("Filesystem notifications were lost, full rescan needed");
            self.rescan = true;
        }

        let mut fed = 0;
        for path in paths {
            let Some(relative) = self.relative(&os_to_local(&path)) else {
                continue;
            };
            if self.is_ignored(&relative) {
                continue;
            }
            self.notify(NotifyQueue::DirEvents, root, relative, false);
            fed += 1;
        }
        fed
    }

    fn relative(&self, local: &LocalPath) -> Option<LocalPath> {
        local.relative_to(&self.base, self.fs.as_ref())
    }

    fn is_ignored(&self, relative: &LocalPath) -> bool {
        !self.ignore.is_empty() && self.ignore.is_containing_path_of(relative, self.fs.as_ref())
    }
}

/// The self-notification predicate
///
/// An event is self-caused when the addressed node is untracked and
/// definitively gone from disk, or when it is tracked, present, still paired
/// with a remote node pointing back at it under the same name, and the disk
/// agrees with the recorded fsid, type and (for files) fingerprint, mtime
/// and size.
fn matches_recorded_state(tracked: Option<&LocalNodeView>, fa: &FileAccess, on_disk: bool) -> bool {
    let Some(node) = tracked else {
        return !on_disk && !fa.retry();
    };
    if !on_disk {
        return false;
    }
    let Some(remote) = &node.remote else {
        return false;
    };

    let is_file = node.node_type == NodeType::File;
    let stat = FileStat {
        mtime: fa.mtime(),
        size: fa.size(),
        node_type: fa.node_type(),
        fsid: fa.fsid(),
    };

    remote.local_node == Some(node.id)
        && (!is_file || (node.fingerprint.is_some() && node.fingerprint == remote.fingerprint))
        && remote.name.as_deref() == Some(node.name.as_str())
        && node.matches_stat(&stat)
}

impl std::fmt::Debug for DirNotify {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirNotify")
            .field("base", &self.base)
            .field("failed", &self.failed)
            .field("fail_reason", &self.fail_reason)
            .field("queued", &self.queues.iter().map(VecDeque::len).collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use localfs_core::NativeFileSystemAccess;
    use std::thread;
    use std::time::Duration;

    fn dirnotify() -> DirNotify {
        let fs: Arc<dyn FileSystemAccess> = Arc::new(NativeFileSystemAccess::without_async());
        let base = LocalPath::from_path("/sync/root", fs.as_ref());
        let ignore = LocalPath::from_path(".debris", fs.as_ref());
        DirNotify::new(fs, Waiter::new(), base, ignore)
    }

    fn lp(s: &str) -> LocalPath {
        LocalPath::from_path(s, &NativeFileSystemAccess::without_async())
    }

    #[test]
    fn test_starts_failed() {
        let dn = dirnotify();
        assert!(dn.is_failed());
        assert_eq!(dn.fail_reason(), "Not initialized");
        assert_eq!(dn.fs_fingerprint(), None);
        assert!(dn.fs_stable_ids());
    }

    #[test]
    fn test_failure_state_transitions() {
        let mut dn = dirnotify();
        dn.clear_failure();
        assert!(!dn.is_failed());
        assert_eq!(dn.fail_reason(), "");
        dn.set_failed("inotify limit reached");
        assert!(dn.is_failed());
        assert_eq!(dn.fail_reason(), "inotify limit reached");
    }

    #[test]
    fn test_repeat_refreshes_tail_timestamp() {
        let mut dn = dirnotify();
        let node = Some(LocalNodeId(1));

        dn.notify(NotifyQueue::DirEvents, node, lp("a/b"), false);
        let first = dn.queue(NotifyQueue::DirEvents)[0].timestamp;
        assert!(first > 0);

        thread::sleep(Duration::from_millis(250));
        dn.notify(NotifyQueue::DirEvents, node, lp("a/b"), false);

        let queue = dn.queue(NotifyQueue::DirEvents);
        assert_eq!(queue.len(), 1);
        assert!(queue[0].timestamp > first);
    }

    #[test]
    fn test_immediate_overrides_and_sticks() {
        let mut dn = dirnotify();
        dn.notify(NotifyQueue::Extra, None, lp("x"), false);
        dn.notify(NotifyQueue::Extra, None, lp("x"), true);
        assert_eq!(dn.queue(NotifyQueue::Extra).len(), 1);
        assert_eq!(dn.queue(NotifyQueue::Extra)[0].timestamp, 0);

        // A later non-immediate repeat does not delay it again
        dn.notify(NotifyQueue::Extra, None, lp("x"), false);
        assert_eq!(dn.queue(NotifyQueue::Extra)[0].timestamp, 0);
    }

    #[test]
    fn test_only_tail_entry_merges() {
        let mut dn = dirnotify();
        dn.notify(NotifyQueue::DirEvents, None, lp("a"), false);
        dn.notify(NotifyQueue::DirEvents, None, lp("b"), false);
        dn.notify(NotifyQueue::DirEvents, None, lp("a"), false);
        // Different node, same path
        dn.notify(NotifyQueue::DirEvents, Some(LocalNodeId(7)), lp("a"), false);

        let paths: Vec<_> = dn
            .queue(NotifyQueue::DirEvents)
            .iter()
            .map(|n| (n.local_node, n.path.clone()))
            .collect();
        assert_eq!(
            paths,
            vec![
                (None, lp("a")),
                (None, lp("b")),
                (None, lp("a")),
                (Some(LocalNodeId(7)), lp("a")),
            ]
        );
    }

    #[test]
    fn test_retry_queue_keeps_repeats() {
        let mut dn = dirnotify();
        dn.notify(NotifyQueue::Retry, None, lp("a"), false);
        dn.notify(NotifyQueue::Retry, None, lp("a"), false);
        assert_eq!(dn.queue(NotifyQueue::Retry).len(), 2);
        assert!(dn.queue(NotifyQueue::DirEvents).is_empty());
    }

    #[test]
    fn test_pop_is_fifo() {
        let mut dn = dirnotify();
        dn.notify(NotifyQueue::DirEvents, None, lp("1"), true);
        dn.notify(NotifyQueue::DirEvents, None, lp("2"), true);
        assert_eq!(dn.pop(NotifyQueue::DirEvents).unwrap().path, lp("1"));
        assert_eq!(dn.pop(NotifyQueue::DirEvents).unwrap().path, lp("2"));
        assert!(dn.pop(NotifyQueue::DirEvents).is_none());
    }

    #[test]
    fn test_relative_and_ignore() {
        let dn = dirnotify();
        assert_eq!(dn.relative(&lp("/sync/root")), Some(LocalPath::new()));
        assert_eq!(dn.relative(&lp("/sync/root/a/b.txt")), Some(lp("a/b.txt")));
        assert_eq!(dn.relative(&lp("/sync/rootish/a")), None);
        assert_eq!(dn.relative(&lp("/elsewhere")), None);

        assert!(dn.is_ignored(&lp(".debris")));
        assert!(dn.is_ignored(&lp(".debris/2024/x")));
        assert!(!dn.is_ignored(&lp(".debrisx")));
        assert!(!dn.is_ignored(&lp("docs/.debris")));
    }

    #[test]
    fn test_trailing_separator_trimmed_from_base() {
        let fs: Arc<dyn FileSystemAccess> = Arc::new(NativeFileSystemAccess::without_async());
        let dn = DirNotify::new(fs, Waiter::new(), lp("/sync/root/"), LocalPath::new());
        assert_eq!(dn.base(), &lp("/sync/root"));
        assert_eq!(dn.relative(&lp("/sync/root/f")), Some(lp("f")));
        assert!(!dn.is_ignored(&lp("f")));
    }

    #[test]
    fn test_filesystem_root_base() {
        let fs: Arc<dyn FileSystemAccess> = Arc::new(NativeFileSystemAccess::without_async());
        let dn = DirNotify::new(fs, Waiter::new(), lp("/"), LocalPath::new());
        assert_eq!(dn.base(), &lp("/"));
        assert_eq!(dn.relative(&lp("/etc/x")), Some(lp("etc/x")));
        assert_eq!(dn.relative(&lp("/")), Some(LocalPath::new()));
    }

    #[test]
    fn test_pump_without_backend() {
        let mut dn = dirnotify();
        assert_eq!(dn.pump(None), 0);
        assert!(!dn.take_rescan_request());
    }
}
