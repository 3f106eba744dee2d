//! In-memory local tree backed by the node cache
//!
//! Node 0 is the sync root. Every other node knows its parent, so relative
//! paths are rebuilt from the parent chain when the cache is loaded. Nodes
//! marked synced act as their own remote mirror for self-notification checks.

use crate::{CachedNode, NodeCache};
use ahash::{AHashMap, AHashSet};
use anyhow::{Context, Result};
use localfs_core::platform::{local_to_os, os_to_local};
use localfs_core::{FileFingerprint, FileSystemAccess, FsError, LocalPath, NodeType, Waiter};
use localfs_watcher::{LocalNodeId, LocalNodeView, RemoteNodeView, SyncContext};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

const ROOT_ID: u32 = 0;

/// Effect of [`CachedTree::refresh`] on one path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    Added,
    Modified,
    Removed,
    Unchanged,
}

/// Result of [`CachedTree::refresh_all`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Refresh {
    /// Effect on the refreshed path itself
    pub change: Change,
    /// Tracked children of a refreshed folder that were gone from disk
    pub removed: Vec<LocalPath>,
}

/// On-disk state of one entry
struct Observed {
    node_type: NodeType,
    fsid: Option<u64>,
    mtime: i64,
    size: u64,
    fingerprint: Option<FileFingerprint>,
}

#[derive(Default)]
struct TreeState {
    nodes: AHashMap<u32, CachedNode>,
    /// Relative local path of every node (empty for the root)
    paths: AHashMap<u32, LocalPath>,
    by_path: AHashMap<LocalPath, u32>,
    children: AHashMap<u32, AHashSet<u32>>,
}

impl TreeState {
    fn insert(&mut self, node: CachedNode, path: LocalPath) {
        self.by_path.insert(path.clone(), node.id);
        self.paths.insert(node.id, path);
        if let Some(parent) = node.parent {
            self.children.entry(parent).or_default().insert(node.id);
        }
        self.nodes.insert(node.id, node);
    }

    /// Remove `id` and its descendants, returning the removed ids
    fn remove_subtree(&mut self, id: u32) -> Vec<u32> {
        let mut removed = Vec::new();
        let mut pending = vec![id];
        while let Some(next) = pending.pop() {
            if let Some(kids) = self.children.remove(&next) {
                pending.extend(kids);
            }
            if let Some(path) = self.paths.remove(&next) {
                self.by_path.remove(&path);
            }
            if let Some(parent) = self.nodes.remove(&next).and_then(|node| node.parent) {
                if let Some(siblings) = self.children.get_mut(&parent) {
                    siblings.remove(&next);
                }
            }
            removed.push(next);
        }
        removed
    }

    /// Ids of the direct children of `id`
    fn children_of(&self, id: u32) -> Vec<u32> {
        self.children
            .get(&id)
            .map(|kids| kids.iter().copied().collect())
            .unwrap_or_default()
    }
}

/// Local tree of one sync root
pub struct CachedTree {
    fs: Arc<dyn FileSystemAccess>,
    root: LocalPath,
    ignore: LocalPath,
    cache: NodeCache,
    state: RwLock<TreeState>,
    initializing: AtomicBool,
    activity: AtomicBool,
}

impl CachedTree {
    /// Load the tree of `root` from `cache`
    ///
    /// An empty cache leaves the tree initializing until [`CachedTree::scan`].
    pub fn open(
        fs: Arc<dyn FileSystemAccess>,
        root: LocalPath,
        ignore: LocalPath,
        cache: NodeCache,
    ) -> Result<Self> {
        let mut state = TreeState::default();
        let mut orphans = 0;

        // Parents always have lower ids than their children
        for node in cache.nodes()? {
            let path = match node.parent {
                None if node.id == ROOT_ID => LocalPath::new(),
                None => {
                    orphans += 1;
                    continue;
                }
                Some(parent) => match state.paths.get(&parent) {
                    Some(parent_path) => {
                        let mut path = parent_path.clone();
                        path.separator_append(&fs.name2local(&node.name), fs.as_ref(), false);
                        path
                    }
                    None => {
                        orphans += 1;
                        continue;
                    }
                },
            };
            state.insert(node, path);
        }

        if orphans > 0 {
            warn!(orphans, "Dropped cached nodes without a parent");
        }

        let initializing = !state.nodes.contains_key(&ROOT_ID);
        info!(nodes = state.nodes.len(), initializing, "Loaded node cache");

        Ok(Self {
            fs,
            root,
            ignore,
            cache,
            state: RwLock::new(state),
            initializing: AtomicBool::new(initializing),
            activity: AtomicBool::new(false),
        })
    }

    /// Id of the sync root node
    pub fn root_id(&self) -> LocalNodeId {
        LocalNodeId(ROOT_ID)
    }

    pub fn root(&self) -> &LocalPath {
        &self.root
    }

    /// Number of tracked nodes, the root included
    pub fn len(&self) -> usize {
        self.state.read().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().nodes.is_empty()
    }

    /// Node tracked at relative path `path`
    pub fn node_at(&self, path: &LocalPath) -> Option<CachedNode> {
        let state = self.state.read();
        state.by_path.get(path).and_then(|id| state.nodes.get(id)).cloned()
    }

    /// Whether activity was recorded since the last call; clears the flag
    pub fn take_activity(&self) -> bool {
        self.activity.swap(false, Ordering::AcqRel)
    }

    fn full_path(&self, relative: &LocalPath) -> LocalPath {
        let mut full = self.root.clone();
        if !relative.is_empty() {
            full.child_append(relative, self.fs.as_ref());
        }
        full
    }

    fn is_ignored(&self, relative: &LocalPath) -> bool {
        !self.ignore.is_empty() && self.ignore.is_containing_path_of(relative, self.fs.as_ref())
    }

    /// Stat (and for files fingerprint) the entry at `relative`
    ///
    /// `Ok(None)` means the entry does not exist.
    fn observe(&self, relative: &LocalPath, waiter: &Waiter) -> Result<Option<Observed>> {
        let mut fa = self.fs.new_file_access(waiter);
        match fa.fopen(&self.full_path(relative)) {
            Ok(()) => {}
            Err(FsError::Io { source, .. }) if source.kind() == std::io::ErrorKind::NotFound => {
                return Ok(None)
            }
            Err(err) => return Err(err.into()),
        }

        let fingerprint = match fa.node_type() {
            NodeType::File => Some(FileFingerprint::generate(&mut fa)?),
            _ => None,
        };
        Ok(Some(Observed {
            node_type: fa.node_type(),
            fsid: fa.fsid(),
            mtime: fa.mtime(),
            size: fa.size(),
            fingerprint,
        }))
    }

    fn record(
        &self,
        state: &mut TreeState,
        relative: &LocalPath,
        parent: Option<u32>,
        observed: Observed,
    ) -> Result<Change> {
        let existing = state.by_path.get(relative).and_then(|id| state.nodes.get(id)).cloned();

        let id = match &existing {
            Some(node) => node.id,
            None if relative.is_empty() => ROOT_ID,
            None => self.cache.next_id(),
        };
        let name = if relative.is_empty() {
            String::new()
        } else {
            relative
                .subpath_from(relative.leaf_name_byte_index(self.fs.as_ref()))
                .to_name(self.fs.as_ref())
        };

        let node = CachedNode {
            id,
            parent,
            name,
            node_type: observed.node_type,
            fsid: observed.fsid,
            mtime: observed.mtime,
            size: observed.size,
            fingerprint: observed.fingerprint,
            synced: true,
        };

        let change = match existing {
            None => Change::Added,
            Some(old) if old == node => return Ok(Change::Unchanged),
            Some(_) => Change::Modified,
        };

        self.cache.put_node(&node)?;
        state.insert(node, relative.clone());
        Ok(change)
    }

    /// Walk the whole root, rebuilding the cache from disk
    ///
    /// Returns the number of tracked nodes. Ends the initializing phase.
    pub fn scan(&self, waiter: &Waiter) -> Result<usize> {
        let root_os = local_to_os(&self.root);
        let root_observed = self
            .observe(&LocalPath::new(), waiter)?
            .with_context(|| format!("Sync root {} does not exist", root_os.display()))?;

        let mut state = self.state.write();
        self.record(&mut state, &LocalPath::new(), None, root_observed)?;
        let mut seen = AHashSet::new();
        seen.insert(ROOT_ID);

        let walker = WalkDir::new(&root_os)
            .follow_links(false)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                let relative = self.relative(&os_to_local(entry.path()));
                !relative.map(|r| self.is_ignored(&r)).unwrap_or(true)
            });

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!("Skipping unreadable entry: {}", err);
                    continue;
                }
            };
            let Some(relative) = self.relative(&os_to_local(entry.path())) else {
                continue;
            };
            let Some(parent) = self.parent_id(&state, &relative) else {
                continue;
            };

            match self.observe(&relative, waiter) {
                Ok(Some(observed)) => {
                    self.record(&mut state, &relative, Some(parent), observed)?;
                    if let Some(&id) = state.by_path.get(&relative) {
                        seen.insert(id);
                    }
                }
                Ok(None) => {}
                Err(err) => debug!(path = ?relative, "Not tracking entry: {}", err),
            }
        }

        let stale: Vec<u32> = state.nodes.keys().copied().filter(|id| !seen.contains(id)).collect();
        for id in stale {
            if state.nodes.contains_key(&id) {
                for removed in state.remove_subtree(id) {
                    self.cache.del(removed)?;
                }
            }
        }

        self.cache.flush()?;
        self.initializing.store(false, Ordering::Release);
        info!(nodes = state.nodes.len(), "Scan complete");
        Ok(state.nodes.len())
    }

    /// Re-examine one relative path and update the cache
    pub fn refresh(&self, relative: &LocalPath, waiter: &Waiter) -> Result<Change> {
        Ok(self.refresh_all(relative, waiter)?.change)
    }

    /// Like [`CachedTree::refresh`], also reporting tracked children of a
    /// folder that are gone from disk
    ///
    /// A deletion inside a folder often surfaces only as a change of the
    /// folder itself, so refreshing a folder drops its vanished children.
    pub fn refresh_all(&self, relative: &LocalPath, waiter: &Waiter) -> Result<Refresh> {
        let change = self.refresh_entry(relative, waiter)?;
        let removed = match change {
            Change::Removed => Vec::new(),
            _ => self.drop_vanished_children(relative, waiter)?,
        };
        if change != Change::Unchanged || !removed.is_empty() {
            self.cache.flush()?;
        }
        Ok(Refresh { change, removed })
    }

    /// Remove tracked direct children of the folder at `relative` that no
    /// longer exist, returning their relative paths
    fn drop_vanished_children(
        &self,
        relative: &LocalPath,
        waiter: &Waiter,
    ) -> Result<Vec<LocalPath>> {
        let children: Vec<(u32, LocalPath)> = {
            let state = self.state.read();
            let Some(&id) = state.by_path.get(relative) else {
                return Ok(Vec::new());
            };
            if state.nodes.get(&id).map(|n| n.node_type) != Some(NodeType::Folder) {
                return Ok(Vec::new());
            }
            state
                .children_of(id)
                .into_iter()
                .filter_map(|child| state.paths.get(&child).map(|path| (child, path.clone())))
                .collect()
        };

        let mut vanished = Vec::new();
        for (id, path) in children {
            if !self.exists(&path, waiter)? {
                vanished.push((id, path));
            }
        }

        let mut state = self.state.write();
        let mut removed = Vec::with_capacity(vanished.len());
        for (id, path) in vanished {
            if !state.nodes.contains_key(&id) {
                continue;
            }
            for gone in state.remove_subtree(id) {
                self.cache.del(gone)?;
            }
            debug!(path = ?path, "Dropped vanished child");
            removed.push(path);
        }
        Ok(removed)
    }

    /// Whether anything exists at `relative`, without fingerprinting it
    fn exists(&self, relative: &LocalPath, waiter: &Waiter) -> Result<bool> {
        let mut fa = self.fs.new_file_access(waiter);
        match fa.fopen(&self.full_path(relative)) {
            Ok(()) => Ok(true),
            Err(FsError::Io { source, .. }) if source.kind() == std::io::ErrorKind::NotFound => {
                Ok(false)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn refresh_entry(&self, relative: &LocalPath, waiter: &Waiter) -> Result<Change> {
        if self.is_ignored(relative) {
            return Ok(Change::Unchanged);
        }

        let observed = self.observe(relative, waiter)?;
        let mut state = self.state.write();

        let change = match observed {
            None => match state.by_path.get(relative).copied() {
                Some(id) if id != ROOT_ID => {
                    for removed in state.remove_subtree(id) {
                        self.cache.del(removed)?;
                    }
                    Change::Removed
                }
                _ => Change::Unchanged,
            },
            Some(observed) => {
                let parent = if relative.is_empty() {
                    None
                } else {
                    match self.ensure_parent(&mut state, relative, waiter)? {
                        Some(parent) => Some(parent),
                        None => return Ok(Change::Unchanged),
                    }
                };
                self.record(&mut state, relative, parent, observed)?
            }
        };
        Ok(change)
    }

    /// Relative path of an absolute local path under the root
    fn relative(&self, full: &LocalPath) -> Option<LocalPath> {
        full.relative_to(&self.root, self.fs.as_ref())
    }

    fn parent_path(&self, relative: &LocalPath) -> LocalPath {
        let leaf = relative.leaf_name_byte_index(self.fs.as_ref());
        let separator = self.fs.local_separator().len();
        relative.substr_to(leaf.saturating_sub(separator))
    }

    fn parent_id(&self, state: &TreeState, relative: &LocalPath) -> Option<u32> {
        state.by_path.get(&self.parent_path(relative)).copied()
    }

    /// Parent id of `relative`, tracking missing ancestors first
    fn ensure_parent(
        &self,
        state: &mut TreeState,
        relative: &LocalPath,
        waiter: &Waiter,
    ) -> Result<Option<u32>> {
        let parent = self.parent_path(relative);
        if let Some(&id) = state.by_path.get(&parent) {
            return Ok(Some(id));
        }
        if parent.is_empty() {
            return Ok(None);
        }

        let Some(grandparent) = self.ensure_parent(state, &parent, waiter)? else {
            return Ok(None);
        };
        match self.observe(&parent, waiter)? {
            Some(observed) => {
                self.record(state, &parent, Some(grandparent), observed)?;
                Ok(state.by_path.get(&parent).copied())
            }
            None => Ok(None),
        }
    }
}

impl SyncContext for CachedTree {
    fn is_initializing(&self) -> bool {
        self.initializing.load(Ordering::Acquire)
    }

    fn local_path(&self, node: LocalNodeId) -> LocalPath {
        match self.state.read().paths.get(&node.0) {
            Some(relative) => self.full_path(relative),
            None => self.root.clone(),
        }
    }

    fn local_node_by_path(
        &self,
        base: Option<LocalNodeId>,
        path: &LocalPath,
    ) -> Option<LocalNodeView> {
        let state = self.state.read();
        let mut relative = match base {
            Some(base) => state.paths.get(&base.0)?.clone(),
            None => LocalPath::new(),
        };
        if !path.is_empty() {
            relative.separator_append(path, self.fs.as_ref(), false);
        }

        let node = state.by_path.get(&relative).and_then(|id| state.nodes.get(id))?;
        let remote = node.synced.then(|| RemoteNodeView {
            local_node: Some(LocalNodeId(node.id)),
            name: Some(node.name.clone()),
            fingerprint: node.fingerprint,
        });

        Some(LocalNodeView {
            id: LocalNodeId(node.id),
            node_type: node.node_type,
            name: node.name.clone(),
            fsid: node.fsid,
            mtime: node.mtime,
            size: node.size,
            fingerprint: node.fingerprint,
            remote,
        })
    }

    fn record_activity(&self) {
        self.activity.store(true, Ordering::Release);
    }
}
