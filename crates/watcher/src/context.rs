//! The engine state a watcher consults to recognise its own writes

use localfs_core::{FileFingerprint, FileStat, LocalPath, NodeType};
use serde::{Deserialize, Serialize};

/// Identifier of a tracked local node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LocalNodeId(pub u32);

/// What the engine knows about the remote counterpart of a local node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteNodeView {
    /// Local node the remote node currently points back to
    pub local_node: Option<LocalNodeId>,
    /// Name attribute of the remote node
    pub name: Option<String>,
    pub fingerprint: Option<FileFingerprint>,
}

/// What the engine last recorded for a local node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalNodeView {
    pub id: LocalNodeId,
    pub node_type: NodeType,
    pub name: String,
    pub fsid: Option<u64>,
    pub mtime: i64,
    pub size: u64,
    pub fingerprint: Option<FileFingerprint>,
    pub remote: Option<RemoteNodeView>,
}

impl LocalNodeView {
    /// Whether a fresh stat agrees with the recorded type, fsid and (for files) mtime and size
    pub fn matches_stat(&self, stat: &FileStat) -> bool {
        stat.fsid.is_some()
            && stat.fsid == self.fsid
            && stat.node_type == self.node_type
            && (self.node_type != NodeType::File
                || (stat.mtime == self.mtime && stat.size == self.size))
    }
}

/// Engine-side lookups used during self-notification checks
pub trait SyncContext: Send + Sync {
    /// True until the initial subtree scan has completed
    fn is_initializing(&self) -> bool;

    /// Full local path of `node`
    fn local_path(&self, node: LocalNodeId) -> LocalPath;

    /// Node addressed by `path` relative to `base` (or to the sync root)
    fn local_node_by_path(
        &self,
        base: Option<LocalNodeId>,
        path: &LocalPath,
    ) -> Option<LocalNodeView>;

    /// Flag that filesystem activity happened since the last sync pass
    fn record_activity(&self);
}
