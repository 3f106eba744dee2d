//! Persisted node records

use anyhow::Result;
use localfs_core::{FileFingerprint, NodeType};
use serde::{Deserialize, Serialize};

/// What the cache remembers about one local file or folder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedNode {
    pub id: u32,
    /// Parent folder, `None` only for the sync root
    pub parent: Option<u32>,
    /// Presentation name (unescaped)
    pub name: String,
    pub node_type: NodeType,
    pub fsid: Option<u64>,
    pub mtime: i64,
    pub size: u64,
    /// Content fingerprint, files only
    pub fingerprint: Option<FileFingerprint>,
    /// Whether the node's current state has been synced
    pub synced: bool,
}

impl CachedNode {
    pub fn serialize(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}
