//! Node cache table using sled

use crate::CachedNode;
use anyhow::{Context, Result};
use sled::{Db, Tree};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};

/// Key/value table of serialized nodes keyed by node id
pub struct NodeCache {
    /// Sled database
    db: Db,
    /// Node table
    nodes: Tree,
    /// Next unused node id
    next_id: AtomicU32,
}

fn key(id: u32) -> [u8; 4] {
    // Big-endian so iteration follows id order
    id.to_be_bytes()
}

fn id_from_key(key: &[u8]) -> Result<u32> {
    let bytes: [u8; 4] = key.try_into().context("Malformed node cache key")?;
    Ok(u32::from_be_bytes(bytes))
}

impl NodeCache {
    /// Open or create the cache in directory `path`
    pub fn open(path: &Path) -> Result<Self> {
        let db = sled::open(path.join("nodecache.db"))
            .with_context(|| format!("Failed to open node cache in {}", path.display()))?;
        let nodes = db.open_tree("localnodes")?;

        let next_id = match nodes.last()? {
            Some((k, _)) => id_from_key(&k)? + 1,
            None => 0,
        };

        Ok(Self {
            db,
            nodes,
            next_id: AtomicU32::new(next_id),
        })
    }

    /// Allocate a fresh node id
    pub fn next_id(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn put(&self, id: u32, value: &[u8]) -> Result<()> {
        self.nodes.insert(key(id), value)?;
        self.next_id.fetch_max(id + 1, Ordering::SeqCst);
        Ok(())
    }

    pub fn get(&self, id: u32) -> Result<Option<Vec<u8>>> {
        Ok(self.nodes.get(key(id))?.map(|v| v.to_vec()))
    }

    pub fn del(&self, id: u32) -> Result<()> {
        self.nodes.remove(key(id))?;
        Ok(())
    }

    /// All records in id order
    pub fn iter(&self) -> impl Iterator<Item = Result<(u32, Vec<u8>)>> + '_ {
        self.nodes.iter().map(|item| {
            let (k, v) = item?;
            Ok((id_from_key(&k)?, v.to_vec()))
        })
    }

    /// Remove every record and restart id allocation
    pub fn truncate(&self) -> Result<()> {
        self.nodes.clear()?;
        self.next_id.store(0, Ordering::SeqCst);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Flush to ensure durability
    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    pub fn put_node(&self, node: &CachedNode) -> Result<()> {
        self.put(node.id, &node.serialize()?)
    }

    pub fn get_node(&self, id: u32) -> Result<Option<CachedNode>> {
        match self.get(id)? {
            Some(bytes) => Ok(Some(CachedNode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// All nodes in id order
    pub fn nodes(&self) -> Result<Vec<CachedNode>> {
        self.iter()
            .map(|item| {
                let (_, bytes) = item?;
                CachedNode::deserialize(&bytes)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use localfs_core::NodeType;
    use tempfile::TempDir;

    fn node(id: u32, parent: Option<u32>, name: &str) -> CachedNode {
        CachedNode {
            id,
            parent,
            name: name.to_string(),
            node_type: NodeType::File,
            fsid: Some(1000 + id as u64),
            mtime: 1_700_000_000,
            size: 42,
            fingerprint: None,
            synced: true,
        }
    }

    #[test]
    fn test_put_get_del() -> Result<()> {
        let dir = TempDir::new()?;
        let cache = NodeCache::open(dir.path())?;

        cache.put(3, b"three")?;
        assert_eq!(cache.get(3)?, Some(b"three".to_vec()));
        assert_eq!(cache.get(4)?, None);

        cache.del(3)?;
        assert_eq!(cache.get(3)?, None);
        assert!(cache.is_empty());
        Ok(())
    }

    #[test]
    fn test_iter_in_id_order() -> Result<()> {
        let dir = TempDir::new()?;
        let cache = NodeCache::open(dir.path())?;

        for id in [300u32, 2, 70_000, 1] {
            cache.put(id, &id.to_le_bytes())?;
        }
        let ids: Vec<u32> = cache.iter().map(|r| r.map(|(id, _)| id)).collect::<Result<_>>()?;
        assert_eq!(ids, vec![1, 2, 300, 70_000]);
        Ok(())
    }

    #[test]
    fn test_next_id_survives_reopen() -> Result<()> {
        let dir = TempDir::new()?;
        {
            let cache = NodeCache::open(dir.path())?;
            assert_eq!(cache.next_id(), 0);
            cache.put_node(&node(0, None, ""))?;
            cache.put_node(&node(7, Some(0), "a"))?;
            assert_eq!(cache.next_id(), 8);
            cache.flush()?;
        }

        let cache = NodeCache::open(dir.path())?;
        assert_eq!(cache.next_id(), 8);
        assert_eq!(cache.get_node(7)?, Some(node(7, Some(0), "a")));
        assert_eq!(cache.nodes()?.len(), 2);
        Ok(())
    }

    #[test]
    fn test_truncate() -> Result<()> {
        let dir = TempDir::new()?;
        let cache = NodeCache::open(dir.path())?;
        cache.put_node(&node(5, None, ""))?;

        cache.truncate()?;
        assert!(cache.is_empty());
        assert_eq!(cache.next_id(), 0);
        Ok(())
    }

    #[test]
    fn test_corrupt_record_is_an_error() -> Result<()> {
        let dir = TempDir::new()?;
        let cache = NodeCache::open(dir.path())?;
        cache.put(1, &[0xff])?;
        assert!(cache.get_node(1).is_err());
        Ok(())
    }
}
