//! Persistent local node cache
//!
//! This crate provides:
//! - `NodeCache`, a sled table of serialized nodes keyed by node id
//! - `CachedNode`, the persisted record of one local file or folder
//! - `CachedTree`, the in-memory tree over the cache that answers the
//!   watcher's self-notification lookups

pub mod cache;
pub mod node;
pub mod tree;

// Re-exports
pub use cache::NodeCache;
pub use node::CachedNode;
pub use tree::{CachedTree, Change, Refresh};

/// Result type for node cache operations
pub type Result<T> = anyhow::Result<T>;
