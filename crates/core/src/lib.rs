//! localfs core - local filesystem primitives for a synchronization engine
//!
//! This crate provides:
//! - `LocalPath`, a separator-aware path value in native encoding
//! - `FileSystemAccess`, name escaping, normalization and encoding conversion
//! - `FileAccess`, deferred-open synchronous and asynchronous file I/O
//! - `AsyncIOContext`, the completion protocol joined through a shared `Waiter`
//! - File fingerprints, configuration and the native platform binding

pub mod aio;
pub mod config;
pub mod encoding;
pub mod error;
pub mod file;
pub mod fingerprint;
pub mod fs;
pub mod path;
pub mod platform;
pub mod waiter;

#[cfg(test)]
mod testing;

// Re-export main types for convenience
pub use aio::{
    Access, AsyncBackend, AsyncFailure, AsyncIOContext, AsyncJob, AsyncOp, AsyncResult, Completer,
};
pub use config::FsConfig;
pub use error::{FsError, Result};
pub use file::{FileAccess, FileStat, NodeType, SysFile, SysHandle};
pub use fingerprint::{Blake3Hash, FileFingerprint};
pub use fs::FileSystemAccess;
pub use path::LocalPath;
pub use platform::NativeFileSystemAccess;
pub use waiter::{Ds, Waiter, NEVER};
