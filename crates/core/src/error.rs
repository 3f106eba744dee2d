//! Error types for local filesystem access

use std::io;
use thiserror::Error;

/// Result type used throughout localfs-core
pub type Result<T> = std::result::Result<T, FsError>;

/// Failure of a filesystem primitive
///
/// Every variant is either transient (the caller may resubmit later) or
/// permanent; see [`FsError::is_retryable`].
#[derive(Debug, Error)]
pub enum FsError {
    /// Temporary condition such as a sharing violation
    #[error("Transient I/O failure on {path}: {source}")]
    Transient {
        path: String,
        #[source]
        source: io::Error,
    },

    /// Permanent I/O failure (not found, permission denied, ...)
    #[error("I/O failure on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    /// The file changed on disk between the logical open and the real open
    #[error("{path} changed since it was opened")]
    Stale { path: String },

    /// A read or write was attempted without an open handle
    #[error("File is not open")]
    NotOpen,

    /// Fewer bytes were available than requested
    #[error("Short read: expected {expected} bytes, got {got}")]
    ShortRead { expected: usize, got: usize },
}

impl FsError {
    /// Classify an I/O error raised while touching `path`
    pub fn from_io(path: impl Into<String>, source: io::Error) -> Self {
        let path = path.into();
        if is_transient(&source) {
            FsError::Transient { path, source }
        } else {
            FsError::Io { path, source }
        }
    }

    /// Whether the caller may resubmit the operation later
    pub fn is_retryable(&self) -> bool {
        matches!(self, FsError::Transient { .. })
    }
}

pub(crate) fn is_transient(err: &io::Error) -> bool {
    if matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted | io::ErrorKind::TimedOut
    ) {
        return true;
    }

    // ERROR_SHARING_VIOLATION / ERROR_LOCK_VIOLATION
    #[cfg(windows)]
    if matches!(err.raw_os_error(), Some(32) | Some(33)) {
        return true;
    }

    false
}
