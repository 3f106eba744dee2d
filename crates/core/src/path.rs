//! Separator-aware local path values
//!
//! A `LocalPath` holds path bytes in the platform's native encoding, which is
//! not assumed to be UTF-8. The separator may be several bytes long (one
//! UTF-16 code unit on Windows), so every search only accepts hits at offsets
//! that are a multiple of the separator length.

use crate::fs::FileSystemAccess;
use smallvec::SmallVec;
use std::ops::{Deref, DerefMut};

/// Path bytes in native local encoding
///
/// Uses SmallVec so that typical short paths avoid a heap allocation.
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LocalPath {
    bytes: SmallVec<[u8; 64]>,
}

impl LocalPath {
    /// Create an empty path
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap bytes that are already in local encoding
    pub fn from_local_bytes(bytes: impl AsRef<[u8]>) -> Self {
        Self {
            bytes: SmallVec::from_slice(bytes.as_ref()),
        }
    }

    /// Convert a presentation path (separators included) to local encoding
    pub fn from_path(path: &str, fs: &dyn FileSystemAccess) -> Self {
        Self::from_local_bytes(fs.path2local(path))
    }

    /// Convert a single presentation name, escaping incompatible characters
    pub fn from_name(name: &str, fs: &dyn FileSystemAccess) -> Self {
        fs.name2local(name)
    }

    /// A fresh name for a temporary file
    pub fn tmp_name_local(fs: &dyn FileSystemAccess) -> Self {
        fs.tmp_name_local()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Shorten the path to `len` bytes
    pub fn truncate(&mut self, len: usize) {
        self.bytes.truncate(len);
    }

    /// Borrow the path mutably; its length is restored when the guard drops
    pub fn scoped(&mut self) -> ScopedLengthRestore<'_> {
        let length = self.len();
        ScopedLengthRestore { path: self, length }
    }

    /// Concatenate without inserting a separator
    pub fn append(&mut self, other: &LocalPath) {
        self.bytes.extend_from_slice(&other.bytes);
    }

    /// Concatenate with a separator in between
    ///
    /// The separator is only inserted when `separator_always` is set or this
    /// path is non-empty, so appending to an empty path yields a relative path.
    pub fn separator_append(
        &mut self,
        other: &LocalPath,
        fs: &dyn FileSystemAccess,
        separator_always: bool,
    ) {
        if separator_always || !self.is_empty() {
            self.bytes.extend_from_slice(fs.local_separator());
        }
        self.bytes.extend_from_slice(&other.bytes);
    }

    /// Append `other` beneath this path
    ///
    /// Like `separator_append(other, fs, false)`, but a path that already
    /// ends with a separator (a filesystem root) does not get a second one.
    pub fn child_append(&mut self, other: &LocalPath, fs: &dyn FileSystemAccess) {
        if self.ends_with_separator(fs) {
            self.append(other);
        } else {
            self.separator_append(other, fs, false);
        }
    }

    /// Turn `self` into `other` + separator + `self`
    pub fn separator_prepend(&mut self, other: &LocalPath, fs: &dyn FileSystemAccess) {
        let sep = fs.local_separator();
        let mut joined = SmallVec::with_capacity(other.len() + sep.len() + self.len());
        joined.extend_from_slice(&other.bytes);
        joined.extend_from_slice(sep);
        joined.extend_from_slice(&self.bytes);
        self.bytes = joined;
    }

    /// Remove one trailing separator, if it sits at an aligned offset
    pub fn trim_trailing_separator(&mut self, fs: &dyn FileSystemAccess) {
        let sep = fs.local_separator();
        let n = sep.len();
        let aligned = self.len() - self.len() % n;
        if aligned >= n && &self.bytes[aligned - n..aligned] == sep {
            self.bytes.truncate(aligned - n);
        }
    }

    /// First aligned separator at or after `from`
    pub fn find_next_separator(&self, from: usize, fs: &dyn FileSystemAccess) -> Option<usize> {
        let sep = fs.local_separator();
        let n = sep.len();
        if self.len() < n {
            return None;
        }
        (from..=self.len() - n).find(|&i| i % n == 0 && &self.bytes[i..i + n] == sep)
    }

    /// Last aligned separator starting at or before `from`
    pub fn find_prev_separator(&self, from: usize, fs: &dyn FileSystemAccess) -> Option<usize> {
        let sep = fs.local_separator();
        let n = sep.len();
        if self.len() < n {
            return None;
        }
        let start = from.min(self.len() - n);
        (0..=start)
            .rev()
            .find(|&i| i % n == 0 && &self.bytes[i..i + n] == sep)
    }

    /// Byte index where the last path component starts
    ///
    /// A trailing separator yields `len()`, a path without separators yields 0.
    pub fn leaf_name_byte_index(&self, fs: &dyn FileSystemAccess) -> usize {
        let sep = fs.local_separator();
        let n = sep.len();
        let mut p = self.len() - self.len() % n;
        while p >= n {
            p -= n;
            if &self.bytes[p..p + n] == sep {
                return p + n;
            }
        }
        0
    }

    /// Whether the tail starting at `pos` is exactly `other`
    pub fn back_equal(&self, pos: usize, other: &LocalPath) -> bool {
        pos + other.len() == self.len() && self.bytes[pos..] == other.bytes[..]
    }

    /// The path from byte `pos` to the end
    pub fn subpath_from(&self, pos: usize) -> LocalPath {
        Self::from_local_bytes(&self.bytes[pos.min(self.len())..])
    }

    /// The first `pos` bytes of the path
    pub fn substr_to(&self, pos: usize) -> LocalPath {
        Self::from_local_bytes(&self.bytes[..pos.min(self.len())])
    }

    /// Presentation form, without unescaping
    pub fn to_path(&self, fs: &dyn FileSystemAccess) -> String {
        fs.local2path(&self.bytes)
    }

    /// Presentation name, with escapes decoded
    pub fn to_name(&self, fs: &dyn FileSystemAccess) -> String {
        fs.local2name(self)
    }

    /// Whether `child` is this path or lies beneath it
    ///
    /// A match must end on a component boundary: `/a/b` contains `/a/b/c`
    /// but not `/a/bc`.
    pub fn is_containing_path_of(&self, child: &LocalPath, fs: &dyn FileSystemAccess) -> bool {
        child.len() >= self.len()
            && child.bytes.starts_with(&self.bytes)
            && (child.len() == self.len()
                || child.bytes[self.len()..].starts_with(fs.local_separator()))
    }

    /// Whether the path ends with a separator at an aligned offset
    pub fn ends_with_separator(&self, fs: &dyn FileSystemAccess) -> bool {
        let sep = fs.local_separator();
        self.len() >= sep.len() && self.len() % sep.len() == 0 && self.bytes.ends_with(sep)
    }

    /// The part of `self` beneath `base`, empty when both are equal
    ///
    /// `base` may end with a separator, as a filesystem root does.
    pub fn relative_to(&self, base: &LocalPath, fs: &dyn FileSystemAccess) -> Option<LocalPath> {
        if self == base {
            return Some(LocalPath::new());
        }
        if base.ends_with_separator(fs) {
            return self.bytes.starts_with(&base.bytes).then(|| self.subpath_from(base.len()));
        }
        if !base.is_containing_path_of(self, fs) {
            return None;
        }
        Some(self.subpath_from(base.len() + fs.local_separator().len()))
    }
}

impl std::fmt::Debug for LocalPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "LocalPath({:?})", String::from_utf8_lossy(&self.bytes))
    }
}

/// Guard returned by [`LocalPath::scoped`]
pub struct ScopedLengthRestore<'a> {
    path: &'a mut LocalPath,
    length: usize,
}

impl Deref for ScopedLengthRestore<'_> {
    type Target = LocalPath;

    fn deref(&self) -> &LocalPath {
        self.path
    }
}

impl DerefMut for ScopedLengthRestore<'_> {
    fn deref_mut(&mut self) -> &mut LocalPath {
        self.path
    }
}

impl Drop for ScopedLengthRestore<'_> {
    fn drop(&mut self) {
        self.path.truncate(self.length);
    }
}
