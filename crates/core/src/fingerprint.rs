//! BLAKE3 content fingerprints of local files

use crate::error::Result;
use crate::file::FileAccess;
use serde::{Deserialize, Serialize};

const CHUNK_SIZE: usize = 64 * 1024;

/// A BLAKE3 hash (32 bytes)
#[derive(Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct Blake3Hash([u8; 32]);

impl Blake3Hash {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex form
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl std::fmt::Debug for Blake3Hash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Blake3Hash({})", self.to_hex())
    }
}

impl std::fmt::Display for Blake3Hash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Hash bytes using BLAKE3
pub fn hash_bytes(data: &[u8]) -> Blake3Hash {
    Blake3Hash::from_bytes(*blake3::hash(data).as_bytes())
}

/// Incremental hasher for building hashes across multiple chunks
pub struct IncrementalHasher {
    inner: blake3::Hasher,
}

impl IncrementalHasher {
    pub fn new() -> Self {
        Self {
            inner: blake3::Hasher::new(),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    pub fn finalize(self) -> Blake3Hash {
        Blake3Hash::from_bytes(*self.inner.finalize().as_bytes())
    }
}

impl Default for IncrementalHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Identity of a file version: size, mtime and content hash
///
/// Two fingerprints are equal only if all three components match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileFingerprint {
    pub size: u64,
    pub mtime: i64,
    pub content: Blake3Hash,
}

impl FileFingerprint {
    /// Fingerprint the file `fa` was opened on with `fopen`
    ///
    /// The content is read through one `openf` session, so a file modified
    /// since `fopen` fails as stale instead of producing a mixed hash.
    pub fn generate(fa: &mut FileAccess) -> Result<Self> {
        fa.openf()?;
        let result = Self::hash_open(fa);
        fa.closef();
        result
    }

    fn hash_open(fa: &mut FileAccess) -> Result<Self> {
        let size = fa.size();
        let mut hasher = IncrementalHasher::new();
        let mut buffer = vec![0u8; CHUNK_SIZE];

        let mut pos = 0u64;
        while pos < size {
            let n = ((size - pos) as usize).min(CHUNK_SIZE);
            fa.frawread(&mut buffer[..n], pos, true)?;
            hasher.update(&buffer[..n]);
            pos += n as u64;
        }

        Ok(Self {
            size,
            mtime: fa.mtime(),
            content: hasher.finalize(),
        })
    }
}
