//! Native binding of the filesystem traits
//!
//! Paths are UTF-8 with `/` on Unix and UTF-16LE with `\` on Windows. File
//! I/O goes through `std::fs`; async operations run on an [`IoWorkers`] pool.

#[cfg(unix)]
mod unix;
#[cfg(unix)]
pub use unix::*;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub use windows::*;

use crate::aio::{Access, AsyncBackend, IoWorkers};
use crate::config::FsConfig;
use crate::file::{FileAccess, FileStat, NodeType, SysFile, SysHandle};
use crate::fs::FileSystemAccess;
use crate::path::LocalPath;
use crate::waiter::Waiter;
use std::fs::{File, Metadata, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

/// Modification time of `meta` in whole seconds since the Unix epoch
pub fn mtime_secs(meta: &Metadata) -> i64 {
    match meta.modified() {
        Ok(time) => match time.duration_since(UNIX_EPOCH) {
            Ok(after) => after.as_secs() as i64,
            Err(before) => -(before.duration().as_secs() as i64),
        },
        Err(_) => 0,
    }
}

/// Build a `FileStat` from the `std::fs` metadata of `path`
pub fn file_stat(path: &Path, meta: &Metadata) -> FileStat {
    let node_type = if meta.is_dir() {
        NodeType::Folder
    } else if meta.is_file() {
        NodeType::File
    } else {
        NodeType::Unknown
    };

    FileStat {
        mtime: mtime_secs(meta),
        size: if meta.is_dir() { 0 } else { meta.len() },
        node_type,
        fsid: fsid(path, meta),
    }
}

/// `std::fs::File` wrapped as a positional handle
struct StdHandle {
    file: File,
}

impl SysHandle for StdHandle {
    fn read_at(&self, buf: &mut [u8], pos: u64) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match read_at(&self.file, &mut buf[filled..], pos + filled as u64) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(filled)
    }

    fn write_at(&self, data: &[u8], pos: u64) -> io::Result<()> {
        let mut written = 0;
        while written < data.len() {
            match write_at(&self.file, &data[written..], pos + written as u64) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero)),
                Ok(n) => written += n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }
}

/// OS primitives on `std::fs`
pub struct NativeSysFile {
    workers: Option<IoWorkers>,
}

impl NativeSysFile {
    /// Native primitives with an async pool of `workers` threads
    pub fn new(workers: usize) -> io::Result<Self> {
        Ok(Self {
            workers: Some(IoWorkers::new(workers)?),
        })
    }

    /// Native primitives without async support
    pub fn without_async() -> Self {
        Self { workers: None }
    }
}

impl SysFile for NativeSysFile {
    fn stat(&self, path: &LocalPath) -> io::Result<FileStat> {
        let os = local_to_os(path);
        let meta = std::fs::metadata(&os)?;
        Ok(file_stat(&os, &meta))
    }

    fn open(&self, path: &LocalPath, access: Access) -> io::Result<Arc<dyn SysHandle>> {
        let file = OpenOptions::new()
            .read(access.read || !access.write)
            .write(access.write)
            .create(access.write)
            .open(local_to_os(path))?;
        Ok(Arc::new(StdHandle { file }))
    }

    fn async_backend(&self) -> Option<&dyn AsyncBackend> {
        self.workers.as_ref().map(|w| w as &dyn AsyncBackend)
    }
}

/// The filesystem of the machine the process runs on
pub struct NativeFileSystemAccess {
    sys: Arc<NativeSysFile>,
    tmp_index: AtomicU64,
}

impl NativeFileSystemAccess {
    /// Native access with the async worker pool sized from `config`
    pub fn new(config: &FsConfig) -> io::Result<Self> {
        Ok(Self {
            sys: Arc::new(NativeSysFile::new(config.io.workers)?),
            tmp_index: AtomicU64::new(0),
        })
    }

    /// Native access whose async operations fail permanently
    pub fn without_async() -> Self {
        Self {
            sys: Arc::new(NativeSysFile::without_async()),
            tmp_index: AtomicU64::new(0),
        }
    }
}

impl FileSystemAccess for NativeFileSystemAccess {
    fn local_separator(&self) -> &[u8] {
        SEPARATOR
    }

    fn path2local(&self, path: &str) -> Vec<u8> {
        path2local(path)
    }

    fn local2path(&self, local: &[u8]) -> String {
        local2path(local)
    }

    fn tmp_name_local(&self) -> LocalPath {
        let n = self.tmp_index.fetch_add(1, Ordering::Relaxed);
        let name = format!(".getxfer.{}.{}.localfs", std::process::id(), n);
        LocalPath::from_local_bytes(path2local(&name))
    }

    fn new_file_access(&self, waiter: &Waiter) -> FileAccess {
        FileAccess::new(self.sys.clone(), waiter.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_os_path_roundtrip() {
        let dir = TempDir::new().unwrap();
        let os = dir.path().join("caf\u{e9}.txt");
        let local = os_to_local(&os);
        assert_eq!(local_to_os(&local), os);
    }

    #[test]
    fn test_tmp_names_are_unique() {
        let fs = NativeFileSystemAccess::without_async();
        let a = fs.tmp_name_local();
        let b = fs.tmp_name_local();
        assert_ne!(a, b);
        assert!(a.to_path(&fs).starts_with(".getxfer."));
    }

    #[test]
    fn test_stat_reports_type_and_size() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("f"), b"12345").unwrap();
        let sys = NativeSysFile::without_async();

        let file = sys.stat(&os_to_local(&dir.path().join("f"))).unwrap();
        assert_eq!(file.node_type, NodeType::File);
        assert_eq!(file.size, 5);
        assert!(file.mtime > 0);

        let folder = sys.stat(&os_to_local(dir.path())).unwrap();
        assert_eq!(folder.node_type, NodeType::Folder);
        assert_eq!(folder.size, 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_fsid_is_inode() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("f"), b"x").unwrap();
        let sys = NativeSysFile::without_async();
        let local = os_to_local(&dir.path().join("f"));

        let before = sys.stat(&local).unwrap().fsid;
        assert!(before.is_some());
        std::fs::rename(dir.path().join("f"), dir.path().join("g")).unwrap();
        let after = sys.stat(&os_to_local(&dir.path().join("g"))).unwrap().fsid;
        assert_eq!(before, after);
    }

    #[test]
    fn test_native_access_has_async_backend() {
        let fs = NativeFileSystemAccess::new(&FsConfig::default()).unwrap();
        assert!(fs.sys.async_backend().is_some());
        assert!(NativeFileSystemAccess::without_async().sys.async_backend().is_none());
    }
}
