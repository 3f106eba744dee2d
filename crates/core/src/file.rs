//! Per-file handles with deferred open
//!
//! `fopen` only stats the target and remembers its path. The real handle is
//! opened right before I/O by `openf`, which re-stats first and refuses to
//! open a file whose mtime or size drifted since `fopen`: the file was
//! modified externally in between.
//!
//! Concurrent async readers share one handle through a reference-counted
//! gate: the first reader opens it, the last one to finish closes it.

use crate::aio::{Access, AsyncFailure, AsyncIOContext, AsyncJob, AsyncOp, AsyncRequest, Completer};
use crate::error::{FsError, Result};
use crate::path::LocalPath;
use crate::waiter::Waiter;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::io;
use std::sync::Arc;
use tracing::{debug, error, trace, warn};

/// Type of a filesystem entry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeType {
    #[default]
    Unknown,
    File,
    Folder,
}

/// Result of a stat call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    /// Modification time, seconds since the Unix epoch
    pub mtime: i64,
    /// Size in bytes (0 for folders)
    pub size: u64,
    pub node_type: NodeType,
    /// Filesystem identifier, when the platform provides one
    pub fsid: Option<u64>,
}

/// An open OS file handle
pub trait SysHandle: Send + Sync {
    /// Read up to `buf.len()` bytes at `pos`; fewer only at end of file
    fn read_at(&self, buf: &mut [u8], pos: u64) -> io::Result<usize>;

    /// Write all of `data` at `pos`
    fn write_at(&self, data: &[u8], pos: u64) -> io::Result<()>;
}

/// OS primitives behind a [`FileAccess`]
pub trait SysFile: Send + Sync {
    fn stat(&self, path: &LocalPath) -> io::Result<FileStat>;

    /// Open `path`; write access creates the file if missing
    fn open(&self, path: &LocalPath, access: Access) -> io::Result<Arc<dyn SysHandle>>;

    /// Native async mechanism, if the platform has one
    fn async_backend(&self) -> Option<&dyn crate::aio::AsyncBackend> {
        None
    }
}

#[derive(Default)]
struct AsyncFileState {
    readers: usize,
    read_handle: Option<Arc<dyn SysHandle>>,
    opened: Option<Arc<dyn SysHandle>>,
}

/// Async handle state shared between a `FileAccess` and its READ contexts
#[derive(Default)]
pub(crate) struct AsyncFile {
    state: Mutex<AsyncFileState>,
}

impl AsyncFile {
    fn release_reader(&self) {
        let mut state = self.state.lock();
        state.readers = state.readers.saturating_sub(1);
        if state.readers == 0 && state.read_handle.is_some() {
            debug!("Closing async file handle");
            state.read_handle = None;
        }
    }
}

/// A READ context's slot in the concurrent reader count
pub(crate) struct ReaderLease(Arc<AsyncFile>);

impl Drop for ReaderLease {
    fn drop(&mut self) {
        self.0.release_reader();
    }
}

/// Handle on one local file for one logical file session
pub struct FileAccess {
    sys: Arc<dyn SysFile>,
    waiter: Waiter,
    localname: LocalPath,
    /// Set by `fopen`/`asyncfopen`: the handle is opened lazily by `openf`
    deferred: bool,
    handle: Option<Arc<dyn SysHandle>>,
    mtime: i64,
    size: u64,
    node_type: NodeType,
    fsid: Option<u64>,
    retry: bool,
    async_file: Arc<AsyncFile>,
}

impl FileAccess {
    pub fn new(sys: Arc<dyn SysFile>, waiter: Waiter) -> Self {
        Self {
            sys,
            waiter,
            localname: LocalPath::new(),
            deferred: false,
            handle: None,
            mtime: 0,
            size: 0,
            node_type: NodeType::Unknown,
            fsid: None,
            retry: false,
            async_file: Arc::new(AsyncFile::default()),
        }
    }

    pub fn mtime(&self) -> i64 {
        self.mtime
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn node_type(&self) -> NodeType {
        self.node_type
    }

    /// Filesystem identifier from the last successful stat, if valid
    pub fn fsid(&self) -> Option<u64> {
        self.fsid
    }

    /// Whether the last failure was transient
    pub fn retry(&self) -> bool {
        self.retry
    }

    pub fn localname(&self) -> &LocalPath {
        &self.localname
    }

    /// Number of async readers currently holding the shared handle
    pub fn async_readers(&self) -> usize {
        self.async_file.state.lock().readers
    }

    /// Whether the shared async read handle is open
    pub fn is_async_opened(&self) -> bool {
        self.async_file.state.lock().read_handle.is_some()
    }

    fn display_name(&self) -> String {
        String::from_utf8_lossy(self.localname.as_bytes()).into_owned()
    }

    fn fail(&mut self, err: io::Error) -> FsError {
        let err = FsError::from_io(self.display_name(), err);
        self.retry = err.is_retryable();
        err
    }

    fn sysstat(&mut self) -> Result<FileStat> {
        self.sys.stat(&self.localname).map_err(|err| self.fail(err))
    }

    fn apply_stat(&mut self, stat: FileStat) {
        self.mtime = stat.mtime;
        self.size = stat.size;
        self.node_type = stat.node_type;
        self.fsid = stat.fsid;
    }

    fn sysopen(&mut self, access: Access) -> Result<Arc<dyn SysHandle>> {
        self.sys.open(&self.localname, access).map_err(|err| self.fail(err))
    }

    /// Re-stat and compare against the values captured at `fopen`
    ///
    /// On drift the cached values are updated and the failure is permanent.
    fn check_unchanged(&mut self, what: &str) -> Result<()> {
        let current = match self.sys.stat(&self.localname) {
            Ok(stat) => stat,
            Err(err) => {
                warn!(
                    path = %self.display_name(),
                    mtime = self.mtime,
                    size = self.size,
                    "Error opening {} file handle (stat): {}",
                    what,
                    err
                );
                return Err(self.fail(err));
            }
        };

        if current.mtime != self.mtime || current.size != self.size {
            self.mtime = current.mtime;
            self.size = current.size;
            self.retry = false;
            return Err(FsError::Stale {
                path: self.display_name(),
            });
        }
        Ok(())
    }

    /// Stat `path` and remember it for a later deferred open
    pub fn fopen(&mut self, path: &LocalPath) -> Result<()> {
        self.deferred = true;
        self.handle = None;
        self.localname = path.clone();
        self.node_type = NodeType::Unknown;
        self.fsid = None;

        let stat = self.sysstat()?;
        self.apply_stat(stat);
        Ok(())
    }

    /// Open `path` immediately, creating it when write access is requested
    pub fn open_now(&mut self, path: &LocalPath, access: Access) -> Result<()> {
        self.deferred = false;
        self.handle = None;
        self.localname = path.clone();

        let handle = self.sysopen(access)?;
        let stat = self.sysstat()?;
        self.apply_stat(stat);
        self.handle = Some(handle);
        Ok(())
    }

    /// Stat `path` and report whether it is a folder
    pub fn is_folder(&mut self, path: &LocalPath) -> bool {
        self.fopen(path).is_ok() && self.node_type == NodeType::Folder
    }

    /// Open the handle deferred by `fopen`, refusing if the file changed
    pub fn openf(&mut self) -> Result<()> {
        if !self.deferred {
            return Ok(());
        }

        self.check_unchanged("sync")?;
        let handle = self.sysopen(Access::READ)?;
        self.handle = Some(handle);
        Ok(())
    }

    /// Release the handle opened by `openf`
    pub fn closef(&mut self) {
        if self.deferred {
            self.handle = None;
        }
    }

    fn sysread(&mut self, dst: &mut [u8], pos: u64) -> Result<()> {
        let handle = self.handle.clone().ok_or(FsError::NotOpen)?;
        match handle.read_at(dst, pos) {
            Ok(n) if n == dst.len() => Ok(()),
            Ok(n) => {
                self.retry = false;
                Err(FsError::ShortRead {
                    expected: dst.len(),
                    got: n,
                })
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Read exactly `len` bytes at `pos` into `dst`, followed by `pad` zeroes
    pub fn fread(&mut self, dst: &mut Vec<u8>, len: usize, pad: usize, pos: u64) -> Result<()> {
        self.openf()?;

        dst.clear();
        dst.resize(len + pad, 0);
        let result = self.sysread(&mut dst[..len], pos);

        self.closef();
        result
    }

    /// Read exactly `dst.len()` bytes at `pos`
    ///
    /// With `caller_opened` the caller already holds the handle from `openf`
    /// and it is left open.
    pub fn frawread(&mut self, dst: &mut [u8], pos: u64, caller_opened: bool) -> Result<()> {
        if !caller_opened {
            self.openf()?;
        }

        let result = self.sysread(dst, pos);

        if !caller_opened {
            self.closef();
        }
        result
    }

    /// Write `data` at `pos` through the handle opened by `open_now`
    pub fn fwrite(&mut self, data: &[u8], pos: u64) -> Result<()> {
        let handle = self.handle.clone().ok_or(FsError::NotOpen)?;
        handle.write_at(data, pos).map_err(|err| self.fail(err))?;
        self.size = self.size.max(pos + data.len() as u64);
        Ok(())
    }

    /// Stat `path` for deferred async reads; completes immediately
    ///
    /// The finished context's `pos()` carries the file size.
    pub fn asyncfopen(&mut self, path: &LocalPath) -> AsyncIOContext {
        self.deferred = true;
        self.localname = path.clone();
        trace!("Async open start");

        let result = match self.sysstat() {
            Ok(stat) => {
                self.apply_stat(stat);
                Ok(())
            }
            Err(err) => Err(AsyncFailure::from_error(&err)),
        };

        let (context, completer) =
            AsyncIOContext::new(AsyncOp::Open, Access::READ, self.size, 0, 0, self.waiter.clone());
        completer.complete(result, Vec::new());
        context
    }

    /// Open `path` through the native async mechanism
    pub fn asyncfopen_with(
        &mut self,
        path: &LocalPath,
        read: bool,
        write: bool,
        pos: u64,
    ) -> AsyncIOContext {
        trace!("Async open start");
        self.localname = path.clone();

        let access = Access { read, write };
        let (context, completer) =
            AsyncIOContext::new(AsyncOp::Open, access, pos, 0, 0, self.waiter.clone());
        self.asyncsysopen(access, completer);
        context
    }

    fn asyncsysopen(&mut self, access: Access, completer: Completer) {
        if self.sys.async_backend().is_none() {
            completer.complete(Err(AsyncFailure::Permanent), Vec::new());
            return;
        }

        // Opening is cheap enough to do inline; the handle serves later async I/O
        match self.sysopen(access) {
            Ok(handle) => {
                self.async_file.state.lock().opened = Some(handle);
                completer.complete(Ok(()), Vec::new());
            }
            Err(err) => completer.complete(Err(AsyncFailure::from_error(&err)), Vec::new()),
        }
    }

    /// Register an async reader, opening the shared handle for the first one
    pub fn asyncopenf(&mut self) -> Result<()> {
        {
            let mut state = self.async_file.state.lock();
            state.readers += 1;
            if !self.deferred || state.read_handle.is_some() {
                return Ok(());
            }
        }

        self.check_unchanged("async")?;

        debug!("Opening async file handle for reading");
        match self.sysopen(Access::READ) {
            Ok(handle) => {
                self.async_file.state.lock().read_handle = Some(handle);
                Ok(())
            }
            Err(err) => {
                warn!("Error opening async file handle (open): {}", err);
                Err(err)
            }
        }
    }

    /// Unregister an async reader, closing the shared handle after the last
    ///
    /// Dropping a READ context does this automatically; call it directly only
    /// to balance an `asyncopenf` made without a context.
    pub fn asyncclosef(&mut self) {
        self.async_file.release_reader();
    }

    /// Read `len` bytes at `pos` asynchronously, followed by `pad` zeroes
    pub fn asyncfread(&mut self, len: usize, pad: usize, pos: u64) -> AsyncIOContext {
        trace!("Async read start");
        let (mut context, completer) =
            AsyncIOContext::new(AsyncOp::Read, Access::READ, pos, len, pad, self.waiter.clone());
        let buffer = vec![0u8; len + pad];

        let opened = self.asyncopenf();
        context.set_lease(ReaderLease(self.async_file.clone()));

        if let Err(err) = opened {
            error!("Error in asyncopenf: {}", err);
            completer.complete(Err(AsyncFailure::from_error(&err)), buffer);
            return context;
        }

        let handle = {
            let state = self.async_file.state.lock();
            state.read_handle.clone().or_else(|| state.opened.clone())
        };
        let request = AsyncRequest {
            op: AsyncOp::Read,
            pos,
            len,
            pad,
            buffer,
        };
        self.submit(request, handle, completer);
        context
    }

    /// Write `data` at `pos` through the handle from `asyncfopen_with`
    pub fn asyncfwrite(&mut self, data: &[u8], pos: u64) -> AsyncIOContext {
        trace!("Async write start");
        let (context, completer) = AsyncIOContext::new(
            AsyncOp::Write,
            Access::WRITE,
            pos,
            data.len(),
            0,
            self.waiter.clone(),
        );

        let handle = self.async_file.state.lock().opened.clone();
        let request = AsyncRequest {
            op: AsyncOp::Write,
            pos,
            len: data.len(),
            pad: 0,
            buffer: data.to_vec(),
        };
        self.submit(request, handle, completer);
        context
    }

    fn submit(
        &self,
        request: AsyncRequest,
        handle: Option<Arc<dyn SysHandle>>,
        completer: Completer,
    ) {
        match (self.sys.async_backend(), handle) {
            (Some(backend), Some(handle)) => backend.submit(AsyncJob {
                request,
                handle,
                completer,
            }),
            (_, _) => completer.complete(Err(AsyncFailure::Permanent), request.buffer),
        }
    }
}

impl Drop for FileAccess {
    fn drop(&mut self) {
        let readers = self.async_readers();
        if readers > 0 {
            warn!(readers, "FileAccess dropped with outstanding async readers");
        }
    }
}

impl std::fmt::Debug for FileAccess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileAccess")
            .field("localname", &self.localname)
            .field("deferred", &self.deferred)
            .field("mtime", &self.mtime)
            .field("size", &self.size)
            .field("node_type", &self.node_type)
            .field("fsid", &self.fsid)
            .field("retry", &self.retry)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aio::AsyncBackend;
    use crate::platform::{os_to_local, NativeSysFile};
    use filetime::{set_file_mtime, FileTime};
    use std::path::Path;
    use std::thread;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    fn native(workers: usize) -> Arc<dyn SysFile> {
        if workers == 0 {
            Arc::new(NativeSysFile::without_async())
        } else {
            Arc::new(NativeSysFile::new(workers).unwrap())
        }
    }

    fn write_file(dir: &TempDir, name: &str, data: &[u8]) -> LocalPath {
        let path = dir.path().join(name);
        std::fs::write(&path, data).unwrap();
        os_to_local(&path)
    }

    #[test]
    fn test_fopen_stats_without_handle() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "a.txt", b"hello");
        let mut fa = FileAccess::new(native(0), Waiter::new());

        fa.fopen(&path).unwrap();
        assert_eq!(fa.size(), 5);
        assert_eq!(fa.node_type(), NodeType::File);
        assert!(fa.handle.is_none());
    }

    #[test]
    fn test_fopen_missing_is_permanent() {
        let dir = TempDir::new().unwrap();
        let mut fa = FileAccess::new(native(0), Waiter::new());
        let err = fa.fopen(&os_to_local(&dir.path().join("missing"))).unwrap_err();
        assert!(!err.is_retryable());
        assert!(!fa.retry());
    }

    #[test]
    fn test_is_folder() {
        let dir = TempDir::new().unwrap();
        let file = write_file(&dir, "f", b"x");
        let mut fa = FileAccess::new(native(0), Waiter::new());
        assert!(fa.is_folder(&os_to_local(dir.path())));
        assert!(!fa.is_folder(&file));
    }

    #[test]
    fn test_fread_pads_with_zeroes() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "a.txt", b"hello world");
        let mut fa = FileAccess::new(native(0), Waiter::new());
        fa.fopen(&path).unwrap();

        let mut buf = vec![0xff; 3];
        fa.fread(&mut buf, 5, 3, 6).unwrap();
        assert_eq!(buf, b"world\0\0\0");
        // Handle is released again
        assert!(fa.handle.is_none());
    }

    #[test]
    fn test_fread_past_end_fails() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "a.txt", b"abc");
        let mut fa = FileAccess::new(native(0), Waiter::new());
        fa.fopen(&path).unwrap();

        let mut buf = Vec::new();
        let err = fa.fread(&mut buf, 10, 0, 0).unwrap_err();
        assert!(matches!(err, FsError::ShortRead { expected: 10, got: 3 }));
    }

    #[test]
    fn test_frawread_caller_opened_keeps_handle() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "a.txt", b"0123456789");
        let mut fa = FileAccess::new(native(0), Waiter::new());
        fa.fopen(&path).unwrap();

        fa.openf().unwrap();
        let mut first = [0u8; 2];
        let mut second = [0u8; 3];
        fa.frawread(&mut first, 0, true).unwrap();
        fa.frawread(&mut second, 7, true).unwrap();
        assert!(fa.handle.is_some());
        fa.closef();
        assert!(fa.handle.is_none());

        assert_eq!(&first, b"01");
        assert_eq!(&second, b"789");
    }

    #[test]
    fn test_openf_detects_size_change() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "a.txt", b"short");
        let mut fa = FileAccess::new(native(0), Waiter::new());
        fa.fopen(&path).unwrap();

        std::fs::write(dir.path().join("a.txt"), b"much longer now").unwrap();

        let err = fa.openf().unwrap_err();
        assert!(matches!(err, FsError::Stale { .. }));
        assert!(!fa.retry());
        // Cached values follow the file
        assert_eq!(fa.size(), 15);
        // Second attempt sees consistent values and opens
        fa.openf().unwrap();
        fa.closef();
    }

    #[test]
    fn test_openf_detects_mtime_change() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "a.txt", b"same");
        let mut fa = FileAccess::new(native(0), Waiter::new());
        fa.fopen(&path).unwrap();
        let before = fa.mtime();

        let earlier = FileTime::from_unix_time(before - 3600, 0);
        set_file_mtime(dir.path().join("a.txt"), earlier).unwrap();

        assert!(fa.openf().is_err());
        assert!(!fa.retry());
        assert_eq!(fa.mtime(), before - 3600);
    }

    #[test]
    fn test_closef_noop_in_blocking_mode() {
        let dir = TempDir::new().unwrap();
        let path = os_to_local(&dir.path().join("out.bin"));
        let mut fa = FileAccess::new(native(0), Waiter::new());

        fa.open_now(&path, Access::READ_WRITE).unwrap();
        fa.closef();
        fa.fwrite(b"abc", 0).unwrap();
        fa.fwrite(b"def", 3).unwrap();
        assert_eq!(fa.size(), 6);

        let mut buf = [0u8; 6];
        fa.frawread(&mut buf, 0, false).unwrap();
        assert_eq!(&buf, b"abcdef");
        drop(fa);
        assert_eq!(std::fs::read(dir.path().join("out.bin")).unwrap(), b"abcdef");
    }

    #[test]
    fn test_async_without_backend_fails_permanently() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "a.txt", b"data");
        let mut fa = FileAccess::new(native(0), Waiter::new());
        fa.fopen(&path).unwrap();

        let read = fa.asyncfread(4, 0, 0);
        assert!(read.is_finished());
        assert_eq!(read.outcome(), Some(Err(AsyncFailure::Permanent)));
        assert_eq!(fa.async_readers(), 1);
        drop(read);
        assert_eq!(fa.async_readers(), 0);
        assert!(!fa.is_async_opened());

        let open = fa.asyncfopen_with(&path, true, false, 0);
        assert_eq!(open.finish(), Err(AsyncFailure::Permanent));
        let write = fa.asyncfwrite(b"x", 0);
        assert_eq!(write.finish(), Err(AsyncFailure::Permanent));
    }

    #[test]
    fn test_asyncfopen_reports_size() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "a.txt", b"12345678");
        let mut fa = FileAccess::new(native(0), Waiter::new());

        let ctx = fa.asyncfopen(&path);
        assert_eq!(ctx.finish(), Ok(()));
        assert_eq!(ctx.pos(), 8);

        let missing = fa.asyncfopen(&os_to_local(Path::new("/definitely/not/here")));
        assert_eq!(missing.outcome(), Some(Err(AsyncFailure::Permanent)));
    }

    #[test]
    fn test_async_readers_share_one_handle() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "a.txt", b"abcdefgh");
        let mut fa = FileAccess::new(native(2), Waiter::new());
        fa.fopen(&path).unwrap();

        let mut first = fa.asyncfread(4, 0, 0);
        let mut second = fa.asyncfread(4, 2, 4);
        assert_eq!(fa.async_readers(), 2);
        assert!(fa.is_async_opened());

        assert_eq!(first.finish(), Ok(()));
        assert_eq!(second.finish(), Ok(()));
        assert_eq!(first.take_buffer(), b"abcd");
        assert_eq!(second.take_buffer(), b"efgh\0\0");

        drop(first);
        assert_eq!(fa.async_readers(), 1);
        assert!(fa.is_async_opened());
        drop(second);
        assert_eq!(fa.async_readers(), 0);
        assert!(!fa.is_async_opened());
    }

    #[test]
    fn test_asyncopenf_rejects_stale_file() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "a.txt", b"v1");
        let mut fa = FileAccess::new(native(1), Waiter::new());
        fa.fopen(&path).unwrap();

        std::fs::write(dir.path().join("a.txt"), b"version 2").unwrap();

        let ctx = fa.asyncfread(2, 0, 0);
        assert_eq!(ctx.outcome(), Some(Err(AsyncFailure::Permanent)));
        assert!(!fa.is_async_opened());
    }

    #[test]
    fn test_asyncclosef_balances_bare_opens() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "a.txt", b"abcdefgh");
        let mut fa = FileAccess::new(native(1), Waiter::new());
        fa.fopen(&path).unwrap();

        fa.asyncopenf().unwrap();
        fa.asyncopenf().unwrap();
        assert_eq!(fa.async_readers(), 2);
        assert!(fa.is_async_opened());

        fa.asyncclosef();
        assert_eq!(fa.async_readers(), 1);
        assert!(fa.is_async_opened());

        fa.asyncclosef();
        assert_eq!(fa.async_readers(), 0);
        assert!(!fa.is_async_opened());
    }

    #[test]
    fn test_asyncclosef_after_stale_open() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "a.txt", b"v1");
        let mut fa = FileAccess::new(native(1), Waiter::new());
        fa.fopen(&path).unwrap();

        std::fs::write(dir.path().join("a.txt"), b"version 2").unwrap();

        assert!(fa.asyncopenf().is_err());
        assert_eq!(fa.async_readers(), 1);
        assert!(!fa.is_async_opened());

        fa.asyncclosef();
        assert_eq!(fa.async_readers(), 0);
        assert!(!fa.is_async_opened());
    }

    #[test]
    fn test_async_open_then_write() {
        let dir = TempDir::new().unwrap();
        let path = os_to_local(&dir.path().join("w.bin"));
        let mut fa = FileAccess::new(native(1), Waiter::new());

        let open = fa.asyncfopen_with(&path, false, true, 0);
        assert_eq!(open.finish(), Ok(()));
        let write = fa.asyncfwrite(b"payload", 0);
        assert_eq!(write.finish(), Ok(()));
        drop(write);

        assert_eq!(std::fs::read(dir.path().join("w.bin")).unwrap(), b"payload");
    }

    /// Backend that parks jobs until the test runs them
    struct ParkedBackend {
        jobs: Mutex<Vec<AsyncJob>>,
    }

    impl AsyncBackend for ParkedBackend {
        fn submit(&self, job: AsyncJob) {
            self.jobs.lock().push(job);
        }
    }

    struct ParkedSys {
        inner: NativeSysFile,
        backend: Arc<ParkedBackend>,
    }

    impl SysFile for ParkedSys {
        fn stat(&self, path: &LocalPath) -> io::Result<FileStat> {
            self.inner.stat(path)
        }

        fn open(&self, path: &LocalPath, access: Access) -> io::Result<Arc<dyn SysHandle>> {
            self.inner.open(path, access)
        }

        fn async_backend(&self) -> Option<&dyn AsyncBackend> {
            Some(self.backend.as_ref())
        }
    }

    #[test]
    fn test_dropping_pending_read_blocks_then_releases_reader() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "a.txt", b"abc");
        let backend = Arc::new(ParkedBackend {
            jobs: Mutex::new(Vec::new()),
        });
        let sys = Arc::new(ParkedSys {
            inner: NativeSysFile::without_async(),
            backend: backend.clone(),
        });
        let mut fa = FileAccess::new(sys, Waiter::new());
        fa.fopen(&path).unwrap();

        let ctx = fa.asyncfread(3, 0, 0);
        assert!(!ctx.is_finished());
        assert_eq!(fa.async_readers(), 1);

        let completer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            let jobs: Vec<AsyncJob> = backend.jobs.lock().drain(..).collect();
            for job in jobs {
                job.run();
            }
        });

        let start = Instant::now();
        drop(ctx);
        assert!(start.elapsed() >= Duration::from_millis(100));
        assert_eq!(fa.async_readers(), 0);
        assert!(!fa.is_async_opened());
        completer.join().unwrap();
    }
}
