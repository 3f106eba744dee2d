//! Asynchronous I/O contexts and their completion protocol
//!
//! Every async operation is represented by an [`AsyncIOContext`] held by the
//! engine and a [`Completer`] handed to whichever execution context performs
//! the work. Completing stores a typed result in the shared cell, wakes any
//! thread joined on it and notifies the engine's [`Waiter`], so completions
//! from any number of worker threads coalesce into one loop wakeup.

use crate::error::{self, FsError};
use crate::file::{ReaderLease, SysHandle};
use crate::waiter::Waiter;
use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tracing::{debug, trace};

/// Kind of async operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncOp {
    None,
    Open,
    Read,
    Write,
}

/// Requested access rights
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Access {
    pub read: bool,
    pub write: bool,
}

impl Access {
    pub const NONE: Access = Access { read: false, write: false };
    pub const READ: Access = Access { read: true, write: false };
    pub const WRITE: Access = Access { read: false, write: true };
    pub const READ_WRITE: Access = Access { read: true, write: true };
}

/// Why an async operation failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AsyncFailure {
    /// Temporary condition, the operation may be resubmitted later
    #[error("Transient async I/O failure")]
    Transient,
    /// The operation cannot succeed
    #[error("Permanent async I/O failure")]
    Permanent,
}

impl AsyncFailure {
    pub fn is_retryable(self) -> bool {
        self == AsyncFailure::Transient
    }

    pub fn from_error(err: &FsError) -> Self {
        if err.is_retryable() {
            AsyncFailure::Transient
        } else {
            AsyncFailure::Permanent
        }
    }

    pub fn from_io(err: &io::Error) -> Self {
        if error::is_transient(err) {
            AsyncFailure::Transient
        } else {
            AsyncFailure::Permanent
        }
    }
}

/// Outcome carried by a completed context
pub type AsyncResult = Result<(), AsyncFailure>;

struct Slot {
    outcome: Option<AsyncResult>,
    buffer: Vec<u8>,
}

struct Completion {
    slot: Mutex<Slot>,
    cond: Condvar,
}

/// Sending half of a context's completion
///
/// `complete` consumes the completer, so a result is delivered at most once.
/// A completer dropped without completing delivers a transient failure, so
/// the context is always released.
pub struct Completer {
    completion: Option<Arc<Completion>>,
    waiter: Waiter,
}

impl Completer {
    /// Deliver the result together with the (possibly filled) buffer
    pub fn complete(mut self, result: AsyncResult, buffer: Vec<u8>) {
        self.deliver(result, buffer);
    }

    fn deliver(&mut self, result: AsyncResult, buffer: Vec<u8>) {
        if let Some(completion) = self.completion.take() {
            {
                let mut slot = completion.slot.lock();
                slot.buffer = buffer;
                slot.outcome = Some(result);
            }
            completion.cond.notify_all();
            self.waiter.notify();
        }
    }
}

impl Drop for Completer {
    fn drop(&mut self) {
        if self.completion.is_some() {
            debug!("Async operation abandoned without completion");
            self.deliver(Err(AsyncFailure::Transient), Vec::new());
        }
    }
}

/// Parameters of a submitted operation
#[derive(Debug)]
pub struct AsyncRequest {
    pub op: AsyncOp,
    pub pos: u64,
    pub len: usize,
    pub pad: usize,
    /// READ: zeroed buffer of `len + pad` bytes; WRITE: the data to write
    pub buffer: Vec<u8>,
}

/// Work item handed to an [`AsyncBackend`]
pub struct AsyncJob {
    pub request: AsyncRequest,
    pub handle: Arc<dyn SysHandle>,
    pub completer: Completer,
}

impl AsyncJob {
    /// Perform the I/O on the calling thread and complete
    pub fn run(self) {
        let AsyncJob {
            request,
            handle,
            completer,
        } = self;
        let mut buffer = request.buffer;

        let result = match request.op {
            AsyncOp::Read => match handle.read_at(&mut buffer[..request.len], request.pos) {
                Ok(n) if n == request.len => Ok(()),
                Ok(_) => Err(AsyncFailure::Permanent),
                Err(err) => Err(AsyncFailure::from_io(&err)),
            },
            AsyncOp::Write => handle
                .write_at(&buffer, request.pos)
                .map_err(|err| AsyncFailure::from_io(&err)),
            AsyncOp::Open | AsyncOp::None => Err(AsyncFailure::Permanent),
        };

        completer.complete(result, buffer);
    }
}

/// Native async mechanism of a platform
pub trait AsyncBackend: Send + Sync {
    /// Take ownership of a job; it must eventually be completed
    fn submit(&self, job: AsyncJob);
}

/// Pool of I/O threads fed through a channel
pub struct IoWorkers {
    tx: Option<Sender<AsyncJob>>,
    threads: Vec<JoinHandle<()>>,
}

impl IoWorkers {
    /// Spawn `count` worker threads (at least one)
    pub fn new(count: usize) -> io::Result<Self> {
        let (tx, rx) = crossbeam_channel::unbounded::<AsyncJob>();
        let mut threads = Vec::with_capacity(count.max(1));
        for i in 0..count.max(1) {
            let rx: Receiver<AsyncJob> = rx.clone();
            let handle = thread::Builder::new()
                .name(format!("localfs-io-{}", i))
                .spawn(move || {
                    for job in rx.iter() {
                        job.run();
                    }
                })?;
            threads.push(handle);
        }
        Ok(Self {
            tx: Some(tx),
            threads,
        })
    }
}

impl AsyncBackend for IoWorkers {
    fn submit(&self, job: AsyncJob) {
        match &self.tx {
            // A send error hands the job back; dropping it completes as transient
            Some(tx) => {
                if let Err(err) = tx.send(job) {
                    drop(err.into_inner());
                }
            }
            None => drop(job),
        }
    }
}

impl Drop for IoWorkers {
    fn drop(&mut self) {
        self.tx.take();
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }
}

/// One outstanding asynchronous operation
///
/// Dropping a context blocks until it has completed; dropping a READ
/// context then releases its slot in the file's concurrent reader count.
pub struct AsyncIOContext {
    op: AsyncOp,
    access: Access,
    pos: u64,
    len: usize,
    pad: usize,
    completion: Arc<Completion>,
    waiter: Waiter,
    lease: Option<ReaderLease>,
}

impl AsyncIOContext {
    /// Create a pending context and the completer that finishes it
    pub fn new(
        op: AsyncOp,
        access: Access,
        pos: u64,
        len: usize,
        pad: usize,
        waiter: Waiter,
    ) -> (Self, Completer) {
        let completion = Arc::new(Completion {
            slot: Mutex::new(Slot {
                outcome: None,
                buffer: Vec::new(),
            }),
            cond: Condvar::new(),
        });
        let completer = Completer {
            completion: Some(completion.clone()),
            waiter: waiter.clone(),
        };
        let context = Self {
            op,
            access,
            pos,
            len,
            pad,
            completion,
            waiter,
            lease: None,
        };
        trace!(?op, pos, len, "Async context created");
        (context, completer)
    }

    pub(crate) fn set_lease(&mut self, lease: ReaderLease) {
        self.lease = Some(lease);
    }

    pub fn op(&self) -> AsyncOp {
        self.op
    }

    pub fn access(&self) -> Access {
        self.access
    }

    pub fn pos(&self) -> u64 {
        self.pos
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn pad(&self) -> usize {
        self.pad
    }

    pub fn is_finished(&self) -> bool {
        self.completion.slot.lock().outcome.is_some()
    }

    /// Result if the operation has completed
    pub fn outcome(&self) -> Option<AsyncResult> {
        self.completion.slot.lock().outcome
    }

    /// Block until the operation completes and return its result
    ///
    /// If this call had to wait, the waiter is signalled again afterwards:
    /// the wakeup that completed this context may have been meant for other
    /// consumers sharing the same waiter.
    pub fn finish(&self) -> AsyncResult {
        let mut slot = self.completion.slot.lock();
        if let Some(result) = slot.outcome {
            return result;
        }

        loop {
            self.completion.cond.wait(&mut slot);
            if let Some(result) = slot.outcome {
                drop(slot);
                self.waiter.notify();
                return result;
            }
        }
    }

    /// Take the buffer delivered on completion (read data for READ)
    ///
    /// Empty until the context has finished.
    pub fn take_buffer(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.completion.slot.lock().buffer)
    }
}

impl Drop for AsyncIOContext {
    fn drop(&mut self) {
        let _ = self.finish();
    }
}

impl std::fmt::Debug for AsyncIOContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncIOContext")
            .field("op", &self.op)
            .field("access", &self.access)
            .field("pos", &self.pos)
            .field("len", &self.len)
            .field("pad", &self.pad)
            .field("outcome", &self.outcome())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[test]
    fn test_complete_marks_finished_and_notifies() {
        let waiter = Waiter::new();
        let (ctx, completer) =
            AsyncIOContext::new(AsyncOp::Write, Access::WRITE, 0, 4, 0, waiter.clone());
        assert!(!ctx.is_finished());
        assert_eq!(ctx.outcome(), None);

        completer.complete(Err(AsyncFailure::Transient), Vec::new());

        assert!(ctx.is_finished());
        assert_eq!(ctx.finish(), Err(AsyncFailure::Transient));
        assert!(ctx.finish().unwrap_err().is_retryable());
        assert!(waiter.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn test_dropped_completer_delivers_transient() {
        let (ctx, completer) =
            AsyncIOContext::new(AsyncOp::Read, Access::READ, 0, 1, 0, Waiter::new());
        drop(completer);
        assert_eq!(ctx.outcome(), Some(Err(AsyncFailure::Transient)));
    }

    #[test]
    fn test_finish_blocks_until_remote_completion() {
        let waiter = Waiter::new();
        let (ctx, completer) =
            AsyncIOContext::new(AsyncOp::Read, Access::READ, 0, 3, 1, waiter.clone());

        let start = Instant::now();
        let worker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            completer.complete(Ok(()), b"abc\0".to_vec());
        });

        assert_eq!(ctx.finish(), Ok(()));
        assert!(start.elapsed() >= Duration::from_millis(100));
        worker.join().unwrap();

        let mut ctx = ctx;
        assert_eq!(ctx.take_buffer(), b"abc\0");
        // Completion signal plus the re-signal after waiting
        assert!(waiter.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn test_io_workers_run_jobs() {
        struct Memory(Vec<u8>);

        impl SysHandle for Memory {
            fn read_at(&self, buf: &mut [u8], pos: u64) -> io::Result<usize> {
                let start = (pos as usize).min(self.0.len());
                let n = buf.len().min(self.0.len() - start);
                buf[..n].copy_from_slice(&self.0[start..start + n]);
                Ok(n)
            }

            fn write_at(&self, _data: &[u8], _pos: u64) -> io::Result<()> {
                Err(io::Error::from(io::ErrorKind::PermissionDenied))
            }
        }

        let workers = IoWorkers::new(2).unwrap();
        let handle: Arc<dyn SysHandle> = Arc::new(Memory(b"hello world".to_vec()));
        let waiter = Waiter::new();

        let (mut read, completer) =
            AsyncIOContext::new(AsyncOp::Read, Access::READ, 6, 5, 2, waiter.clone());
        workers.submit(AsyncJob {
            request: AsyncRequest {
                op: AsyncOp::Read,
                pos: 6,
                len: 5,
                pad: 2,
                buffer: vec![0; 7],
            },
            handle: handle.clone(),
            completer,
        });

        let (write, completer) =
            AsyncIOContext::new(AsyncOp::Write, Access::WRITE, 0, 1, 0, waiter);
        workers.submit(AsyncJob {
            request: AsyncRequest {
                op: AsyncOp::Write,
                pos: 0,
                len: 1,
                pad: 0,
                buffer: vec![1],
            },
            handle,
            completer,
        });

        assert_eq!(read.finish(), Ok(()));
        assert_eq!(read.take_buffer(), b"world\0\0");
        assert_eq!(write.finish(), Err(AsyncFailure::Permanent));
    }
}
