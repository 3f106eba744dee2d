//! Engine loop wake-up and debounce clock
//!
//! A `Waiter` is the single object the engine thread blocks on. Async
//! completions, watcher backends and signal handlers all call `notify()` on a
//! clone of it, so any number of concurrent sources coalesce into one wakeup.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Debounce clock tick, in deciseconds
pub type Ds = u64;

/// Deadline meaning "block until notified"
pub const NEVER: Ds = Ds::MAX;

const DS_MILLIS: u64 = 100;

/// Shared wake-up handle for the engine loop
#[derive(Clone)]
pub struct Waiter {
    inner: Arc<Inner>,
}

struct Inner {
    epoch: Instant,
    state: Mutex<State>,
    cond: Condvar,
}

struct State {
    signalled: bool,
    deadline: Ds,
}

impl Waiter {
    /// Create a waiter whose clock starts now
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                epoch: Instant::now(),
                state: Mutex::new(State {
                    signalled: false,
                    deadline: NEVER,
                }),
                cond: Condvar::new(),
            }),
        }
    }

    /// Current debounce tick
    ///
    /// Never returns 0, which notification queues reserve for "immediate".
    pub fn ds(&self) -> Ds {
        self.inner.epoch.elapsed().as_millis() as Ds / DS_MILLIS + 1
    }

    /// Set the absolute tick at which the next `wait()` gives up
    pub fn init(&self, deadline: Ds) {
        self.inner.state.lock().deadline = deadline;
    }

    /// Block until notified or until the deadline set by `init()`
    ///
    /// Returns `true` when woken by `notify()`. The pending signal is consumed.
    pub fn wait(&self) -> bool {
        let mut state = self.inner.state.lock();
        loop {
            if state.signalled {
                state.signalled = false;
                return true;
            }

            if state.deadline == NEVER {
                self.inner.cond.wait(&mut state);
                continue;
            }

            let now = self.ds();
            if now >= state.deadline {
                return false;
            }
            let remaining = Duration::from_millis((state.deadline - now) * DS_MILLIS);
            self.inner.cond.wait_for(&mut state, remaining);
        }
    }

    /// Block for at most `timeout`, returning whether a notification arrived
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let ticks = (timeout.as_millis() as u64).div_ceil(DS_MILLIS);
        self.init(self.ds().saturating_add(ticks));
        self.wait()
    }

    /// Wake the engine loop
    pub fn notify(&self) {
        let mut state = self.inner.state.lock();
        state.signalled = true;
        self.inner.cond.notify_all();
    }
}

impl Default for Waiter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Waiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Waiter").field("ds", &self.ds()).finish()
    }
}
