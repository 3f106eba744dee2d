//! Debounced draining of notification queues
//!
//! An entry becomes ready once `delay` ticks have passed since its
//! timestamp; immediate entries (timestamp 0) are always ready. Queues drain
//! strictly from the front, so a ready entry behind a pending one waits.

use crate::dirnotify::{DirNotify, Notification, NotifyQueue};
use localfs_core::{Ds, NEVER};

impl DirNotify {
    /// Pop the front entry of `q` if its debounce delay has elapsed at `now`
    pub fn pop_ready(&mut self, q: NotifyQueue, now: Ds, delay: Ds) -> Option<Notification> {
        let front = self.queue(q).front()?;
        if front.timestamp == 0 || front.timestamp.saturating_add(delay) <= now {
            self.pop(q)
        } else {
            None
        }
    }

    /// Pop every entry of `q` that is ready at `now`, in order
    pub fn drain_ready(&mut self, q: NotifyQueue, now: Ds, delay: Ds) -> Vec<Notification> {
        std::iter::from_fn(|| self.pop_ready(q, now, delay)).collect()
    }

    /// Tick at which the front entry of `q` becomes ready, `NEVER` if empty
    pub fn next_deadline(&self, q: NotifyQueue, delay: Ds) -> Ds {
        match self.queue(q).front() {
            None => NEVER,
            Some(front) if front.timestamp == 0 => 0,
            Some(front) => front.timestamp.saturating_add(delay),
        }
    }
}
