//! Thread-safe FIFO shared between batch producers and output workers.
//!
//! Unbounded: `push` never blocks and never fails. Consumers either block
//! (optionally with a timeout) or poll with `try_pop`. Closing the queue
//! wakes every waiter; items already queued can still be popped afterwards.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::Duration;

#[derive(Debug)]
struct Inner<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// A FIFO queue guarded by a mutex, with a condition variable for waiters.
#[derive(Debug)]
pub struct ConcurrentQueue<T> {
    inner: Mutex<Inner<T>>,
    ready: Condvar,
}

impl<T> Default for ConcurrentQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ConcurrentQueue<T> {
    /// Create an empty, open queue.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                closed: false,
            }),
            ready: Condvar::new(),
        }
    }

    /// Append an item and wake one blocked consumer.
    ///
    /// Pushing onto a closed queue still enqueues the item; consumers drain
    /// whatever is left before they observe the end.
    pub fn push(&self, item: T) {
        let mut inner = self.inner.lock();
        inner.items.push_back(item);
        self.ready.notify_one();
    }

    /// Block until an item is available and return it.
    ///
    /// Returns `None` only once the queue is closed and empty.
    pub fn wait_and_pop(&self) -> Option<T> {
        let mut inner = self.inner.lock();
        self.ready
            .wait_while(&mut inner, |i| i.items.is_empty() && !i.closed);
        inner.items.pop_front()
    }

    /// Like [`wait_and_pop`](Self::wait_and_pop), but gives up after `timeout`.
    pub fn wait_pop_timeout(&self, timeout: Duration) -> Option<T> {
        let mut inner = self.inner.lock();
        self.ready
            .wait_while_for(&mut inner, |i| i.items.is_empty() && !i.closed, timeout);
        inner.items.pop_front()
    }

    /// Wait up to `timeout` for the queue to become non-empty, without
    /// removing anything. Returns whether an item is present.
    pub fn wait_ready(&self, timeout: Duration) -> bool {
        let mut inner = self.inner.lock();
        self.ready
            .wait_while_for(&mut inner, |i| i.items.is_empty() && !i.closed, timeout);
        !inner.items.is_empty()
    }

    /// Pop the front item if there is one.
    pub fn try_pop(&self) -> Option<T> {
        self.inner.lock().items.pop_front()
    }

    /// Number of queued items (point-in-time).
    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    /// Whether the queue is empty (point-in-time).
    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }

    /// Mark the queue closed and wake all waiters. Idempotent.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        self.ready.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}
