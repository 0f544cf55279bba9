//! Named link between one in-process client and its reactor
//! (spec.md §4.14): two MPSC queues plus a pair of auto-reset signals so
//! each side's reader thread can spin-then-block instead of spinning
//! indefinitely on an idle queue.

use std::sync::atomic::AtomicBool;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use particle_core::mpsc::MpscQueue;

const QUEUE_CAPACITY: usize = 1024;

/// A `Condvar`-backed auto-reset event: `notify` sets a flag and wakes one
/// waiter; the first `wait_timeout` to observe the flag clears it.
/// Grounded in the spin-then-block posture particle-ipc's
/// `DirectionalReader` gives its reader thread via `SharedSemaphore`, with
/// the cross-process semaphore swapped for a plain in-process primitive.
pub(crate) struct Signal {
    flag: Mutex<bool>,
    cv: Condvar,
}

impl Signal {
    pub(crate) fn new() -> Self {
        Self { flag: Mutex::new(false), cv: Condvar::new() }
    }

    pub(crate) fn notify(&self) {
        *self.flag.lock().unwrap() = true;
        self.cv.notify_one();
    }

    /// Block until signaled or `timeout` elapses. Returns whether the
    /// signal fired (vs. a plain timeout).
    pub(crate) fn wait_timeout(&self, timeout: Duration) -> bool {
        let guard = self.flag.lock().unwrap();
        if *guard {
            drop(guard);
            *self.flag.lock().unwrap() = false;
            return true;
        }
        let (mut guard, _) = self.cv.wait_timeout(guard, timeout).unwrap();
        let fired = *guard;
        *guard = false;
        fired
    }
}

/// A small freelist of reusable byte buffers, grounded in the rotating
/// back-buffer pool particle-ipc's `DirectionalReader` uses, sized for
/// the smaller "just avoid reallocating every send" role spec.md
/// describes for in-process links rather than a fixed-size pinned pool.
pub(crate) struct BytePool {
    free: Mutex<Vec<Vec<u8>>>,
}

impl BytePool {
    pub(crate) fn new() -> Self {
        Self { free: Mutex::new(Vec::new()) }
    }

    pub(crate) fn rent(&self, payload: &[u8]) -> Vec<u8> {
        let mut buf = self.free.lock().unwrap().pop().unwrap_or_default();
        buf.clear();
        buf.extend_from_slice(payload);
        buf
    }

    pub(crate) fn return_buf(&self, mut buf: Vec<u8>) {
        const MAX_POOLED: usize = 32;
        let mut free = self.free.lock().unwrap();
        if free.len() < MAX_POOLED {
            buf.clear();
            free.push(buf);
        }
    }
}

/// One client's link to its reactor: a queue in each direction, a signal
/// per direction, and the byte pools that back each queue's sends.
pub struct InprocLink {
    pub(crate) to_server: MpscQueue<Vec<u8>>,
    pub(crate) to_client: MpscQueue<Vec<u8>>,
    pub(crate) server_signal: Signal,
    pub(crate) client_signal: Signal,
    pub(crate) to_server_pool: BytePool,
    pub(crate) to_client_pool: BytePool,
    /// Set by the client's own `dispose()`. The reactor-side reader has no
    /// EOF or error to observe on a plain MPSC queue, so this is the
    /// signal it polls to tell a clean client shutdown apart from an idle
    /// queue and fire its own disconnect.
    pub(crate) client_closed: AtomicBool,
}

impl InprocLink {
    pub(crate) fn new() -> Self {
        Self {
            to_server: MpscQueue::new(QUEUE_CAPACITY),
            to_client: MpscQueue::new(QUEUE_CAPACITY),
            server_signal: Signal::new(),
            client_signal: Signal::new(),
            to_server_pool: BytePool::new(),
            to_client_pool: BytePool::new(),
            client_closed: AtomicBool::new(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    #[test]
    fn signal_wakes_a_blocked_waiter_promptly() {
        let signal = Arc::new(Signal::new());
        let waiter = Arc::clone(&signal);
        let handle = std::thread::spawn(move || {
            let start = Instant::now();
            let fired = waiter.wait_timeout(Duration::from_secs(2));
            (fired, start.elapsed())
        });
        std::thread::sleep(Duration::from_millis(20));
        signal.notify();
        let (fired, elapsed) = handle.join().unwrap();
        assert!(fired);
        assert!(elapsed < Duration::from_millis(500));
    }

    #[test]
    fn signal_times_out_without_a_notification() {
        let signal = Signal::new();
        assert!(!signal.wait_timeout(Duration::from_millis(30)));
    }

    #[test]
    fn byte_pool_reuses_returned_buffers() {
        let pool = BytePool::new();
        let buf = pool.rent(b"hello");
        assert_eq!(buf.as_slice(), b"hello");
        pool.return_buf(buf);
        let buf2 = pool.rent(b"world");
        assert_eq!(buf2.as_slice(), b"world");
        assert_eq!(pool.free.lock().unwrap().len(), 0);
    }
}
