//! Cache-line-padded monotonic cursor (spec.md §3, §4.1).
//!
//! Two cursors placed back to back never share a cache line, which keeps a
//! producer spinning on its own tail from bouncing the consumer's head
//! between cores.

use std::sync::atomic::{AtomicU64, Ordering};

/// Size of a cache line on the overwhelming majority of modern CPUs.
pub const CACHE_LINE_SIZE: usize = 64;

/// A 64-bit monotonic counter padded to a full cache line.
///
/// Publication is always `Release`, observation is always `Acquire` — the
/// ordering contract in spec.md §4.1 forbids downgrading to `Relaxed` even
/// where it would pass on x86's strong memory model.
#[repr(align(64))]
pub struct PaddedCursor {
    value: AtomicU64,
    _pad: [u8; CACHE_LINE_SIZE - std::mem::size_of::<AtomicU64>()],
}

impl PaddedCursor {
    /// Create a cursor starting at `initial`.
    pub const fn new(initial: u64) -> Self {
        Self {
            value: AtomicU64::new(initial),
            _pad: [0u8; CACHE_LINE_SIZE - std::mem::size_of::<AtomicU64>()],
        }
    }

    /// Acquire-load the current value.
    #[inline]
    pub fn load(&self) -> u64 {
        self.value.load(Ordering::Acquire)
    }

    /// Release-store a new value, publishing everything written before the
    /// call to any thread that subsequently `load`s this cursor.
    #[inline]
    pub fn store(&self, value: u64) {
        self.value.store(value, Ordering::Release);
    }

    /// Compare-and-swap for multi-producer coordination (§4.4, §4.5).
    #[inline]
    pub fn compare_exchange(&self, current: u64, new: u64) -> std::result::Result<u64, u64> {
        self.value.compare_exchange_weak(current, new, Ordering::AcqRel, Ordering::Acquire)
    }

    /// Atomically add `delta` and return the previous value.
    #[inline]
    pub fn fetch_add(&self, delta: u64) -> u64 {
        self.value.fetch_add(delta, Ordering::AcqRel)
    }
}

impl Default for PaddedCursor {
    fn default() -> Self {
        Self::new(0)
    }
}

// Compile-time guard: two adjacent cursors must not share a cache line.
const _: () = assert!(std::mem::size_of::<PaddedCursor>() == CACHE_LINE_SIZE);

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn cursor_is_cache_line_sized() {
        assert_eq!(std::mem::size_of::<PaddedCursor>(), CACHE_LINE_SIZE);
        assert_eq!(std::mem::align_of::<PaddedCursor>(), CACHE_LINE_SIZE);
    }

    #[test]
    fn store_then_load_round_trips() {
        let cursor = PaddedCursor::new(0);
        cursor.store(42);
        assert_eq!(cursor.load(), 42);
    }

    #[test]
    fn compare_exchange_only_succeeds_on_match() {
        let cursor = PaddedCursor::new(10);
        assert_eq!(cursor.compare_exchange(10, 11), Ok(10));
        assert_eq!(cursor.load(), 11);
        assert!(cursor.compare_exchange(10, 99).is_err());
    }

    #[test]
    fn publication_is_visible_across_threads() {
        let cursor = Arc::new(PaddedCursor::new(0));
        let writer = cursor.clone();
        let handle = thread::spawn(move || {
            for i in 1..=1000u64 {
                writer.store(i);
            }
        });
        handle.join().unwrap();
        assert_eq!(cursor.load(), 1000);
    }
}
