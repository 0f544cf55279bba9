//! Bounded multi-producer/multi-consumer queue (spec.md §4.5).
//!
//! Same per-slot sequence-number scheme as [`crate::mpsc::MpscQueue`], with
//! the consumer side also CASing its cursor. Used as the pool of socket-I/O
//! handles shared by TCP particles (spec.md §4.12). Grounded in the
//! teacher's `MpmcRingBuffer` (`kaos/src/disruptor/mpmc/mpmc_ring_buffer.rs`),
//! collapsed from its separate claim/complete-tracker machinery into the
//! single sequence-number-per-slot scheme spec.md specifies for both MPSC
//! and MPMC.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{ParticleError, Result};

struct Slot<T> {
    sequence: AtomicU64,
    value: UnsafeCell<Option<T>>,
}

/// Bounded MPMC queue. Capacity must be a power of two.
pub struct MpmcQueue<T> {
    buffer: Box<[Slot<T>]>,
    mask: usize,
    tail: AtomicU64,
    head: AtomicU64,
}

impl<T> MpmcQueue<T> {
    /// Create a queue with the given power-of-two capacity.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity.is_power_of_two() && capacity > 0, "capacity must be a power of two");
        let buffer = (0..capacity)
            .map(|i| Slot { sequence: AtomicU64::new(i as u64), value: UnsafeCell::new(None) })
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self { buffer, mask: capacity - 1, tail: AtomicU64::new(0), head: AtomicU64::new(0) }
    }

    /// Try to enqueue a value.
    pub fn push(&self, value: T) -> std::result::Result<(), T> {
        let mut pos = self.tail.load(Ordering::Relaxed);
        loop {
            let slot = &self.buffer[(pos as usize) & self.mask];
            let seq = slot.sequence.load(Ordering::Acquire);
            let diff = seq as i64 - pos as i64;

            if diff == 0 {
                match self.tail.compare_exchange_weak(pos, pos + 1, Ordering::Relaxed, Ordering::Relaxed) {
                    Ok(_) => {
                        unsafe { *slot.value.get() = Some(value) };
                        slot.sequence.store(pos + 1, Ordering::Release);
                        return Ok(());
                    }
                    Err(current) => pos = current,
                }
            } else if diff < 0 {
                return Err(value); // full
            } else {
                pos = self.tail.load(Ordering::Relaxed);
            }
        }
    }

    /// Try to dequeue a value. Multiple consumers race via CAS on `head`.
    pub fn pop(&self) -> Option<T> {
        let mut pos = self.head.load(Ordering::Relaxed);
        loop {
            let slot = &self.buffer[(pos as usize) & self.mask];
            let seq = slot.sequence.load(Ordering::Acquire);
            let diff = seq as i64 - (pos as i64 + 1);

            if diff == 0 {
                match self.head.compare_exchange_weak(pos, pos + 1, Ordering::Relaxed, Ordering::Relaxed) {
                    Ok(_) => {
                        let value = unsafe { (*slot.value.get()).take() };
                        slot.sequence.store(pos.wrapping_add(self.buffer.len() as u64), Ordering::Release);
                        return value;
                    }
                    Err(current) => pos = current,
                }
            } else if diff < 0 {
                return None; // empty
            } else {
                pos = self.head.load(Ordering::Relaxed);
            }
        }
    }

    /// Attempt to enqueue, mapping a full queue to a typed resource error —
    /// used by the handle pool, where a full pool on *return* is discarded
    /// rather than treated as fatal (spec.md §7.5).
    pub fn try_push(&self, value: T) -> Result<()> {
        self.push(value).map_err(|_| ParticleError::ResourceExhausted { resource: "mpmc pool" })
    }

    /// Capacity of the underlying ring.
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }
}

unsafe impl<T: Send> Send for MpmcQueue<T> {}
unsafe impl<T: Send> Sync for MpmcQueue<T> {}
