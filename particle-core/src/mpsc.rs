//! Bounded multi-producer/single-consumer queue (spec.md §4.4).
//!
//! Classic sequence-numbered slot algorithm: each producer CASes the tail
//! cursor to claim a slot, writes the value, then publishes by setting
//! `slot.sequence = pos + 1`. The consumer polls `slot.sequence` to know
//! when a claimed slot has actually been written, which is what lets
//! multiple producers race without ever blocking the single consumer.
//! Grounded in the teacher's `MpscRingBuffer` CAS-claim strategy
//! (`kaos/src/disruptor/mpsc/mpsc_ring_buffer.rs`), adapted here to the
//! per-slot sequence scheme spec.md calls for rather than the teacher's
//! bitmap-of-published-rounds variant.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::ParticleError;

struct Slot<T> {
    sequence: AtomicU64,
    value: UnsafeCell<Option<T>>,
}

/// Bounded MPSC queue. Capacity must be a power of two.
pub struct MpscQueue<T> {
    buffer: Box<[Slot<T>]>,
    mask: usize,
    tail: AtomicU64,
    head: AtomicU64,
}

impl<T> MpscQueue<T> {
    /// Create a queue with the given power-of-two capacity.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity.is_power_of_two() && capacity > 0, "capacity must be a power of two");
        let buffer = (0..capacity)
            .map(|i| Slot { sequence: AtomicU64::new(i as u64), value: UnsafeCell::new(None) })
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self { buffer, mask: capacity - 1, tail: AtomicU64::new(0), head: AtomicU64::new(0) }
    }

    /// Try to enqueue a value. Returns the value back if the queue is full.
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

    /// Try to dequeue the oldest value. `None` if the queue is empty.
    pub fn pop(&self) -> Option<T> {
        let pos = self.head.load(Ordering::Relaxed);
        let slot = &self.buffer[(pos as usize) & self.mask];
        let seq = slot.sequence.load(Ordering::Acquire);
        let diff = seq as i64 - (pos as i64 + 1);

        if diff == 0 {
            let value = unsafe { (*slot.value.get()).take() };
            slot.sequence.store(pos.wrapping_add(self.buffer.len() as u64), Ordering::Release);
            self.head.store(pos + 1, Ordering::Relaxed);
            value
        } else {
            None
        }
    }

    /// Attempt to enqueue, mapping a full queue to a typed backpressure error.
    pub fn try_push(&self, value: T) -> crate::error::Result<()> {
        self.push(value).map_err(|_| ParticleError::Backpressure { substrate: "mpsc queue" })
    }

    /// Capacity of the underlying ring.
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }
}

// SAFETY: slots are only mutated by the producer that wins the CAS on
// `tail` for that slot, and only read by the single consumer once the
// sequence number confirms the write is published.
unsafe impl<T: Send> Send for MpscQueue<T> {}
unsafe impl<T: Send> Sync for MpscQueue<T> {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn single_producer_round_trips() {
        let q = MpscQueue::new(4);
        q.push(1).unwrap();
        q.push(2).unwrap();
        assert_eq!(q.pop(), Some(1));
        assert_eq!(q.pop(), Some(2));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn rejects_push_when_full() {
        let q = MpscQueue::new(2);
        q.push(1).unwrap();
        q.push(2).unwrap();
        assert!(q.push(3).is_err());
    }

    #[test]
    fn multiple_producers_deliver_every_item_exactly_once() {
        let q = Arc::new(MpscQueue::new(1024));
        let producers: Vec<_> = (0..4)
            .map(|p| {
                let q = q.clone();
                thread::spawn(move || {
                    for i in 0..2000u64 {
                        let v = p * 2000 + i;
                        loop {
                            if q.push(v).is_ok() {
                                break;
                            }
                            std::hint::spin_loop();
                        }
                    }
                })
            })
            .collect();

        let mut received = Vec::new();
        while received.len() < 8000 {
            if let Some(v) = q.pop() {
                received.push(v);
            }
        }
        for p in producers {
            p.join().unwrap();
        }

        received.sort_unstable();
        received.dedup();
        assert_eq!(received.len(), 8000);
    }
}
