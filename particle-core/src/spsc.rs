//! Bounded single-producer/single-consumer ring buffer for typed payloads
//! (spec.md §4.3). Used internally to stage byte-slice handles; no CAS is
//! needed since each side only ever touches its own cursor.

use crate::cursor::PaddedCursor;

/// Fixed-capacity SPSC ring over `T`. Capacity must be a power of two.
pub struct SpscRing<T> {
    buffer: Box<[Option<T>]>,
    mask: usize,
    head: PaddedCursor,
    tail: PaddedCursor,
}

impl<T> SpscRing<T> {
    /// Create a ring with the given power-of-two capacity.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity.is_power_of_two() && capacity > 0, "capacity must be a power of two");
        let mut buffer = Vec::with_capacity(capacity);
        buffer.resize_with(capacity, || None);
        Self {
            buffer: buffer.into_boxed_slice(),
            mask: capacity - 1,
            head: PaddedCursor::new(0),
            tail: PaddedCursor::new(0),
        }
    }

    /// Push a value; returns it back on failure if the ring is full.
    pub fn push(&self, value: T) -> Result<(), T> {
        let tail = self.tail.load();
        let head = self.head.load();
        if tail.wrapping_sub(head) >= self.buffer.len() as u64 {
            return Err(value);
        }
        let idx = (tail as usize) & self.mask;
        // SAFETY: single producer; this slot was vacated by the consumer
        // before it advanced `head` past it.
        unsafe {
            let slot = self.buffer.as_ptr().add(idx) as *mut Option<T>;
            slot.write(Some(value));
        }
        self.tail.store(tail.wrapping_add(1));
        Ok(())
    }

    /// Pop the oldest value, or `None` if the ring is empty.
    pub fn pop(&self) -> Option<T> {
        let head = self.head.load();
        let tail = self.tail.load();
        if head == tail {
            return None;
        }
        let idx = (head as usize) & self.mask;
        // SAFETY: single consumer; this slot was published by the producer
        // before it advanced `tail` past it.
        let value = unsafe {
            let slot = self.buffer.as_ptr().add(idx) as *mut Option<T>;
            (*slot).take()
        };
        self.head.store(head.wrapping_add(1));
        value
    }

    /// Number of items currently queued.
    pub fn len(&self) -> usize {
        (self.tail.load().wrapping_sub(self.head.load())) as usize
    }

    /// Whether the ring is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total capacity.
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }
}

// SAFETY: SPSC contract — exactly one producer thread calls `push`, exactly
// one consumer thread calls `pop`; they may differ from the thread that
// constructed the ring.
unsafe impl<T: Send> Send for SpscRing<T> {}
unsafe impl<T: Send> Sync for SpscRing<T> {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn push_pop_round_trips() {
        let ring = SpscRing::new(4);
        ring.push(1).unwrap();
        ring.push(2).unwrap();
        assert_eq!(ring.pop(), Some(1));
        assert_eq!(ring.pop(), Some(2));
        assert_eq!(ring.pop(), None);
    }

    #[test]
    fn rejects_push_when_full() {
        let ring = SpscRing::new(2);
        ring.push(1).unwrap();
        ring.push(2).unwrap();
        assert_eq!(ring.push(3), Err(3));
    }

    #[test]
    fn cross_thread_ordering_is_preserved() {
        let ring = Arc::new(SpscRing::new(1024));
        let producer = ring.clone();
        let handle = thread::spawn(move || {
            for i in 0..10_000u64 {
                while producer.push(i).is_err() {
                    std::hint::spin_loop();
                }
            }
        });

        let mut expected = 0u64;
        let mut received = 0;
        while received < 10_000 {
            if let Some(v) = ring.pop() {
                assert_eq!(v, expected);
                expected += 1;
                received += 1;
            }
        }
        handle.join().unwrap();
    }
}
