//! Shared SPSC ring over raw bytes in mapped memory (spec.md §4.6, §6).
//!
//! Grounded in the teacher's `SharedRingBuffer`
//! (`flux/src/disruptor/spsc/shared_ring_buffer.rs`) — same idea (a
//! cache-line-separated head/tail pair living in `MAP_SHARED` memory, a
//! power-of-two data region, `Release`/`Acquire` cursor publication — but
//! generalized from fixed-size `T` slots to spec.md's length-prefixed byte
//! frames, and built on top of a raw `&mut [u8]` the directional channel
//! owns the mapping for, rather than owning its own `mmap`/`File` pair.

use std::sync::atomic::{AtomicU64, Ordering};

use particle_core::error::{ParticleError, Result};

/// Header byte size: two 64-byte cache lines (spec.md §6).
pub const HEADER_SIZE: usize = 128;

#[repr(C)]
struct RingHeader {
    head: AtomicU64,      // offset 0
    _pad0: [u8; 56],
    tail: AtomicU64,       // offset 64
    _pad1: [u8; 24],
    hb_writer: AtomicU64,  // offset 96
    hb_reader: AtomicU64,  // offset 104
    _pad2: [u8; 16],
}

const _: () = assert!(std::mem::size_of::<RingHeader>() == HEADER_SIZE);

/// Outcome of a `try_dequeue` call.
pub enum DequeueOutcome {
    /// Nothing buffered.
    Empty,
    /// A frame is ready but `dst` is smaller than its payload.
    TooSmall { needed: usize },
    /// `len` bytes of payload were copied into `dst`.
    Received(usize),
}

/// A length-prefixed byte ring living in memory the caller owns (typically
/// an `mmap`). `bytes` must be at least `HEADER_SIZE + capacity`, and
/// `capacity` must be a power of two.
pub struct SharedByteRing<'a> {
    header: &'a RingHeader,
    data: &'a mut [u8],
    mask: u64,
    max_frame: usize,
}

impl<'a> SharedByteRing<'a> {
    /// Capacity required for the ring header plus a data region of
    /// `capacity` bytes.
    pub const fn mapping_size(capacity: usize) -> usize {
        HEADER_SIZE + capacity
    }

    /// Construct a ring over `bytes`, zero-initializing the header cursors.
    /// Used by the side that creates the mapping.
    pub fn init(bytes: &'a mut [u8], capacity: usize, max_frame: usize) -> Result<Self> {
        Self::validate(bytes.len(), capacity, max_frame)?;
        let (header_bytes, data) = bytes.split_at_mut(HEADER_SIZE);
        let header = unsafe { &*(header_bytes.as_ptr() as *const RingHeader) };
        header.head.store(0, Ordering::Relaxed);
        header.tail.store(0, Ordering::Relaxed);
        header.hb_writer.store(0, Ordering::Relaxed);
        header.hb_reader.store(0, Ordering::Relaxed);
        Ok(Self { header, data, mask: (capacity - 1) as u64, max_frame })
    }

    /// Construct a ring over `bytes` that was already initialized by a
    /// peer. Used by the side that opens an existing mapping.
    pub fn attach(bytes: &'a mut [u8], capacity: usize, max_frame: usize) -> Result<Self> {
        Self::validate(bytes.len(), capacity, max_frame)?;
        let (header_bytes, data) = bytes.split_at_mut(HEADER_SIZE);
        let header = unsafe { &*(header_bytes.as_ptr() as *const RingHeader) };
        Ok(Self { header, data, mask: (capacity - 1) as u64, max_frame })
    }

    fn validate(len: usize, capacity: usize, max_frame: usize) -> Result<()> {
        if !capacity.is_power_of_two() {
            return Err(ParticleError::config("ring data region must be a power of two"));
        }
        if len < Self::mapping_size(capacity) {
            return Err(ParticleError::config("mapping too small for requested capacity"));
        }
        if max_frame > capacity.saturating_sub(5) {
            return Err(ParticleError::config("max_frame must be <= capacity - 5"));
        }
        Ok(())
    }

    /// Total data region capacity in bytes.
    pub fn capacity(&self) -> usize {
        (self.mask + 1) as usize
    }

    /// Current writer heartbeat tick.
    pub fn writer_heartbeat(&self) -> u64 {
        self.header.hb_writer.load(Ordering::Relaxed)
    }

    /// Current reader heartbeat tick.
    pub fn reader_heartbeat(&self) -> u64 {
        self.header.hb_reader.load(Ordering::Relaxed)
    }

    fn used(&self, head: u64, tail: u64) -> u64 {
        tail.wrapping_sub(head)
    }

    fn write_wrapping(&mut self, pos: u64, bytes: &[u8]) {
        let start = (pos & self.mask) as usize;
        let cap = self.data.len();
        let first = (cap - start).min(bytes.len());
        self.data[start..start + first].copy_from_slice(&bytes[..first]);
        if first < bytes.len() {
            self.data[..bytes.len() - first].copy_from_slice(&bytes[first..]);
        }
    }

    fn read_wrapping(&self, pos: u64, out: &mut [u8]) {
        let start = (pos & self.mask) as usize;
        let cap = self.data.len();
        let first = (cap - start).min(out.len());
        out[..first].copy_from_slice(&self.data[start..start + first]);
        let out_len = out.len();
        if first < out_len {
            out[first..].copy_from_slice(&self.data[..out_len - first]);
        }
    }

    /// Enqueue a length-prefixed frame. `Ok(true)` on success, `Ok(false)`
    /// if the ring is full (transient backpressure), `Err` if `payload` is
    /// larger than this ring's configured `max_frame`.
    pub fn try_enqueue(&mut self, payload: &[u8]) -> Result<bool> {
        if payload.len() > self.max_frame {
            return Err(ParticleError::Oversize { len: payload.len(), limit: self.max_frame });
        }

        let need = 4 + payload.len() as u64;
        let head = self.header.head.load(Ordering::Acquire);
        let tail = self.header.tail.load(Ordering::Relaxed);
        let capacity = self.capacity() as u64;

        // One byte of gap is always preserved so full/empty stay unambiguous.
        if self.used(head, tail) + need >= capacity {
            return Ok(false);
        }

        let len_bytes = (payload.len() as u32).to_le_bytes();
        self.write_wrapping(tail, &len_bytes);
        self.write_wrapping(tail + 4, payload);

        // Release: the payload copy above must be globally visible before
        // any consumer observes the new tail.
        std::sync::atomic::fence(Ordering::Release);
        self.header.tail.store(tail + need, Ordering::Release);
        self.header.hb_writer.fetch_add(1, Ordering::Relaxed);
        Ok(true)
    }

    /// Dequeue the oldest frame into `dst`.
    pub fn try_dequeue(&mut self, dst: &mut [u8]) -> Result<DequeueOutcome> {
        let tail = self.header.tail.load(Ordering::Acquire);
        let head = self.header.head.load(Ordering::Relaxed);

        if self.used(head, tail) == 0 {
            return Ok(DequeueOutcome::Empty);
        }
        if self.used(head, tail) < 4 {
            // Header not fully published yet.
            return Ok(DequeueOutcome::Empty);
        }

        let mut len_bytes = [0u8; 4];
        self.read_wrapping(head, &mut len_bytes);
        let len = u32::from_le_bytes(len_bytes) as usize;

        if len == 0 || len > self.max_frame {
            return Err(ParticleError::protocol(format!(
                "corrupt frame header: length {len} outside (0, {}]",
                self.max_frame
            )));
        }
        if self.used(head, tail) < 4 + len as u64 {
            // Producer published the length but hasn't finished the
            // payload copy's visibility yet; treat as not-yet-available.
            return Ok(DequeueOutcome::Empty);
        }
        if dst.len() < len {
            return Ok(DequeueOutcome::TooSmall { needed: len });
        }

        self.read_wrapping(head + 4, &mut dst[..len]);
        self.header.head.store(head + 4 + len as u64, Ordering::Release);
        self.header.hb_reader.fetch_add(1, Ordering::Relaxed);
        Ok(DequeueOutcome::Received(len))
    }

    /// Publish a bogus length header at the current head with no payload
    /// behind it, for exercising `try_dequeue`'s corrupt-header path from
    /// outside the ring without a full writer/reader round trip.
    #[cfg(test)]
    pub(crate) fn corrupt_header_for_test(&mut self, len: u32) {
        let head = self.header.head.load(Ordering::Relaxed);
        self.write_wrapping(head, &len.to_le_bytes());
        self.header.tail.store(head + 4, Ordering::Release);
    }
}

// SAFETY: a `SharedByteRing` is constructed per-side (one reader, one
// writer) over memory that is genuinely shared across processes; moving
// the Rust-side handle between threads within one process is sound as
// long as the SPSC contract (one producer, one consumer) is upheld by the
// caller, exactly as for `particle_core::spsc::SpscRing`.
unsafe impl<'a> Send for SharedByteRing<'a> {}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_ring(capacity: usize, max_frame: usize) -> Vec<u8> {
        vec![0u8; SharedByteRing::mapping_size(capacity)]
    }

    #[test]
    fn round_trip_small_frame() {
        let mut mem = make_ring(1024, 1019);
        let mut ring = SharedByteRing::init(&mut mem, 1024, 1019).unwrap();
        assert!(ring.try_enqueue(b"ping").unwrap());

        let mut buf = [0u8; 16];
        match ring.try_dequeue(&mut buf).unwrap() {
            DequeueOutcome::Received(len) => assert_eq!(&buf[..len], b"ping"),
            _ => panic!("expected a frame"),
        }
    }

    #[test]
    fn rejects_oversize_payload() {
        let mut mem = make_ring(64, 59);
        let mut ring = SharedByteRing::init(&mut mem, 64, 59).unwrap();
        let payload = vec![0u8; 60];
        assert!(matches!(ring.try_enqueue(&payload), Err(ParticleError::Oversize { .. })));
    }

    #[test]
    fn signals_backpressure_when_full() {
        let mut mem = make_ring(32, 27);
        let mut ring = SharedByteRing::init(&mut mem, 32, 27).unwrap();
        // Each "x" frame takes 4 + 20 = 24 bytes; capacity is 32, so a
        // second enqueue must not fit (24*2 >= 32).
        let payload = vec![b'x'; 20];
        assert!(ring.try_enqueue(&payload).unwrap());
        assert!(!ring.try_enqueue(&payload).unwrap());
    }

    #[test]
    fn wraps_around_the_data_region() {
        let mut mem = make_ring(64, 59);
        let mut ring = SharedByteRing::init(&mut mem, 64, 59).unwrap();
        let mut buf = [0u8; 64];

        for i in 0u8..50 {
            let payload = vec![i; 10];
            while !ring.try_enqueue(&payload).unwrap() {
                match ring.try_dequeue(&mut buf).unwrap() {
                    DequeueOutcome::Received(len) => assert_eq!(buf[..len], payload[..]),
                    _ => panic!("expected to drain to make room"),
                }
            }
        }
        let mut drained = 0;
        while let DequeueOutcome::Received(_) = ring.try_dequeue(&mut buf).unwrap() {
            drained += 1;
        }
        assert!(drained > 0);
    }

    #[test]
    fn corrupt_length_header_is_reported_as_a_protocol_violation() {
        let mut mem = make_ring(64, 59);
        let mut ring = SharedByteRing::init(&mut mem, 64, 59).unwrap();
        assert!(ring.try_enqueue(b"ping").unwrap());
        // Overwrite the length prefix just written with a value beyond
        // what this ring can legally hold.
        let bad_len = (ring.max_frame as u32 + 1).to_le_bytes();
        ring.write_wrapping(0, &bad_len);
        let mut buf = [0u8; 64];
        assert!(matches!(ring.try_dequeue(&mut buf), Err(ParticleError::ProtocolViolation { .. })));
    }

    #[test]
    fn reports_destination_too_small() {
        let mut mem = make_ring(64, 59);
        let mut ring = SharedByteRing::init(&mut mem, 64, 59).unwrap();
        ring.try_enqueue(b"hello world").unwrap();
        let mut tiny = [0u8; 2];
        match ring.try_dequeue(&mut tiny).unwrap() {
            DequeueOutcome::TooSmall { needed } => assert_eq!(needed, 11),
            _ => panic!("expected TooSmall"),
        }
    }
}
