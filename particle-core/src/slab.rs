//! Pinned slab allocator — the "concurrent buffer manager" of spec.md §4.2.
//!
//! Supplies fixed-size, pinned byte slices to socket I/O so the kernel may
//! reference them safely across async completions. Grounded in the
//! teacher's `CompletionTracker` claim/complete pattern (cas-based claim,
//! atomic completion) combined with `SharedRingBuffer`'s bump-allocated
//! slab layout.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::error::{ParticleError, Result};

struct Slab {
    memory: Box<[u8]>,
    slice_size: usize,
    bump: AtomicUsize,
}

impl Slab {
    fn new(slice_size: usize, slice_count: usize) -> Self {
        Self {
            memory: vec![0u8; slice_size * slice_count].into_boxed_slice(),
            slice_size,
            bump: AtomicUsize::new(0),
        }
    }

    fn slice_count(&self) -> usize {
        self.memory.len() / self.slice_size
    }

    /// Bump-allocate the next free slice index, or `None` if the slab is
    /// exhausted.
    fn try_bump(&self) -> Option<usize> {
        let idx = self.bump.fetch_add(1, Ordering::Relaxed);
        if idx < self.slice_count() { Some(idx) } else { None }
    }

    fn slice_ptr(&self, index: usize) -> *mut u8 {
        // SAFETY: `index` is always bounds-checked by the caller via
        // `slice_count()` before this is called.
        unsafe { self.memory.as_ptr().add(index * self.slice_size) as *mut u8 }
    }
}

/// A pinned, fixed-size byte slice bound to one in-flight I/O operation.
///
/// `SliceHandle` deliberately does not implement `Clone`: the "bound" state
/// described in spec.md §9 is a type-system invariant rather than a runtime
/// flag, so a slice can never be observed simultaneously in two handles. Its
/// `Drop` impl returns the slot to the free list it came from, so a handle
/// dropped without an explicit [`SlabAllocator::release`] call is still
/// reclaimed rather than leaked.
pub struct SliceHandle {
    slab_index: usize,
    slice_index: usize,
    ptr: *mut u8,
    len: usize,
    free_list: Arc<Mutex<Vec<(usize, usize)>>>,
}

impl Drop for SliceHandle {
    fn drop(&mut self) {
        self.free_list.lock().unwrap().push((self.slab_index, self.slice_index));
    }
}

// SAFETY: the slice region is exclusively owned by whichever thread holds
// the handle; the allocator never hands out the same (slab_index,
// slice_index) pair twice while a handle for it is outstanding.
unsafe impl Send for SliceHandle {}

impl SliceHandle {
    /// Borrow the slice as a read-only byte view.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }

    /// Borrow the slice as a mutable byte view.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.len) }
    }

    /// Full capacity of the slice in bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.len
    }
}

/// Pinned slab allocator producing fixed-size [`SliceHandle`]s.
///
/// The free list is a simple mutex-guarded stack rather than a fully
/// lock-free Treiber stack — slice churn sits far below the hot path of the
/// rings and queues this allocator feeds, so the uncontended mutex fast path
/// is indistinguishable from a CAS loop in practice while being much easier
/// to audit for ABA safety.
pub struct SlabAllocator {
    slice_size: usize,
    slices_per_slab: usize,
    byte_budget: Option<usize>,
    bytes_allocated: AtomicUsize,
    slabs: Mutex<Vec<Slab>>,
    free_list: Arc<Mutex<Vec<(usize, usize)>>>,
    allocating: AtomicBool,
    disposed: AtomicBool,
}

impl SlabAllocator {
    /// Create an allocator that hands out `slice_size`-byte slices,
    /// growing by `slices_per_slab` slices at a time, optionally capped at
    /// `byte_budget` total bytes.
    pub fn new(slice_size: usize, slices_per_slab: usize, byte_budget: Option<usize>) -> Self {
        Self {
            slice_size,
            slices_per_slab,
            byte_budget,
            bytes_allocated: AtomicUsize::new(0),
            slabs: Mutex::new(Vec::new()),
            free_list: Arc::new(Mutex::new(Vec::new())),
            allocating: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        }
    }

    /// Eagerly allocate `slice_size * slices_per_slab` bytes as the first
    /// slab, so the first `bind()` call doesn't pay for slab growth.
    pub fn with_initial_slab(self) -> Result<Self> {
        self.grow()?;
        Ok(self)
    }

    /// Attach a free slice. Attempts, in order: pop from the free list,
    /// bump-allocate from the current slab, grow a new slab and retry.
    pub fn bind(&self) -> Result<SliceHandle> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(ParticleError::misuse("slab allocator disposed"));
        }

        if let Some((slab_index, slice_index)) = self.free_list.lock().unwrap().pop() {
            return Ok(self.handle_for(slab_index, slice_index));
        }

        loop {
            {
                let slabs = self.slabs.lock().unwrap();
                if let Some((slab_index, slab)) = slabs.iter().enumerate().last() {
                    if let Some(slice_index) = slab.try_bump() {
                        let ptr = slab.slice_ptr(slice_index);
                        let len = self.slice_size;
                        return Ok(SliceHandle {
                            slab_index,
                            slice_index,
                            ptr,
                            len,
                            free_list: Arc::clone(&self.free_list),
                        });
                    }
                }
            }
            self.grow()?;
        }
    }

    /// Return a slice to the free list for reuse. Equivalent to dropping
    /// the handle directly — `SliceHandle::drop` already returns it to the
    /// free list it came from — kept as an explicit method so callers that
    /// are done with a handle can say so the same way they said `bind()`.
    pub fn release(&self, handle: SliceHandle) {
        drop(handle);
    }

    /// Invalidate the allocator; all outstanding slabs are dropped and
    /// subsequent `bind()` calls fail. Slices already bound remain valid
    /// for as long as their handle lives (the backing `Vec<u8>` is only
    /// freed once every `Slab` entry referencing it is dropped), and
    /// dropping or releasing a handle after `dispose` still pushes onto the
    /// free list harmlessly — nothing reads it again.
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
        debug!("slab allocator disposed");
    }

    fn handle_for(&self, slab_index: usize, slice_index: usize) -> SliceHandle {
        let slabs = self.slabs.lock().unwrap();
        let slab = &slabs[slab_index];
        SliceHandle {
            slab_index,
            slice_index,
            ptr: slab.slice_ptr(slice_index),
            len: self.slice_size,
            free_list: Arc::clone(&self.free_list),
        }
    }

    fn grow(&self) -> Result<()> {
        // Single-flight: only one thread actually grows; the rest spin
        // briefly and retry their own bind loop.
        if self.allocating.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_err() {
            std::thread::yield_now();
            return Ok(());
        }

        let result = (|| {
            let additional = self.slice_size * self.slices_per_slab;
            if let Some(budget) = self.byte_budget {
                let already = self.bytes_allocated.load(Ordering::Relaxed);
                if already + additional > budget {
                    warn!(budget, already, additional, "slab allocator exhausted its byte budget");
                    return Err(ParticleError::ResourceExhausted { resource: "slab byte budget" });
                }
            }
            self.slabs.lock().unwrap().push(Slab::new(self.slice_size, self.slices_per_slab));
            self.bytes_allocated.fetch_add(additional, Ordering::Relaxed);
            debug!(slice_size = self.slice_size, slices_per_slab = self.slices_per_slab, "slab allocator grew");
            Ok(())
        })();

        self.allocating.store(false, Ordering::Release);
        result
    }
}
