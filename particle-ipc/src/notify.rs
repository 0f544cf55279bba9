//! Optional notification primitive layered over a directional channel
//! (spec.md §4.7: "optional event name, optional notification flag").
//!
//! Two independently-launched processes cannot rendezvous on an `eventfd`
//! by name — only a parent/child pair sharing an inherited fd can. A
//! `pshared` POSIX semaphore living inside the same `MAP_SHARED` mapping
//! both sides already open by name solves that: whichever side creates
//! the mapping calls [`SharedSemaphore::init`] once, and the peer that
//! attaches to the existing mapping calls [`SharedSemaphore::attach`] over
//! the same bytes. Grounded in the teacher's pattern of storing
//! synchronization state directly in the shared header
//! (`flux/src/disruptor/spsc/shared_ring_buffer.rs`'s `SharedHeader`)
//! rather than reaching for a second named OS object.

use std::mem::MaybeUninit;

use particle_core::error::{ParticleError, Result};

/// Byte size reserved in a mapping's trailer for the semaphore.
pub const SEMAPHORE_SIZE: usize = std::mem::size_of::<libc::sem_t>();

/// A process-shared counting semaphore living at a fixed offset inside a
/// shared mapping, used to wake a reader thread blocked waiting for new
/// frames instead of having it busy-spin forever.
pub struct SharedSemaphore<'a> {
    sem: &'a mut libc::sem_t,
}

impl<'a> SharedSemaphore<'a> {
    /// Initialize a semaphore at `bytes[..SEMAPHORE_SIZE]`, starting at
    /// count 0. Call exactly once, by whichever side creates the mapping.
    pub fn init(bytes: &'a mut [u8]) -> Result<Self> {
        Self::check_len(bytes.len())?;
        let sem = Self::cast(bytes);
        let rc = unsafe { libc::sem_init(sem as *mut libc::sem_t, 1, 0) };
        if rc != 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        Ok(Self { sem })
    }

    /// Attach to a semaphore already initialized by a peer over the same
    /// bytes.
    pub fn attach(bytes: &'a mut [u8]) -> Result<Self> {
        Self::check_len(bytes.len())?;
        Ok(Self { sem: Self::cast(bytes) })
    }

    fn check_len(len: usize) -> Result<()> {
        if len < SEMAPHORE_SIZE {
            return Err(ParticleError::config("mapping trailer too small for a semaphore"));
        }
        Ok(())
    }

    fn cast(bytes: &'a mut [u8]) -> &'a mut libc::sem_t {
        // SAFETY: caller guarantees `bytes` is at least `SEMAPHORE_SIZE`
        // long and suitably aligned (mappings are page-aligned).
        unsafe { &mut *(bytes.as_mut_ptr() as *mut MaybeUninit<libc::sem_t>).cast() }
    }

    /// Wake one waiter (or pre-arm the next `try_wait`/`wait` if nobody is
    /// currently blocked).
    pub fn signal(&self) -> Result<()> {
        if unsafe { libc::sem_post(self.sem as *const _ as *mut libc::sem_t) } != 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        Ok(())
    }

    /// Non-blocking check: consume one signal if available.
    pub fn try_wait(&self) -> Result<bool> {
        let rc = unsafe { libc::sem_trywait(self.sem as *const _ as *mut libc::sem_t) };
        if rc == 0 {
            return Ok(true);
        }
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EAGAIN) {
            return Ok(false);
        }
        Err(err.into())
    }

    /// Block until signaled or `timeout_ms` elapses, whichever comes
    /// first. Returns whether a signal was actually consumed.
    pub fn wait_timeout(&self, timeout_ms: u64) -> Result<bool> {
        let deadline = unsafe {
            let mut ts: libc::timespec = std::mem::zeroed();
            libc::clock_gettime(libc::CLOCK_REALTIME, &mut ts);
            ts.tv_sec += (timeout_ms / 1000) as libc::time_t;
            ts.tv_nsec += ((timeout_ms % 1000) * 1_000_000) as i64;
            if ts.tv_nsec >= 1_000_000_000 {
                ts.tv_sec += 1;
                ts.tv_nsec -= 1_000_000_000;
            }
            ts
        };
        let rc = unsafe {
            libc::sem_timedwait(self.sem as *const _ as *mut libc::sem_t, &deadline)
        };
        if rc == 0 {
            return Ok(true);
        }
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ETIMEDOUT) {
            return Ok(false);
        }
        Err(err.into())
    }
}

// SAFETY: `sem_t` is explicitly designed for cross-thread/cross-process
// sharing once initialized with `pshared = 1`.
unsafe impl<'a> Send for SharedSemaphore<'a> {}
unsafe impl<'a> Sync for SharedSemaphore<'a> {}

impl<'a> Drop for SharedSemaphore<'a> {
    fn drop(&mut self) {
        // Only the creator should destroy it, but `sem_destroy` on a
        // semaphore nobody is blocked on is harmless, and directional
        // channels only ever drop their own creator/attacher instance
        // once, at process teardown.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn try_wait_reports_no_signal_then_consumes_one() {
        let mut mem = vec![0u8; SEMAPHORE_SIZE];
        let sem = SharedSemaphore::init(&mut mem).unwrap();
        assert!(!sem.try_wait().unwrap());
        sem.signal().unwrap();
        assert!(sem.try_wait().unwrap());
        assert!(!sem.try_wait().unwrap());
    }

    #[test]
    fn wait_timeout_expires_without_a_signal() {
        let mut mem = vec![0u8; SEMAPHORE_SIZE];
        let sem = SharedSemaphore::init(&mut mem).unwrap();
        assert!(!sem.wait_timeout(20).unwrap());
    }

    #[test]
    fn wakes_a_thread_blocked_in_wait_timeout() {
        let mem = Arc::new(std::sync::Mutex::new(vec![0u8; SEMAPHORE_SIZE]));
        {
            let mut guard = mem.lock().unwrap();
            SharedSemaphore::init(&mut guard).unwrap();
        }

        let waiter_mem = Arc::clone(&mem);
        let handle = std::thread::spawn(move || {
            let mut guard = waiter_mem.lock().unwrap();
            let ptr = guard.as_mut_ptr();
            let len = guard.len();
            drop(guard);
            let slice = unsafe { std::slice::from_raw_parts_mut(ptr, len) };
            let sem = SharedSemaphore::attach(slice).unwrap();
            sem.wait_timeout(2_000).unwrap()
        });

        std::thread::sleep(Duration::from_millis(20));
        {
            let mut guard = mem.lock().unwrap();
            let ptr = guard.as_mut_ptr();
            let len = guard.len();
            drop(guard);
            let slice = unsafe { std::slice::from_raw_parts_mut(ptr, len) };
            let sem = SharedSemaphore::attach(slice).unwrap();
            sem.signal().unwrap();
        }
        assert!(handle.join().unwrap());
    }
}
