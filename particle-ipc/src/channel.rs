//! Directional channel: one reader or writer half of a named shared byte
//! mapping (spec.md §4.7).
//!
//! Grounded in the teacher's `flux-ipc` crate (`flux-ipc/src/lib.rs`),
//! which opens a named `mmap` with create-or-attach retry and hands back
//! a typed ring over it; generalized here to the byte-oriented
//! [`SharedByteRing`](crate::ring::SharedByteRing) and split into an
//! explicit reader (background-thread) half and writer (inline-send)
//! half, matching spec.md's asymmetric reader/writer roles.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use memmap2::MmapMut;
use particle_core::backoff::Backoff;
use particle_core::error::{ParticleError, Result};
use tracing::{debug, warn};

use crate::notify::{SharedSemaphore, SEMAPHORE_SIZE};
use crate::ring::{DequeueOutcome, SharedByteRing};

/// Callback invoked with a view into the current back buffer. Valid only
/// for the duration of the call (spec.md §4.7 zero-copy contract); the
/// peer identity a received frame belongs to is attached one layer up by
/// the mapped particle, which owns one channel per direction per peer.
pub type FrameCallback = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Invoked at most once, from the reader thread itself, when the reader
/// hits a corrupt or oversize frame header and stops rather than draining
/// another frame. Callers use this to fire their own disconnect path —
/// the reader thread is already unwinding by the time this runs, so the
/// callback must not try to join it.
pub type FatalCallback = Arc<dyn Fn() + Send + Sync>;

/// Default number of frames drained per reader batch.
pub const DEFAULT_BATCH: usize = 32;
/// Default number of rotating back buffers.
pub const DEFAULT_POOL: usize = 8;
/// Timeout budget for joining the reader thread on disposal.
const DISPOSE_JOIN_TIMEOUT: Duration = Duration::from_millis(200);

/// Construction parameters for a directional channel half.
pub struct ChannelConfig {
    pub base_dir: PathBuf,
    pub map_name: String,
    pub capacity: usize,
    pub max_frame: usize,
    pub notify: bool,
    pub batch: usize,
    pub pool_size: usize,
}

impl ChannelConfig {
    pub fn new(base_dir: impl Into<PathBuf>, map_name: impl Into<String>, capacity: usize, max_frame: usize) -> Self {
        Self {
            base_dir: base_dir.into(),
            map_name: map_name.into(),
            capacity,
            max_frame,
            notify: true,
            batch: DEFAULT_BATCH,
            pool_size: DEFAULT_POOL,
        }
    }

    fn mapping_path(&self) -> PathBuf {
        self.base_dir.join(format!("{}.map", self.map_name))
    }

    fn mapping_size(&self) -> usize {
        SharedByteRing::mapping_size(self.capacity) + if self.notify { SEMAPHORE_SIZE } else { 0 }
    }
}

/// Open (create if absent) the named mapping, retrying a handful of times
/// to ride out attach-before-create races between the two sides.
fn open_mapping(cfg: &ChannelConfig, creator: bool) -> Result<(MmapMut, bool)> {
    std::fs::create_dir_all(&cfg.base_dir)?;
    let path = cfg.mapping_path();
    let size = cfg.mapping_size();

    if creator {
        let file = OpenOptions::new().create(true).truncate(false).read(true).write(true).open(&path)?;
        file.set_len(size as u64)?;
        let mmap = unsafe { MmapMut::map_mut(&file)? };
        return Ok((mmap, true));
    }

    for attempt in 0..50 {
        match OpenOptions::new().read(true).write(true).open(&path) {
            Ok(file) => {
                if file.metadata()?.len() as usize >= size {
                    let mmap = unsafe { MmapMut::map_mut(&file)? };
                    return Ok((mmap, false));
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        std::thread::sleep(Duration::from_millis(5 + attempt));
    }
    Err(ParticleError::AttachTimeout {
        attempts: 50,
        reason: format!("mapping {:?} never appeared", path),
    })
}

fn split_trailer(mmap: &mut MmapMut, has_notify: bool) -> (&mut [u8], Option<&mut [u8]>) {
    if has_notify {
        let total = mmap.len();
        let (ring_bytes, sem_bytes) = mmap.split_at_mut(total - SEMAPHORE_SIZE);
        (ring_bytes, Some(sem_bytes))
    } else {
        (&mut mmap[..], None)
    }
}

/// Owning handle for a reader half: owns the mapping, the ring, the
/// optional semaphore, and a background thread draining frames into a
/// rotating back-buffer pool.
pub struct DirectionalReader {
    running: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl DirectionalReader {
    /// Start a background reader thread. `creator` controls whether this
    /// side initializes the mapping or attaches to one created by the
    /// peer. `on_frame` is invoked with a view valid only for the
    /// duration of the call (spec.md §4.7 zero-copy contract). `on_fatal`
    /// is invoked once if the reader has to stop because of a corrupt or
    /// oversize frame header.
    pub fn spawn(cfg: ChannelConfig, creator: bool, on_frame: FrameCallback, on_fatal: FatalCallback) -> Result<Self> {
        let (mut mmap, _) = open_mapping(&cfg, creator)?;
        let running = Arc::new(AtomicBool::new(true));
        let thread_running = Arc::clone(&running);
        let batch = cfg.batch.max(1);
        let pool_size = cfg.pool_size.max(1);
        let max_frame = cfg.max_frame;
        let notify_enabled = cfg.notify;
        let map_name = cfg.map_name.clone();

        let handle = std::thread::Builder::new()
            .name(format!("particle-ipc-reader-{map_name}"))
            .spawn(move || {
                // SAFETY: this thread exclusively owns `mmap` for its
                // lifetime; it is moved into the closure and never
                // touched by the constructing thread again.
                let (ring_bytes, sem_bytes) = split_trailer(&mut mmap, notify_enabled);
                let mut ring = match if creator {
                    SharedByteRing::init(ring_bytes, cfg.capacity, max_frame)
                } else {
                    SharedByteRing::attach(ring_bytes, cfg.capacity, max_frame)
                } {
                    Ok(r) => r,
                    Err(e) => {
                        warn!(error = %e, "directional reader failed to bind ring");
                        return;
                    }
                };
                let sem = sem_bytes.map(|bytes| {
                    if creator {
                        SharedSemaphore::init(bytes)
                    } else {
                        SharedSemaphore::attach(bytes)
                    }
                    .expect("semaphore trailer sized correctly")
                });

                let mut pool: Vec<Vec<u8>> = (0..pool_size).map(|_| vec![0u8; max_frame]).collect();
                let mut pool_index = 0usize;
                let mut backoff = Backoff::new();

                while thread_running.load(Ordering::Acquire) {
                    let mut drained_this_batch = 0;
                    while drained_this_batch < batch {
                        let buf = &mut pool[pool_index];
                        match ring.try_dequeue(buf) {
                            Ok(DequeueOutcome::Received(len)) => {
                                on_frame(&buf[..len]);
                                pool_index = (pool_index + 1) % pool.len();
                                drained_this_batch += 1;
                                backoff.reset();
                            }
                            Ok(DequeueOutcome::Empty) => break,
                            Ok(DequeueOutcome::TooSmall { needed }) => {
                                warn!(needed, "frame exceeds configured max_frame, dropping");
                                break;
                            }
                            Err(e) => {
                                warn!(error = %e, "corrupt frame header, stopping reader");
                                thread_running.store(false, Ordering::Release);
                                on_fatal();
                                return;
                            }
                        }
                    }

                    if drained_this_batch == 0 && thread_running.load(Ordering::Acquire) {
                        if let Some(sem) = &sem {
                            let _ = sem.wait_timeout(5);
                        } else {
                            backoff.spin();
                        }
                    }
                }
                debug!(map_name, "directional reader stopped");
            })?;

        Ok(Self { running, handle: Mutex::new(Some(handle)) })
    }

    /// Stop the reader thread and join it. Polls for up to
    /// [`DISPOSE_JOIN_TIMEOUT`] before giving up and detaching — std
    /// threads cannot be forcibly interrupted, so a reader wedged inside
    /// a single `on_frame` callback outlives this call rather than
    /// blocking it forever.
    pub fn dispose(&self) {
        self.running.store(false, Ordering::Release);
        let mut slot = self.handle.lock().unwrap();
        let finished = match slot.as_ref() {
            Some(handle) => {
                let deadline = std::time::Instant::now() + DISPOSE_JOIN_TIMEOUT;
                let mut finished = handle.is_finished();
                while !finished && std::time::Instant::now() < deadline {
                    std::thread::sleep(Duration::from_millis(5));
                    finished = handle.is_finished();
                }
                finished
            }
            None => return,
        };
        if finished {
            if let Some(handle) = slot.take() {
                let _ = handle.join();
            }
        }
        // Else: the reader is wedged inside a callback; leave the handle
        // in place so a later `dispose()` call (or `Drop`) can retry.
    }
}

impl Drop for DirectionalReader {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Owning handle for a writer half: owns the mapping and ring, sends
/// inline on the caller's thread.
pub struct DirectionalWriter {
    ring: Mutex<SharedByteRing<'static>>,
    sem: Option<SharedSemaphore<'static>>,
    _mmap: MmapMut,
    max_frame: usize,
}

impl DirectionalWriter {
    /// Open (or create) the mapping and bind a ring for sending.
    pub fn open(cfg: ChannelConfig, creator: bool) -> Result<Self> {
        let (mut mmap, _) = open_mapping(&cfg, creator)?;
        let max_frame = cfg.max_frame;

        // SAFETY: we extend the borrow to 'static because `ring`/`sem`
        // are stored alongside `_mmap` in the same struct and dropped
        // together; nothing ever observes the mapping bytes after the
        // struct itself is gone.
        let mmap_ptr: *mut MmapMut = &mut mmap;
        let (ring_bytes, sem_bytes) = split_trailer(unsafe { &mut *mmap_ptr }, cfg.notify);
        let ring_bytes: &'static mut [u8] = unsafe { std::mem::transmute(ring_bytes) };
        let sem_bytes: Option<&'static mut [u8]> = sem_bytes.map(|b| unsafe { std::mem::transmute(b) });

        let ring = if creator {
            SharedByteRing::init(ring_bytes, cfg.capacity, max_frame)?
        } else {
            SharedByteRing::attach(ring_bytes, cfg.capacity, max_frame)?
        };
        let sem = sem_bytes
            .map(|bytes| if creator { SharedSemaphore::init(bytes) } else { SharedSemaphore::attach(bytes) })
            .transpose()?;

        Ok(Self { ring: Mutex::new(ring), sem, _mmap: mmap, max_frame })
    }

    /// Busy-spin `try_enqueue` with exponential backoff until it succeeds,
    /// then signal the reader if notifications are configured. Zero-length
    /// payloads are dropped silently (caller's responsibility per
    /// spec.md §4.9); oversize payloads fail fast.
    pub fn send(&self, payload: &[u8]) -> Result<()> {
        if payload.len() > self.max_frame {
            return Err(ParticleError::Oversize { len: payload.len(), limit: self.max_frame });
        }
        let mut backoff = Backoff::new();
        loop {
            let enqueued = self.ring.lock().unwrap().try_enqueue(payload)?;
            if enqueued {
                if let Some(sem) = &self.sem {
                    sem.signal()?;
                }
                return Ok(());
            }
            backoff.spin();
        }
    }
}

/// Base directory all mappings and lock files live under; overridable for
/// tests so parallel test runs don't collide on `/dev/shm` paths.
pub fn default_base_dir() -> PathBuf {
    std::env::temp_dir().join("particle-ipc")
}

#[cfg(test)]
impl DirectionalWriter {
    /// Publish a bogus length header on this writer's ring, simulating a
    /// peer that wrote a corrupt frame, for exercising the fatal-callback
    /// path from crates/modules that can't reach the ring directly.
    pub(crate) fn corrupt_for_test(&self, len: u32) {
        self.ring.lock().unwrap().corrupt_header_for_test(len);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    fn scratch_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("particle-ipc-test-{name}-{}", std::process::id()))
    }

    #[test]
    fn writer_then_reader_round_trip() {
        let dir = scratch_dir("roundtrip");
        let received: Arc<StdMutex<Vec<Vec<u8>>>> = Arc::new(StdMutex::new(Vec::new()));
        let received_clone = Arc::clone(&received);

        let writer_cfg = ChannelConfig::new(&dir, "c2s", 4096, 1024);
        let writer = DirectionalWriter::open(writer_cfg, true).unwrap();

        let reader_cfg = ChannelConfig::new(&dir, "c2s", 4096, 1024);
        let reader = DirectionalReader::spawn(
            reader_cfg,
            false,
            Arc::new(move |bytes: &[u8]| {
                received_clone.lock().unwrap().push(bytes.to_vec());
            }),
            Arc::new(|| {}),
        )
        .unwrap();

        for i in 0..20u8 {
            writer.send(&[i; 8]).unwrap();
        }

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while received.lock().unwrap().len() < 20 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }

        let got = received.lock().unwrap();
        assert_eq!(got.len(), 20);
        for (i, frame) in got.iter().enumerate() {
            assert_eq!(frame, &vec![i as u8; 8]);
        }
        drop(got);
        reader.dispose();
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn corrupt_frame_header_fires_the_fatal_callback_and_stops_the_reader() {
        let dir = scratch_dir("fatal");
        let writer = DirectionalWriter::open(ChannelConfig::new(&dir, "corrupt", 4096, 1024), true).unwrap();
        writer.ring.lock().unwrap().corrupt_header_for_test(5000);

        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = Arc::clone(&fired);
        let reader = DirectionalReader::spawn(
            ChannelConfig::new(&dir, "corrupt", 4096, 1024),
            false,
            Arc::new(|_bytes: &[u8]| {}),
            Arc::new(move || {
                fired_clone.store(true, Ordering::Release);
            }),
        )
        .unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while !fired.load(Ordering::Acquire) && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(fired.load(Ordering::Acquire));

        reader.dispose();
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn oversize_send_fails_fast() {
        let dir = scratch_dir("oversize");
        let writer = DirectionalWriter::open(ChannelConfig::new(&dir, "oversize", 256, 200), true).unwrap();
        let payload = vec![0u8; 500];
        assert!(matches!(writer.send(&payload), Err(ParticleError::Oversize { .. })));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
