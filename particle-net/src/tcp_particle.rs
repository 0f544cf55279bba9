//! Length-prefixed framed TCP particle (spec.md §4.12).
//!
//! Grounded in `flux-network`'s `TcpStream` (a dedicated reader task fed by
//! a blocking socket, driving a length-prefixed parser) crossed with this
//! crate's own shared-memory channel shape (particle-ipc's
//! `DirectionalReader`/`DirectionalWriter` split): a background thread owns
//! the read half and feeds [`FrameParser`], while `send` writes straight
//! through a mutex-guarded write half, renting a pinned buffer from a
//! [`SlabAllocator`] for the length-prefix-plus-payload scratch space.

use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use socket2::SockRef;
use tracing::warn;

use particle_core::endpoint::Particle;
use particle_core::error::{ParticleError, Result};
use particle_core::event::{Event, SharedDispatch};
use particle_core::metrics::{Metrics, MetricsSnapshot};
use particle_core::slab::SlabAllocator;

use crate::frame::{DispatchMode, FrameParser};

const DISPOSE_JOIN_TIMEOUT: Duration = Duration::from_millis(200);

/// Tunables for a single framed TCP connection.
#[derive(Clone, Copy)]
pub struct TcpParticleConfig {
    /// Socket-level send/receive kernel buffer size, in bytes.
    pub socket_buffer: usize,
    /// Number of in-flight sends the slab pool should accommodate.
    pub parallelism: usize,
    /// Largest payload (excluding the 4-byte length prefix) this
    /// connection will send or accept.
    pub max_frame: usize,
}

impl TcpParticleConfig {
    pub fn new(socket_buffer: usize, parallelism: usize, max_frame: usize) -> Self {
        Self { socket_buffer, parallelism, max_frame }
    }

    fn parser_capacity(&self) -> usize {
        (4 + self.max_frame).next_power_of_two().max(64 * 1024)
    }
}

fn configure_socket(stream: &TcpStream, buffer_bytes: usize) -> Result<()> {
    stream.set_nodelay(true)?;
    let sock = SockRef::from(stream);
    sock.set_send_buffer_size(buffer_bytes)?;
    sock.set_recv_buffer_size(buffer_bytes)?;
    Ok(())
}

/// A single framed TCP connection, playing either the client or the
/// server-accepted-connection role — the wire protocol is symmetric.
pub struct TcpParticle {
    peer: String,
    write_half: Mutex<TcpStream>,
    send_slabs: Arc<SlabAllocator>,
    max_frame: usize,
    running: Arc<AtomicBool>,
    reader_handle: Mutex<Option<JoinHandle<()>>>,
    disposed: AtomicBool,
    on_event: SharedDispatch,
    metrics: Metrics,
}

impl TcpParticle {
    /// Connect to `addr` and take on the client role.
    pub fn connect(addr: SocketAddr, cfg: TcpParticleConfig, on_event: SharedDispatch) -> Result<Arc<Self>> {
        let stream = TcpStream::connect(addr)?;
        let peer = stream.peer_addr().map(|a| a.to_string()).unwrap_or_else(|_| addr.to_string());
        Self::from_stream(stream, peer, cfg, on_event)
    }

    /// Wrap an already-connected (e.g. accepted) socket.
    pub fn from_stream(stream: TcpStream, peer: String, cfg: TcpParticleConfig, on_event: SharedDispatch) -> Result<Arc<Self>> {
        configure_socket(&stream, cfg.socket_buffer)?;
        let read_half = stream.try_clone()?;

        let send_slabs = Arc::new(SlabAllocator::new(4 + cfg.max_frame, 2 * cfg.parallelism, None).with_initial_slab()?);
        let running = Arc::new(AtomicBool::new(true));

        let particle = Arc::new(Self {
            peer: peer.clone(),
            write_half: Mutex::new(stream),
            send_slabs,
            max_frame: cfg.max_frame,
            running: Arc::clone(&running),
            reader_handle: Mutex::new(None),
            disposed: AtomicBool::new(false),
            on_event: Arc::clone(&on_event),
            metrics: Metrics::new(),
        });

        let reader_particle = Arc::clone(&particle);
        let parser_capacity = cfg.parser_capacity();
        let max_frame = cfg.max_frame;
        let handle = std::thread::Builder::new()
            .name(format!("particle-net-reader-{peer}"))
            .spawn(move || reader_particle.reader_loop(read_half, max_frame, parser_capacity))?;
        *particle.reader_handle.lock().unwrap() = Some(handle);

        on_event.dispatch(Event::Connected { peer: &particle.peer });
        Ok(particle)
    }

    /// Stand-in for "a future that resolves when the platform completion
    /// fires" (spec.md §9), without pulling in an async runtime: hands the
    /// write off to a short-lived thread and returns a `Receiver` the
    /// caller polls or blocks on at its own convenience.
    pub fn send_async(self: &Arc<Self>, payload: Vec<u8>) -> Receiver<Result<()>> {
        let (tx, rx) = mpsc::channel();
        let particle = Arc::clone(self);
        std::thread::spawn(move || {
            let _ = tx.send(particle.send(&payload));
        });
        rx
    }

    /// Point-in-time counters for this connection (spec.md §3, supplemented).
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    fn reader_loop(self: Arc<Self>, mut stream: TcpStream, max_frame: usize, parser_capacity: usize) {
        let mut parser = match FrameParser::new(parser_capacity, max_frame, DispatchMode::CopyOnDispatch) {
            Ok(parser) => parser,
            Err(err) => {
                warn!(peer = %self.peer, %err, "failed to construct tcp frame parser");
                return;
            }
        };
        let mut chunk = vec![0u8; max_frame.clamp(4096, 64 * 1024)];
        let mut disconnect_reason: Option<String> = None;

        while self.running.load(Ordering::Acquire) {
            match stream.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    if let Err(err) = parser.feed(&chunk[..n]) {
                        if matches!(err, ParticleError::Backpressure { .. }) {
                            self.metrics.record_backpressure();
                        }
                        disconnect_reason = Some(err.to_string());
                        break;
                    }
                    let peer = self.peer.as_str();
                    let on_event = &self.on_event;
                    let metrics = &self.metrics;
                    parser.parse_and_dispatch(
                        |frame| {
                            metrics.record_receive(frame.as_bytes().len());
                            on_event.dispatch(Event::Received { peer, view: frame.as_bytes() });
                        },
                        |err| warn!(peer = %peer, %err, "tcp frame parser resynced"),
                    );
                }
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    disconnect_reason = Some(err.to_string());
                    break;
                }
            }
        }

        if !self.disposed.swap(true, Ordering::AcqRel) {
            self.send_slabs.dispose();
            self.on_event.dispatch(Event::Disconnected { peer: &self.peer, error: disconnect_reason.as_deref() });
        }
    }
}

impl Particle for TcpParticle {
    fn send(&self, payload: &[u8]) -> Result<()> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(ParticleError::misuse("send after dispose"));
        }
        if payload.is_empty() {
            return Ok(());
        }
        if payload.len() > self.max_frame {
            return Err(ParticleError::Oversize { len: payload.len(), limit: self.max_frame });
        }

        let mut handle = self.send_slabs.bind()?;
        let total = 4 + payload.len();
        {
            let buf = handle.as_mut_slice();
            buf[..4].copy_from_slice(&(payload.len() as u32).to_le_bytes());
            buf[4..total].copy_from_slice(payload);
        }
        let result = self.write_half.lock().unwrap().write_all(&handle.as_slice()[..total]);
        self.send_slabs.release(handle);
        result?;
        self.metrics.record_send(payload.len());
        Ok(())
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.running.store(false, Ordering::Release);
        if let Ok(stream) = self.write_half.lock() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        self.send_slabs.dispose();

        let mut slot = self.reader_handle.lock().unwrap();
        if let Some(handle) = slot.take() {
            let deadline = std::time::Instant::now() + DISPOSE_JOIN_TIMEOUT;
            while !handle.is_finished() && std::time::Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(5));
            }
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                *slot = Some(handle);
            }
        }
        self.on_event.dispatch(Event::Disconnected { peer: &self.peer, error: None });
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}
