//! In-process client endpoint (spec.md §4.14).
//!
//! Mirrors `particle-ipc`'s `MappedParticle`: a background reader thread
//! drains the inbound side of a link and dispatches to the user, `send`
//! writes to the outbound side and nudges the peer's signal. The named
//! mapping/registry dance of the IPC substrate collapses to a single
//! in-process lookup, since there is no discovery latency to poll for.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use particle_core::backoff::Backoff;
use particle_core::endpoint::Particle;
use particle_core::error::{ParticleError, Result};
use particle_core::event::{Event, SharedDispatch};
use particle_core::metrics::{Metrics, MetricsSnapshot};

use crate::link::InprocLink;
use crate::registry::{InprocRegistry, ReactorEndpoint};

const ATTACH_RETRIES: u32 = 20;
const ATTACH_RETRY_DELAY: Duration = Duration::from_millis(2);
const DISPOSE_JOIN_TIMEOUT: Duration = Duration::from_millis(200);
const READER_WAIT: Duration = Duration::from_millis(5);

fn find_reactor(registry: &InprocRegistry, server_name: &str) -> Result<Arc<ReactorEndpoint>> {
    for _ in 0..ATTACH_RETRIES {
        if let Some(endpoint) = registry.lookup(server_name) {
            return Ok(endpoint);
        }
        std::thread::sleep(ATTACH_RETRY_DELAY);
    }
    Err(ParticleError::AttachTimeout {
        attempts: ATTACH_RETRIES,
        reason: format!("no reactor registered under \"{server_name}\""),
    })
}

/// One client's duplex endpoint over an in-process link.
pub struct InprocParticle {
    id: String,
    link: Arc<InprocLink>,
    running: Arc<AtomicBool>,
    disposed: AtomicBool,
    reader_handle: Mutex<Option<JoinHandle<()>>>,
    on_event: SharedDispatch,
    metrics: Metrics,
}

impl InprocParticle {
    /// Connect to the reactor registered as `server_name`, retrying for up
    /// to `ATTACH_RETRIES` attempts if it hasn't started yet
    /// (spec.md §8 scenario 6, "Reconnect").
    pub fn connect(
        registry: &InprocRegistry,
        server_name: &str,
        client_id: impl Into<String>,
        on_event: SharedDispatch,
    ) -> Result<Arc<Self>> {
        let id = client_id.into();
        let endpoint = find_reactor(registry, server_name)?;
        let link = Arc::new(InprocLink::new());

        endpoint
            .pending
            .try_push((id.clone(), Arc::clone(&link)))
            .map_err(|_| ParticleError::ResourceExhausted { resource: "inproc pending connection queue" })?;
        endpoint.arrival_signal.notify();

        let running = Arc::new(AtomicBool::new(true));
        let particle = Arc::new(Self {
            id,
            link,
            running,
            disposed: AtomicBool::new(false),
            reader_handle: Mutex::new(None),
            on_event,
            metrics: Metrics::new(),
        });

        let reader_particle = Arc::clone(&particle);
        let handle =
            std::thread::Builder::new().name(format!("particle-inproc-reader-{}", particle.id)).spawn(move || {
                reader_particle.reader_loop();
            })?;
        *particle.reader_handle.lock().unwrap() = Some(handle);

        Ok(particle)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Point-in-time counters for this particle (spec.md §3, supplemented).
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    fn reader_loop(self: Arc<Self>) {
        let mut backoff = Backoff::new();
        while self.running.load(Ordering::Acquire) {
            match self.link.to_client.pop() {
                Some(buf) => {
                    backoff.reset();
                    self.metrics.record_receive(buf.len());
                    self.on_event.dispatch(Event::Received { peer: &self.id, view: &buf });
                    self.link.to_client_pool.return_buf(buf);
                }
                None => {
                    if !self.running.load(Ordering::Acquire) {
                        break;
                    }
                    if !self.link.client_signal.wait_timeout(READER_WAIT) {
                        backoff.spin();
                    }
                }
            }
        }
    }
}

impl Particle for InprocParticle {
    fn send(&self, payload: &[u8]) -> Result<()> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(ParticleError::misuse("send after dispose"));
        }
        if payload.is_empty() {
            return Ok(());
        }
        let buf = self.link.to_server_pool.rent(payload);
        if let Err(err) = self.link.to_server.try_push(buf) {
            self.metrics.record_backpressure();
            return Err(err);
        }
        self.link.server_signal.notify();
        self.metrics.record_send(payload.len());
        Ok(())
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.running.store(false, Ordering::Release);
        self.link.client_closed.store(true, Ordering::Release);
        self.link.client_signal.notify();
        self.link.server_signal.notify();

        if let Some(handle) = self.reader_handle.lock().unwrap().take() {
            let deadline = Instant::now() + DISPOSE_JOIN_TIMEOUT;
            while !handle.is_finished() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(5));
            }
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                *self.reader_handle.lock().unwrap() = Some(handle);
            }
        }

        self.on_event.dispatch(Event::Disconnected { peer: &self.id, error: None });
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}
