//! Mapped reactor: the server-side component that discovers peers via the
//! shared registry and attaches a particle per discovered id
//! (spec.md §4.10).

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use particle_core::endpoint::Reactor;
use particle_core::error::Result;
use particle_core::event::{Event, SharedDispatch};
use particle_core::metrics::{Metrics, MetricsSnapshot};
use tracing::warn;

use crate::channel::{ChannelConfig, DirectionalReader, DirectionalWriter, FatalCallback};
use crate::registry::Registry;

/// Poll interval for the registry scan loop (spec.md §4.8).
const REGISTRY_POLL_INTERVAL: Duration = Duration::from_millis(50);

struct AttachedClient {
    writer: DirectionalWriter,
    reader: DirectionalReader,
}

impl AttachedClient {
    fn dispose(&self) {
        self.reader.dispose();
    }
}

struct SharedState {
    clients: Mutex<HashMap<String, Arc<AttachedClient>>>,
    known: Mutex<HashSet<String>>,
    metrics: Arc<Metrics>,
}

/// Server-side endpoint: polls the shared registry for new client ids and
/// attaches a directional reader/writer pair for each.
pub struct MappedReactor {
    base_dir: PathBuf,
    base_name: String,
    ring_size: crate::particle::RingSize,
    on_event: SharedDispatch,
    state: Arc<SharedState>,
    running: Arc<AtomicBool>,
    poll_handle: Mutex<Option<JoinHandle<()>>>,
}

impl MappedReactor {
    pub fn new(
        base_dir: PathBuf,
        base_name: impl Into<String>,
        ring_size: crate::particle::RingSize,
        on_event: SharedDispatch,
    ) -> Self {
        Self {
            base_dir,
            base_name: base_name.into(),
            ring_size,
            on_event,
            state: Arc::new(SharedState {
                clients: Mutex::new(HashMap::new()),
                known: Mutex::new(HashSet::new()),
                metrics: Arc::new(Metrics::new()),
            }),
            running: Arc::new(AtomicBool::new(false)),
            poll_handle: Mutex::new(None),
        }
    }

    /// Aggregate counters across every client this reactor has attached
    /// (spec.md §3, supplemented).
    pub fn metrics(&self) -> MetricsSnapshot {
        self.state.metrics.snapshot()
    }
}

impl Reactor for MappedReactor {
    fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let base_dir = self.base_dir.clone();
        let base_name = self.base_name.clone();
        let ring_size = self.ring_size;
        let on_event = Arc::clone(&self.on_event);
        let state = Arc::clone(&self.state);
        let running = Arc::clone(&self.running);

        let handle = std::thread::Builder::new()
            .name(format!("particle-ipc-registry-poll-{}", self.base_name))
            .spawn(move || {
                while running.load(Ordering::Acquire) {
                    match Registry::open(&base_dir, &base_name).and_then(|mut r| r.snapshot()) {
                        Ok(ids) => {
                            let mut known = state.known.lock().unwrap();
                            let fresh: Vec<String> = ids.into_iter().filter(|id| known.insert(id.clone())).collect();
                            drop(known);
                            for id in fresh {
                                attach_one(&base_dir, &base_name, ring_size, &on_event, &state, &id);
                            }
                        }
                        Err(e) => warn!(error = %e, "registry poll failed"),
                    }
                    std::thread::sleep(REGISTRY_POLL_INTERVAL);
                }
            })?;

        *self.poll_handle.lock().unwrap() = Some(handle);
        Ok(())
    }

    fn send_to(&self, peer: &str, payload: &[u8]) -> Result<()> {
        let client = self.state.clients.lock().unwrap().get(peer).cloned();
        match client {
            Some(client) => {
                client.writer.send(payload)?;
                self.state.metrics.record_send(payload.len());
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn broadcast(&self, payload: &[u8]) {
        let clients: Vec<Arc<AttachedClient>> = self.state.clients.lock().unwrap().values().cloned().collect();
        for client in clients {
            match client.writer.send(payload) {
                Ok(()) => self.state.metrics.record_send(payload.len()),
                Err(e) => warn!(error = %e, "broadcast send to one client failed, continuing"),
            }
        }
    }

    fn dispose(&self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.poll_handle.lock().unwrap().take() {
            let _ = handle.join();
        }
        let clients: HashMap<String, Arc<AttachedClient>> = self.state.clients.lock().unwrap().drain().collect();
        for client in clients.values() {
            client.dispose();
        }
        self.state.known.lock().unwrap().clear();
    }
}

fn attach_one(
    base_dir: &PathBuf,
    base_name: &str,
    ring_size: crate::particle::RingSize,
    on_event: &SharedDispatch,
    state: &Arc<SharedState>,
    id: &str,
) {
    let inbound_name = format!("{base_name}.C2S.{id}");
    let outbound_name = format!("{base_name}.S2C.{id}");

    let writer = match DirectionalWriter::open(
        ChannelConfig::new(base_dir, outbound_name, ring_size.capacity, ring_size.max_frame),
        false,
    ) {
        Ok(w) => w,
        Err(e) => {
            warn!(id, error = %e, "failed to attach outbound channel to client");
            return;
        }
    };

    // Wrap the caller's dispatch so a disconnect (currently only ever
    // fired by the reader's fatal-error path below) removes this client
    // from the map instead of leaving a stale entry behind, mirroring
    // particle-net's `TcpReactor::accept_one`.
    let state_for_removal = Arc::clone(state);
    let peer_for_removal = id.to_string();
    let dispatch = Arc::clone(on_event);
    let wrapped: SharedDispatch = Arc::new(move |event: Event<'_>| {
        if let Event::Disconnected { .. } = &event {
            state_for_removal.clients.lock().unwrap().remove(&peer_for_removal);
        }
        dispatch.dispatch(event);
    });

    let metrics_for_reader = Arc::clone(&state.metrics);
    let peer_id = id.to_string();
    let dispatch_for_frame = Arc::clone(&wrapped);

    let peer_for_fatal = id.to_string();
    let dispatch_for_fatal = Arc::clone(&wrapped);
    let on_fatal: FatalCallback = Arc::new(move || {
        dispatch_for_fatal.dispatch(Event::Disconnected { peer: &peer_for_fatal, error: Some("ipc reader failed") });
    });

    let reader = match DirectionalReader::spawn(
        ChannelConfig::new(base_dir, inbound_name, ring_size.capacity, ring_size.max_frame),
        false,
        Arc::new(move |bytes: &[u8]| {
            metrics_for_reader.record_receive(bytes.len());
            dispatch_for_frame.dispatch(Event::Received { peer: &peer_id, view: bytes });
        }),
        on_fatal,
    ) {
        Ok(r) => r,
        Err(e) => {
            warn!(id, error = %e, "failed to attach inbound channel to client");
            return;
        }
    };

    state.clients.lock().unwrap().insert(id.to_string(), Arc::new(AttachedClient { writer, reader }));
    wrapped.dispatch(Event::Connected { peer: id });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::particle::{MappedParticle, RingSize};
    use particle_core::Particle;
    use std::sync::Mutex as StdMutex;

    #[test]
    fn attaches_a_connecting_client_and_forwards_frames() {
        let dir = std::env::temp_dir().join(format!("particle-ipc-reactor-test-{}", std::process::id()));
        let received: Arc<StdMutex<Vec<Vec<u8>>>> = Arc::new(StdMutex::new(Vec::new()));
        let received_clone = Arc::clone(&received);

        let reactor = MappedReactor::new(
            dir.clone(),
            "base",
            RingSize::new(4096, 1024),
            Arc::new(move |event: Event<'_>| {
                if let Event::Received { view, .. } = event {
                    received_clone.lock().unwrap().push(view.to_vec());
                }
            }),
        );
        reactor.start().unwrap();

        let particle = MappedParticle::connect(
            dir.clone(),
            "base",
            42,
            RingSize::new(4096, 1024),
            Arc::new(|_event: Event<'_>| {}),
        )
        .unwrap();

        particle.send(b"ping").unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(3);
        while received.lock().unwrap().is_empty() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        assert_eq!(received.lock().unwrap().as_slice(), &[b"ping".to_vec()]);

        reactor.send_to(particle.id(), b"pong").unwrap();
        reactor.send_to("unknown-id-does-not-exist", b"dropped").unwrap();

        let snapshot = reactor.metrics();
        assert_eq!(snapshot.messages_received, 1);
        assert_eq!(snapshot.messages_sent, 1);

        particle.dispose();
        reactor.dispose();
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn a_corrupt_frame_from_a_client_removes_it_from_the_reactor_map() {
        let dir = std::env::temp_dir().join(format!("particle-ipc-reactor-fatal-test-{}", std::process::id()));

        let reactor = MappedReactor::new(dir.clone(), "base", RingSize::new(4096, 1024), Arc::new(|_event: Event<'_>| {}));
        reactor.start().unwrap();

        let particle = MappedParticle::connect(
            dir.clone(),
            "base",
            7,
            RingSize::new(4096, 1024),
            Arc::new(|_event: Event<'_>| {}),
        )
        .unwrap();
        particle.send(b"ping").unwrap();

        let peer = particle.id().to_string();
        let deadline = std::time::Instant::now() + Duration::from_secs(3);
        while !reactor.state.clients.lock().unwrap().contains_key(&peer) && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        assert!(reactor.state.clients.lock().unwrap().contains_key(&peer));

        // Simulate the peer writing a corrupt frame header and wait for
        // the reactor's per-client reader thread to notice and drop the
        // stale entry from the map.
        particle.corrupt_outbound_for_test(5000);

        let deadline = std::time::Instant::now() + Duration::from_secs(3);
        while reactor.state.clients.lock().unwrap().contains_key(&peer) && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        assert!(!reactor.state.clients.lock().unwrap().contains_key(&peer));

        particle.dispose();
        reactor.dispose();
        let _ = std::fs::remove_dir_all(&dir);
    }
}
