//! In-process server endpoint (spec.md §4.14).
//!
//! Mirrors `particle-ipc`'s `MappedReactor`: an accept-style loop thread
//! pulls newly connected links instead of polling a registry mapping, then
//! spawns one reader thread per attached client that drains its half of
//! the link. `send_to`/`broadcast` follow the explicit per-client-send
//! plus `broadcast()` policy spec.md §9's "server-originated sends" open
//! question asks implementations to settle on, matching the pair
//! `particle-ipc::MappedReactor` already exposes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::warn;

use particle_core::backoff::Backoff;
use particle_core::endpoint::Reactor;
use particle_core::error::Result;
use particle_core::event::{Event, SharedDispatch};
use particle_core::metrics::{Metrics, MetricsSnapshot};

use crate::link::InprocLink;
use crate::registry::{InprocRegistry, ReactorEndpoint};

const ACCEPT_WAIT: Duration = Duration::from_millis(5);
const READER_WAIT: Duration = Duration::from_millis(5);

struct AttachedClient {
    link: Arc<InprocLink>,
    running: Arc<AtomicBool>,
    disposed: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl AttachedClient {
    fn dispose(&self) {
        self.running.store(false, Ordering::Release);
        self.link.server_signal.notify();
        if let Some(handle) = self.handle.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

/// Server-side endpoint: registers itself under `name` so clients can
/// find it, then attaches a reader thread per connecting client.
pub struct InprocReactor {
    name: String,
    endpoint: Arc<ReactorEndpoint>,
    clients: Arc<Mutex<HashMap<String, Arc<AttachedClient>>>>,
    running: Arc<AtomicBool>,
    accept_handle: Mutex<Option<JoinHandle<()>>>,
    on_event: SharedDispatch,
    metrics: Arc<Metrics>,
}

impl InprocReactor {
    pub fn new(registry: &InprocRegistry, name: impl Into<String>, on_event: SharedDispatch) -> Arc<Self> {
        let name = name.into();
        let endpoint = ReactorEndpoint::new();
        registry.register(&name, Arc::clone(&endpoint));
        Arc::new(Self {
            name,
            endpoint,
            clients: Arc::new(Mutex::new(HashMap::new())),
            running: Arc::new(AtomicBool::new(false)),
            accept_handle: Mutex::new(None),
            on_event,
            metrics: Arc::new(Metrics::new()),
        })
    }

    /// Aggregate counters across every client this reactor has attached
    /// (spec.md §3, supplemented).
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

impl Reactor for InprocReactor {
    fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let endpoint = Arc::clone(&self.endpoint);
        let clients = Arc::clone(&self.clients);
        let on_event = Arc::clone(&self.on_event);
        let running = Arc::clone(&self.running);
        let metrics = Arc::clone(&self.metrics);
        let name = self.name.clone();

        let handle = std::thread::Builder::new().name(format!("particle-inproc-accept-{name}")).spawn(move || {
            let mut backoff = Backoff::new();
            while running.load(Ordering::Acquire) {
                match endpoint.pending.pop() {
                    Some((id, link)) => {
                        backoff.reset();
                        attach_one(id, link, &clients, &on_event, &metrics);
                    }
                    None => {
                        if !running.load(Ordering::Acquire) {
                            break;
                        }
                        if !endpoint.arrival_signal.wait_timeout(ACCEPT_WAIT) {
                            backoff.spin();
                        }
                    }
                }
            }
        })?;

        *self.accept_handle.lock().unwrap() = Some(handle);
        Ok(())
    }

    fn send_to(&self, peer: &str, payload: &[u8]) -> Result<()> {
        let client = self.clients.lock().unwrap().get(peer).cloned();
        match client {
            Some(client) => {
                if payload.is_empty() {
                    return Ok(());
                }
                let buf = client.link.to_client_pool.rent(payload);
                if let Err(err) = client.link.to_client.try_push(buf) {
                    self.metrics.record_backpressure();
                    return Err(err);
                }
                client.link.client_signal.notify();
                self.metrics.record_send(payload.len());
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn broadcast(&self, payload: &[u8]) {
        let clients: Vec<Arc<AttachedClient>> = self.clients.lock().unwrap().values().cloned().collect();
        for client in clients {
            if payload.is_empty() {
                continue;
            }
            let buf = client.link.to_client_pool.rent(payload);
            if let Err(e) = client.link.to_client.try_push(buf) {
                self.metrics.record_backpressure();
                warn!(error = %e, "broadcast send to one client failed, continuing");
                continue;
            }
            client.link.client_signal.notify();
            self.metrics.record_send(payload.len());
        }
    }

    fn dispose(&self) {
        self.running.store(false, Ordering::Release);
        self.endpoint.arrival_signal.notify();
        if let Some(handle) = self.accept_handle.lock().unwrap().take() {
            let _ = handle.join();
        }
        let clients: HashMap<String, Arc<AttachedClient>> = self.clients.lock().unwrap().drain().collect();
        for client in clients.values() {
            client.dispose();
        }
    }
}

fn attach_one(
    id: String,
    link: Arc<InprocLink>,
    clients: &Arc<Mutex<HashMap<String, Arc<AttachedClient>>>>,
    on_event: &SharedDispatch,
    metrics: &Arc<Metrics>,
) {
    let running = Arc::new(AtomicBool::new(true));
    let disposed = Arc::new(AtomicBool::new(false));
    let reader_running = Arc::clone(&running);
    let reader_disposed = Arc::clone(&disposed);
    let reader_link = Arc::clone(&link);
    let reader_metrics = Arc::clone(metrics);
    let peer_id = id.clone();

    // Wrap the caller's dispatch so a disconnect removes this client from
    // the map instead of leaving a stale entry behind, mirroring
    // particle-net's `TcpReactor::accept_one`.
    let clients_for_removal = Arc::clone(clients);
    let peer_for_removal = id.clone();
    let dispatch = Arc::clone(on_event);
    let wrapped: SharedDispatch = Arc::new(move |event: Event<'_>| {
        if let Event::Disconnected { .. } = &event {
            clients_for_removal.lock().unwrap().remove(&peer_for_removal);
        }
        dispatch.dispatch(event);
    });
    let reader_on_event = Arc::clone(&wrapped);
    let tail_on_event = Arc::clone(&wrapped);
    let tail_peer_id = id.clone();

    let handle = match std::thread::Builder::new()
        .name(format!("particle-inproc-reader-{id}"))
        .spawn(move || {
            let mut backoff = Backoff::new();
            let mut disconnect_reason: Option<String> = None;
            while reader_running.load(Ordering::Acquire) {
                match reader_link.to_server.pop() {
                    Some(buf) => {
                        backoff.reset();
                        reader_metrics.record_receive(buf.len());
                        reader_on_event.dispatch(Event::Received { peer: &peer_id, view: &buf });
                        reader_link.to_server_pool.return_buf(buf);
                    }
                    None => {
                        if !reader_running.load(Ordering::Acquire) {
                            break;
                        }
                        if reader_link.client_closed.load(Ordering::Acquire) {
                            disconnect_reason = Some("client disposed".to_string());
                            break;
                        }
                        if !reader_link.server_signal.wait_timeout(READER_WAIT) {
                            backoff.spin();
                        }
                    }
                }
            }
            // Fire exactly once, however the loop ended: the peer closing
            // its end, the reactor disposing this client, or the reactor
            // itself shutting down.
            if !reader_disposed.swap(true, Ordering::AcqRel) {
                tail_on_event.dispatch(Event::Disconnected { peer: &tail_peer_id, error: disconnect_reason.as_deref() });
            }
        }) {
        Ok(h) => h,
        Err(e) => {
            warn!(id, error = %e, "failed to spawn reader thread for inproc client");
            return;
        }
    };

    clients
        .lock()
        .unwrap()
        .insert(id.clone(), Arc::new(AttachedClient { link, running, disposed, handle: Mutex::new(Some(handle)) }));
    wrapped.dispatch(Event::Connected { peer: &id });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::particle::InprocParticle;
    use particle_core::endpoint::Particle;
    use std::sync::Mutex as StdMutex;
    use std::time::Instant;

    fn wait_until(deadline_secs: u64, mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(deadline_secs);
        while !cond() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn attaches_a_connecting_client_and_forwards_frames() {
        let registry = InprocRegistry::new();
        let received: Arc<StdMutex<Vec<Vec<u8>>>> = Arc::new(StdMutex::new(Vec::new()));
        let received_clone = Arc::clone(&received);

        let reactor = InprocReactor::new(
            &registry,
            "server",
            Arc::new(move |event: Event<'_>| {
                if let Event::Received { view, .. } = event {
                    received_clone.lock().unwrap().push(view.to_vec());
                }
            }),
        );
        reactor.start().unwrap();

        let particle = InprocParticle::connect(&registry, "server", "client-1", Arc::new(|_event: Event<'_>| {})).unwrap();
        particle.send(b"ping").unwrap();

        wait_until(3, || !received.lock().unwrap().is_empty());
        assert_eq!(received.lock().unwrap().as_slice(), &[b"ping".to_vec()]);

        reactor.send_to("client-1", b"pong").unwrap();
        reactor.send_to("unknown", b"dropped").unwrap();

        let snapshot = reactor.metrics();
        assert_eq!(snapshot.messages_received, 1);
        assert_eq!(snapshot.messages_sent, 1);

        particle.dispose();
        reactor.dispose();
    }

    #[test]
    fn broadcast_reaches_every_client() {
        let registry = InprocRegistry::new();
        let reactor = InprocReactor::new(&registry, "server", Arc::new(|_event: Event<'_>| {}));
        reactor.start().unwrap();

        let a_saw: Arc<StdMutex<Vec<Vec<u8>>>> = Arc::new(StdMutex::new(Vec::new()));
        let b_saw: Arc<StdMutex<Vec<Vec<u8>>>> = Arc::new(StdMutex::new(Vec::new()));
        let a_saw_clone = Arc::clone(&a_saw);
        let b_saw_clone = Arc::clone(&b_saw);

        let client_a = InprocParticle::connect(
            &registry,
            "server",
            "a",
            Arc::new(move |event: Event<'_>| {
                if let Event::Received { view, .. } = event {
                    a_saw_clone.lock().unwrap().push(view.to_vec());
                }
            }),
        )
        .unwrap();
        let client_b = InprocParticle::connect(
            &registry,
            "server",
            "b",
            Arc::new(move |event: Event<'_>| {
                if let Event::Received { view, .. } = event {
                    b_saw_clone.lock().unwrap().push(view.to_vec());
                }
            }),
        )
        .unwrap();

        wait_until(3, || reactor.clients.lock().unwrap().len() == 2);
        reactor.broadcast(b"hello-all");

        wait_until(3, || !a_saw.lock().unwrap().is_empty() && !b_saw.lock().unwrap().is_empty());
        assert_eq!(a_saw.lock().unwrap().as_slice(), &[b"hello-all".to_vec()]);
        assert_eq!(b_saw.lock().unwrap().as_slice(), &[b"hello-all".to_vec()]);

        client_a.dispose();
        client_b.dispose();
        reactor.dispose();
    }

    #[test]
    fn disposing_a_client_removes_it_from_the_reactor_map() {
        let registry = InprocRegistry::new();
        let reactor = InprocReactor::new(&registry, "server", Arc::new(|_event: Event<'_>| {}));
        reactor.start().unwrap();

        let particle = InprocParticle::connect(&registry, "server", "client-1", Arc::new(|_event: Event<'_>| {})).unwrap();

        wait_until(3, || reactor.clients.lock().unwrap().contains_key("client-1"));
        assert!(reactor.clients.lock().unwrap().contains_key("client-1"));

        particle.dispose();

        wait_until(3, || !reactor.clients.lock().unwrap().contains_key("client-1"));
        assert!(!reactor.clients.lock().unwrap().contains_key("client-1"));

        reactor.dispose();
    }
}
