//! Framed TCP reactor: binds a listener and attaches one [`TcpParticle`]
//! per accepted connection (spec.md §4.13).
//!
//! Grounded on particle-ipc's `MappedReactor` (same accept-loop-thread,
//! concurrent id-map, send/broadcast pair shape), with the registry poll
//! replaced by a blocking `TcpListener::accept()` loop, and the peer's
//! socket address standing in for the discovery-channel id (TCP has no
//! separate discovery mapping).

use std::collections::HashMap;
use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use tracing::warn;

use particle_core::endpoint::{Particle, Reactor};
use particle_core::error::Result;
use particle_core::event::{Event, SharedDispatch};
use particle_core::metrics::{Metrics, MetricsSnapshot};

use crate::tcp_particle::{TcpParticle, TcpParticleConfig};

struct SharedState {
    clients: Mutex<HashMap<String, Arc<TcpParticle>>>,
    metrics: Metrics,
}

/// Server-side endpoint: accepts TCP connections and attaches a framed
/// particle per connection, keyed by the peer's socket address.
pub struct TcpReactor {
    bind_addr: SocketAddr,
    backlog: i32,
    client_cfg: TcpParticleConfig,
    on_event: SharedDispatch,
    state: Arc<SharedState>,
    running: Arc<AtomicBool>,
    local_addr: Mutex<Option<SocketAddr>>,
    accept_handle: Mutex<Option<JoinHandle<()>>>,
}

impl TcpReactor {
    pub fn new(bind_addr: SocketAddr, backlog: i32, client_cfg: TcpParticleConfig, on_event: SharedDispatch) -> Self {
        Self {
            bind_addr,
            backlog,
            client_cfg,
            on_event,
            state: Arc::new(SharedState { clients: Mutex::new(HashMap::new()), metrics: Metrics::new() }),
            running: Arc::new(AtomicBool::new(false)),
            local_addr: Mutex::new(None),
            accept_handle: Mutex::new(None),
        }
    }

    /// The address actually bound once `start()` has run. Useful when
    /// `bind_addr`'s port was `0`.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().unwrap()
    }

    /// Aggregate counters across every connection this reactor has
    /// accepted, including ones since disconnected (spec.md §3,
    /// supplemented).
    pub fn metrics(&self) -> MetricsSnapshot {
        self.state.metrics.snapshot()
    }
}

fn bind_with_backlog(addr: SocketAddr, backlog: i32) -> Result<TcpListener> {
    use socket2::{Domain, Socket, Type};
    let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
    let socket = Socket::new(domain, Type::STREAM, None)?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;
    Ok(socket.into())
}

impl Reactor for TcpReactor {
    fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let listener = bind_with_backlog(self.bind_addr, self.backlog)?;
        *self.local_addr.lock().unwrap() = listener.local_addr().ok();

        let client_cfg = self.client_cfg;
        let on_event = Arc::clone(&self.on_event);
        let state = Arc::clone(&self.state);
        let running = Arc::clone(&self.running);

        let handle = std::thread::Builder::new().name("particle-net-accept".to_string()).spawn(move || {
            while running.load(Ordering::Acquire) {
                match listener.accept() {
                    Ok((stream, addr)) => accept_one(stream, addr, client_cfg, &on_event, &state),
                    Err(err) => {
                        if running.load(Ordering::Acquire) {
                            warn!(error = %err, "accept failed");
                        }
                    }
                }
            }
        })?;

        *self.accept_handle.lock().unwrap() = Some(handle);
        Ok(())
    }

    fn send_to(&self, peer: &str, payload: &[u8]) -> Result<()> {
        let client = self.state.clients.lock().unwrap().get(peer).cloned();
        match client {
            Some(client) => {
                client.send(payload)?;
                self.state.metrics.record_send(payload.len());
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn broadcast(&self, payload: &[u8]) {
        let clients: Vec<Arc<TcpParticle>> = self.state.clients.lock().unwrap().values().cloned().collect();
        for client in clients {
            match client.send(payload) {
                Ok(()) => self.state.metrics.record_send(payload.len()),
                Err(e) => warn!(error = %e, "broadcast send to one client failed, continuing"),
            }
        }
    }

    fn dispose(&self) {
        self.running.store(false, Ordering::Release);
        // Nudge the blocking `accept()` past its wait by connecting once.
        if let Some(addr) = self.local_addr() {
            if let Ok(stream) = std::net::TcpStream::connect(addr) {
                let _ = stream.shutdown(std::net::Shutdown::Both);
            }
        }
        if let Some(handle) = self.accept_handle.lock().unwrap().take() {
            let _ = handle.join();
        }
        let clients: HashMap<String, Arc<TcpParticle>> = self.state.clients.lock().unwrap().drain().collect();
        for client in clients.values() {
            client.dispose();
        }
    }
}

fn accept_one(
    stream: std::net::TcpStream,
    addr: SocketAddr,
    client_cfg: TcpParticleConfig,
    on_event: &SharedDispatch,
    state: &Arc<SharedState>,
) {
    let peer = addr.to_string();
    let peer_for_removal = peer.clone();
    let dispatch = Arc::clone(on_event);
    let state_for_metrics = Arc::clone(state);
    let wrapped: SharedDispatch = Arc::new(move |event: Event<'_>| {
        match &event {
            Event::Received { view, .. } => state_for_metrics.metrics.record_receive(view.len()),
            Event::Disconnected { .. } => {
                state_for_metrics.clients.lock().unwrap().remove(&peer_for_removal);
            }
            _ => {}
        }
        dispatch.dispatch(event);
    });

    match TcpParticle::from_stream(stream, peer.clone(), client_cfg, wrapped) {
        Ok(particle) => {
            state.clients.lock().unwrap().insert(peer, particle);
        }
        Err(err) => warn!(peer = %peer, error = %err, "failed to attach accepted connection"),
    }
}
