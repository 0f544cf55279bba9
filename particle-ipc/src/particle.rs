//! Mapped particle: the client-side endpoint over shared-memory IPC
//! (spec.md §4.9).

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use particle_core::endpoint::Particle;
use particle_core::error::Result;
use particle_core::event::{Event, SharedDispatch};
use particle_core::metrics::{Metrics, MetricsSnapshot};

use crate::channel::{ChannelConfig, DirectionalReader, DirectionalWriter, FatalCallback};
use crate::registry::Registry;

/// Ring sizing shared by every directional channel a mapped particle or
/// reactor opens.
#[derive(Clone, Copy)]
pub struct RingSize {
    pub capacity: usize,
    pub max_frame: usize,
}

impl RingSize {
    pub fn new(capacity: usize, max_frame: usize) -> Self {
        Self { capacity, max_frame }
    }
}

fn hex_id(client_id: u64) -> String {
    format!("{client_id:016X}")
}

/// Client-side endpoint: opens (or creates) the inbound `S2C` reader and
/// outbound `C2S` writer named after this client's hex id, then appends
/// itself to the shared registry so a reactor can discover it.
pub struct MappedParticle {
    id: String,
    writer: DirectionalWriter,
    reader: DirectionalReader,
    disposed: Arc<AtomicBool>,
    on_event: SharedDispatch,
    metrics: Arc<Metrics>,
}

impl MappedParticle {
    /// Connect to a reactor listening under `base_name`. `client_id`
    /// becomes this particle's registry identifier.
    pub fn connect(
        base_dir: PathBuf,
        base_name: &str,
        client_id: u64,
        ring_size: RingSize,
        on_event: SharedDispatch,
    ) -> Result<Arc<Self>> {
        let id = hex_id(client_id);

        let inbound_name = format!("{base_name}.S2C.{id}");
        let outbound_name = format!("{base_name}.C2S.{id}");

        let writer = DirectionalWriter::open(
            ChannelConfig::new(&base_dir, outbound_name, ring_size.capacity, ring_size.max_frame),
            true,
        )?;

        let metrics = Arc::new(Metrics::new());
        let disposed = Arc::new(AtomicBool::new(false));

        let metrics_for_reader = Arc::clone(&metrics);
        let dispatch_for_reader = Arc::clone(&on_event);
        let id_for_reader = id.clone();

        let disposed_for_fatal = Arc::clone(&disposed);
        let dispatch_for_fatal = Arc::clone(&on_event);
        let id_for_fatal = id.clone();
        let on_fatal: FatalCallback = Arc::new(move || {
            if !disposed_for_fatal.swap(true, Ordering::AcqRel) {
                dispatch_for_fatal
                    .dispatch(Event::Disconnected { peer: &id_for_fatal, error: Some("ipc reader failed") });
            }
        });

        let reader = DirectionalReader::spawn(
            ChannelConfig::new(&base_dir, inbound_name, ring_size.capacity, ring_size.max_frame),
            true,
            Arc::new(move |bytes: &[u8]| {
                metrics_for_reader.record_receive(bytes.len());
                dispatch_for_reader.dispatch(Event::Received { peer: &id_for_reader, view: bytes });
            }),
            on_fatal,
        )?;

        let mut registry = Registry::open(&base_dir, base_name)?;
        registry.append(&id)?;

        Ok(Arc::new(Self { id, writer, reader, disposed, on_event, metrics }))
    }

    /// This particle's 16-char uppercase hex identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Point-in-time counters for this particle (spec.md §3, supplemented).
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Stand-in for "a future that resolves when the platform completion
    /// fires" (spec.md §9): the spin loop the ring's writer already runs
    /// dominates send latency, so there is nothing left to overlap with a
    /// caller's other work — `send_async` just resolves synchronously.
    pub fn send_async(&self, payload: &[u8]) -> Result<()> {
        self.send(payload)
    }
}

impl Particle for MappedParticle {
    fn send(&self, payload: &[u8]) -> Result<()> {
        if payload.is_empty() {
            return Ok(());
        }
        self.writer.send(payload)?;
        self.metrics.record_send(payload.len());
        Ok(())
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        // Reader first: stop pulling frames before the peer might start
        // seeing writes fail, matching spec.md §4.9's ordering.
        self.reader.dispose();
        self.on_event.dispatch(Event::Disconnected { peer: &self.id, error: None });
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
impl MappedParticle {
    /// Corrupt this particle's outbound ring, simulating a peer that wrote
    /// a bogus frame header, so reactor-side tests can exercise the
    /// fatal-disconnect path without a full writer round trip.
    pub(crate) fn corrupt_outbound_for_test(&self, len: u32) {
        self.writer.corrupt_for_test(len);
    }
}
