//! Lock-free primitives and the endpoint contract shared by every
//! particle transport substrate (in-process, shared-memory IPC, framed
//! TCP, UDP).
//!
//! ## Module organization
//!
//! - `cursor` — cache-line-padded monotonic counter
//! - `slab` — pinned slab allocator for socket I/O buffers
//! - `spsc` / `mpsc` / `mpmc` — bounded lock-free queues for typed payloads
//! - `backoff` — exponential spin-wait used by every idle loop
//! - `event` — the `Event` sum type and `Dispatch` callback contract
//! - `endpoint` — the `Particle` / `Reactor` traits every substrate implements
//! - `error` — the shared error taxonomy
//! - `metrics` — per-endpoint traffic counters and their read-only snapshot

pub mod backoff;
pub mod cursor;
pub mod endpoint;
pub mod error;
pub mod event;
pub mod metrics;
pub mod mpmc;
pub mod mpsc;
pub mod slab;
pub mod spsc;

pub use backoff::Backoff;
pub use cursor::PaddedCursor;
pub use endpoint::{Particle, Reactor};
pub use error::{ParticleError, Result};
pub use event::{Dispatch, Event, PeerId, SharedDispatch};
pub use metrics::{Metrics, MetricsSnapshot};
pub use mpmc::MpmcQueue;
pub use mpsc::MpscQueue;
pub use slab::{SlabAllocator, SliceHandle};
pub use spsc::SpscRing;
