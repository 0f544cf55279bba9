//! Shared-memory inter-process particle substrate (spec.md §4.6–§4.10).
//!
//! ## Module organization
//!
//! - `ring` — the mmap-backed length-prefixed SPSC byte ring
//! - `mutex` — cross-process named mutex (`flock`-backed) guarding the registry
//! - `notify` — optional process-shared semaphore waking an idle reader
//! - `channel` — a directional (reader xor writer) half of a named mapping
//! - `registry` — the well-known append-only client-discovery mapping
//! - `particle` — the client-side [`Particle`](particle_core::Particle) implementation
//! - `reactor` — the server-side [`Reactor`](particle_core::Reactor) implementation

pub mod channel;
pub mod mutex;
pub mod notify;
pub mod particle;
pub mod reactor;
pub mod registry;
pub mod ring;

pub use particle::{MappedParticle, RingSize};
pub use reactor::MappedReactor;
