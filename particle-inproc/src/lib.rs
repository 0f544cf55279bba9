//! In-process particle/reactor pair (spec.md §4.14): the same
//! `Particle`/`Reactor` seams as the IPC and TCP substrates, backed by two
//! MPSC queues and a pair of signals instead of an OS-level transport.
//!
//! - `link` — the duplex queue pair, signals, and byte pools one client
//!   shares with its reactor
//! - `registry` — explicit, caller-owned name-to-reactor lookup (no
//!   process-wide singleton)
//! - `particle` — client endpoint: attach, send, background receive
//! - `reactor` — server endpoint: accept attaching clients, send/broadcast

mod link;
pub mod particle;
pub mod reactor;
pub mod registry;

pub use link::InprocLink;
pub use particle::InprocParticle;
pub use reactor::InprocReactor;
pub use registry::InprocRegistry;
