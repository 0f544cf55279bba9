//! A `Particle` is one endpoint of a duplex byte stream; a `Reactor` is
//! the server side that accepts many of them. Every substrate in this
//! crate implements the same two traits, so code that sends bytes and
//! reacts to [`Event`]s doesn't need to know whether the peer is a thread
//! in this process, another process on the same host, or a socket across
//! the network.
//!
//! Four substrates are provided, picked by how close the peer is:
//!
//! - [`particle_inproc`] — two threads in the same process, connected by
//!   MPSC queues. No syscalls, no serialization boundary.
//! - [`particle_ipc`] — two processes on the same host, connected by an
//!   mmap'd shared-memory ring with a file-registry discovery mapping.
//! - [`particle_net::TcpParticle`] / [`particle_net::TcpReactor`] — a
//!   length-prefixed framed stream over TCP, for peers on different
//!   hosts that need ordered, reliable delivery.
//! - [`particle_net::UdpParticle`] — an unframed datagram wrapper for
//!   peers that accept best-effort, unordered delivery.
//!
//! All four share [`Particle`], [`Reactor`], [`Event`], and
//! [`ParticleError`] from [`particle_core`]; this crate just re-exports
//! the pieces needed to pick a substrate without four separate
//! dependency lines.

pub use particle_core::backoff::Backoff;
pub use particle_core::endpoint::{Particle, Reactor};
pub use particle_core::error::{ParticleError, Result};
pub use particle_core::event::{Dispatch, Event, PeerId, SharedDispatch};
pub use particle_core::metrics::{Metrics, MetricsSnapshot};

pub use particle_inproc::{InprocParticle, InprocReactor, InprocRegistry};
pub use particle_ipc::{MappedParticle, MappedReactor, RingSize};
pub use particle_net::{TcpParticle, TcpParticleConfig, TcpReactor, UdpOptions, UdpParticle};
