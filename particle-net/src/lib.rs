//! Framed TCP particle substrate plus a thin UDP wrapper (spec.md §4.11–§4.13).
//!
//! ## Module organization
//!
//! - `frame` — length-prefixed parser shared by client and reactor
//! - `tcp_particle` — a single framed TCP connection
//! - `tcp_reactor` — accept loop producing per-connection particles
//! - `udp` — out-of-scope-but-ambient datagram wrapper

pub mod frame;
pub mod tcp_particle;
pub mod tcp_reactor;
pub mod udp;

pub use tcp_particle::{TcpParticle, TcpParticleConfig};
pub use tcp_reactor::TcpReactor;
pub use udp::{UdpOptions, UdpParticle};
