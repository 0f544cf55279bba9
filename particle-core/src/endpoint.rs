//! The endpoint contract every substrate implements (spec.md §6).

use crate::error::Result;

/// One duplex endpoint over a chosen substrate.
///
/// Every implementation guarantees:
/// - zero-length sends are dropped silently (spec.md §8);
/// - `dispose` is idempotent and safe to call concurrently with in-flight
///   `send`s, though not concurrently with itself racing a `send` that is
///   *starting* — callers are expected to stop issuing new sends before
///   disposing (spec.md §4.9 invariant);
/// - exactly one disconnect notification fires per endpoint lifetime.
pub trait Particle {
    /// Send `payload` to the peer. Oversize payloads, a closed endpoint, or
    /// cancellation are reported as errors; nothing is partially written.
    fn send(&self, payload: &[u8]) -> Result<()>;

    /// Tear down the endpoint. Calling this more than once has the same
    /// observable effect as calling it once.
    fn dispose(&self);

    /// Whether the endpoint has been disposed.
    fn is_disposed(&self) -> bool;
}

/// The server-role component that accepts many particles and exposes
/// per-peer and broadcast operations.
pub trait Reactor {
    /// Begin accepting/attaching peers.
    fn start(&self) -> Result<()>;

    /// Send `payload` to one peer by id; unknown ids are dropped silently
    /// (spec.md §4.10).
    fn send_to(&self, peer: &str, payload: &[u8]) -> Result<()>;

    /// Send `payload` to every currently attached peer, swallowing
    /// per-peer failures so one dead peer does not stop the rest.
    fn broadcast(&self, payload: &[u8]);

    /// Stop accepting/attaching and tear down every attached particle.
    /// A stopped reactor may be restarted via `start()` again.
    fn dispose(&self);
}
