//! The single-setter callback contract shared by every substrate
//! (spec.md §9, Design Note 1).
//!
//! The source library this crate reimplements used multicast event slots
//! (`add_handler`/`remove_handler`). Composing multiple observers that way
//! invites subtle double-dispatch bugs, so every particle and reactor here
//! instead accepts one `Dispatch` closure of a sum type; an embedder who
//! needs several observers composes them in their own closure.

use std::sync::Arc;

/// Opaque identity of a peer, stable for the lifetime of one connection.
pub type PeerId = String;

/// One lifecycle or data event delivered to a particle's or reactor's
/// dispatcher.
pub enum Event<'a> {
    /// A frame arrived from `peer`. `view` is valid only for the duration
    /// of the dispatch call — see the zero-copy contract in spec.md §4.7
    /// and §4.11.
    Received { peer: &'a str, view: &'a [u8] },
    /// `peer` completed its connection handshake / registry attach.
    Connected { peer: &'a str },
    /// `peer`'s endpoint tore down. `error` is `Some` when disposal was
    /// triggered by a failure rather than a clean `dispose()`.
    Disconnected { peer: &'a str, error: Option<&'a str> },
}

/// A callback dispatcher. Implementations must not assume any particular
/// calling thread — background reader threads, registry poll threads, and
/// I/O completion threads may all invoke it.
///
/// # Reentrancy
///
/// A dispatcher that calls `send` on the same endpoint that is delivering
/// the event is safe: inbound and outbound channels/rings never share
/// state. A dispatcher that calls `dispose` on that same endpoint from
/// inside the callback is **not** safe for substrates whose reader thread
/// is the one invoking the callback (IPC, in-process, TCP receive) — it
/// will deadlock joining its own thread. Defer disposal to another thread
/// if it must happen in response to a received message.
pub trait Dispatch: Send + Sync {
    /// Handle one event.
    fn dispatch(&self, event: Event<'_>);
}

impl<F: Fn(Event<'_>) + Send + Sync> Dispatch for F {
    fn dispatch(&self, event: Event<'_>) {
        self(event)
    }
}

/// Convenience alias for a shared, clonable dispatcher handle.
pub type SharedDispatch = Arc<dyn Dispatch>;
