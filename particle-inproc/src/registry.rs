//! Explicit, non-singleton connection hub (spec.md §4.14, §9).
//!
//! The source's in-process registry is process-wide singleton state — the
//! exact pattern spec.md §9's "Global/process-wide state" design note
//! flags for re-architecture. Here it is an ordinary value: callers build
//! one `InprocRegistry`, hand `&Arc<InprocRegistry>` to every reactor and
//! client they construct, and tests get full isolation by building a
//! fresh registry per test instead of sharing hidden global state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use particle_core::mpsc::MpscQueue;

use crate::link::{InprocLink, Signal};

const PENDING_CAPACITY: usize = 256;

/// What a running reactor publishes into the registry: a queue new
/// connections land in, and a signal so the reactor's accept loop can
/// spin-then-block instead of busy-polling an empty queue.
pub(crate) struct ReactorEndpoint {
    pub(crate) pending: MpscQueue<(String, Arc<InprocLink>)>,
    pub(crate) arrival_signal: Signal,
}

impl ReactorEndpoint {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self { pending: MpscQueue::new(PENDING_CAPACITY), arrival_signal: Signal::new() })
    }
}

/// Maps a reactor's name to its connection endpoint so clients can find a
/// running reactor without either side depending on process-wide state.
#[derive(Default)]
pub struct InprocRegistry {
    reactors: Mutex<HashMap<String, Arc<ReactorEndpoint>>>,
}

impl InprocRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&self, name: &str, endpoint: Arc<ReactorEndpoint>) {
        self.reactors.lock().unwrap().insert(name.to_string(), endpoint);
    }

    pub(crate) fn unregister(&self, name: &str) {
        self.reactors.lock().unwrap().remove(name);
    }

    pub(crate) fn lookup(&self, name: &str) -> Option<Arc<ReactorEndpoint>> {
        self.reactors.lock().unwrap().get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_registries_do_not_see_each_others_reactors() {
        let a = InprocRegistry::new();
        let b = InprocRegistry::new();
        a.register("server", ReactorEndpoint::new());
        assert!(a.lookup("server").is_some());
        assert!(b.lookup("server").is_none());
    }

    #[test]
    fn unregister_removes_the_lookup() {
        let registry = InprocRegistry::new();
        registry.register("server", ReactorEndpoint::new());
        registry.unregister("server");
        assert!(registry.lookup("server").is_none());
    }
}
