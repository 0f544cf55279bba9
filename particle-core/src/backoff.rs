//! Exponential spin-wait backoff shared by every substrate's idle loop
//! (spec.md §4.7: "starts at 1, doubles to 4096").
//!
//! Grounded in the teacher's `YieldingWaitStrategy`
//! (`flux/src/disruptor/wait_strategy.rs`), simplified to the single
//! spin-doubling policy spec.md calls for rather than the teacher's
//! spin/yield/sleep three-phase strategy — directional channels only ever
//! need the first phase since they fall back to an explicit notification
//! wait instead of a sleep phase.

const MIN_SPINS: u32 = 1;
const MAX_SPINS: u32 = 4096;

/// Doubling spin counter: each `spin()` call busy-spins the current number
/// of iterations, then doubles (capped at [`MAX_SPINS`]) for next time.
/// `reset()` brings it back to [`MIN_SPINS`] once real work is observed.
pub struct Backoff {
    spins: u32,
}

impl Backoff {
    /// Create a fresh backoff at the minimum spin count.
    pub fn new() -> Self {
        Self { spins: MIN_SPINS }
    }

    /// Busy-spin for the current window, then grow the window.
    pub fn spin(&mut self) {
        for _ in 0..self.spins {
            std::hint::spin_loop();
        }
        self.spins = (self.spins * 2).min(MAX_SPINS);
    }

    /// Reset to the minimum spin window after productive work.
    pub fn reset(&mut self) {
        self.spins = MIN_SPINS;
    }

    /// Current spin window, exposed for tests and metrics.
    pub fn current_spins(&self) -> u32 {
        self.spins
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_up_to_cap() {
        let mut b = Backoff::new();
        assert_eq!(b.current_spins(), 1);
        for _ in 0..20 {
            b.spin();
        }
        assert_eq!(b.current_spins(), MAX_SPINS);
    }

    #[test]
    fn reset_returns_to_minimum() {
        let mut b = Backoff::new();
        for _ in 0..5 {
            b.spin();
        }
        assert!(b.current_spins() > MIN_SPINS);
        b.reset();
        assert_eq!(b.current_spins(), MIN_SPINS);
    }
}
