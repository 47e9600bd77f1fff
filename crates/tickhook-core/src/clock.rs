//! Monotonic time sources for tick duration measurement.
//!
//! Samples are expressed as a [`Duration`] since a fixed, clock-specific
//! origin. Only differences between samples carry meaning.

use std::cell::Cell;
use std::time::{Duration, Instant};

/// A time source that never runs backwards.
pub trait MonotonicClock {
    /// Time elapsed since this clock's origin.
    fn now(&self) -> Duration;
}

/// Wall-clock monotonic time backed by [`Instant`].
#[derive(Debug, Clone, Copy)]
pub struct SteadyClock {
    origin: Instant,
}

impl SteadyClock {
    /// Create a clock whose origin is the moment of construction.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SteadyClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock for SteadyClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// A clock that only moves when told to.
///
/// Used for deterministic tests and for replaying recorded tick times.
/// It can never be moved backwards: [`set`](Self::set) to an earlier time
/// leaves the clock where it is.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Cell<Duration>,
}

impl ManualClock {
    /// Create a clock at its origin.
    pub const fn new() -> Self {
        Self {
            now: Cell::new(Duration::ZERO),
        }
    }

    /// Move the clock to `at`, or leave it unchanged if `at` is in the past.
    pub fn set(&self, at: Duration) {
        if at > self.now.get() {
            self.now.set(at);
        }
    }

    /// Move the clock forward by `by`, saturating at [`Duration::MAX`].
    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get().saturating_add(by));
    }
}

impl MonotonicClock for ManualClock {
    fn now(&self) -> Duration {
        self.now.get()
    }
}
