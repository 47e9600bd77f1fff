//! Tick event payloads delivered to observers.
//!
//! Each observed host tick produces exactly two [`TickEvent`]s: one with
//! [`TickPhase::Before`] when the host is about to run the tick, and one
//! with [`TickPhase::After`] once the tick's simulation work has finished.

use serde::{Deserialize, Serialize};

/// Which side of the host tick a notification is delivered on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TickPhase {
    /// The host is about to run the tick.
    Before,
    /// The host has finished running the tick.
    After,
}

impl core::fmt::Display for TickPhase {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Before => f.write_str("before"),
            Self::After => f.write_str("after"),
        }
    }
}

/// Metadata carried by every tick notification.
///
/// `delta_time_ms` is the whole number of milliseconds between the two most
/// recently completed ticks. It is computed when a tick finishes and reused
/// by the `Before` notification of the following tick, so at `Before` time
/// it is one tick stale. The first observed tick reports `0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TickEventArguments {
    /// Tick counter read from the host.
    pub tick_count: u64,
    /// Milliseconds elapsed between the last two completed ticks.
    pub delta_time_ms: u64,
}

impl TickEventArguments {
    /// Create a new argument set.
    pub const fn new(tick_count: u64, delta_time_ms: u64) -> Self {
        Self {
            tick_count,
            delta_time_ms,
        }
    }
}

/// A single tick notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TickEvent {
    /// Which side of the tick this notification belongs to.
    pub phase: TickPhase,
    /// Tick metadata.
    pub args: TickEventArguments,
}

impl TickEvent {
    /// Build a `Before` notification.
    pub const fn before(args: TickEventArguments) -> Self {
        Self {
            phase: TickPhase::Before,
            args,
        }
    }

    /// Build an `After` notification.
    pub const fn after(args: TickEventArguments) -> Self {
        Self {
            phase: TickPhase::After,
            args,
        }
    }

    /// Shorthand for `self.args.tick_count`.
    pub const fn tick_count(&self) -> u64 {
        self.args.tick_count
    }

    /// Shorthand for `self.args.delta_time_ms`.
    pub const fn delta_time_ms(&self) -> u64 {
        self.args.delta_time_ms
    }
}
