//! Tick event listeners registered by the host binary.

use std::cell::Cell;
use std::rc::Rc;

use tickhook_events::Listener;
use tickhook_types::{TickEvent, TickPhase};
use tracing::{debug, warn};

/// Log every tick event at debug level.
pub fn log_event(event: &TickEvent) {
    debug!(
        phase = %event.phase,
        tick_count = event.tick_count(),
        delta_time_ms = event.delta_time_ms(),
        "Tick event"
    );
}

/// Running counters over the tick event stream.
///
/// Also checks that phases alternate BEFORE, AFTER, BEFORE, ... starting
/// with BEFORE, and counts every event that breaks the pattern.
#[derive(Debug, Default)]
pub struct TickStats {
    before: Cell<u64>,
    after: Cell<u64>,
    total_delta_ms: Cell<u64>,
    max_delta_ms: Cell<u64>,
    last_phase: Cell<Option<TickPhase>>,
    out_of_order: Cell<u64>,
}

impl TickStats {
    /// Fold one event into the counters.
    pub fn record(&self, event: &TickEvent) {
        let expected = match self.last_phase.get() {
            None | Some(TickPhase::After) => TickPhase::Before,
            Some(TickPhase::Before) => TickPhase::After,
        };
        if event.phase != expected {
            bump(&self.out_of_order, 1);
            warn!(
                phase = %event.phase,
                expected = %expected,
                tick_count = event.tick_count(),
                "Tick phase out of order"
            );
        }
        self.last_phase.set(Some(event.phase));

        match event.phase {
            TickPhase::Before => bump(&self.before, 1),
            TickPhase::After => {
                bump(&self.after, 1);
                bump(&self.total_delta_ms, event.delta_time_ms());
                self.max_delta_ms
                    .set(self.max_delta_ms.get().max(event.delta_time_ms()));
            }
        }
    }

    /// Number of BEFORE events seen.
    pub fn before_count(&self) -> u64 {
        self.before.get()
    }

    /// Number of AFTER events seen.
    pub fn after_count(&self) -> u64 {
        self.after.get()
    }

    /// Number of events that broke phase alternation.
    pub fn out_of_order_count(&self) -> u64 {
        self.out_of_order.get()
    }

    /// Largest AFTER delta seen.
    pub fn max_delta_ms(&self) -> u64 {
        self.max_delta_ms.get()
    }

    /// Mean milliseconds between ticks.
    ///
    /// The first AFTER always reports 0 and measures nothing, so it is left
    /// out of the divisor. `None` until two ticks have completed.
    pub fn mean_delta_ms(&self) -> Option<u64> {
        let intervals = self.after.get().checked_sub(1)?;
        self.total_delta_ms.get().checked_div(intervals)
    }
}

fn bump(cell: &Cell<u64>, by: u64) {
    cell.set(cell.get().saturating_add(by));
}

/// Feeds events into a shared [`TickStats`].
#[derive(Debug, Clone)]
pub struct StatsListener(pub Rc<TickStats>);

impl Listener<TickEvent> for StatsListener {
    fn on_event(&self, event: &TickEvent) {
        self.0.record(event);
    }
}
