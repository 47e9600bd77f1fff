//! BEFORE/AFTER tick dispatch routines.
//!
//! Both routines run synchronously on the host's tick thread, nested in the
//! host's own call stack, and must return promptly: nothing here blocks,
//! sleeps, or yields. State is held in a `RefCell` and shared through `Rc`,
//! so a [`TickDispatcher`] cannot leave the thread it was built on.

use std::cell::RefCell;
use std::rc::Rc;

use tickhook_events::EventSink;
use tickhook_types::{TickEvent, TickEventArguments};
use tracing::trace;

use crate::clock::MonotonicClock;
use crate::timing::TickTimer;

/// Read-only accessor for the host's own tick counter.
pub trait TickCounter {
    /// The host's current tick count.
    fn current_tick_count(&self) -> u64;
}

/// Builds and delivers the two notifications of every host tick.
pub struct TickDispatcher {
    timer: RefCell<TickTimer>,
    clock: Rc<dyn MonotonicClock>,
    counter: Rc<dyn TickCounter>,
    sink: Rc<dyn EventSink<TickEvent>>,
}

impl TickDispatcher {
    /// Create a dispatcher that has not observed any tick yet.
    pub fn new(
        clock: Rc<dyn MonotonicClock>,
        counter: Rc<dyn TickCounter>,
        sink: Rc<dyn EventSink<TickEvent>>,
    ) -> Self {
        Self {
            timer: RefCell::new(TickTimer::new()),
            clock,
            counter,
            sink,
        }
    }

    /// Notify observers that the host is about to run a tick.
    ///
    /// Reports the duration cached by the previous tick's AFTER phase; the
    /// clock is not sampled here.
    pub fn dispatch_before(&self) {
        let tick_count = self.counter.current_tick_count();
        let delta_time_ms = self.timer.borrow().cached_delta_ms();
        trace!(tick_count, delta_time_ms, "Dispatching tick before");
        self.sink
            .dispatch(&TickEvent::before(TickEventArguments::new(tick_count, delta_time_ms)));
    }

    /// Notify observers that the host has finished a tick, reporting the
    /// time since the previous tick finished.
    pub fn dispatch_after(&self) {
        let now = self.clock.now();
        let delta_time_ms = self.timer.borrow_mut().complete_tick(now);
        let tick_count = self.counter.current_tick_count();
        trace!(tick_count, delta_time_ms, "Dispatching tick after");
        self.sink
            .dispatch(&TickEvent::after(TickEventArguments::new(tick_count, delta_time_ms)));
    }

    /// A copy of the current timing state.
    pub fn timer(&self) -> TickTimer {
        *self.timer.borrow()
    }
}

impl core::fmt::Debug for TickDispatcher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TickDispatcher")
            .field("timer", &self.timer())
            .finish_non_exhaustive()
    }
}
