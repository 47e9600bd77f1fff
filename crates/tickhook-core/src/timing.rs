//! Tick duration bookkeeping.
//!
//! A tick's duration is only known once it has finished, so the timer
//! computes it when the AFTER phase runs and caches it. The BEFORE phase of
//! the next tick reports that cached value instead of sampling the clock:
//! at BEFORE time, "now" has not been sampled for the new tick yet. Both
//! phases of consecutive ticks therefore see the same number, and at
//! BEFORE time it is one tick stale. Observers may rely on this.
//!
//! The last timestamp is kept at full clock precision and only the
//! reported delta is truncated to whole milliseconds, so truncation never
//! accumulates into drift across ticks.

use std::time::Duration;

/// Per-hook timing state. Owned by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickTimer {
    is_first_tick: bool,
    last_tick: Duration,
    cached_duration: Duration,
}

impl TickTimer {
    /// A timer that has not observed any tick yet.
    pub const fn new() -> Self {
        Self {
            is_first_tick: true,
            last_tick: Duration::ZERO,
            cached_duration: Duration::ZERO,
        }
    }

    /// Whether no tick has completed yet.
    pub const fn is_first_tick(&self) -> bool {
        self.is_first_tick
    }

    /// Timestamp of the most recently completed tick.
    pub const fn last_tick(&self) -> Duration {
        self.last_tick
    }

    /// Duration reported by the most recent AFTER phase, in whole
    /// milliseconds. This is what a BEFORE phase reports.
    pub fn cached_delta_ms(&self) -> u64 {
        whole_millis(self.cached_duration)
    }

    /// Record the end of a tick observed at `now` and return its duration
    /// in whole milliseconds.
    ///
    /// The first completed tick has no predecessor and reports `0`. A
    /// sample earlier than the previous one (impossible with a monotonic
    /// clock) also reports `0` rather than a negative value.
    pub fn complete_tick(&mut self, now: Duration) -> u64 {
        if self.is_first_tick {
            self.cached_duration = Duration::ZERO;
            self.is_first_tick = false;
        } else {
            self.cached_duration = now.saturating_sub(self.last_tick);
        }
        self.last_tick = now;
        self.cached_delta_ms()
    }
}

impl Default for TickTimer {
    fn default() -> Self {
        Self::new()
    }
}

/// Truncate a duration to whole milliseconds, saturating at `u64::MAX`.
fn whole_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[test]
    fn first_tick_reports_zero() {
        let mut timer = TickTimer::new();
        assert!(timer.is_first_tick());
        assert_eq!(timer.cached_delta_ms(), 0);

        // Even a late first tick has no predecessor to measure from.
        assert_eq!(timer.complete_tick(ms(5_000)), 0);
        assert!(!timer.is_first_tick());
        assert_eq!(timer.last_tick(), ms(5_000));
    }

    #[test]
    fn consecutive_ticks_report_difference() {
        let mut timer = TickTimer::new();
        assert_eq!(timer.complete_tick(ms(0)), 0);
        assert_eq!(timer.complete_tick(ms(16)), 16);
        assert_eq!(timer.cached_delta_ms(), 16);
        assert_eq!(timer.complete_tick(ms(33)), 17);
        assert_eq!(timer.cached_delta_ms(), 17);
    }

    #[test]
    fn delta_is_truncated_not_rounded() {
        let mut timer = TickTimer::new();
        timer.complete_tick(Duration::from_micros(0));
        assert_eq!(timer.complete_tick(Duration::from_micros(16_999)), 16);
    }

    #[test]
    fn truncation_does_not_accumulate() {
        let mut timer = TickTimer::new();
        let mut now = Duration::ZERO;
        timer.complete_tick(now);

        // 3 ticks of 16.6ms each: 16, 16, 16 reported, but the baseline
        // stays exact so the total elapsed is still 49.8ms.
        for _ in 0..3 {
            now = now.saturating_add(Duration::from_micros(16_600));
            assert_eq!(timer.complete_tick(now), 16);
        }
        assert_eq!(timer.last_tick(), Duration::from_micros(49_800));
    }

    #[test]
    fn backwards_sample_reports_zero() {
        let mut timer = TickTimer::new();
        timer.complete_tick(ms(100));
        assert_eq!(timer.complete_tick(ms(90)), 0);
        assert_eq!(timer.last_tick(), ms(90));
    }

    #[test]
    fn huge_durations_saturate() {
        assert_eq!(whole_millis(Duration::MAX), u64::MAX);
    }
}
