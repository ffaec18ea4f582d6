//! Alarm debouncing
//!
//! Remote devices tend to write the alert level several times in a row. Any
//! trigger that arrives less than the minimum interval after the previous one
//! is suppressed, and every trigger (suppressed or not) restarts the interval.

use std::time::{Duration, Instant};

/// Minimum time between two user-visible alarms
pub const MIN_ALARM_INTERVAL: Duration = Duration::from_secs(3);

/// Fixed-interval debouncer. The interval is not configurable.
#[derive(Debug, Clone, Default)]
pub struct AlarmDebouncer {
    last_trigger: Option<Instant>,
}

impl AlarmDebouncer {
    /// Register a trigger at `now`. Returns `true` if it should be presented.
    pub fn trigger(&mut self, now: Instant) -> bool {
        let allowed = self
            .last_trigger
            .map_or(true, |last| now.saturating_duration_since(last) >= MIN_ALARM_INTERVAL);
        self.last_trigger = Some(now);
        allowed
    }
}
