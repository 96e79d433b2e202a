//! Purpose: Supply monotonic time points for latency measurement and bounded waits.
//! Exports: `TimePoint`, `now`, `nanoseconds_between`.
//! Role: Leaf utility shared by the dispatcher, resolution waits, and diagnostics.
//! Invariants: Time points are process-local and never persisted or compared across processes.
//! Invariants: `nanoseconds_between(a, b) == -nanoseconds_between(b, a)`.

use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug)]
pub struct TimePoint(Instant);

pub fn now() -> TimePoint {
    TimePoint(Instant::now())
}

/// Returns `end - start` in nanoseconds, saturating at the `i64` range.
pub fn nanoseconds_between(start: TimePoint, end: TimePoint) -> i64 {
    if end.0 >= start.0 {
        saturating_nanos(end.0.duration_since(start.0))
    } else {
        -saturating_nanos(start.0.duration_since(end.0))
    }
}

impl TimePoint {
    pub(crate) fn after(self, duration: Duration) -> Option<TimePoint> {
        self.0.checked_add(duration).map(TimePoint)
    }

    /// Time left until `self`, or `None` once it has passed.
    pub(crate) fn remaining(self) -> Option<Duration> {
        let left = nanoseconds_between(now(), self);
        if left <= 0 {
            return None;
        }
        Some(Duration::from_nanos(left as u64))
    }
}

fn saturating_nanos(duration: Duration) -> i64 {
    i64::try_from(duration.as_nanos()).unwrap_or(i64::MAX)
}
