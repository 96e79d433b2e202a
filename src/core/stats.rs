//! Purpose: Keep process-wide gauges backing the diagnostics memory report.
//! Exports: `Gauge` and the crate-private gauge statics.
//! Role: Leaf counters bumped by sessions, the dispatcher, and the correlation table.
//! Invariants: Every `add` is paired with a `sub` when the counted item is dropped.

use std::sync::atomic::{AtomicUsize, Ordering};

pub(crate) struct Gauge(AtomicUsize);

impl Gauge {
    const fn new() -> Self {
        Self(AtomicUsize::new(0))
    }

    pub(crate) fn add(&self, count: usize) {
        self.0.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn sub(&self, count: usize) {
        let _ = self
            .0
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |value| {
                Some(value.saturating_sub(count))
            });
    }

    pub(crate) fn get(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }
}

pub(crate) static SESSIONS: Gauge = Gauge::new();
pub(crate) static TOPICS: Gauge = Gauge::new();
pub(crate) static QUEUED_EVENTS: Gauge = Gauge::new();
pub(crate) static OPEN_CORRELATIONS: Gauge = Gauge::new();
