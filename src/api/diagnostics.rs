//! Purpose: Report library-wide resource usage and the crate version.
//! Exports: `memory_info`, `memory_report`, `version`.
//! Role: Read-only view over the process-wide gauges kept by the core.
//! Invariants: `memory_info` never writes past the caller's buffer.
//! Invariants: The returned length excludes the NUL terminator.

use crate::core::stats;

/// Human-readable report of live sessions, topics, queued events, and open correlations.
pub fn memory_report() -> String {
    format!(
        "topiclink {}\nsessions: {}\ntopics: {}\nqueued events: {}\nopen correlations: {}\n",
        version(),
        stats::SESSIONS.get(),
        stats::TOPICS.get(),
        stats::QUEUED_EVENTS.get(),
        stats::OPEN_CORRELATIONS.get(),
    )
}

/// Copies [`memory_report`] into `buffer` and returns the report length in bytes.
///
/// When the return value is `>= buffer.len()` the buffer holds a truncated copy with no
/// NUL terminator; otherwise the report is followed by a NUL. Negative means failure.
pub fn memory_info(buffer: &mut [u8]) -> i64 {
    let report = memory_report();
    let bytes = report.as_bytes();
    let Ok(needed) = i64::try_from(bytes.len()) else {
        return -1;
    };
    if bytes.len() >= buffer.len() {
        let copied = buffer.len();
        buffer.copy_from_slice(&bytes[..copied]);
    } else {
        buffer[..bytes.len()].copy_from_slice(bytes);
        buffer[bytes.len()] = 0;
    }
    needed
}

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
