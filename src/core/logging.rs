//! Purpose: Provide the severity-filtered logging sink used for all library diagnostics.
//! Exports: `Severity`, `LogRecord`, `LogSink`, `LoggingRegistry`, `TracingSink`, `global`, `register_callback`.
//! Role: Leaf module; sessions emit through an injected registry (default: the process-wide one).
//! Invariants: At most one sink is active; registering replaces it atomically (last writer wins).
//! Invariants: A record reaches the sink iff `severity != Off && severity <= threshold`.
//! Invariants: Sinks run synchronously on the emitting thread and must not re-enter their registry.

use crate::core::error::{Error, ErrorKind};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, RwLock, RwLockReadGuard, RwLockWriteGuard};
use time::OffsetDateTime;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Severity {
    Off = 0,
    Fatal = 1,
    Error = 2,
    Warn = 3,
    Info = 4,
    Debug = 5,
    Trace = 6,
}

impl Severity {
    pub const ALL: [Severity; 7] = [
        Severity::Off,
        Severity::Fatal,
        Severity::Error,
        Severity::Warn,
        Severity::Info,
        Severity::Debug,
        Severity::Trace,
    ];

    pub fn from_ordinal(value: i32) -> Result<Self, Error> {
        usize::try_from(value)
            .ok()
            .and_then(|index| Self::ALL.get(index).copied())
            .ok_or_else(|| {
                Error::new(ErrorKind::InvalidArgument)
                    .with_message(format!("invalid severity {value}"))
                    .with_hint("Use a severity between 0 (off) and 6 (trace).")
            })
    }

    pub fn ordinal(self) -> i32 {
        self as i32
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Off => "off",
            Severity::Fatal => "fatal",
            Severity::Error => "error",
            Severity::Warn => "warn",
            Severity::Info => "info",
            Severity::Debug => "debug",
            Severity::Trace => "trace",
        }
    }

    /// `tracing` has no fatal level; fatal records map onto `error`.
    pub fn tracing_directive(self) -> &'static str {
        match self {
            Severity::Fatal => "error",
            other => other.as_str(),
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if let Ok(ordinal) = trimmed.parse::<i32>() {
            return Self::from_ordinal(ordinal);
        }
        Self::ALL
            .iter()
            .copied()
            .find(|severity| severity.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| {
                Error::new(ErrorKind::InvalidArgument)
                    .with_message(format!("unknown severity `{trimmed}`"))
                    .with_hint("Use off, fatal, error, warn, info, debug, or trace.")
            })
    }
}

#[derive(Clone, Debug)]
pub struct LogRecord {
    pub thread_id: u64,
    pub severity: Severity,
    pub timestamp: OffsetDateTime,
    pub category: String,
    pub message: String,
}

pub trait LogSink: Send + Sync {
    fn on_log_record(&self, record: &LogRecord);
}

impl<F> LogSink for F
where
    F: Fn(&LogRecord) + Send + Sync,
{
    fn on_log_record(&self, record: &LogRecord) {
        self(record)
    }
}

struct Registration {
    sink: Option<Arc<dyn LogSink>>,
    threshold: Severity,
}

pub struct LoggingRegistry {
    registration: RwLock<Registration>,
}

impl LoggingRegistry {
    pub fn new() -> Self {
        Self {
            registration: RwLock::new(Registration {
                sink: None,
                threshold: Severity::Off,
            }),
        }
    }

    /// Replaces the active registration. `None` clears it.
    ///
    /// Returns once every emission that was already running against the previous sink
    /// has finished; later emissions only ever see the new registration.
    pub fn register(&self, sink: Option<Arc<dyn LogSink>>, threshold: Severity) {
        let mut registration = self.write();
        registration.sink = sink;
        registration.threshold = threshold;
    }

    /// Raw form of [`LoggingRegistry::register`]: `0` on success, non-zero on an invalid severity.
    pub fn register_callback(&self, sink: Option<Arc<dyn LogSink>>, threshold: i32) -> i32 {
        match Severity::from_ordinal(threshold) {
            Ok(severity) => {
                self.register(sink, severity);
                0
            }
            Err(_) => 1,
        }
    }

    pub fn threshold(&self) -> Severity {
        self.read().threshold
    }

    pub fn is_registered(&self) -> bool {
        self.read().sink.is_some()
    }

    pub fn enabled(&self, severity: Severity) -> bool {
        let registration = self.read();
        registration.sink.is_some() && passes(severity, registration.threshold)
    }

    pub fn emit(&self, severity: Severity, category: &str, message: fmt::Arguments<'_>) {
        let registration = self.read();
        let Some(sink) = registration.sink.as_ref() else {
            return;
        };
        if !passes(severity, registration.threshold) {
            return;
        }
        let record = LogRecord {
            thread_id: current_thread_id(),
            severity,
            timestamp: OffsetDateTime::now_utc(),
            category: category.to_string(),
            message: message.to_string(),
        };
        sink.on_log_record(&record);
    }

    fn read(&self) -> RwLockReadGuard<'_, Registration> {
        self.registration
            .read()
            .unwrap_or_else(|poison| poison.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Registration> {
        self.registration
            .write()
            .unwrap_or_else(|poison| poison.into_inner())
    }
}

impl Default for LoggingRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LoggingRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registration = self.read();
        f.debug_struct("LoggingRegistry")
            .field("registered", &registration.sink.is_some())
            .field("threshold", &registration.threshold)
            .finish()
    }
}

fn passes(severity: Severity, threshold: Severity) -> bool {
    severity != Severity::Off && severity <= threshold
}

/// Process-wide registry used by sessions that are not given their own.
pub fn global() -> &'static Arc<LoggingRegistry> {
    static GLOBAL: OnceLock<Arc<LoggingRegistry>> = OnceLock::new();
    GLOBAL.get_or_init(|| Arc::new(LoggingRegistry::new()))
}

/// Registers on the process-wide registry; call before any session starts.
pub fn register_callback(sink: Option<Arc<dyn LogSink>>, threshold: i32) -> i32 {
    global().register_callback(sink, threshold)
}

/// Forwards records into the `tracing` facade under target `topiclink`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn on_log_record(&self, record: &LogRecord) {
        let category = record.category.as_str();
        let thread_id = record.thread_id;
        let message = record.message.as_str();
        match record.severity {
            Severity::Off => {}
            Severity::Fatal => {
                tracing::error!(target: "topiclink", category, thread_id, fatal = true, "{message}")
            }
            Severity::Error => tracing::error!(target: "topiclink", category, thread_id, "{message}"),
            Severity::Warn => tracing::warn!(target: "topiclink", category, thread_id, "{message}"),
            Severity::Info => tracing::info!(target: "topiclink", category, thread_id, "{message}"),
            Severity::Debug => tracing::debug!(target: "topiclink", category, thread_id, "{message}"),
            Severity::Trace => tracing::trace!(target: "topiclink", category, thread_id, "{message}"),
        }
    }
}

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_ID: u64 = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
}

fn current_thread_id() -> u64 {
    THREAD_ID.with(|id| *id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Capture {
        records: Mutex<Vec<LogRecord>>,
    }

    impl LogSink for Capture {
        fn on_log_record(&self, record: &LogRecord) {
            self.records.lock().expect("lock").push(record.clone());
        }
    }

    impl Capture {
        fn count(&self) -> usize {
            self.records.lock().expect("lock").len()
        }
    }

    #[test]
    fn threshold_filter_matches_ordinal_order() {
        for threshold in Severity::ALL {
            for severity in Severity::ALL {
                let registry = LoggingRegistry::new();
                let capture = Arc::new(Capture::default());
                registry.register(Some(capture.clone()), threshold);
                registry.emit(severity, "test", format_args!("sample"));

                let expected = severity != Severity::Off
                    && threshold != Severity::Off
                    && severity.ordinal() <= threshold.ordinal();
                assert_eq!(
                    capture.count(),
                    usize::from(expected),
                    "severity {severity} threshold {threshold}"
                );
            }
        }
    }

    #[test]
    fn new_registration_supersedes_previous() {
        let registry = LoggingRegistry::new();
        let first = Arc::new(Capture::default());
        let second = Arc::new(Capture::default());

        registry.register(Some(first.clone()), Severity::Trace);
        registry.emit(Severity::Info, "test", format_args!("one"));
        registry.register(Some(second.clone()), Severity::Trace);
        registry.emit(Severity::Info, "test", format_args!("two"));

        assert_eq!(first.count(), 1);
        assert_eq!(second.count(), 1);
        let records = second.records.lock().expect("lock");
        assert_eq!(records[0].message, "two");
        assert_eq!(records[0].category, "test");
    }

    #[test]
    fn empty_sink_deregisters() {
        let registry = LoggingRegistry::new();
        let capture = Arc::new(Capture::default());
        registry.register(Some(capture.clone()), Severity::Trace);
        registry.register(None, Severity::Trace);
        registry.emit(Severity::Fatal, "test", format_args!("dropped"));
        assert_eq!(capture.count(), 0);
        assert!(!registry.is_registered());
    }

    #[test]
    fn raw_registration_rejects_out_of_range() {
        let registry = LoggingRegistry::new();
        assert_ne!(registry.register_callback(None, 7), 0);
        assert_ne!(registry.register_callback(None, -1), 0);
        assert_eq!(registry.threshold(), Severity::Off);
        assert_eq!(registry.register_callback(None, 4), 0);
        assert_eq!(registry.threshold(), Severity::Info);
    }

    #[test]
    fn closures_are_sinks() {
        let registry = LoggingRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = Arc::clone(&seen);
        registry.register(
            Some(Arc::new(move |record: &LogRecord| {
                sink_seen.lock().expect("lock").push(record.severity);
            })),
            Severity::Warn,
        );
        registry.emit(Severity::Error, "test", format_args!("kept"));
        registry.emit(Severity::Debug, "test", format_args!("filtered"));
        assert_eq!(*seen.lock().expect("lock"), vec![Severity::Error]);
        assert!(registry.enabled(Severity::Warn));
        assert!(!registry.enabled(Severity::Info));
    }

    #[test]
    fn records_carry_emitting_thread() {
        let registry = Arc::new(LoggingRegistry::new());
        let capture = Arc::new(Capture::default());
        registry.register(Some(capture.clone()), Severity::Trace);
        registry.emit(Severity::Info, "test", format_args!("main"));
        let worker = Arc::clone(&registry);
        std::thread::spawn(move || worker.emit(Severity::Info, "test", format_args!("worker")))
            .join()
            .expect("join");

        let records = capture.records.lock().expect("lock");
        assert_eq!(records.len(), 2);
        assert_ne!(records[0].thread_id, records[1].thread_id);
        assert_eq!(records[0].timestamp.offset(), time::UtcOffset::UTC);
    }

    #[test]
    fn severity_parses_names_and_ordinals() {
        assert_eq!("warn".parse::<Severity>().expect("name"), Severity::Warn);
        assert_eq!("TRACE".parse::<Severity>().expect("upper"), Severity::Trace);
        assert_eq!("1".parse::<Severity>().expect("ordinal"), Severity::Fatal);
        let err = "loud".parse::<Severity>().expect_err("err");
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(Severity::Fatal.tracing_directive(), "error");
    }
}
