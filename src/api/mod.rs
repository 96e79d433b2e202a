//! Purpose: Define the stable public Rust API boundary for topiclink.
//! Exports: Session lifecycle, event vocabulary, logging, diagnostics, and the loopback platform.
//! Role: Public, additive-only surface used by the CLI and embedding applications.
//! Invariants: Session internals (registry, topic table, dispatcher queue) stay crate-private.
//! Invariants: Everything a `Transport` implementation needs is reachable from here.

mod diagnostics;
mod loopback;
mod options;
mod session;

pub use crate::core::clock::{TimePoint, nanoseconds_between, now};
pub use crate::core::correlation::{CorrelationId, RequestKind};
pub use crate::core::dispatcher::Outcome;
#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::event::{Event, EventType, Message, is_terminal, names};
pub use crate::core::logging::{
    LogRecord, LogSink, LoggingRegistry, Severity, TracingSink, global as global_logging,
    register_callback,
};
pub use crate::core::service::{Resolution, Service, ServiceDefinition, validate_service_name};
pub use crate::core::topic::{StreamId, Topic};
pub use crate::core::transport::{Inbound, Transport};
pub use diagnostics::{memory_info, memory_report, version};
pub use loopback::{LoopbackPlatform, LoopbackTransport};
pub use options::{PublishPolicy, SessionOptions};
pub use session::{Session, SessionState};

pub type ApiResult<T> = Result<T, Error>;
