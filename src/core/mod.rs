//! Purpose: Group the session's coordination state, event vocabulary, and error model.
//! Exports: Clock, correlation, dispatcher, error, event, logging, service, topic, and transport modules.
//! Role: Internal building blocks composed by `api::Session`; re-exported selectively by `api`.
//! Invariants: Nothing here takes a session-level lock; callers own lock ordering.

pub mod clock;
pub mod correlation;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod logging;
pub mod service;
pub(crate) mod stats;
pub mod topic;
pub mod transport;
