//! Purpose: Define the boundary between the session core and the platform transport.
//! Exports: `Transport`, `Inbound`.
//! Role: Sessions drive `Transport` for outbound work; transports feed events back via `Inbound`.
//! Invariants: Outbound calls are serialized by the session; the transport never sees two at once.
//! Invariants: `Inbound` holds a weak session reference and is safe to call from any thread.
//! Invariants: A synchronous `Err` means nothing was sent and no event will follow for that id.

use crate::core::correlation::CorrelationId;
use crate::core::error::Error;
use crate::core::event::Event;
use crate::core::topic::StreamId;
use serde_json::Value;
use std::fmt;
use std::sync::Weak;

pub trait Transport: Send {
    /// Connects; the transport keeps `inbound` for its background delivery context.
    fn start(&mut self, inbound: Inbound) -> Result<(), Error>;

    fn open_service(&mut self, name: &str, id: &CorrelationId) -> Result<(), Error>;

    /// Announces this session as a publisher candidate for `stream`.
    fn register_topic(&mut self, stream: &StreamId) -> Result<(), Error>;

    fn release_topic(&mut self, stream: &StreamId);

    fn publish(&mut self, stream: &StreamId, data: &Value, id: &CorrelationId)
    -> Result<(), Error>;

    fn subscribe(&mut self, stream: &StreamId, id: &CorrelationId) -> Result<(), Error>;

    fn request(
        &mut self,
        service: &str,
        operation: &str,
        payload: &Value,
        id: &CorrelationId,
    ) -> Result<(), Error>;

    /// Best-effort; a completion that already left the platform may still arrive.
    fn cancel(&mut self, id: &CorrelationId);

    fn stop(&mut self);
}

pub(crate) trait InboundRoute: Send + Sync {
    fn route(&self, event: Event);
}

/// Handle through which a transport hands events to its session.
#[derive(Clone)]
pub struct Inbound {
    route: Weak<dyn InboundRoute>,
}

impl Inbound {
    pub(crate) fn new(route: Weak<dyn InboundRoute>) -> Self {
        Self { route }
    }

    /// Applies and queues `event`; returns false once the session is gone.
    pub fn deliver(&self, event: Event) -> bool {
        match self.route.upgrade() {
            Some(route) => {
                route.route(event);
                true
            }
            None => false,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.route.strong_count() > 0
    }
}

impl fmt::Debug for Inbound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Inbound")
            .field("connected", &self.is_connected())
            .finish()
    }
}
