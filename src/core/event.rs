//! Purpose: Define the event/message envelope that flows through a session's dispatch queue.
//! Exports: `EventType`, `Event`, `Message`, `names`.
//! Role: Shared vocabulary between transports, the dispatcher, and applications.
//! Invariants: Payloads are opaque JSON; terminal classification depends only on type + name.
//! Invariants: Field names are additive-only once serialized by the CLI.

use crate::core::correlation::CorrelationId;
use crate::core::topic::StreamId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Well-known message type names.
pub mod names {
    pub const SESSION_STARTED: &str = "SessionStarted";
    pub const SESSION_TERMINATED: &str = "SessionTerminated";
    pub const SESSION_CONSISTENCY_FAILURE: &str = "SessionConsistencyFailure";
    pub const SERVICE_OPENED: &str = "ServiceOpened";
    pub const SERVICE_OPEN_FAILURE: &str = "ServiceOpenFailure";
    pub const TOPIC_CREATED: &str = "TopicCreated";
    pub const TOPIC_ACTIVATED: &str = "TopicActivated";
    pub const TOPIC_DEACTIVATED: &str = "TopicDeactivated";
    pub const PUBLISH_SUCCESS: &str = "PublishSuccess";
    pub const PUBLISH_FAILURE: &str = "PublishFailure";
    pub const REQUEST_FAILURE: &str = "RequestFailure";
    pub const REQUEST_CANCELLED: &str = "RequestCancelled";
    pub const SUBSCRIPTION_STARTED: &str = "SubscriptionStarted";
    pub const SUBSCRIPTION_FAILURE: &str = "SubscriptionFailure";
    pub const SUBSCRIPTION_TERMINATED: &str = "SubscriptionTerminated";
    pub const HEARTBEAT: &str = "Heartbeat";
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Admin,
    SessionStatus,
    ServiceStatus,
    TopicStatus,
    RequestStatus,
    Response,
    PartialResponse,
    SubscriptionStatus,
    SubscriptionData,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub message_type: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub correlation_ids: Vec<CorrelationId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<StreamId>,
    #[serde(default)]
    pub data: Value,
    /// Issuance serial on locally synthesized terminals.
    #[serde(skip)]
    pub(crate) issuance: Option<u64>,
}

impl Message {
    pub fn new(message_type: impl Into<String>) -> Self {
        Self {
            message_type: message_type.into(),
            correlation_ids: Vec::new(),
            topic: None,
            data: Value::Null,
            issuance: None,
        }
    }

    pub fn with_correlation(mut self, id: CorrelationId) -> Self {
        self.correlation_ids.push(id);
        self
    }

    pub fn with_topic(mut self, topic: StreamId) -> Self {
        self.topic = Some(topic);
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    pub(crate) fn stamped(mut self, serial: u64) -> Self {
        self.issuance = Some(serial);
        self
    }

    pub fn correlation_id(&self) -> Option<&CorrelationId> {
        self.correlation_ids.first()
    }

    pub fn reason(&self) -> Option<&str> {
        self.data.get("reason").and_then(Value::as_str)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event_type: EventType,
    pub messages: Vec<Message>,
}

impl Event {
    pub fn new(event_type: EventType, messages: Vec<Message>) -> Self {
        Self {
            event_type,
            messages,
        }
    }

    pub fn single(event_type: EventType, message: Message) -> Self {
        Self::new(event_type, vec![message])
    }

    pub fn first(&self) -> Option<&Message> {
        self.messages.first()
    }

    pub fn message_type(&self) -> Option<&str> {
        self.first().map(|message| message.message_type.as_str())
    }

    pub fn is_terminal(&self, message: &Message) -> bool {
        is_terminal(self.event_type, &message.message_type)
    }

    /// Correlations that this event completes, in message order.
    pub fn terminal_correlations(&self) -> impl Iterator<Item = &CorrelationId> + '_ {
        self.messages
            .iter()
            .filter(|message| self.is_terminal(message))
            .flat_map(|message| message.correlation_ids.iter())
    }

    pub fn correlates(&self, id: &CorrelationId) -> bool {
        self.messages
            .iter()
            .any(|message| message.correlation_ids.contains(id))
    }
}

pub fn is_terminal(event_type: EventType, message_type: &str) -> bool {
    match event_type {
        EventType::Response | EventType::RequestStatus => true,
        EventType::ServiceStatus => {
            message_type == names::SERVICE_OPENED || message_type == names::SERVICE_OPEN_FAILURE
        }
        EventType::SubscriptionStatus => {
            message_type == names::SUBSCRIPTION_FAILURE
                || message_type == names::SUBSCRIPTION_TERMINATED
        }
        EventType::Admin
        | EventType::SessionStatus
        | EventType::TopicStatus
        | EventType::PartialResponse
        | EventType::SubscriptionData => false,
    }
}
