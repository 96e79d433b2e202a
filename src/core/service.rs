//! Purpose: Resolve service names into shared, immutable `Service` handles.
//! Exports: `ServiceDefinition`, `Service`, `Resolution`, `validate_service_name`.
//! Role: Read-mostly registry owned by one session; completed by `ServiceStatus` events.
//! Invariants: One handle per resolved name per session; handles never change after resolution.
//! Invariants: Every pending resolution is completed exactly once (opened, failed, or dropped at stop).

use crate::core::correlation::CorrelationId;
use crate::core::dispatcher::Outcome;
use crate::core::error::{Error, ErrorKind};
use crate::core::event::{Message, names};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ServiceDefinition {
    pub name: String,
    #[serde(default)]
    pub event_definitions: Vec<String>,
    #[serde(default)]
    pub operations: Vec<String>,
}

impl ServiceDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            event_definitions: Vec::new(),
            operations: Vec::new(),
        }
    }

    pub fn with_event(mut self, event: impl Into<String>) -> Self {
        self.event_definitions.push(event.into());
        self
    }

    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operations.push(operation.into());
        self
    }
}

/// Shared view of a resolved service; clones point at the same definition.
#[derive(Clone)]
pub struct Service {
    inner: Arc<ServiceDefinition>,
}

impl Service {
    pub(crate) fn from_definition(definition: ServiceDefinition) -> Self {
        Self {
            inner: Arc::new(definition),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn event_definitions(&self) -> &[String] {
        &self.inner.event_definitions
    }

    pub fn operations(&self) -> &[String] {
        &self.inner.operations
    }

    pub fn has_event(&self, event: &str) -> bool {
        self.inner.event_definitions.iter().any(|name| name == event)
    }

    pub fn has_operation(&self, operation: &str) -> bool {
        self.inner.operations.iter().any(|name| name == operation)
    }

    pub fn definition(&self) -> &ServiceDefinition {
        &self.inner
    }

    pub(crate) fn same_handle(&self, other: &Service) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Service").field(&self.inner.name).finish()
    }
}

impl PartialEq for Service {
    fn eq(&self, other: &Self) -> bool {
        self.same_handle(other) || self.inner == other.inner
    }
}

impl Eq for Service {}

pub fn validate_service_name(name: &str) -> Result<(), Error> {
    if name.is_empty() {
        return Err(Error::new(ErrorKind::InvalidArgument).with_message("service name is empty"));
    }
    if name.chars().any(char::is_whitespace) {
        return Err(Error::new(ErrorKind::InvalidArgument)
            .with_message(format!("service name `{name}` contains whitespace")));
    }
    Ok(())
}

/// Pending outcome of one resolution request.
pub struct Resolution {
    id: CorrelationId,
    name: String,
    receiver: Receiver<Result<Service, Error>>,
    resolved: Option<Service>,
}

impl Resolution {
    fn new(id: CorrelationId, name: String) -> (Self, Sender<Result<Service, Error>>) {
        let (sender, receiver) = mpsc::channel();
        let resolution = Self {
            id,
            name,
            receiver,
            resolved: None,
        };
        (resolution, sender)
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.id
    }

    pub fn service_name(&self) -> &str {
        &self.name
    }

    /// Waits for the outcome; `Some(Duration::ZERO)` polls and `None` waits indefinitely.
    ///
    /// A timeout leaves the request outstanding.
    pub fn wait(&mut self, timeout: Option<Duration>) -> Result<Outcome<Service>, Error> {
        if let Some(service) = &self.resolved {
            return Ok(Outcome::Ready(service.clone()));
        }
        let received = match timeout {
            None => self.receiver.recv().map_err(|_| WaitError::Closed),
            Some(duration) if duration.is_zero() => {
                self.receiver.try_recv().map_err(|err| match err {
                    TryRecvError::Empty => WaitError::Empty,
                    TryRecvError::Disconnected => WaitError::Closed,
                })
            }
            Some(duration) => self.receiver.recv_timeout(duration).map_err(|err| match err {
                RecvTimeoutError::Timeout => WaitError::Empty,
                RecvTimeoutError::Disconnected => WaitError::Closed,
            }),
        };
        match received {
            Ok(Ok(service)) => {
                self.resolved = Some(service.clone());
                Ok(Outcome::Ready(service))
            }
            Ok(Err(err)) => Err(err),
            Err(WaitError::Empty) => Ok(Outcome::TimedOut),
            Err(WaitError::Closed) => Err(Error::new(ErrorKind::IllegalState)
                .with_message(format!("resolution of `{}` is no longer pending", self.name))
                .with_correlation(self.id.clone())),
        }
    }
}

impl fmt::Debug for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolution")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("resolved", &self.resolved.is_some())
            .finish()
    }
}

enum WaitError {
    Empty,
    Closed,
}

struct PendingResolution {
    name: String,
    waiter: Sender<Result<Service, Error>>,
}

#[derive(Default)]
struct RegistryState {
    resolved: HashMap<String, Service>,
    pending: HashMap<CorrelationId, PendingResolution>,
}

/// How a `ServiceStatus` message affected the registry.
#[derive(Debug, Eq, PartialEq)]
pub(crate) enum Completion {
    Opened(String),
    Failed(String),
    Unmatched,
}

#[derive(Default)]
pub(crate) struct ServiceRegistry {
    state: Mutex<RegistryState>,
}

impl ServiceRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn lookup(&self, name: &str) -> Option<Service> {
        self.lock().resolved.get(name).cloned()
    }

    /// True when `service` is the handle this registry resolved.
    pub(crate) fn owns(&self, service: &Service) -> bool {
        self.lock()
            .resolved
            .get(service.name())
            .is_some_and(|known| known.same_handle(service))
    }

    pub(crate) fn begin(&self, id: CorrelationId, name: &str) -> Resolution {
        let (resolution, waiter) = Resolution::new(id.clone(), name.to_string());
        self.lock().pending.insert(
            id,
            PendingResolution {
                name: name.to_string(),
                waiter,
            },
        );
        resolution
    }

    /// A resolution satisfied from the cache, without a round trip.
    pub(crate) fn ready(&self, id: CorrelationId, service: Service) -> Resolution {
        let (mut resolution, _waiter) = Resolution::new(id, service.name().to_string());
        resolution.resolved = Some(service);
        resolution
    }

    pub(crate) fn abandon(&self, id: &CorrelationId) {
        self.lock().pending.remove(id);
    }

    pub(crate) fn complete(&self, message: &Message) -> Completion {
        let Some(id) = message.correlation_id() else {
            return Completion::Unmatched;
        };
        let mut state = self.lock();
        let Some(pending) = state.pending.remove(id) else {
            return Completion::Unmatched;
        };

        if message.message_type != names::SERVICE_OPENED {
            let reason = message.reason().unwrap_or("service open failure").to_string();
            let _ = pending.waiter.send(Err(Error::new(ErrorKind::NotFound)
                .with_message(format!("service `{}` not resolved: {reason}", pending.name))
                .with_correlation(id.clone())));
            return Completion::Failed(pending.name);
        }

        let definition = match serde_json::from_value::<ServiceDefinition>(message.data.clone()) {
            Ok(definition) => definition,
            Err(err) => {
                let _ = pending.waiter.send(Err(Error::new(ErrorKind::Io)
                    .with_message(format!("malformed definition for `{}`", pending.name))
                    .with_correlation(id.clone())
                    .with_source(err)));
                return Completion::Failed(pending.name);
            }
        };
        let service = state
            .resolved
            .entry(pending.name.clone())
            .or_insert_with(|| Service::from_definition(definition))
            .clone();
        let _ = pending.waiter.send(Ok(service));
        Completion::Opened(pending.name)
    }

    /// Fails every pending waiter; used when the session stops.
    pub(crate) fn fail_pending(&self, reason: &str) -> Vec<CorrelationId> {
        let mut state = self.lock();
        state
            .pending
            .drain()
            .map(|(id, pending)| {
                let _ = pending.waiter.send(Err(Error::new(ErrorKind::IllegalState)
                    .with_message(format!("resolution of `{}` abandoned: {reason}", pending.name))
                    .with_correlation(id.clone())));
                id
            })
            .collect()
    }

    pub(crate) fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(|poison| poison.into_inner())
    }
}
