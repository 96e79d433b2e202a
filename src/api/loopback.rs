//! Purpose: Provide an in-process publishing platform for demos, failover drills, and tests.
//! Exports: `LoopbackPlatform`, `LoopbackTransport`.
//! Role: One platform, many connections; each connection is a `Transport` for one session.
//! Invariants: At most one active candidate per stream; candidacy order is first-come, first-served.
//! Invariants: All events leave through one delivery thread, in the order the platform produced them.
//! Invariants: Platform state is never locked while a session is routing an event.
#![allow(clippy::result_large_err)]

use crate::core::correlation::CorrelationId;
use crate::core::error::{Error, ErrorKind};
use crate::core::event::{Event, EventType, Message, names};
use crate::core::logging::{self, LoggingRegistry, Severity};
use crate::core::service::ServiceDefinition;
use crate::core::topic::StreamId;
use crate::core::transport::{Inbound, Transport};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, MutexGuard};

const CATEGORY: &str = "loopback";

struct Delivery {
    inbound: Inbound,
    event: Event,
}

#[derive(Default)]
struct PlatformState {
    services: HashMap<String, ServiceDefinition>,
    connections: HashMap<u64, Inbound>,
    candidates: HashMap<StreamId, Vec<u64>>,
    active: HashMap<StreamId, u64>,
    subscribers: HashMap<StreamId, Vec<(u64, CorrelationId)>>,
    outbox: Option<Sender<Delivery>>,
}

impl PlatformState {
    fn send(&self, connection: u64, event: Event) {
        let (Some(outbox), Some(inbound)) = (&self.outbox, self.connections.get(&connection))
        else {
            return;
        };
        let _ = outbox.send(Delivery {
            inbound: inbound.clone(),
            event,
        });
    }

    fn topic_status(&self, connection: u64, name: &str, stream: &StreamId) {
        self.send(
            connection,
            Event::single(
                EventType::TopicStatus,
                Message::new(name).with_topic(stream.clone()),
            ),
        );
    }

    /// Activates the head candidate when the stream has no active publisher.
    fn elect(&mut self, stream: &StreamId) -> Option<u64> {
        if let Some(active) = self.active.get(stream) {
            return Some(*active);
        }
        let next = self.candidates.get(stream).and_then(|queue| queue.first().copied())?;
        self.active.insert(stream.clone(), next);
        self.topic_status(next, names::TOPIC_ACTIVATED, stream);
        Some(next)
    }

    fn withdraw(&mut self, connection: u64, stream: &StreamId) {
        if let Some(queue) = self.candidates.get_mut(stream) {
            queue.retain(|candidate| *candidate != connection);
            if queue.is_empty() {
                self.candidates.remove(stream);
            }
        }
        if self.active.get(stream) == Some(&connection) {
            self.active.remove(stream);
            self.elect(stream);
        }
    }

    fn disconnect(&mut self, connection: u64) {
        let streams = self
            .candidates
            .iter()
            .filter(|(_, queue)| queue.contains(&connection))
            .map(|(stream, _)| stream.clone())
            .collect::<Vec<_>>();
        for stream in streams {
            self.withdraw(connection, &stream);
        }
        for subscribers in self.subscribers.values_mut() {
            subscribers.retain(|(owner, _)| *owner != connection);
        }
        self.subscribers.retain(|_, subscribers| !subscribers.is_empty());
        self.connections.remove(&connection);
    }

    fn ensure_worker(&mut self) -> Result<(), Error> {
        if self.outbox.is_some() {
            return Ok(());
        }
        let (sender, receiver) = mpsc::channel::<Delivery>();
        std::thread::Builder::new()
            .name("topiclink-loopback".to_string())
            .spawn(move || {
                while let Ok(delivery) = receiver.recv() {
                    delivery.inbound.deliver(delivery.event);
                }
            })
            .map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_message("failed to spawn loopback delivery thread")
                    .with_source(err)
            })?;
        self.outbox = Some(sender);
        Ok(())
    }
}

struct PlatformShared {
    state: Mutex<PlatformState>,
    next_connection: AtomicU64,
    logging: Arc<LoggingRegistry>,
}

impl PlatformShared {
    fn lock(&self) -> MutexGuard<'_, PlatformState> {
        self.state.lock().unwrap_or_else(|poison| poison.into_inner())
    }
}

/// In-process platform shared by every connection it hands out.
#[derive(Clone)]
pub struct LoopbackPlatform {
    shared: Arc<PlatformShared>,
}

impl LoopbackPlatform {
    pub fn new() -> Self {
        Self::with_logging(Arc::clone(logging::global()))
    }

    pub fn with_logging(logging: Arc<LoggingRegistry>) -> Self {
        Self {
            shared: Arc::new(PlatformShared {
                state: Mutex::new(PlatformState::default()),
                next_connection: AtomicU64::new(1),
                logging,
            }),
        }
    }

    pub fn with_service(self, definition: ServiceDefinition) -> Self {
        self.define_service(definition);
        self
    }

    /// Adds or replaces a service; later resolutions see the new definition.
    pub fn define_service(&self, definition: ServiceDefinition) {
        self.shared
            .lock()
            .services
            .insert(definition.name.clone(), definition);
    }

    pub fn connect(&self) -> LoopbackTransport {
        LoopbackTransport {
            platform: Arc::clone(&self.shared),
            connection: self.shared.next_connection.fetch_add(1, Ordering::Relaxed),
        }
    }

    pub fn active_connection(&self, stream: &StreamId) -> Option<u64> {
        self.shared.lock().active.get(stream).copied()
    }

    pub fn candidates(&self, stream: &StreamId) -> Vec<u64> {
        self.shared
            .lock()
            .candidates
            .get(stream)
            .cloned()
            .unwrap_or_default()
    }

    /// Moves the active publisher to the back of the queue and elects the next candidate.
    ///
    /// Returns the newly active connection, or `None` when the stream has no publisher.
    pub fn demote(&self, stream: &StreamId) -> Option<u64> {
        let mut state = self.shared.lock();
        let current = state.active.remove(stream)?;
        state.topic_status(current, names::TOPIC_DEACTIVATED, stream);
        if let Some(queue) = state.candidates.get_mut(stream) {
            queue.retain(|candidate| *candidate != current);
            queue.push(current);
        }
        let next = state.elect(stream);
        drop(state);
        self.shared.logging.emit(
            Severity::Info,
            CATEGORY,
            format_args!("demoted connection {current} on {stream}"),
        );
        next
    }

    /// Drops a connection as if the link failed; its session receives `SessionTerminated`.
    pub fn sever(&self, connection: u64) -> bool {
        let mut state = self.shared.lock();
        if !state.connections.contains_key(&connection) {
            return false;
        }
        state.send(
            connection,
            Event::single(
                EventType::SessionStatus,
                Message::new(names::SESSION_TERMINATED)
                    .with_data(json!({"reason": "connection severed"})),
            ),
        );
        state.disconnect(connection);
        drop(state);
        self.shared.logging.emit(
            Severity::Warn,
            CATEGORY,
            format_args!("severed connection {connection}"),
        );
        true
    }

    /// Sends an `Admin/Heartbeat` to every connection.
    pub fn heartbeat(&self) {
        let state = self.shared.lock();
        let mut connections = state.connections.keys().copied().collect::<Vec<_>>();
        connections.sort_unstable();
        for connection in connections {
            state.send(
                connection,
                Event::single(EventType::Admin, Message::new(names::HEARTBEAT)),
            );
        }
    }

    pub fn connection_count(&self) -> usize {
        self.shared.lock().connections.len()
    }
}

impl Default for LoopbackPlatform {
    fn default() -> Self {
        Self::new()
    }
}

/// One session's connection to a [`LoopbackPlatform`].
pub struct LoopbackTransport {
    platform: Arc<PlatformShared>,
    connection: u64,
}

impl LoopbackTransport {
    pub fn connection_id(&self) -> u64 {
        self.connection
    }

    fn connected(&self) -> Result<MutexGuard<'_, PlatformState>, Error> {
        let state = self.platform.lock();
        if state.connections.contains_key(&self.connection) {
            Ok(state)
        } else {
            Err(Error::new(ErrorKind::IllegalState)
                .with_message(format!("loopback connection {} is closed", self.connection)))
        }
    }
}

impl Transport for LoopbackTransport {
    fn start(&mut self, inbound: Inbound) -> Result<(), Error> {
        let mut state = self.platform.lock();
        if state.connections.contains_key(&self.connection) {
            return Err(Error::new(ErrorKind::IllegalState)
                .with_message(format!("loopback connection {} already started", self.connection)));
        }
        state.ensure_worker()?;
        state.connections.insert(self.connection, inbound);
        state.send(
            self.connection,
            Event::single(
                EventType::SessionStatus,
                Message::new(names::SESSION_STARTED)
                    .with_data(json!({"connection": self.connection})),
            ),
        );
        Ok(())
    }

    fn open_service(&mut self, name: &str, id: &CorrelationId) -> Result<(), Error> {
        let state = self.connected()?;
        let message = match state.services.get(name) {
            Some(definition) => {
                let data = serde_json::to_value(definition).map_err(|err| {
                    Error::new(ErrorKind::Internal)
                        .with_message("failed to encode service definition")
                        .with_source(err)
                })?;
                Message::new(names::SERVICE_OPENED).with_data(data)
            }
            None => Message::new(names::SERVICE_OPEN_FAILURE)
                .with_data(json!({"reason": format!("unknown service `{name}`")})),
        };
        state.send(
            self.connection,
            Event::single(EventType::ServiceStatus, message.with_correlation(id.clone())),
        );
        Ok(())
    }

    fn register_topic(&mut self, stream: &StreamId) -> Result<(), Error> {
        let mut state = self.connected()?;
        if !state.services.contains_key(&stream.service) {
            return Err(Error::new(ErrorKind::NotFound)
                .with_message(format!("unknown service `{}`", stream.service)));
        }
        let queue = state.candidates.entry(stream.clone()).or_default();
        if !queue.contains(&self.connection) {
            queue.push(self.connection);
        }
        state.topic_status(self.connection, names::TOPIC_CREATED, stream);
        state.elect(stream);
        Ok(())
    }

    fn release_topic(&mut self, stream: &StreamId) {
        self.platform.lock().withdraw(self.connection, stream);
    }

    fn publish(
        &mut self,
        stream: &StreamId,
        data: &Value,
        id: &CorrelationId,
    ) -> Result<(), Error> {
        let state = self.connected()?;
        if state.active.get(stream) != Some(&self.connection) {
            state.send(
                self.connection,
                Event::single(
                    EventType::RequestStatus,
                    Message::new(names::PUBLISH_FAILURE)
                        .with_correlation(id.clone())
                        .with_topic(stream.clone())
                        .with_data(json!({"reason": "not the active publisher"})),
                ),
            );
            return Ok(());
        }
        if let Some(subscribers) = state.subscribers.get(stream) {
            for (connection, subscription) in subscribers {
                state.send(
                    *connection,
                    Event::single(
                        EventType::SubscriptionData,
                        Message::new(stream.topic.clone())
                            .with_correlation(subscription.clone())
                            .with_topic(stream.clone())
                            .with_data(data.clone()),
                    ),
                );
            }
        }
        state.send(
            self.connection,
            Event::single(
                EventType::RequestStatus,
                Message::new(names::PUBLISH_SUCCESS)
                    .with_correlation(id.clone())
                    .with_topic(stream.clone()),
            ),
        );
        Ok(())
    }

    fn subscribe(&mut self, stream: &StreamId, id: &CorrelationId) -> Result<(), Error> {
        let mut state = self.connected()?;
        if !state.services.contains_key(&stream.service) {
            state.send(
                self.connection,
                Event::single(
                    EventType::SubscriptionStatus,
                    Message::new(names::SUBSCRIPTION_FAILURE)
                        .with_correlation(id.clone())
                        .with_topic(stream.clone())
                        .with_data(json!({"reason": format!("unknown service `{}`", stream.service)})),
                ),
            );
            return Ok(());
        }
        state
            .subscribers
            .entry(stream.clone())
            .or_default()
            .push((self.connection, id.clone()));
        state.send(
            self.connection,
            Event::single(
                EventType::SubscriptionStatus,
                Message::new(names::SUBSCRIPTION_STARTED)
                    .with_correlation(id.clone())
                    .with_topic(stream.clone()),
            ),
        );
        Ok(())
    }

    fn request(
        &mut self,
        service: &str,
        operation: &str,
        payload: &Value,
        id: &CorrelationId,
    ) -> Result<(), Error> {
        let state = self.connected()?;
        let known = state
            .services
            .get(service)
            .is_some_and(|definition| definition.operations.iter().any(|op| op == operation));
        let event = if known {
            // `{"parts": n}` asks for n partial responses ahead of the final one.
            let parts = payload.get("parts").and_then(Value::as_u64).unwrap_or(0);
            for part in 0..parts {
                state.send(
                    self.connection,
                    Event::single(
                        EventType::PartialResponse,
                        Message::new(format!("{operation}Response"))
                            .with_correlation(id.clone())
                            .with_data(json!({"operation": operation, "part": part})),
                    ),
                );
            }
            Event::single(
                EventType::Response,
                Message::new(format!("{operation}Response"))
                    .with_correlation(id.clone())
                    .with_data(json!({"operation": operation, "request": payload})),
            )
        } else {
            Event::single(
                EventType::RequestStatus,
                Message::new(names::REQUEST_FAILURE)
                    .with_correlation(id.clone())
                    .with_data(json!({"reason": format!("`{service}` cannot serve `{operation}`")})),
            )
        };
        state.send(self.connection, event);
        Ok(())
    }

    fn cancel(&mut self, id: &CorrelationId) {
        let mut state = self.platform.lock();
        let connection = self.connection;
        for subscribers in state.subscribers.values_mut() {
            subscribers.retain(|(owner, subscription)| !(*owner == connection && subscription == id));
        }
        state.subscribers.retain(|_, subscribers| !subscribers.is_empty());
    }

    fn stop(&mut self) {
        let mut state = self.platform.lock();
        if state.connections.contains_key(&self.connection) {
            state.disconnect(self.connection);
            drop(state);
            self.platform.logging.emit(
                Severity::Debug,
                CATEGORY,
                format_args!("connection {} closed", self.connection),
            );
        }
    }
}

impl Drop for LoopbackTransport {
    fn drop(&mut self) {
        self.platform.lock().disconnect(self.connection);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transport::InboundRoute;
    use std::sync::Weak;
    use std::time::Duration;

    struct Collector(Mutex<mpsc::Sender<Event>>);

    impl InboundRoute for Collector {
        fn route(&self, event: Event) {
            let _ = self.0.lock().expect("sender").send(event);
        }
    }

    struct Connection {
        transport: LoopbackTransport,
        events: mpsc::Receiver<Event>,
        _route: Arc<Collector>,
    }

    impl Connection {
        fn open(platform: &LoopbackPlatform) -> Self {
            let (sender, events) = mpsc::channel();
            let route = Arc::new(Collector(Mutex::new(sender)));
            let weak: Weak<Collector> = Arc::downgrade(&route);
            let weak: Weak<dyn InboundRoute> = weak;
            let mut transport = platform.connect();
            transport.start(Inbound::new(weak)).expect("start");
            let connection = Self {
                transport,
                events,
                _route: route,
            };
            assert_eq!(connection.next().message_type(), Some(names::SESSION_STARTED));
            connection
        }

        fn next(&self) -> Event {
            self.events
                .recv_timeout(Duration::from_secs(1))
                .expect("event")
        }
    }

    fn platform() -> LoopbackPlatform {
        LoopbackPlatform::with_logging(Arc::new(LoggingRegistry::new()))
            .with_service(ServiceDefinition::new("svcA").with_operation("Echo"))
    }

    fn stream() -> StreamId {
        StreamId::new("svcA", "IBM")
    }

    #[test]
    fn unknown_service_fails_to_open() {
        let platform = platform();
        let mut connection = Connection::open(&platform);
        connection
            .transport
            .open_service("svcZ", &CorrelationId::int(1))
            .expect("send");
        let event = connection.next();
        assert_eq!(event.message_type(), Some(names::SERVICE_OPEN_FAILURE));
        assert!(event.first().and_then(Message::reason).is_some());
    }

    #[test]
    fn first_candidate_is_elected() {
        let platform = platform();
        let mut first = Connection::open(&platform);
        let mut second = Connection::open(&platform);
        first.transport.register_topic(&stream()).expect("first");
        second.transport.register_topic(&stream()).expect("second");

        assert_eq!(first.next().message_type(), Some(names::TOPIC_CREATED));
        assert_eq!(first.next().message_type(), Some(names::TOPIC_ACTIVATED));
        assert_eq!(second.next().message_type(), Some(names::TOPIC_CREATED));
        assert_eq!(
            platform.active_connection(&stream()),
            Some(first.transport.connection_id())
        );
        assert_eq!(platform.candidates(&stream()).len(), 2);
    }

    #[test]
    fn demote_hands_over_to_next_candidate() {
        let platform = platform();
        let mut first = Connection::open(&platform);
        let mut second = Connection::open(&platform);
        first.transport.register_topic(&stream()).expect("first");
        second.transport.register_topic(&stream()).expect("second");
        first.next();
        first.next();
        second.next();

        assert_eq!(
            platform.demote(&stream()),
            Some(second.transport.connection_id())
        );
        assert_eq!(first.next().message_type(), Some(names::TOPIC_DEACTIVATED));
        assert_eq!(second.next().message_type(), Some(names::TOPIC_ACTIVATED));
    }

    #[test]
    fn release_promotes_successor() {
        let platform = platform();
        let mut first = Connection::open(&platform);
        let mut second = Connection::open(&platform);
        first.transport.register_topic(&stream()).expect("first");
        second.transport.register_topic(&stream()).expect("second");
        second.next();
        first.transport.release_topic(&stream());
        assert_eq!(second.next().message_type(), Some(names::TOPIC_ACTIVATED));
    }

    #[test]
    fn publish_fans_out_to_subscribers() {
        let platform = platform();
        let mut publisher = Connection::open(&platform);
        let mut subscriber = Connection::open(&platform);
        subscriber
            .transport
            .subscribe(&stream(), &CorrelationId::name("sub"))
            .expect("subscribe");
        assert_eq!(
            subscriber.next().message_type(),
            Some(names::SUBSCRIPTION_STARTED)
        );
        publisher.transport.register_topic(&stream()).expect("register");
        publisher.next();
        publisher.next();
        publisher
            .transport
            .publish(&stream(), &json!({"px": 1}), &CorrelationId::int(9))
            .expect("publish");

        let data = subscriber.next();
        assert_eq!(data.event_type, EventType::SubscriptionData);
        assert_eq!(data.first().expect("message").data, json!({"px": 1}));
        assert_eq!(publisher.next().message_type(), Some(names::PUBLISH_SUCCESS));

        subscriber.transport.cancel(&CorrelationId::name("sub"));
        publisher
            .transport
            .publish(&stream(), &json!({"px": 2}), &CorrelationId::int(10))
            .expect("publish");
        publisher.next();
        assert!(subscriber.events.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn standby_publish_fails_remotely() {
        let platform = platform();
        let mut first = Connection::open(&platform);
        let mut second = Connection::open(&platform);
        first.transport.register_topic(&stream()).expect("first");
        second.transport.register_topic(&stream()).expect("second");
        second.next();
        second
            .transport
            .publish(&stream(), &json!(1), &CorrelationId::int(1))
            .expect("send");
        assert_eq!(second.next().message_type(), Some(names::PUBLISH_FAILURE));
    }

    #[test]
    fn request_echoes_known_operation() {
        let platform = platform();
        let mut connection = Connection::open(&platform);
        connection
            .transport
            .request("svcA", "Echo", &json!({"x": 1}), &CorrelationId::int(2))
            .expect("request");
        let response = connection.next();
        assert_eq!(response.event_type, EventType::Response);
        assert_eq!(
            response.first().expect("message").data["request"],
            json!({"x": 1})
        );
        connection
            .transport
            .request("svcA", "Nope", &json!(null), &CorrelationId::int(3))
            .expect("request");
        assert_eq!(connection.next().message_type(), Some(names::REQUEST_FAILURE));
    }

    #[test]
    fn partial_responses_precede_the_final_response() {
        let platform = platform();
        let mut connection = Connection::open(&platform);
        let id = CorrelationId::int(4);
        connection
            .transport
            .request("svcA", "Echo", &json!({"parts": 2}), &id)
            .expect("request");
        for part in 0..2 {
            let partial = connection.next();
            assert_eq!(partial.event_type, EventType::PartialResponse);
            assert!(partial.correlates(&id));
            assert_eq!(partial.first().expect("message").data["part"], json!(part));
        }
        let last = connection.next();
        assert_eq!(last.event_type, EventType::Response);
        assert_eq!(last.message_type(), Some("EchoResponse"));
    }

    #[test]
    fn sever_terminates_and_fails_later_calls() {
        let platform = platform();
        let mut connection = Connection::open(&platform);
        assert!(platform.sever(connection.transport.connection_id()));
        assert_eq!(
            connection.next().message_type(),
            Some(names::SESSION_TERMINATED)
        );
        let err = connection
            .transport
            .open_service("svcA", &CorrelationId::int(1))
            .expect_err("closed");
        assert_eq!(err.kind(), ErrorKind::IllegalState);
        assert!(!platform.sever(connection.transport.connection_id()));
        assert_eq!(platform.connection_count(), 0);
    }
}
