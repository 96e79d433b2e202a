//! Purpose: Compose the registry, topic manager, dispatcher, and transport into a session.
//! Exports: `Session`, `SessionState`.
//! Role: Public entry point; every outbound request and every consumed event passes through here.
//! Invariants: Outbound calls are serialized by the transport mutex and checked against the lifecycle under it.
//! Invariants: Inbound status is applied to the caches before the event is queued.
//! Invariants: Every issued correlation ends in a direct error or exactly one terminal event.
//! Invariants: Lock order is transport, then lifecycle; inbound routing never takes the transport lock.
#![allow(clippy::result_large_err)]

use super::options::{PublishPolicy, SessionOptions};
use crate::core::clock;
use crate::core::correlation::{CorrelationId, RequestKind};
use crate::core::dispatcher::{ClosedCorrelation, Dispatcher, Outcome, Popped};
use crate::core::error::{Error, ErrorKind};
use crate::core::event::{Event, EventType, Message, names};
use crate::core::logging::{self, LoggingRegistry, Severity};
use crate::core::service::{
    Completion, Resolution, Service, ServiceRegistry, validate_service_name,
};
use crate::core::stats;
use crate::core::topic::{Applied, StreamId, Topic, TopicManager};
use crate::core::transport::{Inbound, InboundRoute, Transport};
use serde_json::{Value, json};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

const CATEGORY: &str = "session";
// Upper bound on one drain wait inside `stop`, so completions consumed elsewhere are noticed.
const DRAIN_SLICE: Duration = Duration::from_millis(10);

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SessionState {
    Created,
    /// Started, with at least one resolution outstanding.
    Resolving,
    Steady,
    Stopping,
    Stopped,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Created => "created",
            SessionState::Resolving => "resolving",
            SessionState::Steady => "steady",
            SessionState::Stopping => "stopping",
            SessionState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Lifecycle {
    Created,
    Started,
    Stopping,
    Stopped,
}

struct SessionShared {
    id: u64,
    options: SessionOptions,
    logging: Arc<LoggingRegistry>,
    lifecycle: Mutex<Lifecycle>,
    transport: Mutex<Box<dyn Transport>>,
    dispatcher: Dispatcher,
    services: ServiceRegistry,
    topics: TopicManager,
    consuming: AtomicBool,
    stop_claimed: AtomicBool,
}

impl SessionShared {
    fn log(&self, severity: Severity, message: fmt::Arguments<'_>) {
        self.logging.emit(severity, CATEGORY, message);
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }

    fn transport(&self) -> MutexGuard<'_, Box<dyn Transport>> {
        self.transport
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }

    fn ensure_started(&self) -> Result<(), Error> {
        match *self.lifecycle() {
            Lifecycle::Started => Ok(()),
            Lifecycle::Created => Err(Error::new(ErrorKind::IllegalState)
                .with_message("session is not started")
                .with_hint("Call `start()` first.")),
            Lifecycle::Stopping => {
                Err(Error::new(ErrorKind::IllegalState).with_message("session is stopping"))
            }
            Lifecycle::Stopped => {
                Err(Error::new(ErrorKind::IllegalState).with_message("session is stopped"))
            }
        }
    }

    fn begin_stopping(&self) {
        let mut lifecycle = self.lifecycle();
        if *lifecycle == Lifecycle::Started {
            *lifecycle = Lifecycle::Stopping;
        }
    }

    /// Withdraws candidacies for topics whose last view has dropped.
    fn flush_released(&self, transport: &mut dyn Transport) {
        for stream in self.topics.take_released() {
            self.logging.emit(
                Severity::Debug,
                "topic",
                format_args!("releasing candidacy for {stream}"),
            );
            transport.release_topic(&stream);
        }
    }

    fn note_closed(&self, closed: &[ClosedCorrelation]) {
        for entry in closed {
            self.logging.emit(
                Severity::Debug,
                "dispatcher",
                format_args!(
                    "{} {} completed after {} ns",
                    entry.kind.label(),
                    entry.id,
                    entry.latency_ns
                ),
            );
        }
    }

    fn apply_service_status(&self, message: &Message) {
        match self.services.complete(message) {
            Completion::Opened(name) => self.logging.emit(
                Severity::Info,
                "service",
                format_args!("service `{name}` opened"),
            ),
            Completion::Failed(name) => self.logging.emit(
                Severity::Warn,
                "service",
                format_args!(
                    "service `{name}` failed to open: {}",
                    message.reason().unwrap_or("no reason given")
                ),
            ),
            Completion::Unmatched => {}
        }
    }

    /// Returns the consistency failure to queue after the event, if any.
    fn apply_topic_status(&self, message: &Message) -> Option<Event> {
        match self.topics.apply(message) {
            Ok(Applied::Activated(stream)) => {
                self.logging
                    .emit(Severity::Info, "topic", format_args!("{stream} is active"));
                None
            }
            Ok(Applied::Deactivated(stream)) => {
                self.logging
                    .emit(Severity::Info, "topic", format_args!("{stream} is inactive"));
                None
            }
            Ok(Applied::AlreadyInactive(stream)) => {
                self.logging.emit(
                    Severity::Debug,
                    "topic",
                    format_args!("{stream} deactivated while already inactive"),
                );
                None
            }
            Ok(Applied::UnknownStream(stream)) => {
                let stream = stream.map_or_else(|| "<none>".to_string(), |s| s.to_string());
                self.logging.emit(
                    Severity::Warn,
                    "topic",
                    format_args!(
                        "ignoring {} for unknown stream {stream}",
                        message.message_type
                    ),
                );
                None
            }
            Ok(Applied::Ignored) => None,
            Err(err) => {
                self.logging
                    .emit(Severity::Fatal, "topic", format_args!("{err}"));
                self.begin_stopping();
                let mut failure = Message::new(names::SESSION_CONSISTENCY_FAILURE)
                    .with_data(json!({"reason": err.to_string()}));
                if let Some(stream) = message.topic.clone() {
                    failure = failure.with_topic(stream);
                }
                Some(Event::single(EventType::SessionStatus, failure))
            }
        }
    }
}

impl InboundRoute for SessionShared {
    fn route(&self, event: Event) {
        let mut follow_up = Vec::new();
        match event.event_type {
            EventType::ServiceStatus => {
                for message in &event.messages {
                    self.apply_service_status(message);
                }
            }
            EventType::TopicStatus => {
                for message in &event.messages {
                    follow_up.extend(self.apply_topic_status(message));
                }
            }
            EventType::SessionStatus
                if event.message_type() == Some(names::SESSION_TERMINATED) =>
            {
                self.log(
                    Severity::Warn,
                    format_args!("transport terminated the session"),
                );
                self.begin_stopping();
                for stream in self.topics.deactivate_all() {
                    self.logging.emit(
                        Severity::Info,
                        "topic",
                        format_args!("{stream} is inactive after termination"),
                    );
                }
            }
            _ => {}
        }
        if !self.dispatcher.enqueue(event) {
            self.log(
                Severity::Trace,
                format_args!("dropping event delivered after close"),
            );
        }
        for event in follow_up {
            self.dispatcher.enqueue(event);
        }
    }
}

impl Drop for SessionShared {
    fn drop(&mut self) {
        stats::SESSIONS.sub(1);
    }
}

/// Local terminal event standing in for a completion that will not be awaited.
fn cancellation_event(id: &CorrelationId, kind: &RequestKind, reason: &str) -> Event {
    let data = json!({"reason": reason, "request": kind.label()});
    match kind {
        RequestKind::Subscribe(stream) => Event::single(
            EventType::SubscriptionStatus,
            Message::new(names::SUBSCRIPTION_TERMINATED)
                .with_correlation(id.clone())
                .with_topic(stream.clone())
                .with_data(data),
        ),
        RequestKind::Publish(stream) => Event::single(
            EventType::RequestStatus,
            Message::new(names::REQUEST_CANCELLED)
                .with_correlation(id.clone())
                .with_topic(stream.clone())
                .with_data(data),
        ),
        RequestKind::ResolveService(_) | RequestKind::Request { .. } => Event::single(
            EventType::RequestStatus,
            Message::new(names::REQUEST_CANCELLED)
                .with_correlation(id.clone())
                .with_data(data),
        ),
    }
}

fn session_terminated(reason: &str) -> Event {
    Event::single(
        EventType::SessionStatus,
        Message::new(names::SESSION_TERMINATED).with_data(json!({"reason": reason})),
    )
}

/// Exclusive right to pop from the dispatcher; released on drop.
struct ConsumerGuard<'a>(&'a AtomicBool);

impl<'a> ConsumerGuard<'a> {
    fn claim(flag: &'a AtomicBool) -> Option<Self> {
        if flag.swap(true, Ordering::AcqRel) {
            None
        } else {
            Some(Self(flag))
        }
    }
}

impl Drop for ConsumerGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// A connection to a publishing platform through one [`Transport`].
///
/// `Session` is `Send + Sync`; outbound calls may come from any thread, while
/// [`Session::next_event`] admits one consumer at a time.
pub struct Session {
    shared: Arc<SessionShared>,
}

impl Session {
    /// Creates a session that logs through [`logging::global`].
    pub fn new(transport: impl Transport + 'static, options: SessionOptions) -> Self {
        Self::with_logging(transport, options, Arc::clone(logging::global()))
    }

    pub fn with_logging(
        transport: impl Transport + 'static,
        options: SessionOptions,
        logging: Arc<LoggingRegistry>,
    ) -> Self {
        let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        stats::SESSIONS.add(1);
        Self {
            shared: Arc::new(SessionShared {
                id,
                options,
                logging,
                lifecycle: Mutex::new(Lifecycle::Created),
                transport: Mutex::new(Box::new(transport)),
                dispatcher: Dispatcher::new(),
                services: ServiceRegistry::new(),
                topics: TopicManager::new(id),
                consuming: AtomicBool::new(false),
                stop_claimed: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn options(&self) -> &SessionOptions {
        &self.shared.options
    }

    pub fn logging(&self) -> &Arc<LoggingRegistry> {
        &self.shared.logging
    }

    pub fn state(&self) -> SessionState {
        match *self.shared.lifecycle() {
            Lifecycle::Created => SessionState::Created,
            Lifecycle::Started if self.shared.services.pending_count() > 0 => {
                SessionState::Resolving
            }
            Lifecycle::Started => SessionState::Steady,
            Lifecycle::Stopping => SessionState::Stopping,
            Lifecycle::Stopped => SessionState::Stopped,
        }
    }

    pub fn start(&self) -> Result<(), Error> {
        let mut transport = self.shared.transport();
        {
            let mut lifecycle = self.shared.lifecycle();
            if *lifecycle != Lifecycle::Created {
                return Err(Error::new(ErrorKind::IllegalState)
                    .with_message(format!("cannot start a session that is {:?}", *lifecycle)));
            }
            *lifecycle = Lifecycle::Started;
        }
        let route: Weak<SessionShared> = Arc::downgrade(&self.shared);
        let route: Weak<dyn InboundRoute> = route;
        if let Err(err) = transport.start(Inbound::new(route)) {
            *self.shared.lifecycle() = Lifecycle::Created;
            self.shared
                .log(Severity::Error, format_args!("transport failed to start: {err}"));
            return Err(err);
        }
        self.shared.log(
            Severity::Info,
            format_args!("session {} started", self.shared.id),
        );
        Ok(())
    }

    /// Issues a resolution for `name` and returns its pending outcome.
    ///
    /// A name this session already resolved completes at once and still queues one
    /// `ServiceOpened` event for the new correlation.
    pub fn resolve_async(
        &self,
        name: &str,
        correlation: Option<CorrelationId>,
    ) -> Result<Resolution, Error> {
        validate_service_name(name)?;
        let mut transport = self.shared.transport();
        self.shared.ensure_started()?;
        self.shared.flush_released(transport.as_mut());

        let shared = &self.shared;
        let id = shared
            .dispatcher
            .open(correlation, RequestKind::ResolveService(name.to_string()))?;

        if let Some(service) = shared.services.lookup(name) {
            let definition = serde_json::to_value(service.definition()).map_err(|err| {
                shared.dispatcher.release(&id);
                Error::new(ErrorKind::Internal)
                    .with_message("failed to encode service definition")
                    .with_source(err)
            })?;
            shared.dispatcher.enqueue(Event::single(
                EventType::ServiceStatus,
                Message::new(names::SERVICE_OPENED)
                    .with_correlation(id.clone())
                    .with_data(definition),
            ));
            return Ok(shared.services.ready(id, service));
        }

        let resolution = shared.services.begin(id.clone(), name);
        if let Err(err) = transport.open_service(name, &id) {
            shared.services.abandon(&id);
            shared.dispatcher.release(&id);
            return Err(err.with_correlation(id));
        }
        shared.log(
            Severity::Debug,
            format_args!("resolving `{name}` as {id}"),
        );
        Ok(resolution)
    }

    /// Blocking form of [`Session::resolve_async`]; a timeout leaves the request outstanding.
    pub fn resolve(&self, name: &str, timeout: Option<Duration>) -> Result<Outcome<Service>, Error> {
        let mut resolution = self.resolve_async(name, None)?;
        resolution.wait(timeout)
    }

    /// [`Session::resolve`] bounded by `SessionOptions::resolve_timeout_ms`.
    pub fn resolve_default(&self, name: &str) -> Result<Outcome<Service>, Error> {
        self.resolve(name, Some(self.shared.options.resolve_timeout()))
    }

    /// Creates (or re-opens) the topic `name` on `service` and announces the candidacy.
    pub fn create_topic(&self, service: &Service, name: &str) -> Result<Topic, Error> {
        let mut transport = self.shared.transport();
        self.shared.ensure_started()?;
        self.shared.flush_released(transport.as_mut());
        if !self.shared.services.owns(service) {
            return Err(Error::new(ErrorKind::InvalidArgument)
                .with_message(format!(
                    "service `{}` was not resolved by this session",
                    service.name()
                ))
                .with_hint("Resolve the service on the same session first."));
        }

        let (topic, fresh) = self.shared.topics.create(service, name)?;
        if fresh {
            let stream = StreamId::new(service.name(), name);
            if let Err(err) = transport.register_topic(&stream) {
                drop(topic);
                self.shared.flush_released(transport.as_mut());
                return Err(err.with_stream(&stream));
            }
            self.shared.logging.emit(
                Severity::Info,
                "topic",
                format_args!("created {stream}"),
            );
        }
        Ok(topic)
    }

    /// Publishes `data` on `topic`; the outcome arrives as a `RequestStatus` event.
    pub fn publish(
        &self,
        topic: &Topic,
        data: Value,
        correlation: Option<CorrelationId>,
    ) -> Result<CorrelationId, Error> {
        let Some(stream) = topic.stream() else {
            return Err(Error::new(ErrorKind::InvalidTopic)
                .with_message("cannot publish on an invalid topic")
                .with_hint("Obtain topics from `create_topic`."));
        };
        let mut transport = self.shared.transport();
        self.shared.ensure_started()?;
        self.shared.flush_released(transport.as_mut());
        if topic.session_id() != Some(self.shared.id) {
            return Err(Error::new(ErrorKind::InvalidArgument)
                .with_message("topic belongs to another session")
                .with_stream(stream));
        }
        if !topic.is_active() && self.shared.options.publish_policy == PublishPolicy::RejectInactive
        {
            return Err(Error::new(ErrorKind::InactiveTopic)
                .with_message("topic is not the active publisher")
                .with_hint("Wait for a TopicActivated event, or use the best_effort policy.")
                .with_stream(stream));
        }

        let id = self
            .shared
            .dispatcher
            .open(correlation, RequestKind::Publish(stream.clone()))?;
        if let Err(err) = transport.publish(stream, &data, &id) {
            self.shared.dispatcher.release(&id);
            return Err(err.with_correlation(id).with_stream(stream));
        }
        self.shared
            .log(Severity::Trace, format_args!("published {id} on {stream}"));
        Ok(id)
    }

    /// Subscribes to `topic` on `service`; data arrives as `SubscriptionData` events.
    pub fn subscribe(
        &self,
        service: &Service,
        topic: &str,
        correlation: Option<CorrelationId>,
    ) -> Result<CorrelationId, Error> {
        if topic.trim().is_empty() {
            return Err(Error::new(ErrorKind::InvalidArgument).with_message("topic name is empty"));
        }
        let mut transport = self.shared.transport();
        self.shared.ensure_started()?;
        self.shared.flush_released(transport.as_mut());
        if !self.shared.services.owns(service) {
            return Err(Error::new(ErrorKind::InvalidArgument).with_message(format!(
                "service `{}` was not resolved by this session",
                service.name()
            )));
        }

        let stream = StreamId::new(service.name(), topic);
        let id = self
            .shared
            .dispatcher
            .open(correlation, RequestKind::Subscribe(stream.clone()))?;
        if let Err(err) = transport.subscribe(&stream, &id) {
            self.shared.dispatcher.release(&id);
            return Err(err.with_correlation(id).with_stream(&stream));
        }
        self.shared
            .log(Severity::Debug, format_args!("subscribed {id} to {stream}"));
        Ok(id)
    }

    /// Sends `operation` to `service`; answered by a `Response` or `RequestFailure`.
    pub fn request(
        &self,
        service: &Service,
        operation: &str,
        payload: Value,
        correlation: Option<CorrelationId>,
    ) -> Result<CorrelationId, Error> {
        let mut transport = self.shared.transport();
        self.shared.ensure_started()?;
        self.shared.flush_released(transport.as_mut());
        if !self.shared.services.owns(service) {
            return Err(Error::new(ErrorKind::InvalidArgument).with_message(format!(
                "service `{}` was not resolved by this session",
                service.name()
            )));
        }
        if !service.has_operation(operation) {
            return Err(Error::new(ErrorKind::NotFound)
                .with_message(format!(
                    "service `{}` has no operation `{operation}`",
                    service.name()
                ))
                .with_hint(format!("Known operations: {}.", service.operations().join(", "))));
        }

        let id = self.shared.dispatcher.open(
            correlation,
            RequestKind::Request {
                service: service.name().to_string(),
                operation: operation.to_string(),
            },
        )?;
        if let Err(err) = transport.request(service.name(), operation, &payload, &id) {
            self.shared.dispatcher.release(&id);
            return Err(err.with_correlation(id));
        }
        Ok(id)
    }

    /// Cancels an open correlation and queues a local terminal event for it.
    ///
    /// Repeating the call for the same id is a no-op until its terminal event is consumed.
    pub fn cancel(&self, correlation: &CorrelationId) -> Result<(), Error> {
        let mut transport = self.shared.transport();
        self.shared.ensure_started()?;
        let Some((kind, serial)) = self.shared.dispatcher.mark_cancelled(correlation)? else {
            return Ok(());
        };
        transport.cancel(correlation);
        if matches!(kind, RequestKind::ResolveService(_)) {
            self.shared.services.abandon(correlation);
        }
        let mut event = cancellation_event(correlation, &kind, "cancelled by application");
        event.messages = event
            .messages
            .into_iter()
            .map(|message| message.stamped(serial))
            .collect();
        self.shared.dispatcher.enqueue(event);
        self.shared.log(
            Severity::Debug,
            format_args!("cancelled {} {correlation}", kind.label()),
        );
        Ok(())
    }

    /// Takes the next event in arrival order.
    ///
    /// `Some(Duration::ZERO)` polls, `None` waits until an event arrives or the session stops.
    pub fn next_event(&self, timeout: Option<Duration>) -> Result<Outcome<Event>, Error> {
        if *self.shared.lifecycle() == Lifecycle::Stopped {
            return Err(Error::new(ErrorKind::IllegalState).with_message("session is stopped"));
        }
        let Some(_guard) = ConsumerGuard::claim(&self.shared.consuming) else {
            return Err(Error::new(ErrorKind::IllegalState)
                .with_message("another thread is already waiting for events"));
        };
        match self.shared.dispatcher.next(timeout) {
            Popped::Event(event, closed) => {
                self.shared.note_closed(&closed);
                Ok(Outcome::Ready(event))
            }
            Popped::TimedOut => Ok(Outcome::TimedOut),
            Popped::Closed => {
                Err(Error::new(ErrorKind::IllegalState).with_message("session is stopped"))
            }
        }
    }

    /// Stops the session and returns every remaining event, ending with `SessionTerminated`.
    ///
    /// Outstanding correlations get `stop_grace_ms` to complete; the rest are cancelled
    /// with a synthesized terminal event each. While another thread is blocked in
    /// [`Session::next_event`], completions during the grace period go to that thread.
    pub fn stop(&self) -> Result<Vec<Event>, Error> {
        let shared = &self.shared;
        if shared.stop_claimed.swap(true, Ordering::AcqRel) {
            return Err(Error::new(ErrorKind::IllegalState)
                .with_message("session is already stopped or stopping"));
        }
        let previous = {
            let mut lifecycle = shared.lifecycle();
            let previous = *lifecycle;
            *lifecycle = Lifecycle::Stopping;
            previous
        };
        if previous == Lifecycle::Created {
            shared.dispatcher.close();
            *shared.lifecycle() = Lifecycle::Stopped;
            return Ok(vec![session_terminated("stopped before start")]);
        }

        // Waits out any outbound call that passed its lifecycle check before `Stopping`.
        drop(shared.transport());

        let mut events = Vec::new();
        let grace = shared.options.stop_grace();
        if let Some(deadline) = clock::now().after(grace) {
            while shared.dispatcher.open_count() > 0 {
                let Some(remaining) = deadline.remaining() else {
                    break;
                };
                let slice = remaining.min(DRAIN_SLICE);
                let Some(_guard) = ConsumerGuard::claim(&shared.consuming) else {
                    std::thread::sleep(slice);
                    continue;
                };
                match shared.dispatcher.next(Some(slice)) {
                    Popped::Event(event, closed) => {
                        shared.note_closed(&closed);
                        events.push(event);
                    }
                    Popped::TimedOut => {}
                    Popped::Closed => break,
                }
            }
        }

        let mut transport = shared.transport();
        for mut event in shared.dispatcher.close() {
            if let Some(closed) = shared.dispatcher.settle(&mut event) {
                shared.note_closed(&closed);
                events.push(event);
            }
        }

        let outstanding = shared.dispatcher.outstanding();
        for (id, kind) in &outstanding {
            transport.cancel(id);
            shared.dispatcher.release(id);
            events.push(cancellation_event(id, kind, "session stopping"));
        }
        shared.services.fail_pending("session stopping");
        for stream in shared.topics.clear() {
            transport.release_topic(&stream);
        }
        transport.stop();
        drop(transport);

        *shared.lifecycle() = Lifecycle::Stopped;
        events.push(session_terminated("stopped by application"));
        shared.log(
            Severity::Info,
            format_args!(
                "session {} stopped; {} events drained, {} requests cancelled",
                shared.id,
                events.len() - 1 - outstanding.len(),
                outstanding.len()
            ),
        );
        Ok(events)
    }

    pub fn pending_resolutions(&self) -> usize {
        self.shared.services.pending_count()
    }

    pub fn open_correlations(&self) -> usize {
        self.shared.dispatcher.open_count()
    }

    pub fn queued_events(&self) -> usize {
        self.shared.dispatcher.queued_len()
    }

    /// Streams this session currently holds as elected publisher.
    pub fn active_topics(&self) -> Vec<StreamId> {
        self.shared.topics.active_streams()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let shared = &self.shared;
        if shared.stop_claimed.swap(true, Ordering::AcqRel) {
            return;
        }
        let previous = std::mem::replace(&mut *shared.lifecycle(), Lifecycle::Stopped);
        if previous == Lifecycle::Created {
            shared.dispatcher.close();
            return;
        }
        shared.log(
            Severity::Warn,
            format_args!("session {} dropped without stop", shared.id),
        );
        let mut transport = shared.transport();
        shared.services.fail_pending("session dropped");
        for stream in shared.topics.clear() {
            transport.release_topic(&stream);
        }
        transport.stop();
        drop(transport);
        shared.dispatcher.close();
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.shared.id)
            .field("state", &self.state())
            .finish()
    }
}
