// Session lifecycle tests against the loopback platform.
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use topiclink::api::{
    CorrelationId, ErrorKind, Event, EventType, LoggingRegistry, LoopbackPlatform, Outcome,
    ServiceDefinition, Session, SessionOptions, SessionState, StreamId, Topic, names,
};

fn platform() -> LoopbackPlatform {
    LoopbackPlatform::with_logging(Arc::new(LoggingRegistry::new())).with_service(
        ServiceDefinition::new("svcA")
            .with_event("IBM")
            .with_operation("Echo"),
    )
}

fn session(platform: &LoopbackPlatform) -> Session {
    let session = Session::with_logging(
        platform.connect(),
        SessionOptions::new().with_stop_grace(Duration::from_millis(200)),
        Arc::new(LoggingRegistry::new()),
    );
    session.start().expect("start");
    session
}

fn next(session: &Session) -> Event {
    match session
        .next_event(Some(Duration::from_secs(2)))
        .expect("next event")
    {
        Outcome::Ready(event) => event,
        Outcome::TimedOut => panic!("timed out waiting for an event"),
    }
}

fn until(session: &Session, message_type: &str) -> Event {
    for _ in 0..32 {
        let event = next(session);
        if event.message_type() == Some(message_type) {
            return event;
        }
    }
    panic!("never saw {message_type}");
}

#[test]
fn publish_round_trip_then_stop() {
    let platform = platform();
    let session = session(&platform);
    assert_eq!(next(&session).message_type(), Some(names::SESSION_STARTED));

    let service = session
        .resolve("svcA", Some(Duration::from_secs(2)))
        .expect("resolve")
        .ready()
        .expect("resolved");
    assert_eq!(service.name(), "svcA");
    assert!(service.has_event("IBM"));
    assert_eq!(next(&session).message_type(), Some(names::SERVICE_OPENED));

    let topic = session.create_topic(&service, "IBM").expect("topic");
    assert_eq!(next(&session).message_type(), Some(names::TOPIC_CREATED));
    let activated = next(&session);
    assert_eq!(activated.event_type, EventType::TopicStatus);
    assert_eq!(activated.message_type(), Some(names::TOPIC_ACTIVATED));
    assert!(topic.is_active());
    assert_eq!(session.state(), SessionState::Steady);

    let id = session
        .publish(&topic, json!({"px": 101.5}), Some(CorrelationId::int(42)))
        .expect("publish");
    let ack = next(&session);
    assert_eq!(ack.message_type(), Some(names::PUBLISH_SUCCESS));
    assert!(ack.correlates(&id));
    assert_eq!(session.open_correlations(), 0);

    let stopped = session.stop().expect("stop");
    assert_eq!(
        stopped.last().and_then(Event::message_type),
        Some(names::SESSION_TERMINATED)
    );
    assert_eq!(session.state(), SessionState::Stopped);
    assert!(!topic.is_active());
    assert_eq!(
        session
            .next_event(Some(Duration::ZERO))
            .expect_err("stopped")
            .kind(),
        ErrorKind::IllegalState
    );
}

#[test]
fn unknown_service_fails_resolution() {
    let platform = platform();
    let session = session(&platform);
    let err = session
        .resolve("svcZ", Some(Duration::from_secs(2)))
        .expect_err("unknown");
    assert_eq!(err.kind(), ErrorKind::NotFound);
    until(&session, names::SERVICE_OPEN_FAILURE);
    assert_eq!(session.open_correlations(), 0);
}

#[test]
fn invalid_names_are_rejected_up_front() {
    let platform = platform();
    let session = session(&platform);
    assert_eq!(
        session
            .resolve_async("", None)
            .expect_err("empty name")
            .kind(),
        ErrorKind::InvalidArgument
    );
    assert_eq!(
        session
            .publish(&Topic::default(), json!(null), None)
            .expect_err("default topic")
            .kind(),
        ErrorKind::InvalidTopic
    );
}

#[test]
fn subscriber_sees_publications_until_cancelled() {
    let platform = platform();
    let publisher = session(&platform);
    let subscriber = session(&platform);

    let service = publisher
        .resolve("svcA", Some(Duration::from_secs(2)))
        .expect("resolve")
        .ready()
        .expect("resolved");
    let topic = publisher.create_topic(&service, "IBM").expect("topic");
    until(&publisher, names::TOPIC_ACTIVATED);

    let watched = subscriber
        .resolve("svcA", Some(Duration::from_secs(2)))
        .expect("resolve")
        .ready()
        .expect("resolved");
    let sub = subscriber
        .subscribe(&watched, "IBM", Some(CorrelationId::name("ibm")))
        .expect("subscribe");
    until(&subscriber, names::SUBSCRIPTION_STARTED);

    publisher.publish(&topic, json!({"px": 1}), None).expect("publish");
    let data = until(&subscriber, "IBM");
    assert_eq!(data.event_type, EventType::SubscriptionData);
    assert_eq!(data.first().expect("message").data, json!({"px": 1}));
    assert_eq!(
        data.first().and_then(|message| message.topic.clone()),
        Some(StreamId::new("svcA", "IBM"))
    );

    subscriber.cancel(&sub).expect("cancel");
    let terminated = until(&subscriber, names::SUBSCRIPTION_TERMINATED);
    assert!(terminated.correlates(&sub));
    assert_eq!(subscriber.open_correlations(), 0);

    publisher.publish(&topic, json!({"px": 2}), None).expect("publish");
    until(&publisher, names::PUBLISH_SUCCESS);
    until(&publisher, names::PUBLISH_SUCCESS);
    assert!(
        subscriber
            .next_event(Some(Duration::from_millis(100)))
            .expect("poll")
            .is_timed_out()
    );
}

#[test]
fn request_gets_response() {
    let platform = platform();
    let session = session(&platform);
    let service = session
        .resolve("svcA", Some(Duration::from_secs(2)))
        .expect("resolve")
        .ready()
        .expect("resolved");
    let id = session
        .request(&service, "Echo", json!({"q": "ping"}), None)
        .expect("request");
    let response = until(&session, "EchoResponse");
    assert_eq!(response.event_type, EventType::Response);
    assert!(response.correlates(&id));
    assert_eq!(
        response.first().expect("message").data["request"],
        json!({"q": "ping"})
    );
}

#[test]
fn partial_responses_keep_the_request_open() {
    let platform = platform();
    let session = session(&platform);
    let service = session
        .resolve("svcA", Some(Duration::from_secs(2)))
        .expect("resolve")
        .ready()
        .expect("resolved");
    let id = session
        .request(&service, "Echo", json!({"parts": 2}), None)
        .expect("request");

    let first = until(&session, "EchoResponse");
    assert_eq!(first.event_type, EventType::PartialResponse);
    assert_eq!(first.first().expect("message").data["part"], json!(0));
    assert_eq!(session.open_correlations(), 1);
    let second = next(&session);
    assert_eq!(second.event_type, EventType::PartialResponse);
    assert_eq!(second.first().expect("message").data["part"], json!(1));
    assert_eq!(session.open_correlations(), 1);

    let last = next(&session);
    assert_eq!(last.event_type, EventType::Response);
    assert!(last.correlates(&id));
    assert_eq!(session.open_correlations(), 0);
}

#[test]
fn outstanding_resolution_is_failed_by_stop() {
    let platform = platform();
    let session = session(&platform);
    let mut resolution = session.resolve_async("svcA", None).expect("resolve");
    let stopped = session.stop().expect("stop");
    assert!(stopped.len() >= 2);
    match resolution.wait(Some(Duration::from_secs(1))) {
        Ok(Outcome::Ready(service)) => assert_eq!(service.name(), "svcA"),
        Ok(Outcome::TimedOut) => panic!("resolution left pending after stop"),
        Err(err) => assert_eq!(err.kind(), ErrorKind::IllegalState),
    }
}

#[test]
fn dropping_a_session_releases_its_candidacy() {
    let platform = platform();
    let first = session(&platform);
    let second = session(&platform);
    let stream = StreamId::new("svcA", "IBM");

    let service = first
        .resolve("svcA", Some(Duration::from_secs(2)))
        .expect("resolve")
        .ready()
        .expect("resolved");
    let _first_topic = first.create_topic(&service, "IBM").expect("topic");
    until(&first, names::TOPIC_ACTIVATED);

    let backup_service = second
        .resolve("svcA", Some(Duration::from_secs(2)))
        .expect("resolve")
        .ready()
        .expect("resolved");
    let backup = second.create_topic(&backup_service, "IBM").expect("topic");
    until(&second, names::TOPIC_CREATED);

    drop(first);
    until(&second, names::TOPIC_ACTIVATED);
    assert!(backup.is_active());
    assert_eq!(second.active_topics(), vec![stream]);
}
