// Active-publisher election across redundant sessions on one platform.
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use topiclink::api::{
    ErrorKind, Event, LoggingRegistry, LoopbackPlatform, Outcome, ServiceDefinition, Session,
    SessionOptions, SessionState, StreamId, Topic, names,
};

struct Publisher {
    session: Session,
    topic: Topic,
    connection: u64,
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

fn publisher(platform: &LoopbackPlatform, expect: &str) -> Publisher {
    let transport = platform.connect();
    let connection = transport.connection_id();
    let session = Session::with_logging(
        transport,
        SessionOptions::new().with_stop_grace(Duration::from_millis(100)),
        Arc::new(LoggingRegistry::new()),
    );
    session.start().expect("start");
    let service = session
        .resolve("svcA", Some(Duration::from_secs(2)))
        .expect("resolve")
        .ready()
        .expect("resolved");
    let topic = session.create_topic(&service, "IBM").expect("topic");
    until(&session, expect);
    Publisher {
        session,
        topic,
        connection,
    }
}

fn platform() -> LoopbackPlatform {
    LoopbackPlatform::with_logging(Arc::new(LoggingRegistry::new()))
        .with_service(ServiceDefinition::new("svcA"))
}

fn stream() -> StreamId {
    StreamId::new("svcA", "IBM")
}

#[test]
fn exactly_one_publisher_is_active() {
    let platform = platform();
    let primary = publisher(&platform, names::TOPIC_ACTIVATED);
    let backup = publisher(&platform, names::TOPIC_CREATED);

    assert!(primary.topic.is_active());
    assert!(!backup.topic.is_active());
    assert_eq!(platform.active_connection(&stream()), Some(primary.connection));

    let err = backup
        .session
        .publish(&backup.topic, json!(1), None)
        .expect_err("standby");
    assert_eq!(err.kind(), ErrorKind::InactiveTopic);
    assert_eq!(err.stream(), Some("svcA/IBM"));
}

#[test]
fn demote_moves_activation_to_backup() {
    let platform = platform();
    let primary = publisher(&platform, names::TOPIC_ACTIVATED);
    let backup = publisher(&platform, names::TOPIC_CREATED);

    assert_eq!(platform.demote(&stream()), Some(backup.connection));
    until(&primary.session, names::TOPIC_DEACTIVATED);
    until(&backup.session, names::TOPIC_ACTIVATED);
    assert!(!primary.topic.is_active());
    assert!(backup.topic.is_active());

    let id = backup
        .session
        .publish(&backup.topic, json!({"px": 2}), None)
        .expect("publish");
    assert!(until(&backup.session, names::PUBLISH_SUCCESS).correlates(&id));
}

#[test]
fn severed_primary_hands_over_and_terminates() {
    let platform = platform();
    let primary = publisher(&platform, names::TOPIC_ACTIVATED);
    let backup = publisher(&platform, names::TOPIC_CREATED);

    assert!(platform.sever(primary.connection));
    until(&primary.session, names::SESSION_TERMINATED);
    assert_eq!(primary.session.state(), SessionState::Stopping);
    assert!(!primary.topic.is_active());
    let err = primary
        .session
        .publish(&primary.topic, json!(1), None)
        .expect_err("terminated");
    assert_eq!(err.kind(), ErrorKind::IllegalState);

    until(&backup.session, names::TOPIC_ACTIVATED);
    assert!(backup.topic.is_active());

    let stopped = primary.session.stop().expect("stop after termination");
    assert_eq!(
        stopped.last().and_then(Event::message_type),
        Some(names::SESSION_TERMINATED)
    );
}

#[test]
fn dropping_last_topic_view_withdraws_candidacy() {
    let platform = platform();
    let primary = publisher(&platform, names::TOPIC_ACTIVATED);
    let backup = publisher(&platform, names::TOPIC_CREATED);
    let Publisher { session, topic, .. } = primary;

    drop(topic);
    // Candidacy is withdrawn on the session's next outbound call.
    assert!(session.resolve_async("svcA", None).is_ok());
    until(&backup.session, names::TOPIC_ACTIVATED);
    assert!(backup.topic.is_active());
    assert_eq!(platform.candidates(&stream()), vec![backup.connection]);
}
