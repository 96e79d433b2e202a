//! Purpose: Hold top-level CLI command dispatch for `topiclink`.
//! Exports: `dispatch_command`.
//! Role: Keep `main.rs` focused on parse/bootstrap and delegate command execution.
//! Invariants: Every consumed event is printed before the command moves on.
//! Invariants: Sessions are stopped on success; their stop reports are printed last.

use super::*;

const EVENT_WAIT: Duration = Duration::from_secs(5);

pub(super) fn dispatch_command(
    command: Command,
    options: SessionOptions,
) -> Result<RunOutcome, Error> {
    match command {
        Command::Completion { shell } => {
            let mut cmd = Cli::command();
            clap_complete::aot::generate(shell, &mut cmd, "topiclink", &mut io::stdout());
            Ok(RunOutcome::ok())
        }
        Command::Demo {
            service,
            topic,
            count,
        } => {
            run_demo(&service, &topic, count, options)?;
            Ok(RunOutcome::ok())
        }
        Command::Failover { service, topic } => {
            run_failover(&service, &topic, options)?;
            Ok(RunOutcome::ok())
        }
        Command::Diag => {
            emit_json(json!({
                "version": version(),
                "memory": memory_report_text()?,
            }));
            Ok(RunOutcome::ok())
        }
    }
}

fn run_demo(service: &str, topic: &str, count: u32, options: SessionOptions) -> Result<(), Error> {
    let platform = LoopbackPlatform::new().with_service(
        ServiceDefinition::new(service)
            .with_event(topic)
            .with_operation("Echo"),
    );
    let publisher = started_session(&platform, options.clone())?;
    let subscriber = started_session(&platform, options)?;

    let publishing = resolve(&publisher, service)?;
    let handle = publisher.create_topic(&publishing, topic)?;
    wait_for(&publisher, "publisher", names::TOPIC_ACTIVATED)?;

    let watching = resolve(&subscriber, service)?;
    let subscription = subscriber.subscribe(&watching, topic, None)?;
    wait_for(&subscriber, "subscriber", names::SUBSCRIPTION_STARTED)?;

    for seq in 0..count {
        publisher.publish(&handle, json!({"seq": seq}), None)?;
    }
    for _ in 0..count {
        wait_for(&publisher, "publisher", names::PUBLISH_SUCCESS)?;
    }
    for _ in 0..count {
        wait_for(&subscriber, "subscriber", topic)?;
    }
    subscriber.cancel(&subscription)?;
    wait_for(&subscriber, "subscriber", names::SUBSCRIPTION_TERMINATED)?;

    emit_stop("publisher", &publisher)?;
    emit_stop("subscriber", &subscriber)?;
    Ok(())
}

fn run_failover(service: &str, topic: &str, options: SessionOptions) -> Result<(), Error> {
    let platform = LoopbackPlatform::new().with_service(ServiceDefinition::new(service));
    let primary = started_session(&platform, options.clone())?;
    let backup = started_session(&platform, options)?;
    let stream = StreamId::new(service, topic);
    let mut transitions = Vec::new();

    let primary_service = resolve(&primary, service)?;
    let _primary_topic = primary.create_topic(&primary_service, topic)?;
    wait_for(&primary, "primary", names::TOPIC_ACTIVATED)?;
    transitions.push(json!({"session": "primary", "status": names::TOPIC_ACTIVATED}));

    let backup_service = resolve(&backup, service)?;
    let _backup_topic = backup.create_topic(&backup_service, topic)?;
    wait_for(&backup, "backup", names::TOPIC_CREATED)?;

    platform.demote(&stream);
    wait_for(&primary, "primary", names::TOPIC_DEACTIVATED)?;
    transitions.push(json!({"session": "primary", "status": names::TOPIC_DEACTIVATED}));
    wait_for(&backup, "backup", names::TOPIC_ACTIVATED)?;
    transitions.push(json!({"session": "backup", "status": names::TOPIC_ACTIVATED}));

    if let Some(connection) = platform.active_connection(&stream) {
        platform.sever(connection);
        wait_for(&backup, "backup", names::SESSION_TERMINATED)?;
        transitions.push(json!({"session": "backup", "status": names::SESSION_TERMINATED}));
        wait_for(&primary, "primary", names::TOPIC_ACTIVATED)?;
        transitions.push(json!({"session": "primary", "status": names::TOPIC_ACTIVATED}));
    }

    emit_json(json!({
        "stream": stream.to_string(),
        "transitions": transitions,
        "primary_active": primary.active_topics().contains(&stream),
        "backup_active": backup.active_topics().contains(&stream),
    }));
    emit_stop("primary", &primary)?;
    emit_stop("backup", &backup)?;
    Ok(())
}

fn started_session(platform: &LoopbackPlatform, options: SessionOptions) -> Result<Session, Error> {
    let session = Session::new(platform.connect(), options);
    session.start()?;
    Ok(session)
}

fn resolve(session: &Session, name: &str) -> Result<topiclink::api::Service, Error> {
    match session.resolve_default(name)? {
        Outcome::Ready(service) => Ok(service),
        Outcome::TimedOut => Err(Error::new(ErrorKind::Io)
            .with_message(format!("timed out resolving `{name}`"))
            .with_hint("Raise resolve_timeout_ms in the options file.")),
    }
}

/// Consumes and prints events until one whose first message is `message_type`.
fn wait_for(session: &Session, label: &str, message_type: &str) -> Result<Event, Error> {
    loop {
        match session.next_event(Some(EVENT_WAIT))? {
            Outcome::Ready(event) => {
                emit_json(json!({"session": label, "event": event}));
                if event.message_type() == Some(message_type) {
                    return Ok(event);
                }
            }
            Outcome::TimedOut => {
                return Err(Error::new(ErrorKind::Io).with_message(format!(
                    "{label} timed out waiting for {message_type}"
                )));
            }
        }
    }
}

fn emit_stop(label: &str, session: &Session) -> Result<(), Error> {
    let events = session.stop()?;
    emit_json(json!({"session": label, "stopped": events}));
    Ok(())
}

fn memory_report_text() -> Result<String, Error> {
    let needed = memory_info(&mut []);
    let len = usize::try_from(needed).map_err(|_| {
        Error::new(ErrorKind::Internal).with_message("memory report size is unavailable")
    })?;
    let mut buffer = vec![0u8; len + 1];
    let written = usize::try_from(memory_info(&mut buffer)).unwrap_or(0).min(len);
    String::from_utf8(buffer[..written].to_vec()).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("memory report is not utf-8")
            .with_source(err)
    })
}
