// CLI integration tests for the loopback commands.
use std::io::Write;
use std::process::Command;

use serde_json::Value;

fn cmd() -> Command {
    let exe = env!("CARGO_BIN_EXE_topiclink");
    let mut command = Command::new(exe);
    command.env_remove("RUST_LOG");
    command
}

fn json_lines(output: &[u8]) -> Vec<Value> {
    String::from_utf8_lossy(output)
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).expect("valid json line"))
        .collect()
}

fn message_types(lines: &[Value], session: &str) -> Vec<String> {
    lines
        .iter()
        .filter(|line| line["session"] == session)
        .filter_map(|line| line["event"]["messages"][0]["message_type"].as_str())
        .map(str::to_string)
        .collect()
}

#[test]
fn demo_prints_events_and_stop_reports() {
    let output = cmd()
        .args(["--log-level", "off", "demo", "--count", "2"])
        .output()
        .expect("demo");
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let lines = json_lines(&output.stdout);

    let publisher = message_types(&lines, "publisher");
    assert!(publisher.contains(&"TopicActivated".to_string()));
    assert_eq!(
        publisher.iter().filter(|name| *name == "PublishSuccess").count(),
        2
    );
    let subscriber = message_types(&lines, "subscriber");
    assert_eq!(subscriber.iter().filter(|name| *name == "IBM").count(), 2);

    let stops = lines
        .iter()
        .filter(|line| line.get("stopped").is_some())
        .collect::<Vec<_>>();
    assert_eq!(stops.len(), 2);
    for stop in stops {
        let events = stop["stopped"].as_array().expect("stopped array");
        assert_eq!(
            events.last().expect("terminated")["messages"][0]["message_type"],
            "SessionTerminated"
        );
    }
}

#[test]
fn failover_reports_transitions() {
    let output = cmd()
        .args(["--log-level", "off", "failover", "--topic", "MSFT"])
        .output()
        .expect("failover");
    assert!(output.status.success());
    let lines = json_lines(&output.stdout);
    let summary = lines
        .iter()
        .find(|line| line.get("transitions").is_some())
        .expect("summary line");
    assert_eq!(summary["stream"], "svcA/MSFT");
    let transitions = summary["transitions"].as_array().expect("transitions");
    assert_eq!(transitions[0]["session"], "primary");
    assert_eq!(transitions[0]["status"], "TopicActivated");
    assert_eq!(transitions[2]["session"], "backup");
    assert_eq!(transitions[2]["status"], "TopicActivated");
    assert_eq!(summary["primary_active"], true);
    assert_eq!(summary["backup_active"], false);
}

#[test]
fn diag_reports_version() {
    let output = cmd().arg("diag").output().expect("diag");
    assert!(output.status.success());
    let lines = json_lines(&output.stdout);
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["version"], env!("CARGO_PKG_VERSION"));
    assert!(
        lines[0]["memory"]
            .as_str()
            .expect("memory report")
            .contains("sessions: ")
    );
}

#[test]
fn config_file_is_loaded() {
    let mut file = tempfile::NamedTempFile::new().expect("tempfile");
    write!(file, r#"{{"stop_grace_ms": 10, "publish_policy": "best_effort"}}"#)
        .expect("write config");
    let output = cmd()
        .args(["--log-level", "off", "--config"])
        .arg(file.path())
        .args(["demo", "--count", "1"])
        .output()
        .expect("demo with config");
    assert!(output.status.success());
}

#[test]
fn bad_config_is_a_json_error_with_exit_code() {
    let mut file = tempfile::NamedTempFile::new().expect("tempfile");
    write!(file, r#"{{"stop_grace": "soon"}}"#).expect("write config");
    let output = cmd()
        .arg("--config")
        .arg(file.path())
        .arg("diag")
        .output()
        .expect("diag with bad config");
    assert_eq!(output.status.code(), Some(2));
    let err = json_lines(&output.stderr)
        .into_iter()
        .find(|line| line.get("error").is_some())
        .expect("error json");
    assert_eq!(err["error"]["kind"], "InvalidArgument");
    assert!(err["error"]["hint"].is_string());
}

#[test]
fn missing_config_is_not_found() {
    let dir = tempfile::tempdir().expect("tempdir");
    let output = cmd()
        .arg("--config")
        .arg(dir.path().join("absent.json"))
        .arg("diag")
        .output()
        .expect("diag with missing config");
    assert_eq!(output.status.code(), Some(5));
}

#[test]
fn unknown_flag_is_usage_error() {
    let output = cmd().args(["demo", "--bogus"]).output().expect("bogus");
    assert_eq!(output.status.code(), Some(2));
    let err = json_lines(&output.stderr)
        .into_iter()
        .next()
        .expect("error json");
    assert_eq!(err["error"]["kind"], "InvalidArgument");
    assert!(
        err["error"]["hint"]
            .as_str()
            .expect("hint")
            .contains("topiclink")
    );
}

#[test]
fn completion_generates_script() {
    let output = cmd().args(["completion", "bash"]).output().expect("completion");
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("topiclink"));
}
