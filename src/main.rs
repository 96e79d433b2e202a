//! Purpose: `topiclink` CLI entry point for loopback demos and diagnostics.
//! Role: Binary crate root; parses args, configures logging, runs commands, emits JSON on stdout.
//! Invariants: Commands emit one JSON value per stdout line.
//! Invariants: Non-interactive errors are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
//! Invariants: Library diagnostics reach stderr through `TracingSink`, never stdout.
#![allow(clippy::result_large_err)]
use std::ffi::OsString;
use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{CommandFactory, Parser, Subcommand, ValueHint, error::ErrorKind as ClapErrorKind};
use clap_complete::aot::Shell;
use serde_json::{Map, Value, json};
use std::error::Error as StdError;
use tracing_subscriber::EnvFilter;

mod command_dispatch;

use topiclink::api::{
    Error, ErrorKind, Event, LoopbackPlatform, Outcome, ServiceDefinition, Session,
    SessionOptions, Severity, StreamId, TracingSink, global_logging, memory_info, names,
    to_exit_code, version,
};

#[derive(Copy, Clone, Debug)]
struct RunOutcome {
    exit_code: i32,
}

impl RunOutcome {
    fn ok() -> Self {
        Self { exit_code: 0 }
    }

    fn with_code(exit_code: i32) -> Self {
        Self { exit_code }
    }
}

fn main() {
    let exit_code = match run() {
        Ok(outcome) => outcome.exit_code,
        Err(err) => {
            emit_error(&err);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<RunOutcome, Error> {
    let cli = match Cli::try_parse_from(std::env::args_os().collect::<Vec<OsString>>()) {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    Error::new(ErrorKind::Io)
                        .with_message("failed to write help")
                        .with_source(io_err)
                })?;
                let exit_code = if matches!(
                    err.kind(),
                    ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) {
                    2
                } else {
                    0
                };
                return Ok(RunOutcome::with_code(exit_code));
            }
            _ => {
                return Err(Error::new(ErrorKind::InvalidArgument)
                    .with_message(clap_error_summary(&err))
                    .with_hint(clap_error_hint(&err)));
            }
        },
    };

    init_tracing(cli.log_level);
    global_logging().register(Some(Arc::new(TracingSink)), cli.log_level);

    let mut options = match &cli.config {
        Some(path) => SessionOptions::from_json_file(path)?,
        None => SessionOptions::new(),
    };
    if let Some(grace) = cli.stop_grace_ms {
        options.stop_grace_ms = grace;
    }

    command_dispatch::dispatch_command(cli.command, options)
}

#[derive(Parser)]
#[command(
    name = "topiclink",
    version,
    about = "Topic-based publish/subscribe sessions with active-publisher election",
    help_template = r#"{about-with-newline}
{before-help}USAGE
  {usage}

COMMANDS
{subcommands}

OPTIONS
{options}

{after-help}
"#,
    long_about = None,
    before_help = r#"Runs sessions against an in-process loopback platform.

Mental model:
  - a session resolves services and creates topics
  - one publisher per stream is elected active
  - every outcome comes back as an event"#,
    after_help = r#"EXAMPLES
  $ topiclink demo --count 3
  $ topiclink failover --service //svc/ticks --topic IBM
  $ topiclink diag

  $ topiclink <command> --help"#,
    arg_required_else_help = true
)]
struct Cli {
    #[arg(
        long,
        global = true,
        help = "Session options file (JSON)",
        value_hint = ValueHint::FilePath
    )]
    config: Option<PathBuf>,
    #[arg(
        long,
        global = true,
        default_value = "info",
        help = "Library log threshold: off|fatal|error|warn|info|debug|trace"
    )]
    log_level: Severity,
    #[arg(long, global = true, help = "Override stop_grace_ms from the options file")]
    stop_grace_ms: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    #[command(
        about = "Publish to a subscriber over the loopback platform",
        after_help = r#"EXAMPLES
  $ topiclink demo
  $ topiclink demo --service //svc/ticks --topic MSFT --count 10

NOTES
  - Prints every consumed event as one JSON line, then each session's stop report"#
    )]
    Demo {
        #[arg(long, default_value = "svcA", help = "Service to define and resolve")]
        service: String,
        #[arg(long, default_value = "IBM", help = "Topic to publish on")]
        topic: String,
        #[arg(long, default_value_t = 3, help = "Number of publications")]
        count: u32,
    },
    #[command(
        about = "Fail over between two redundant publishers",
        after_help = r#"EXAMPLES
  $ topiclink failover

NOTES
  - The primary is demoted first, then the new primary's link is severed"#
    )]
    Failover {
        #[arg(long, default_value = "svcA", help = "Service to define and resolve")]
        service: String,
        #[arg(long, default_value = "IBM", help = "Topic both publishers register")]
        topic: String,
    },
    #[command(about = "Print version and live resource report")]
    Diag,
    #[command(
        arg_required_else_help = true,
        about = "Generate shell completion scripts",
        after_help = r#"EXAMPLES
  $ topiclink completion bash > ~/.local/share/bash-completion/completions/topiclink
  $ topiclink completion zsh > ~/.zfunc/_topiclink"#
    )]
    Completion {
        #[arg(help = "Shell to generate completions for")]
        shell: Shell,
    },
}

fn init_tracing(level: Severity) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.tracing_directive()));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

fn emit_json(value: Value) {
    let json = serde_json::to_string(&value)
        .unwrap_or_else(|_| "{\"error\":\"json encode failed\"}".to_string());
    println!("{json}");
}

fn emit_error(err: &Error) {
    if io::stderr().is_terminal() {
        eprintln!("{}", error_text(err));
        return;
    }

    let value = error_json(err);
    let json = serde_json::to_string(&value).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn error_message(err: &Error) -> String {
    if let Some(message) = err.message() {
        return message.to_string();
    }
    match err.kind() {
        ErrorKind::Internal => "internal error".to_string(),
        ErrorKind::InvalidArgument => "invalid argument".to_string(),
        ErrorKind::IllegalState => "illegal state".to_string(),
        ErrorKind::DuplicateCorrelation => "duplicate correlation id".to_string(),
        ErrorKind::NotFound => "not found".to_string(),
        ErrorKind::InvalidTopic => "invalid topic".to_string(),
        ErrorKind::InactiveTopic => "inactive topic".to_string(),
        ErrorKind::Io => "i/o error".to_string(),
        ErrorKind::InternalConsistency => "internal consistency failure".to_string(),
    }
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut cur = err.source();
    while let Some(source) = cur {
        causes.push(source.to_string());
        cur = source.source();
    }
    causes
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    if let Some(correlation) = err.correlation() {
        inner.insert("correlation".to_string(), json!(correlation.to_string()));
    }
    if let Some(stream) = err.stream() {
        inner.insert("stream".to_string(), json!(stream));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn error_text(err: &Error) -> String {
    let mut lines = vec![format!("error: {}", error_message(err))];
    if let Some(hint) = err.hint() {
        lines.push(format!("hint: {hint}"));
    }
    if let Some(correlation) = err.correlation() {
        lines.push(format!("correlation: {correlation}"));
    }
    if let Some(stream) = err.stream() {
        lines.push(format!("stream: {stream}"));
    }
    if let Some(cause) = error_causes(err).first() {
        lines.push(format!("caused by: {cause}"));
    }
    lines.join("\n")
}

fn clap_error_summary(err: &clap::Error) -> String {
    for line in err.to_string().lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("error:") {
            return rest.trim().to_string();
        }
        return trimmed.to_string();
    }
    "invalid arguments".to_string()
}

fn clap_error_hint(err: &clap::Error) -> String {
    let rendered = err.to_string();
    let usage = rendered
        .lines()
        .find_map(|line| line.trim().strip_prefix("Usage: "))
        .map(str::trim);
    let Some(usage) = usage else {
        return "Try `topiclink --help`.".to_string();
    };

    let tokens: Vec<&str> = usage.split_whitespace().collect();
    let Some(pos) = tokens.iter().position(|t| *t == "topiclink") else {
        return "Try `topiclink --help`.".to_string();
    };
    let parts = tokens
        .iter()
        .skip(pos + 1)
        .take_while(|token| {
            !(token.starts_with('-') || token.starts_with('<') || token.starts_with('['))
        })
        .copied()
        .collect::<Vec<_>>();
    if parts.is_empty() {
        return "Try `topiclink --help`.".to_string();
    }
    format!("Try `topiclink {} --help`.", parts.join(" "))
}
