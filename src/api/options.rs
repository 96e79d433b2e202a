//! Purpose: Define session configuration and its JSON file form.
//! Exports: `SessionOptions`, `PublishPolicy`.
//! Role: Shared by library callers and the CLI (`--config`, flag overrides).
//! Invariants: Every field has a default; files may omit any of them.
//! Invariants: Unknown fields are rejected so typos surface as `InvalidArgument`.
#![allow(clippy::result_large_err)]

use crate::core::error::{Error, ErrorKind};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishPolicy {
    /// Publishing on a topic that is not the elected primary fails locally.
    #[default]
    RejectInactive,
    /// Forward anyway and let the platform answer.
    BestEffort,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionOptions {
    pub stop_grace_ms: u64,
    pub resolve_timeout_ms: u64,
    pub publish_policy: PublishPolicy,
}

impl SessionOptions {
    pub fn new() -> Self {
        Self {
            stop_grace_ms: 2_000,
            resolve_timeout_ms: 5_000,
            publish_policy: PublishPolicy::RejectInactive,
        }
    }

    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_resolve_timeout(mut self, timeout: Duration) -> Self {
        self.resolve_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_publish_policy(mut self, policy: PublishPolicy) -> Self {
        self.publish_policy = policy;
        self
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_millis(self.resolve_timeout_ms)
    }

    pub fn from_json_str(text: &str) -> Result<Self, Error> {
        serde_json::from_str(text).map_err(|err| {
            Error::new(ErrorKind::InvalidArgument)
                .with_message(format!("invalid session options: {err}"))
                .with_hint("Fields: stop_grace_ms, resolve_timeout_ms, publish_policy.")
                .with_source(err)
        })
    }

    pub fn from_json_file(path: &Path) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path).map_err(|err| {
            let kind = match err.kind() {
                std::io::ErrorKind::NotFound => ErrorKind::NotFound,
                _ => ErrorKind::Io,
            };
            Error::new(kind)
                .with_message(format!("failed to read {}", path.display()))
                .with_source(err)
        })?;
        Self::from_json_str(&text)
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::new()
    }
}
