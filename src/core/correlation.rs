//! Purpose: Define correlation ids and the open set linking requests to their terminal events.
//! Exports: `CorrelationId`, `RequestKind`.
//! Role: Bookkeeping owned by the dispatcher; one table per session.
//! Invariants: An id is open at most once; every open entry carries a fresh issuance serial.
//! Invariants: A cancelled issuance is closed by exactly one terminal; a straggler never closes a reopened id.
use crate::core::clock::{self, TimePoint};
use crate::core::error::{Error, ErrorKind};
use crate::core::stats;
use crate::core::topic::StreamId;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "value")]
pub enum CorrelationId {
    Int(u64),
    Name(String),
    Auto(u64),
}

impl CorrelationId {
    pub fn int(value: u64) -> Self {
        Self::Int(value)
    }

    pub fn name(value: impl Into<String>) -> Self {
        Self::Name(value.into())
    }

    pub fn is_auto(&self) -> bool {
        matches!(self, Self::Auto(_))
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CorrelationId::Int(value) => write!(f, "int:{value}"),
            CorrelationId::Name(value) => write!(f, "name:{value}"),
            CorrelationId::Auto(value) => write!(f, "auto:{value}"),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RequestKind {
    ResolveService(String),
    Publish(StreamId),
    Subscribe(StreamId),
    Request { service: String, operation: String },
}

impl RequestKind {
    pub fn label(&self) -> &'static str {
        match self {
            RequestKind::ResolveService(_) => "resolve",
            RequestKind::Publish(_) => "publish",
            RequestKind::Subscribe(_) => "subscribe",
            RequestKind::Request { .. } => "request",
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct Pending {
    pub(crate) kind: RequestKind,
    pub(crate) issued_at: TimePoint,
    pub(crate) serial: u64,
    pub(crate) cancelled: bool,
}

/// What a terminal message did to the table.
#[derive(Debug)]
pub(crate) enum Settled {
    Closed(Pending),
    /// Belongs to an issuance that is already closed; must not reach the application.
    Stale,
    NotOpen,
}

#[derive(Debug, Default)]
pub(crate) struct CorrelationTable {
    open: HashMap<CorrelationId, Pending>,
    // Cancelled ids closed by their local terminal; the transport's completion may still follow.
    tombstones: HashSet<CorrelationId>,
    next_auto: u64,
    next_serial: u64,
}

impl CorrelationTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Opens `requested`, or a fresh `Auto` id when none is given.
    pub(crate) fn open(
        &mut self,
        requested: Option<CorrelationId>,
        kind: RequestKind,
    ) -> Result<CorrelationId, Error> {
        let id = match requested {
            Some(id) => {
                if self.open.contains_key(&id) {
                    return Err(Error::new(ErrorKind::DuplicateCorrelation)
                        .with_message("correlation id is still outstanding")
                        .with_correlation(id)
                        .with_hint("Wait for the terminal event or cancel the request first."));
                }
                id
            }
            None => self.generate(),
        };
        self.tombstones.remove(&id);
        self.next_serial += 1;
        self.open.insert(
            id.clone(),
            Pending {
                kind,
                issued_at: clock::now(),
                serial: self.next_serial,
                cancelled: false,
            },
        );
        stats::OPEN_CORRELATIONS.add(1);
        Ok(id)
    }

    pub(crate) fn close(&mut self, id: &CorrelationId) -> Option<Pending> {
        let closed = self.open.remove(id);
        if closed.is_some() {
            stats::OPEN_CORRELATIONS.sub(1);
        }
        closed
    }

    /// Applies one terminal message for `id`.
    ///
    /// `issuance` is set on locally synthesized terminals and must match the open entry.
    pub(crate) fn settle(&mut self, id: &CorrelationId, issuance: Option<u64>) -> Settled {
        let Some(pending) = self.open.get(id) else {
            if issuance.is_some() || self.tombstones.remove(id) {
                return Settled::Stale;
            }
            return Settled::NotOpen;
        };
        match issuance {
            Some(serial) if serial != pending.serial => return Settled::Stale,
            Some(_) => {
                self.tombstones.insert(id.clone());
            }
            None => {}
        }
        match self.close(id) {
            Some(pending) => Settled::Closed(pending),
            None => Settled::NotOpen,
        }
    }

    pub(crate) fn get(&self, id: &CorrelationId) -> Option<&Pending> {
        self.open.get(id)
    }

    /// Marks `id` cancelled. Returns `Ok(false)` if it already was.
    pub(crate) fn mark_cancelled(&mut self, id: &CorrelationId) -> Result<bool, Error> {
        let pending = self.open.get_mut(id).ok_or_else(|| {
            Error::new(ErrorKind::NotFound)
                .with_message("no outstanding request for correlation id")
                .with_correlation(id.clone())
        })?;
        if pending.cancelled {
            return Ok(false);
        }
        pending.cancelled = true;
        Ok(true)
    }

    pub(crate) fn len(&self) -> usize {
        self.open.len()
    }

    pub(crate) fn snapshot(&self) -> Vec<(CorrelationId, Pending)> {
        let mut entries = self
            .open
            .iter()
            .map(|(id, pending)| (id.clone(), pending.clone()))
            .collect::<Vec<_>>();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    fn generate(&mut self) -> CorrelationId {
        loop {
            self.next_auto += 1;
            let candidate = CorrelationId::Auto(self.next_auto);
            if !self.open.contains_key(&candidate) {
                return candidate;
            }
        }
    }
}

impl Drop for CorrelationTable {
    fn drop(&mut self) {
        stats::OPEN_CORRELATIONS.sub(self.open.len());
    }
}
