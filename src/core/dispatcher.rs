//! Purpose: Own a session's ordered event queue and its correlation bookkeeping.
//! Exports: `Outcome`.
//! Role: Many producers (transport context, local synthesis) feed one application consumer.
//! Invariants: Events leave the queue in the order they were enqueued.
//! Invariants: A correlation closes only when a terminal message for it is dequeued.
//! Invariants: Terminals belonging to an already closed issuance are dropped, never delivered.
//! Invariants: Waits are bounded by the monotonic clock; a timeout never cancels a request.

use crate::core::clock::{self, nanoseconds_between};
use crate::core::correlation::{CorrelationId, CorrelationTable, Pending, RequestKind, Settled};
use crate::core::error::Error;
use crate::core::event::{Event, is_terminal};
use crate::core::stats;
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

/// Result of a bounded wait: a value, or a distinguishable timeout.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Outcome<T> {
    Ready(T),
    TimedOut,
}

impl<T> Outcome<T> {
    pub fn ready(self) -> Option<T> {
        match self {
            Outcome::Ready(value) => Some(value),
            Outcome::TimedOut => None,
        }
    }

    pub fn is_timed_out(&self) -> bool {
        matches!(self, Outcome::TimedOut)
    }
}

#[derive(Clone, Debug)]
pub(crate) struct ClosedCorrelation {
    pub(crate) id: CorrelationId,
    pub(crate) kind: RequestKind,
    pub(crate) latency_ns: i64,
}

pub(crate) enum Popped {
    Event(Event, Vec<ClosedCorrelation>),
    TimedOut,
    Closed,
}

#[derive(Default)]
struct QueueState {
    events: VecDeque<Event>,
    closed: bool,
}

impl Drop for QueueState {
    fn drop(&mut self) {
        stats::QUEUED_EVENTS.sub(self.events.len());
    }
}

#[derive(Default)]
pub(crate) struct Dispatcher {
    queue: Mutex<QueueState>,
    ready: Condvar,
    correlations: Mutex<CorrelationTable>,
}

impl Dispatcher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn open(
        &self,
        requested: Option<CorrelationId>,
        kind: RequestKind,
    ) -> Result<CorrelationId, Error> {
        self.correlations().open(requested, kind)
    }

    /// Drops a correlation whose issuance failed synchronously.
    pub(crate) fn release(&self, id: &CorrelationId) -> Option<Pending> {
        self.correlations().close(id)
    }

    /// Returns the request kind and issuance serial when newly cancelled, `None` when
    /// already cancelled.
    pub(crate) fn mark_cancelled(
        &self,
        id: &CorrelationId,
    ) -> Result<Option<(RequestKind, u64)>, Error> {
        let mut table = self.correlations();
        if table.mark_cancelled(id)? {
            Ok(table
                .get(id)
                .map(|pending| (pending.kind.clone(), pending.serial)))
        } else {
            Ok(None)
        }
    }

    pub(crate) fn is_open(&self, id: &CorrelationId) -> bool {
        self.correlations().get(id).is_some()
    }

    pub(crate) fn open_count(&self) -> usize {
        self.correlations().len()
    }

    pub(crate) fn outstanding(&self) -> Vec<(CorrelationId, RequestKind)> {
        self.correlations()
            .snapshot()
            .into_iter()
            .map(|(id, pending)| (id, pending.kind))
            .collect()
    }

    /// Queues `event`; returns false once the queue has been closed.
    pub(crate) fn enqueue(&self, event: Event) -> bool {
        let mut queue = self.queue();
        if queue.closed {
            return false;
        }
        queue.events.push_back(event);
        stats::QUEUED_EVENTS.add(1);
        drop(queue);
        self.ready.notify_one();
        true
    }

    /// `Some(Duration::ZERO)` polls; `None` waits until an event arrives or the queue closes.
    pub(crate) fn next(&self, timeout: Option<Duration>) -> Popped {
        // A duration too large to represent waits like `None`.
        let deadline = timeout.and_then(|duration| clock::now().after(duration));
        let mut queue = self.queue();
        loop {
            if let Some(mut event) = queue.events.pop_front() {
                stats::QUEUED_EVENTS.sub(1);
                drop(queue);
                if let Some(closed) = self.settle(&mut event) {
                    return Popped::Event(event, closed);
                }
                queue = self.queue();
                continue;
            }
            if queue.closed {
                return Popped::Closed;
            }
            match deadline {
                None => {
                    queue = self
                        .ready
                        .wait(queue)
                        .unwrap_or_else(|poison| poison.into_inner());
                }
                Some(deadline) => {
                    let Some(remaining) = deadline.remaining() else {
                        return Popped::TimedOut;
                    };
                    queue = self
                        .ready
                        .wait_timeout(queue, remaining)
                        .map(|(guard, _)| guard)
                        .unwrap_or_else(|poison| poison.into_inner().0);
                }
            }
        }
    }

    /// Closes every correlation the event terminates and strips stale terminal messages.
    ///
    /// Returns `None` when nothing deliverable is left of the event.
    pub(crate) fn settle(&self, event: &mut Event) -> Option<Vec<ClosedCorrelation>> {
        let now = clock::now();
        let event_type = event.event_type;
        let before = event.messages.len();
        let mut closed = Vec::new();
        let mut table = self.correlations();
        event.messages.retain(|message| {
            if !is_terminal(event_type, &message.message_type)
                || message.correlation_ids.is_empty()
            {
                return true;
            }
            let mut stale = 0;
            for id in &message.correlation_ids {
                match table.settle(id, message.issuance) {
                    Settled::Closed(pending) => closed.push(ClosedCorrelation {
                        id: id.clone(),
                        kind: pending.kind,
                        latency_ns: nanoseconds_between(pending.issued_at, now),
                    }),
                    Settled::Stale => stale += 1,
                    Settled::NotOpen => {}
                }
            }
            stale < message.correlation_ids.len()
        });
        if before > 0 && event.messages.is_empty() {
            return None;
        }
        Some(closed)
    }

    /// Closes the queue, wakes any waiter, and returns what was still queued.
    pub(crate) fn close(&self) -> Vec<Event> {
        let mut queue = self.queue();
        queue.closed = true;
        let drained = queue.events.drain(..).collect::<Vec<_>>();
        stats::QUEUED_EVENTS.sub(drained.len());
        drop(queue);
        self.ready.notify_all();
        drained
    }

    pub(crate) fn queued_len(&self) -> usize {
        self.queue().events.len()
    }

    fn queue(&self) -> MutexGuard<'_, QueueState> {
        self.queue.lock().unwrap_or_else(|poison| poison.into_inner())
    }

    fn correlations(&self) -> MutexGuard<'_, CorrelationTable> {
        self.correlations
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }
}
