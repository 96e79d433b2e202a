//! Purpose: Create topic handles and hold the cached view of active-publisher elections.
//! Exports: `StreamId`, `Topic`.
//! Role: Session-owned manager; election status is applied in arrival order before queueing.
//! Invariants: At most one live slot per stream per session, so at most one cached active topic.
//! Invariants: A second activation without a deactivation is an `InternalConsistency` error.
//! Invariants: The manager holds only weak slot references; the last `Topic` view releases the slot.

use crate::core::error::{Error, ErrorKind};
use crate::core::event::{Message, names};
use crate::core::service::Service;
use crate::core::stats;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering as CmpOrdering;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct StreamId {
    pub service: String,
    pub topic: String,
}

impl StreamId {
    pub fn new(service: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            topic: topic.into(),
        }
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.service, self.topic)
    }
}

struct TopicSlot {
    id: u64,
    session_id: u64,
    stream: StreamId,
    service: Service,
    active: Arc<AtomicBool>,
    table: Weak<Mutex<TopicTable>>,
}

impl Drop for TopicSlot {
    fn drop(&mut self) {
        stats::TOPICS.sub(1);
        if let Some(table) = self.table.upgrade() {
            lock(&table).release(self.id, &self.stream);
        }
    }
}

/// Publication handle bound to one service stream.
///
/// Clones are views over the same slot and compare equal. `Topic::default()` is invalid.
#[derive(Clone, Default)]
pub struct Topic {
    slot: Option<Arc<TopicSlot>>,
}

impl Topic {
    pub fn is_valid(&self) -> bool {
        self.slot.is_some()
    }

    /// Last election outcome applied by the session, not a remote check.
    pub fn is_active(&self) -> bool {
        self.slot
            .as_ref()
            .is_some_and(|slot| slot.active.load(Ordering::Acquire))
    }

    pub fn stream(&self) -> Option<&StreamId> {
        self.slot.as_ref().map(|slot| &slot.stream)
    }

    pub fn service(&self) -> Option<&Service> {
        self.slot.as_ref().map(|slot| &slot.service)
    }

    pub fn id(&self) -> Option<u64> {
        self.slot.as_ref().map(|slot| slot.id)
    }

    pub fn view_count(&self) -> usize {
        self.slot.as_ref().map_or(0, Arc::strong_count)
    }

    pub(crate) fn session_id(&self) -> Option<u64> {
        self.slot.as_ref().map(|slot| slot.session_id)
    }
}

impl PartialEq for Topic {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Topic {}

impl PartialOrd for Topic {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Topic {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.id().cmp(&other.id())
    }
}

impl Hash for Topic {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl fmt::Debug for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.slot {
            Some(slot) => f
                .debug_struct("Topic")
                .field("id", &slot.id)
                .field("stream", &slot.stream.to_string())
                .field("active", &slot.active.load(Ordering::Acquire))
                .finish(),
            None => f.write_str("Topic(invalid)"),
        }
    }
}

struct TableEntry {
    id: u64,
    slot: Weak<TopicSlot>,
    active: Arc<AtomicBool>,
}

#[derive(Default)]
struct TopicTable {
    by_stream: HashMap<StreamId, TableEntry>,
    released: Vec<StreamId>,
    next_id: u64,
}

impl TopicTable {
    fn release(&mut self, id: u64, stream: &StreamId) {
        if self.by_stream.get(stream).is_some_and(|entry| entry.id == id) {
            self.by_stream.remove(stream);
            self.released.push(stream.clone());
        }
    }
}

/// Result of applying one `TopicStatus` message to the cache.
#[derive(Debug, Eq, PartialEq)]
pub(crate) enum Applied {
    Activated(StreamId),
    Deactivated(StreamId),
    AlreadyInactive(StreamId),
    UnknownStream(Option<StreamId>),
    Ignored,
}

pub(crate) struct TopicManager {
    session_id: u64,
    table: Arc<Mutex<TopicTable>>,
}

impl TopicManager {
    pub(crate) fn new(session_id: u64) -> Self {
        Self {
            session_id,
            table: Arc::new(Mutex::new(TopicTable::default())),
        }
    }

    /// Returns the topic for `service`/`name` and whether a new slot was created.
    pub(crate) fn create(&self, service: &Service, name: &str) -> Result<(Topic, bool), Error> {
        if name.trim().is_empty() {
            return Err(Error::new(ErrorKind::InvalidArgument).with_message("topic name is empty"));
        }
        let stream = StreamId::new(service.name(), name);
        let mut table = lock(&self.table);

        let mut inherited = None;
        if let Some(entry) = table.by_stream.get(&stream) {
            if let Some(slot) = entry.slot.upgrade() {
                return Ok((Topic { slot: Some(slot) }, false));
            }
            // Last view is mid-drop; keep its election state and candidacy.
            inherited = Some(Arc::clone(&entry.active));
        }

        table.next_id += 1;
        let id = table.next_id;
        let fresh = inherited.is_none();
        let active = inherited.unwrap_or_else(|| Arc::new(AtomicBool::new(false)));
        let slot = Arc::new(TopicSlot {
            id,
            session_id: self.session_id,
            stream: stream.clone(),
            service: service.clone(),
            active: Arc::clone(&active),
            table: Arc::downgrade(&self.table),
        });
        stats::TOPICS.add(1);
        table.by_stream.insert(
            stream,
            TableEntry {
                id,
                slot: Arc::downgrade(&slot),
                active,
            },
        );
        Ok((Topic { slot: Some(slot) }, fresh))
    }

    pub(crate) fn apply(&self, message: &Message) -> Result<Applied, Error> {
        let activate = match message.message_type.as_str() {
            names::TOPIC_ACTIVATED => true,
            names::TOPIC_DEACTIVATED => false,
            _ => return Ok(Applied::Ignored),
        };
        let Some(stream) = message.topic.clone() else {
            return Ok(Applied::UnknownStream(None));
        };
        let table = lock(&self.table);
        let Some(entry) = table.by_stream.get(&stream) else {
            return Ok(Applied::UnknownStream(Some(stream)));
        };

        if activate {
            if entry.active.load(Ordering::Acquire) {
                return Err(Error::new(ErrorKind::InternalConsistency)
                    .with_message("topic activated twice without deactivation")
                    .with_stream(&stream));
            }
            entry.active.store(true, Ordering::Release);
            Ok(Applied::Activated(stream))
        } else if entry.active.swap(false, Ordering::AcqRel) {
            Ok(Applied::Deactivated(stream))
        } else {
            Ok(Applied::AlreadyInactive(stream))
        }
    }

    /// Streams whose last view dropped since the previous call.
    pub(crate) fn take_released(&self) -> Vec<StreamId> {
        std::mem::take(&mut lock(&self.table).released)
    }

    pub(crate) fn active_streams(&self) -> Vec<StreamId> {
        let table = lock(&self.table);
        let mut streams = table
            .by_stream
            .iter()
            .filter(|(_, entry)| entry.active.load(Ordering::Acquire))
            .map(|(stream, _)| stream.clone())
            .collect::<Vec<_>>();
        streams.sort();
        streams
    }

    pub(crate) fn live_count(&self) -> usize {
        lock(&self.table).by_stream.len()
    }

    /// Marks every cached topic inactive and returns the streams that were active.
    pub(crate) fn deactivate_all(&self) -> Vec<StreamId> {
        let table = lock(&self.table);
        let mut streams = table
            .by_stream
            .iter()
            .filter(|(_, entry)| entry.active.swap(false, Ordering::AcqRel))
            .map(|(stream, _)| stream.clone())
            .collect::<Vec<_>>();
        streams.sort();
        streams
    }

    /// Deactivates and forgets every slot; returns all streams needing release.
    pub(crate) fn clear(&self) -> Vec<StreamId> {
        let mut table = lock(&self.table);
        let mut streams = std::mem::take(&mut table.released);
        for (stream, entry) in table.by_stream.drain() {
            entry.active.store(false, Ordering::Release);
            streams.push(stream);
        }
        streams.sort();
        streams.dedup();
        streams
    }
}

fn lock(table: &Mutex<TopicTable>) -> MutexGuard<'_, TopicTable> {
    table.lock().unwrap_or_else(|poison| poison.into_inner())
}
