//! Message broker seam and an in-process implementation.
//!
//! Consumers read records with [`Broker::poll`] and acknowledge them with
//! [`Broker::commit`] only after they have finished fanning them out. After a
//! consume error a consumer calls [`Broker::rewind`], which moves its read position
//! back to the last committed offset, so delivery is at-least-once.

use crate::error::{broker_error, BrokerErrorKind, Error};
use crate::Topic;
use async_trait::async_trait;
use log::*;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

/// Position of a record within a topic log.
pub type Offset = u64;

/// A serialized event as stored by the broker.
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerRecord {
    /// Partition/ordering key, the event's `resourceId`.
    pub key: String,
    /// JSON-serialized event.
    pub payload: String,
}

#[async_trait]
pub trait Broker: Send + Sync {
    /// Appends a record to `topic`, returning its offset.
    async fn publish(&self, topic: Topic, record: BrokerRecord) -> Result<Offset, Error>;

    /// Returns up to `max` records after the group's read position, waiting until at
    /// least one is available. Fails with `Closed` once the broker shuts down.
    async fn poll(
        &self,
        topic: Topic,
        group: &str,
        max: usize,
    ) -> Result<Vec<(Offset, BrokerRecord)>, Error>;

    /// Acknowledges every record before `next_offset` for the group.
    async fn commit(&self, topic: Topic, group: &str, next_offset: Offset) -> Result<(), Error>;

    /// Moves the group's read position back to its last committed offset and
    /// returns that offset.
    async fn rewind(&self, topic: Topic, group: &str) -> Result<Offset, Error>;

    /// Shuts the broker down, waking every pending poll.
    fn close(&self);
}

#[derive(Debug, Default, Clone, Copy)]
struct GroupCursor {
    committed: Offset,
    position: Offset,
}

/// `records[0]` sits at offset `base`. Records every known group has committed
/// past are dropped from the front.
#[derive(Default)]
struct TopicState {
    base: Offset,
    records: VecDeque<BrokerRecord>,
    groups: HashMap<String, GroupCursor>,
}

impl TopicState {
    fn end(&self) -> Offset {
        self.base + self.records.len() as Offset
    }

    fn compact(&mut self) {
        let Some(floor) = self.groups.values().map(|cursor| cursor.committed).min() else {
            return;
        };
        let releasable = floor.saturating_sub(self.base).min(self.records.len() as Offset);
        if releasable > 0 {
            self.records.drain(..releasable as usize);
            self.base += releasable;
        }
    }
}

#[derive(Default)]
struct TopicLog {
    state: Mutex<TopicState>,
    notify: Notify,
}

/// In-process broker with one append-only log per topic.
///
/// Each topic is a single partition, so records are delivered in publish order,
/// which preserves per-key ordering. A record is retained until every group that
/// has read the topic commits past it; a group that joins later starts at the
/// oldest retained record.
#[derive(Default)]
pub struct InMemoryBroker {
    notifications: TopicLog,
    sync: TopicLog,
    closed: AtomicBool,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn log(&self, topic: Topic) -> &TopicLog {
        match topic {
            Topic::Notification => &self.notifications,
            Topic::Sync => &self.sync,
        }
    }

    /// Number of records still retained for `topic`.
    pub fn len(&self, topic: Topic) -> usize {
        self.log(topic).state.lock().records.len()
    }

    /// Number of records ever published to `topic`.
    pub fn published(&self, topic: Topic) -> u64 {
        self.log(topic).state.lock().end()
    }

    pub fn is_empty(&self, topic: Topic) -> bool {
        self.len(topic) == 0
    }

    /// Last committed offset for a consumer group, or 0 if it never committed.
    pub fn committed(&self, topic: Topic, group: &str) -> Offset {
        self.log(topic)
            .state
            .lock()
            .groups
            .get(group)
            .map(|cursor| cursor.committed)
            .unwrap_or_default()
    }

    fn take_batch(
        &self,
        topic: Topic,
        group: &str,
        max: usize,
    ) -> Option<Vec<(Offset, BrokerRecord)>> {
        let mut guard = self.log(topic).state.lock();
        let state = &mut *guard;
        let (base, available) = (state.base, state.end());
        let cursor = state.groups.entry(group.to_string()).or_insert(GroupCursor {
            committed: base,
            position: base,
        });
        if cursor.position >= available {
            return None;
        }

        let start = cursor.position.max(base);
        let end = available.min(start + max.max(1) as Offset);
        cursor.position = end;

        let batch = (start..end)
            .map(|offset| (offset, state.records[(offset - base) as usize].clone()))
            .collect();
        Some(batch)
    }

    fn ensure_open(&self) -> Result<(), Error> {
        if self.closed.load(Ordering::SeqCst) {
            Err(broker_error(BrokerErrorKind::Closed, "broker is closed"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn publish(&self, topic: Topic, record: BrokerRecord) -> Result<Offset, Error> {
        self.ensure_open()?;
        let log = self.log(topic);
        let offset = {
            let mut state = log.state.lock();
            state.records.push_back(record);
            state.end() - 1
        };
        log.notify.notify_waiters();
        trace!("Published record {offset} to topic {topic}");
        Ok(offset)
    }

    async fn poll(
        &self,
        topic: Topic,
        group: &str,
        max: usize,
    ) -> Result<Vec<(Offset, BrokerRecord)>, Error> {
        let log = self.log(topic);
        loop {
            // Register interest before checking so a publish between the check
            // and the await still wakes us.
            let notified = log.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            self.ensure_open()?;
            if let Some(batch) = self.take_batch(topic, group, max) {
                return Ok(batch);
            }

            notified.await;
        }
    }

    async fn commit(&self, topic: Topic, group: &str, next_offset: Offset) -> Result<(), Error> {
        let mut state = self.log(topic).state.lock();
        if next_offset > state.end() {
            return Err(broker_error(
                BrokerErrorKind::OffsetOutOfRange,
                &format!("commit of {next_offset} past end {}", state.end()),
            ));
        }
        let cursor = state.groups.entry(group.to_string()).or_default();
        if next_offset > cursor.committed {
            cursor.committed = next_offset;
        }
        if cursor.position < cursor.committed {
            cursor.position = cursor.committed;
        }
        state.compact();
        Ok(())
    }

    async fn rewind(&self, topic: Topic, group: &str) -> Result<Offset, Error> {
        self.ensure_open()?;
        let mut state = self.log(topic).state.lock();
        let cursor = state.groups.entry(group.to_string()).or_default();
        cursor.position = cursor.committed;
        Ok(cursor.committed)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notifications.notify.notify_waiters();
        self.sync.notify.notify_waiters();
        info!("In-memory broker closed");
    }
}
