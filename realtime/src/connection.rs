use crate::message::OutboundMessage;
use crate::outbound::{OutboundQueue, PushOutcome};
use events::protocol::{SubscriptionKey, SubscriptionTarget};
use log::*;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

// Type alias for user IDs (tokens carry them as strings)
pub type UserId = String;

/// Unique identifier for a connection (server-generated)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for ConnectionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle of a server-side connection.
///
/// The handshake runs before a [`Connection`] exists, so a new value starts out
/// `Authenticated`. Every later transition is made by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Authenticated,
    Open,
    Closing,
    Closed,
}

/// A live client connection: its owner, its subscription set, and the queue
/// its socket writer drains.
pub struct Connection {
    id: ConnectionId,
    user_id: UserId,
    state: RwLock<ConnectionState>,
    /// Written only by the connection's own session (through the registry),
    /// read concurrently by consumers.
    subscriptions: RwLock<HashMap<SubscriptionKey, SubscriptionTarget>>,
    outbound: OutboundQueue,
    connected_at: Instant,
    last_activity: Mutex<Instant>,
}

impl Connection {
    /// Creates a connection for a user whose token has been validated.
    pub fn new(id: ConnectionId, user_id: UserId, queue_capacity: usize) -> Self {
        let now = Instant::now();
        Self {
            id,
            user_id,
            state: RwLock::new(ConnectionState::Authenticated),
            subscriptions: RwLock::new(HashMap::new()),
            outbound: OutboundQueue::new(queue_capacity),
            connected_at: now,
            last_activity: Mutex::new(now),
        }
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        *self.state.write() = state;
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Snapshot of the current subscription set.
    pub fn subscriptions(&self) -> Vec<SubscriptionTarget> {
        self.subscriptions.read().values().cloned().collect()
    }

    pub fn is_subscribed(&self, key: &SubscriptionKey) -> bool {
        self.subscriptions.read().contains_key(key)
    }

    /// Returns false if the key was already present.
    pub(crate) fn add_subscription(&self, target: SubscriptionTarget) -> bool {
        let key = target.key();
        let mut subscriptions = self.subscriptions.write();
        if subscriptions.contains_key(&key) {
            return false;
        }
        subscriptions.insert(key, target);
        true
    }

    /// Returns false if the key was not present.
    pub(crate) fn remove_subscription(&self, key: &SubscriptionKey) -> bool {
        self.subscriptions.write().remove(key).is_some()
    }

    pub(crate) fn take_subscriptions(&self) -> Vec<SubscriptionKey> {
        self.subscriptions.write().drain().map(|(key, _)| key).collect()
    }

    /// Queue a frame for the socket writer without blocking.
    pub fn enqueue(&self, message: OutboundMessage) -> PushOutcome {
        let outcome = self.outbound.push(message);
        match outcome {
            PushOutcome::ShedOldest | PushOutcome::ShedIncoming => warn!(
                "Connection {} is falling behind; shed a queued notification ({} dropped so far)",
                self.id,
                self.outbound.dropped_count()
            ),
            PushOutcome::Overflow => warn!(
                "Connection {} is not reading; outbound queue overflowed with control frames, closing",
                self.id
            ),
            PushOutcome::Closed => trace!("Connection {} is closed; frame discarded", self.id),
            PushOutcome::Queued => {}
        }
        outcome
    }

    /// Next frame for the socket writer; `None` once the connection is closed.
    pub async fn next_outbound(&self) -> Option<OutboundMessage> {
        self.outbound.recv().await
    }

    pub(crate) fn close_outbound(&self) {
        self.outbound.close();
    }

    pub fn queued(&self) -> usize {
        self.outbound.len()
    }

    pub fn dropped_count(&self) -> u64 {
        self.outbound.dropped_count()
    }

    /// Record inbound traffic.
    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("state", &self.state())
            .finish()
    }
}
