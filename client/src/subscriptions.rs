use events::protocol::{SubscriptionKey, SubscriptionTarget};
use std::collections::BTreeMap;

/// Where a subscription stands with the current socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Not yet sent on the current socket.
    Unsent,
    /// Sent, awaiting the server's confirmation.
    Pending,
    Confirmed,
}

#[derive(Debug, Clone)]
struct Entry {
    target: SubscriptionTarget,
    state: SubscriptionState,
}

/// The client's local, idempotent subscription set. It outlives individual
/// sockets and is replayed in full after every reconnect.
#[derive(Debug, Default)]
pub struct SubscriptionSet {
    entries: BTreeMap<SubscriptionKey, Entry>,
}

impl SubscriptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false, and changes nothing, if the key is already present in any
    /// state.
    pub fn insert(&mut self, target: SubscriptionTarget) -> bool {
        let key = target.key();
        if self.entries.contains_key(&key) {
            return false;
        }
        self.entries.insert(
            key,
            Entry {
                target,
                state: SubscriptionState::Unsent,
            },
        );
        true
    }

    pub fn remove(&mut self, target: &SubscriptionTarget) -> bool {
        self.entries.remove(&target.key()).is_some()
    }

    pub fn mark_pending(&mut self, target: &SubscriptionTarget) {
        if let Some(entry) = self.entries.get_mut(&target.key()) {
            entry.state = SubscriptionState::Pending;
        }
    }

    /// Apply a confirmation frame. Returns true only on the first confirmation of
    /// a known subscription.
    pub fn confirm(&mut self, target: &SubscriptionTarget) -> bool {
        match self.entries.get_mut(&target.key()) {
            Some(entry) if entry.state != SubscriptionState::Confirmed => {
                entry.state = SubscriptionState::Confirmed;
                true
            }
            _ => false,
        }
    }

    /// A new socket knows nothing of earlier confirmations.
    pub fn reset(&mut self) {
        for entry in self.entries.values_mut() {
            entry.state = SubscriptionState::Unsent;
        }
    }

    pub fn targets(&self) -> Vec<SubscriptionTarget> {
        self.entries.values().map(|entry| entry.target.clone()).collect()
    }

    pub fn snapshot(&self) -> Vec<(SubscriptionTarget, SubscriptionState)> {
        self.entries
            .values()
            .map(|entry| (entry.target.clone(), entry.state))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
