//! Per-resource version ordering for sync events.
//!
//! Gaps are tolerated: version 5 after version 2 is delivered immediately. Only
//! versions at or below the last delivered one are discarded.
//!
//! The tracker holds at most `capacity` resources. Past that, the least recently
//! advanced tenth is forgotten, and the next version seen for a forgotten
//! resource is accepted as fresh.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use events::{Event, EventHandler, ResourceType};
use log::*;
use std::sync::atomic::{AtomicU64, Ordering};

pub const DEFAULT_TRACKED_RESOURCES: usize = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionCheck {
    Fresh,
    Stale { last: u64 },
}

#[derive(Debug, Clone, Copy)]
struct Delivered {
    version: u64,
    touched: u64,
}

/// Tracks the last delivered version per resource.
#[derive(Debug)]
pub struct VersionTracker {
    last_delivered: DashMap<(ResourceType, String), Delivered>,
    clock: AtomicU64,
    capacity: usize,
}

impl Default for VersionTracker {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_TRACKED_RESOURCES)
    }
}

impl VersionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            last_delivered: DashMap::new(),
            clock: AtomicU64::new(0),
            capacity: capacity.max(1),
        }
    }

    /// Record `version` if it is newer than the last one seen for the resource.
    pub fn check_and_advance(
        &self,
        resource_type: ResourceType,
        resource_id: &str,
        version: u64,
    ) -> VersionCheck {
        let touched = self.clock.fetch_add(1, Ordering::Relaxed);
        let delivered = Delivered { version, touched };
        let (check, added) = match self
            .last_delivered
            .entry((resource_type, resource_id.to_string()))
        {
            Entry::Occupied(mut entry) => {
                let last = entry.get().version;
                if version <= last {
                    (VersionCheck::Stale { last }, false)
                } else {
                    entry.insert(delivered);
                    (VersionCheck::Fresh, false)
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(delivered);
                (VersionCheck::Fresh, true)
            }
        };

        // The entry guard is released above; pruning walks every shard.
        if added && self.last_delivered.len() > self.capacity {
            self.prune();
        }
        check
    }

    pub fn last_delivered(&self, resource_type: ResourceType, resource_id: &str) -> Option<u64> {
        self.last_delivered
            .get(&(resource_type, resource_id.to_string()))
            .map(|delivered| delivered.version)
    }

    /// Number of resources currently tracked.
    pub fn len(&self) -> usize {
        self.last_delivered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_delivered.is_empty()
    }

    fn prune(&self) {
        let keep = self.capacity - self.capacity / 10;
        let mut by_age: Vec<(u64, (ResourceType, String))> = self
            .last_delivered
            .iter()
            .map(|entry| (entry.value().touched, entry.key().clone()))
            .collect();
        if by_age.len() <= keep {
            return;
        }
        by_age.sort_unstable_by_key(|(touched, _)| *touched);
        let excess = by_age.len() - keep;
        for (_, key) in by_age.into_iter().take(excess) {
            self.last_delivered.remove(&key);
        }
        debug!("Forgot versions of {excess} least recently updated resources");
    }
}

/// Wraps a handler so that it only sees sync events newer than any already
/// delivered for the same resource.
pub struct OrderedDelivery<H> {
    inner: H,
    tracker: VersionTracker,
}

impl<H: EventHandler> OrderedDelivery<H> {
    pub fn new(inner: H) -> Self {
        Self::with_capacity(inner, DEFAULT_TRACKED_RESOURCES)
    }

    /// Order sync events for at most `tracked_resources` resources at a time.
    pub fn with_capacity(inner: H, tracked_resources: usize) -> Self {
        Self {
            inner,
            tracker: VersionTracker::with_capacity(tracked_resources),
        }
    }

    pub fn tracker(&self) -> &VersionTracker {
        &self.tracker
    }
}

#[async_trait]
impl<H: EventHandler> EventHandler for OrderedDelivery<H> {
    async fn handle(&self, event: &Event) {
        let Some(version) = event.version else {
            warn!(
                "Skipping unversioned event {} ({}) on the sync topic",
                event.id, event.event_type
            );
            return;
        };

        match self
            .tracker
            .check_and_advance(event.resource_type, &event.resource_id, version)
        {
            VersionCheck::Fresh => self.inner.handle(event).await,
            VersionCheck::Stale { last } => debug!(
                "Discarding stale {} for {} {}: version {version} <= {last}",
                event.event_type, event.resource_type, event.resource_id
            ),
        }
    }
}
