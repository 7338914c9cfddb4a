//! Event system infrastructure for the notebook realtime layer.
//!
//! This crate provides the pieces shared by every other crate in the workspace:
//! the domain event model, the broker topics that carry it, the producer that
//! mutation handlers call after a successful write, and the WebSocket wire schema
//! spoken between the server and the client connection manager.
//!
//! # Architecture
//!
//! - **Event**: an immutable record of a note/notebook/block/task mutation
//! - **Topic**: the two broker channels (notifications and ordered sync deltas)
//! - **Broker**: trait for the message broker, plus an in-process implementation
//! - **EventProducer**: serializes events and publishes them, best-effort
//! - **EventHandler**: trait implemented by consumers' fan-out targets
//! - **protocol**: client and server WebSocket frames
//!
//! This crate has no dependencies on internal crates, avoiding circular
//! dependencies. Event payloads are carried as serialized JSON values.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub mod broker;
pub mod error;
pub mod producer;
pub mod protocol;

pub use broker::{Broker, BrokerRecord, InMemoryBroker, Offset};
pub use error::Error;
pub use producer::EventProducer;

/// A type alias that represents an event's unique id.
pub type Id = Uuid;

/// The kinds of domain entities whose mutations are distributed in real time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Note,
    Notebook,
    Block,
    Task,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Note => "note",
            ResourceType::Notebook => "notebook",
            ResourceType::Block => "block",
            ResourceType::Task => "task",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "note" => Ok(ResourceType::Note),
            "notebook" => Ok(ResourceType::Notebook),
            "block" => Ok(ResourceType::Block),
            "task" => Ok(ResourceType::Task),
            other => Err(error::invalid_frame(&format!(
                "unknown resource type '{other}'"
            ))),
        }
    }
}

/// Broker topics. Ordered sync deltas and plain notifications travel separately
/// so a burst of editing deltas never delays create/update/delete notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Notification,
    Sync,
}

impl Topic {
    pub fn name(&self) -> &'static str {
        match self {
            Topic::Notification => "notifications",
            Topic::Sync => "sync",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A domain event emitted after a mutation has been committed.
///
/// `version` is only present for ordered sync events (e.g. block text deltas) and
/// increases monotonically per `resource_id`. Events are immutable once published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Unique id assigned at creation, used by clients to drop redelivered events.
    pub id: Id,
    /// Domain event name, e.g. `note.updated` or `block.delta`.
    #[serde(rename = "type")]
    pub event_type: String,
    pub resource_type: ResourceType,
    pub resource_id: String,
    /// Owner of the affected resource; used for access-control filtering.
    pub user_id: String,
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Creates an unordered notification event named `<resource_type>.<action>`.
    pub fn new(
        resource_type: ResourceType,
        action: &str,
        resource_id: impl Into<String>,
        user_id: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type: format!("{resource_type}.{action}"),
            resource_type,
            resource_id: resource_id.into(),
            user_id: user_id.into(),
            payload,
            version: None,
            timestamp: Utc::now(),
        }
    }

    /// Marks this event as an ordered sync event carrying `version`.
    pub fn with_version(mut self, version: u64) -> Self {
        self.version = Some(version);
        self
    }

    /// The topic implied by the event: ordered sync events go to the sync topic,
    /// everything else to the notification topic.
    pub fn topic(&self) -> Topic {
        if self.version.is_some() {
            Topic::Sync
        } else {
            Topic::Notification
        }
    }

    pub fn to_json(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Trait for handling events pulled off a broker topic.
/// Implementations perform the side effects, e.g. fanning the event out to
/// live WebSocket connections.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &Event);
}

#[async_trait]
impl<T: EventHandler + ?Sized> EventHandler for std::sync::Arc<T> {
    async fn handle(&self, event: &Event) {
        (**self).handle(event).await
    }
}
