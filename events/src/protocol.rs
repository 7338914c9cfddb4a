//! WebSocket wire schema shared by the server sessions and the client
//! connection manager.
//!
//! Client → server:
//! `{"type":"subscribe","payload":{"resource":"note","id":"<uuid>"}}`,
//! `{"type":"subscribe","payload":{"event_type":"block.created"}}`,
//! `{"type":"unsubscribe","payload":{...}}`, `{"type":"ping"}`.
//!
//! Server → client:
//! `{"type":"subscription","event":"confirmed","payload":{...}}`,
//! `{"type":"event","event":"note.updated","payload":{"id":"...","data":{...}}}`,
//! `{"type":"ping"}`, `{"type":"pong"}`.
//!
//! A resource subscription without an id (absent, `null`, `""` or `"*"`) means
//! every resource of that type the user may see. All of those spellings are
//! normalized to `id: None` on parse and the id is omitted when serializing.

use crate::error::{invalid_frame, Error};
use crate::{Event, Id, ResourceType};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

const GLOBAL_ID: &str = "*";
const EVENT_PREFIX: &str = "event";

/// What a subscription is interested in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged, try_from = "RawTarget")]
pub enum SubscriptionTarget {
    /// One resource, or all visible resources of a type when `id` is `None`.
    Resource {
        resource: ResourceType,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    /// Every event with this name, across resources.
    EventType { event_type: String },
}

/// Loose shape accepted off the wire before normalization.
#[derive(Deserialize)]
struct RawTarget {
    #[serde(default)]
    resource: Option<String>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    event_type: Option<String>,
}

impl TryFrom<RawTarget> for SubscriptionTarget {
    type Error = Error;

    fn try_from(raw: RawTarget) -> Result<Self, Self::Error> {
        if let Some(resource) = raw.resource {
            let resource = resource.parse::<ResourceType>()?;
            return Ok(Self::resource(resource, raw.id.as_deref()));
        }

        match raw.event_type.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => Ok(Self::event_type(name)),
            _ => Err(invalid_frame(
                "subscription payload needs either `resource` or `event_type`",
            )),
        }
    }
}

fn normalize_id(id: Option<&str>) -> Option<String> {
    match id.map(str::trim) {
        None | Some("") | Some(GLOBAL_ID) => None,
        Some(id) => Some(id.to_string()),
    }
}

impl SubscriptionTarget {
    pub fn resource(resource: ResourceType, id: Option<&str>) -> Self {
        Self::Resource {
            resource,
            id: normalize_id(id),
        }
    }

    pub fn event_type(name: &str) -> Self {
        Self::EventType {
            event_type: name.trim().to_string(),
        }
    }

    /// The canonical key used to store this subscription in a set.
    pub fn key(&self) -> SubscriptionKey {
        match self {
            Self::Resource { resource, id } => SubscriptionKey::for_resource(*resource, id.as_deref()),
            Self::EventType { event_type } => SubscriptionKey::for_event_type(event_type),
        }
    }
}

impl fmt::Display for SubscriptionTarget {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.key().as_str())
    }
}

/// Parses the canonical key form: `note:<id>`, `note`, `note:*` or
/// `event:block.created`.
impl FromStr for SubscriptionTarget {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (head, tail) = match s.split_once(':') {
            Some((head, tail)) => (head.trim(), Some(tail)),
            None => (s.trim(), None),
        };

        if head == EVENT_PREFIX {
            return match tail.map(str::trim) {
                Some(name) if !name.is_empty() => Ok(Self::event_type(name)),
                _ => Err(invalid_frame("event subscription needs a name")),
            };
        }

        Ok(Self::resource(head.parse()?, tail))
    }
}

/// Canonical string form of a subscription: `type:id`, `type:*` for the
/// type-wide subscription, or `event:name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SubscriptionKey(String);

impl SubscriptionKey {
    pub fn for_resource(resource: ResourceType, id: Option<&str>) -> Self {
        Self(format!("{resource}:{}", id.unwrap_or(GLOBAL_ID)))
    }

    pub fn for_event_type(event_type: &str) -> Self {
        Self(format!("{EVENT_PREFIX}:{event_type}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Frames sent by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientFrame {
    Subscribe { payload: SubscriptionTarget },
    Unsubscribe { payload: SubscriptionTarget },
    Ping,
}

impl ClientFrame {
    pub fn parse(text: &str) -> Result<Self, Error> {
        serde_json::from_str(text).map_err(|e| Error {
            source: Some(Box::new(e)),
            error_kind: crate::error::ErrorKind::InvalidFrame,
        })
    }

    pub fn to_json(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Confirmed,
}

/// Body of an `event` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventPayload {
    /// Id of the affected resource.
    pub id: String,
    /// Id of the event itself, for duplicate suppression.
    pub event_id: Id,
    pub resource: ResourceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    pub data: Value,
}

/// Frames sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerFrame {
    Subscription {
        event: SubscriptionStatus,
        payload: SubscriptionTarget,
    },
    Event {
        event: String,
        payload: EventPayload,
    },
    Ping,
    Pong,
}

impl ServerFrame {
    pub fn confirmed(target: SubscriptionTarget) -> Self {
        ServerFrame::Subscription {
            event: SubscriptionStatus::Confirmed,
            payload: target,
        }
    }

    pub fn event(event: &Event) -> Self {
        ServerFrame::Event {
            event: event.event_type.clone(),
            payload: EventPayload {
                id: event.resource_id.clone(),
                event_id: event.id,
                resource: event.resource_type,
                version: event.version,
                data: event.payload.clone(),
            },
        }
    }

    pub fn parse(text: &str) -> Result<Self, Error> {
        serde_json::from_str(text).map_err(|e| Error {
            source: Some(Box::new(e)),
            error_kind: crate::error::ErrorKind::InvalidFrame,
        })
    }

    pub fn to_json(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(self)?)
    }
}
