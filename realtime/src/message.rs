use crate::error::Error;
use events::protocol::ServerFrame;
use events::Event;
use std::sync::Arc;

/// A serialized server frame waiting in a connection's outbound queue.
///
/// Event frames are serialized once per published event and shared by every
/// matching connection.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    /// A domain event. May be shed when the connection falls behind.
    Notification(Arc<str>),
    /// A protocol reply (pong, subscription confirmation). Never shed.
    Control(Arc<str>),
}

impl OutboundMessage {
    pub fn event(event: &Event) -> Result<Self, Error> {
        let json = ServerFrame::event(event).to_json()?;
        Ok(OutboundMessage::Notification(json.into()))
    }

    pub fn control(frame: &ServerFrame) -> Result<Self, Error> {
        let json = frame.to_json()?;
        Ok(OutboundMessage::Control(json.into()))
    }

    pub fn is_notification(&self) -> bool {
        matches!(self, OutboundMessage::Notification(_))
    }

    pub fn as_str(&self) -> &str {
        match self {
            OutboundMessage::Notification(text) | OutboundMessage::Control(text) => text,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use events::ResourceType;
    use serde_json::{json, Value};

    #[test]
    fn event_message_is_a_sheddable_event_frame() {
        let event = Event::new(ResourceType::Note, "updated", "a", "u1", json!({"x": 1}));
        let message = OutboundMessage::event(&event).unwrap();
        assert!(message.is_notification());

        let value: Value = serde_json::from_str(message.as_str()).unwrap();
        assert_eq!(value["type"], "event");
        assert_eq!(value["event"], "note.updated");
    }

    #[test]
    fn pong_is_a_control_message() {
        let message = OutboundMessage::control(&ServerFrame::Pong).unwrap();
        assert!(!message.is_notification());
        assert_eq!(message.as_str(), r#"{"type":"pong"}"#);
    }
}
