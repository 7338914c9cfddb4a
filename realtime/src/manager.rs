use crate::message::OutboundMessage;
use crate::outbound::PushOutcome;
use crate::registry::ConnectionRegistry;
use async_trait::async_trait;
use events::{Event, EventHandler};
use log::*;
use std::sync::Arc;

/// Counts for a single fan-out pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReport {
    pub matched: usize,
    pub queued: usize,
    /// Connections that had to shed a notification to accept this one.
    pub shed: usize,
    /// Connections that closed between lookup and write.
    pub closed: usize,
}

/// Fans events out to every matching live connection.
pub struct Manager {
    registry: Arc<ConnectionRegistry>,
}

impl Manager {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Serialize the event once and push it to each matching connection without
    /// blocking. Slow connections shed their oldest queued notification.
    pub fn deliver(&self, event: &Event) -> DeliveryReport {
        let connections = self.registry.matching_connections_for(event);
        let mut report = DeliveryReport {
            matched: connections.len(),
            ..Default::default()
        };
        if connections.is_empty() {
            trace!("No subscribers for {} {}", event.event_type, event.resource_id);
            return report;
        }

        let message = match OutboundMessage::event(event) {
            Ok(message) => message,
            Err(e) => {
                error!("Failed to serialize event {}: {e}", event.id);
                return report;
            }
        };

        for connection in connections {
            match connection.enqueue(message.clone()) {
                PushOutcome::Queued => report.queued += 1,
                PushOutcome::ShedOldest => {
                    report.queued += 1;
                    report.shed += 1;
                }
                PushOutcome::ShedIncoming => report.shed += 1,
                PushOutcome::Overflow | PushOutcome::Closed => report.closed += 1,
            }
        }

        debug!(
            "Delivered {} {} to {}/{} connections",
            event.event_type, event.resource_id, report.queued, report.matched
        );
        report
    }
}

#[async_trait]
impl EventHandler for Manager {
    async fn handle(&self, event: &Event) {
        self.deliver(event);
    }
}
