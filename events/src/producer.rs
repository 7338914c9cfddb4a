use crate::broker::{Broker, BrokerRecord, Offset};
use crate::error::Error;
use crate::{Event, Topic};
use log::*;
use std::sync::Arc;

/// Publishes domain events to the broker topic implied by each event.
///
/// Mutation handlers call this after their write has committed. Delivery is
/// best-effort: the persisted resource is the source of truth, so a failed
/// publish is logged and never surfaces to the caller.
#[derive(Clone)]
pub struct EventProducer {
    broker: Arc<dyn Broker>,
}

impl EventProducer {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self { broker }
    }

    /// Serialize and publish an event, reporting the outcome.
    pub async fn try_publish(&self, event: &Event) -> Result<(Topic, Offset), Error> {
        let topic = event.topic();
        let record = BrokerRecord {
            key: event.resource_id.clone(),
            payload: event.to_json()?,
        };
        let offset = self.broker.publish(topic, record).await?;
        debug!(
            "Published {} for {} {} to {topic} at offset {offset}",
            event.event_type, event.resource_type, event.resource_id
        );
        Ok((topic, offset))
    }

    /// Publish an event. Failures are logged and swallowed.
    pub async fn publish(&self, event: Event) {
        if let Err(e) = self.try_publish(&event).await {
            error!(
                "Failed to publish {} for {} {}: {e}",
                event.event_type, event.resource_type, event.resource_id
            );
        }
    }

    /// Publish an event on a background task so the caller's transaction never
    /// waits on the broker. Must be called from within a Tokio runtime.
    pub fn publish_detached(&self, event: Event) {
        let producer = self.clone();
        tokio::spawn(async move {
            producer.publish(event).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InMemoryBroker, ResourceType};
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn notification_events_go_to_notification_topic() {
        let broker = Arc::new(InMemoryBroker::new());
        let producer = EventProducer::new(broker.clone());

        let event = Event::new(ResourceType::Note, "created", "a", "u1", json!({}));
        let (topic, offset) = producer.try_publish(&event).await.unwrap();

        assert_eq!(topic, Topic::Notification);
        assert_eq!(offset, 0);
        assert!(broker.is_empty(Topic::Sync));
    }

    #[tokio::test]
    async fn sync_events_are_keyed_by_resource_id() {
        let broker = Arc::new(InMemoryBroker::new());
        let producer = EventProducer::new(broker.clone());

        let event = Event::new(ResourceType::Block, "delta", "b7", "u1", json!({"ops": []}))
            .with_version(1);
        producer.publish(event.clone()).await;

        let batch = broker.poll(Topic::Sync, "test", 10).await.unwrap();
        assert_eq!(batch[0].1.key, "b7");
        assert_eq!(Event::from_json(&batch[0].1.payload).unwrap(), event);
    }

    #[tokio::test]
    async fn publish_failure_does_not_reach_caller() {
        let broker = Arc::new(InMemoryBroker::new());
        broker.close();
        let producer = EventProducer::new(broker.clone());

        let event = Event::new(ResourceType::Task, "updated", "t", "u1", json!({}));
        assert!(producer.try_publish(&event).await.is_err());
        // Completes without panicking or returning an error.
        producer.publish(event).await;
    }

    #[tokio::test]
    async fn detached_publish_eventually_lands() {
        let broker = Arc::new(InMemoryBroker::new());
        let producer = EventProducer::new(broker.clone());

        producer.publish_detached(Event::new(ResourceType::Notebook, "deleted", "n", "u", json!({})));

        let batch = tokio::time::timeout(
            Duration::from_secs(1),
            broker.poll(Topic::Notification, "test", 10),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(batch.len(), 1);
    }
}
