//! Long-lived broker consumers feeding the fan-out manager.
//!
//! One consumer runs per topic and is shared by every connection. A batch is
//! committed only after each of its events has been handed to the handler, so a
//! crash or consume error redelivers from the last committed offset
//! (at-least-once). Clients drop the duplicates by event id.

use crate::manager::Manager;
use crate::ordering::{OrderedDelivery, DEFAULT_TRACKED_RESOURCES};
use events::{Broker, BrokerRecord, Error, Event, EventHandler, Offset, Topic};
use log::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// `Idle → Consuming → (Error → Backoff → Consuming) → Stopped`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Idle,
    Consuming,
    Error,
    Backoff,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Consumer group whose offsets this consumer commits.
    pub group: String,
    pub batch_size: usize,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    /// Resources whose last sync version is remembered by the sync consumer.
    pub tracked_resources: usize,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            group: "realtime".to_string(),
            batch_size: 64,
            backoff_base: Duration::from_millis(200),
            backoff_max: Duration::from_secs(10),
            tracked_resources: DEFAULT_TRACKED_RESOURCES,
        }
    }
}

impl ConsumerConfig {
    /// Exponential backoff delay for the given number of consecutive failures,
    /// capped at `backoff_max`.
    pub fn backoff_delay(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(31) as i32;
        let delay = self.backoff_base.as_secs_f64() * 2_f64.powi(exponent);
        Duration::from_secs_f64(delay.min(self.backoff_max.as_secs_f64()))
    }
}

pub struct Consumer {
    topic: Topic,
    broker: Arc<dyn Broker>,
    handler: Arc<dyn EventHandler>,
    config: ConsumerConfig,
    state: watch::Sender<ConsumerState>,
}

impl Consumer {
    pub fn new(
        topic: Topic,
        broker: Arc<dyn Broker>,
        handler: Arc<dyn EventHandler>,
        config: ConsumerConfig,
    ) -> Self {
        let (state, _) = watch::channel(ConsumerState::Idle);
        Self {
            topic,
            broker,
            handler,
            config,
            state,
        }
    }

    /// Consumer for create/update/delete notifications.
    pub fn notifications(
        broker: Arc<dyn Broker>,
        manager: Arc<Manager>,
        config: ConsumerConfig,
    ) -> Self {
        Self::new(Topic::Notification, broker, manager, config)
    }

    /// Consumer for ordered sync deltas; stale versions never reach the manager.
    pub fn sync(broker: Arc<dyn Broker>, manager: Arc<Manager>, config: ConsumerConfig) -> Self {
        Self::new(
            Topic::Sync,
            broker,
            Arc::new(OrderedDelivery::with_capacity(manager, config.tracked_resources)),
            config,
        )
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }

    pub fn state(&self) -> watch::Receiver<ConsumerState> {
        self.state.subscribe()
    }

    /// Consume until `cancel` fires or the broker closes.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            "Starting {} consumer (group {})",
            self.topic, self.config.group
        );
        self.set_state(ConsumerState::Consuming);
        let mut failures: u32 = 0;

        loop {
            let polled = tokio::select! {
                _ = cancel.cancelled() => break,
                polled = self.broker.poll(self.topic, &self.config.group, self.config.batch_size) => polled,
            };

            let result = match polled {
                Ok(records) => self.process(records).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(()) => failures = 0,
                Err(e) if e.is_closed() => {
                    info!("Broker closed; {} consumer stopping", self.topic);
                    break;
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    self.set_state(ConsumerState::Error);
                    let delay = self.config.backoff_delay(failures);
                    warn!(
                        "{} consumer error (attempt {failures}): {e}; backing off {delay:?}",
                        self.topic
                    );

                    self.set_state(ConsumerState::Backoff);
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }

                    match self.broker.rewind(self.topic, &self.config.group).await {
                        Ok(offset) => {
                            debug!("{} consumer resuming from offset {offset}", self.topic)
                        }
                        Err(e) if e.is_closed() => break,
                        Err(e) => warn!("{} consumer failed to rewind: {e}", self.topic),
                    }
                    self.set_state(ConsumerState::Consuming);
                }
            }
        }

        self.set_state(ConsumerState::Stopped);
        info!("{} consumer stopped", self.topic);
    }

    /// Fan out one batch, then commit past it.
    async fn process(&self, records: Vec<(Offset, BrokerRecord)>) -> Result<(), Error> {
        let Some(next_offset) = records.last().map(|(offset, _)| offset + 1) else {
            return Ok(());
        };

        for (offset, record) in records {
            match Event::from_json(&record.payload) {
                Ok(event) => self.handler.handle(&event).await,
                Err(e) => warn!(
                    "Skipping malformed record {offset} (key {}) on {}: {e}",
                    record.key, self.topic
                ),
            }
        }

        self.broker
            .commit(self.topic, &self.config.group, next_offset)
            .await
    }

    fn set_state(&self, state: ConsumerState) {
        self.state.send_replace(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{Connection, ConnectionId};
    use crate::registry::ConnectionRegistry;
    use async_trait::async_trait;
    use domain::authorization::OwnerOnly;
    use events::error::{broker_error, BrokerErrorKind};
    use events::protocol::{ServerFrame, SubscriptionTarget};
    use events::{EventProducer, InMemoryBroker, ResourceType};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<Event>>,
    }

    #[async_trait]
    impl EventHandler for Recorder {
        async fn handle(&self, event: &Event) {
            self.events.lock().push(event.clone());
        }
    }

    /// Fails the first `failures` commits, then delegates.
    struct FlakyBroker {
        inner: InMemoryBroker,
        failures: AtomicU32,
    }

    #[async_trait]
    impl Broker for FlakyBroker {
        async fn publish(&self, topic: Topic, record: BrokerRecord) -> Result<Offset, Error> {
            self.inner.publish(topic, record).await
        }

        async fn poll(
            &self,
            topic: Topic,
            group: &str,
            max: usize,
        ) -> Result<Vec<(Offset, BrokerRecord)>, Error> {
            self.inner.poll(topic, group, max).await
        }

        async fn commit(&self, topic: Topic, group: &str, next_offset: Offset) -> Result<(), Error> {
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(broker_error(BrokerErrorKind::OffsetOutOfRange, "commit rejected"));
            }
            self.inner.commit(topic, group, next_offset).await
        }

        async fn rewind(&self, topic: Topic, group: &str) -> Result<Offset, Error> {
            self.inner.rewind(topic, group).await
        }

        fn close(&self) {
            self.inner.close()
        }
    }

    async fn wait_for(condition: impl Fn() -> bool) {
        for _ in 0..500 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not met in time");
    }

    fn record(payload: String) -> BrokerRecord {
        BrokerRecord {
            key: "k".to_string(),
            payload,
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let config = ConsumerConfig {
            backoff_base: Duration::from_millis(100),
            backoff_max: Duration::from_millis(500),
            ..Default::default()
        };
        assert_eq!(config.backoff_delay(1), Duration::from_millis(100));
        assert_eq!(config.backoff_delay(2), Duration::from_millis(200));
        assert_eq!(config.backoff_delay(3), Duration::from_millis(400));
        assert_eq!(config.backoff_delay(4), Duration::from_millis(500));
        assert_eq!(config.backoff_delay(60), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn commits_after_handling_and_skips_malformed_records() {
        let broker = Arc::new(InMemoryBroker::new());
        let recorder = Arc::new(Recorder::default());
        let consumer = Arc::new(Consumer::new(
            Topic::Notification,
            broker.clone(),
            recorder.clone(),
            ConsumerConfig::default(),
        ));

        let producer = EventProducer::new(broker.clone());
        producer
            .publish(Event::new(ResourceType::Note, "created", "a", "u1", json!({})))
            .await;
        broker
            .publish(Topic::Notification, record("not json".to_string()))
            .await
            .unwrap();
        producer
            .publish(Event::new(ResourceType::Note, "deleted", "a", "u1", json!({})))
            .await;

        let cancel = CancellationToken::new();
        let task = {
            let consumer = consumer.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { consumer.run(cancel).await })
        };

        wait_for(|| broker.committed(Topic::Notification, "realtime") == 3).await;
        let names: Vec<String> = recorder
            .events
            .lock()
            .iter()
            .map(|e| e.event_type.clone())
            .collect();
        assert_eq!(names, vec!["note.created", "note.deleted"]);

        cancel.cancel();
        task.await.unwrap();
        assert_eq!(*consumer.state().borrow(), ConsumerState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn consume_error_backs_off_and_redelivers_from_last_commit() {
        let broker = Arc::new(FlakyBroker {
            inner: InMemoryBroker::new(),
            failures: AtomicU32::new(1),
        });
        let recorder = Arc::new(Recorder::default());
        let consumer = Arc::new(Consumer::new(
            Topic::Notification,
            broker.clone(),
            recorder.clone(),
            ConsumerConfig::default(),
        ));
        let mut states = consumer.state();

        let event = Event::new(ResourceType::Task, "updated", "t1", "u1", json!({}));
        EventProducer::new(broker.clone()).publish(event.clone()).await;

        let cancel = CancellationToken::new();
        let task = {
            let consumer = consumer.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { consumer.run(cancel).await })
        };

        states
            .wait_for(|state| *state == ConsumerState::Backoff)
            .await
            .unwrap();
        wait_for(|| broker.inner.committed(Topic::Notification, "realtime") == 1).await;

        // Delivered once before the failed commit and once after the rewind.
        let ids: Vec<_> = recorder.events.lock().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![event.id, event.id]);
        assert_eq!(*consumer.state().borrow(), ConsumerState::Consuming);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn closing_the_broker_stops_the_consumer() {
        let broker = Arc::new(InMemoryBroker::new());
        let consumer = Consumer::new(
            Topic::Sync,
            broker.clone(),
            Arc::new(Recorder::default()),
            ConsumerConfig::default(),
        );
        broker.close();

        consumer.run(CancellationToken::new()).await;
        assert_eq!(*consumer.state().borrow(), ConsumerState::Stopped);
    }

    #[tokio::test]
    async fn sync_consumer_discards_stale_versions_before_fan_out() {
        let broker = Arc::new(InMemoryBroker::new());
        let registry = Arc::new(ConnectionRegistry::new(Arc::new(OwnerOnly)));
        let connection = Arc::new(Connection::new(ConnectionId::from("c1"), "u1".into(), 16));
        registry.register(connection.clone()).unwrap();
        registry
            .subscribe(
                connection.id(),
                SubscriptionTarget::resource(ResourceType::Block, Some("b1")),
            )
            .unwrap();

        let manager = Arc::new(Manager::new(registry));
        let consumer = Arc::new(Consumer::sync(
            broker.clone(),
            manager,
            ConsumerConfig::default(),
        ));

        let producer = EventProducer::new(broker.clone());
        for version in [1, 3, 2] {
            let delta = Event::new(ResourceType::Block, "delta", "b1", "u1", json!({"v": version}))
                .with_version(version);
            producer.publish(delta).await;
        }

        let cancel = CancellationToken::new();
        let task = {
            let consumer = consumer.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { consumer.run(cancel).await })
        };
        wait_for(|| broker.committed(Topic::Sync, "realtime") == 3).await;
        cancel.cancel();
        task.await.unwrap();

        let mut versions = Vec::new();
        while connection.queued() > 0 {
            let message = connection.next_outbound().await.unwrap();
            if let ServerFrame::Event { payload, .. } = ServerFrame::parse(message.as_str()).unwrap() {
                versions.push(payload.version.unwrap());
            }
        }
        assert_eq!(versions, vec![1, 3]);
    }

    #[tokio::test]
    async fn other_users_connections_receive_nothing() {
        let broker = Arc::new(InMemoryBroker::new());
        let registry = Arc::new(ConnectionRegistry::new(Arc::new(OwnerOnly)));
        let stranger = Arc::new(Connection::new(ConnectionId::from("c2"), "u2".into(), 16));
        registry.register(stranger.clone()).unwrap();
        registry
            .subscribe(stranger.id(), SubscriptionTarget::resource(ResourceType::Note, None))
            .unwrap();

        let consumer = Arc::new(Consumer::notifications(
            broker.clone(),
            Arc::new(Manager::new(registry)),
            ConsumerConfig::default(),
        ));
        EventProducer::new(broker.clone())
            .publish(Event::new(ResourceType::Note, "updated", "A", "u1", json!({})))
            .await;

        let cancel = CancellationToken::new();
        let task = {
            let consumer = consumer.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { consumer.run(cancel).await })
        };
        wait_for(|| broker.committed(Topic::Notification, "realtime") == 1).await;
        cancel.cancel();
        task.await.unwrap();

        assert_eq!(stranger.queued(), 0);
    }
}
