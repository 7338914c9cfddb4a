//! Server composition: wires the broker, the two consumers, the connection
//! registry and the web surface into one running process.

use domain::authorization::SharingGrants;
use domain::jwt::TokenValidator;
use events::{Broker, EventProducer, InMemoryBroker};
use log::*;
use realtime::consumer::{Consumer, ConsumerConfig};
use realtime::{ConnectionRegistry, Manager};
use service::config::Config;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use web::AppState;

/// Everything a running realtime server shares between its tasks.
pub struct Realtime {
    pub broker: Arc<InMemoryBroker>,
    pub grants: Arc<SharingGrants>,
    pub registry: Arc<ConnectionRegistry>,
    pub manager: Arc<Manager>,
}

impl Realtime {
    pub fn new() -> Self {
        let grants = Arc::new(SharingGrants::new());
        let registry = Arc::new(ConnectionRegistry::new(grants.clone()));
        Self {
            broker: Arc::new(InMemoryBroker::new()),
            manager: Arc::new(Manager::new(registry.clone())),
            grants,
            registry,
        }
    }

    /// Producer that mutation handlers publish committed changes through.
    pub fn producer(&self) -> EventProducer {
        EventProducer::new(self.broker.clone())
    }

    /// Start the notification and sync consumers and the idle sweeper.
    pub fn spawn_workers(&self, config: &Config, cancel: &CancellationToken) -> Vec<JoinHandle<()>> {
        let consumer_config = ConsumerConfig {
            batch_size: config.consumer_batch_size,
            backoff_base: config.consumer_backoff_base(),
            backoff_max: config.consumer_backoff_max(),
            tracked_resources: config.sync_tracked_resources,
            ..ConsumerConfig::default()
        };
        let broker: Arc<dyn Broker> = self.broker.clone();

        let consumers = [
            Consumer::notifications(broker.clone(), self.manager.clone(), consumer_config.clone()),
            Consumer::sync(broker, self.manager.clone(), consumer_config),
        ];

        let mut handles: Vec<JoinHandle<()>> = consumers
            .into_iter()
            .map(|consumer| {
                let cancel = cancel.clone();
                tokio::spawn(async move { consumer.run(cancel).await })
            })
            .collect();

        handles.push(web::sweeper::spawn_idle_sweeper(
            self.registry.clone(),
            config.connection_idle_timeout(),
            config.idle_sweep_interval(),
            cancel.clone(),
        ));
        handles
    }

    /// Serve `/ws` and `/health` on `listener` until `cancel` fires, then stop the
    /// workers and close the broker.
    pub async fn serve(
        &self,
        config: Config,
        validator: Arc<dyn TokenValidator>,
        listener: TcpListener,
        cancel: CancellationToken,
    ) -> std::io::Result<()> {
        let workers = self.spawn_workers(&config, &cancel);
        let app_state = AppState::new(config, self.registry.clone(), validator);

        let served = web::init_server(app_state, listener, cancel.clone()).await;

        cancel.cancel();
        self.broker.close();
        for worker in workers {
            if let Err(e) = worker.await {
                warn!("Worker task ended abnormally: {e}");
            }
        }
        info!("Realtime server stopped");
        served
    }
}

impl Default for Realtime {
    fn default() -> Self {
        Self::new()
    }
}
