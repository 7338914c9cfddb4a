use log::*;
use realtime::ConnectionRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Periodically evict connections that have sent nothing for `idle_timeout`.
/// Evicting closes the connection's queue, and its session then closes the socket.
pub fn spawn_idle_sweeper(
    registry: Arc<ConnectionRegistry>,
    idle_timeout: Duration,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let evicted = registry.evict_idle(idle_timeout);
                    if !evicted.is_empty() {
                        info!("Idle sweep evicted {} connection(s)", evicted.len());
                    }
                }
            }
        }
        debug!("Idle sweeper stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::authorization::OwnerOnly;
    use realtime::{Connection, ConnectionId, ConnectionState};

    #[tokio::test]
    async fn sweeper_evicts_silent_connections_until_cancelled() {
        let registry = Arc::new(ConnectionRegistry::new(Arc::new(OwnerOnly)));
        let connection = Arc::new(Connection::new(ConnectionId::new(), "u1".into(), 4));
        registry.register(connection.clone()).unwrap();

        let cancel = CancellationToken::new();
        let sweeper = spawn_idle_sweeper(
            registry.clone(),
            Duration::from_millis(20),
            Duration::from_millis(10),
            cancel.clone(),
        );

        for _ in 0..200 {
            if registry.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(registry.is_empty());
        assert_eq!(connection.state(), ConnectionState::Closed);

        cancel.cancel();
        sweeper.await.unwrap();
    }
}
