//! HTTP and WebSocket surface of the realtime layer.
//!
//! `/ws` authenticates the handshake token and upgrades to a session that speaks
//! the subscribe/unsubscribe/ping protocol; `/health` is an unauthenticated
//! liveness probe.

use domain::jwt::TokenValidator;
use log::*;
use realtime::ConnectionRegistry;
use service::config::Config;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

mod controller;
pub mod error;
mod extractors;
pub mod router;
mod session;
pub mod sweeper;

/// Shared state handed to every request handler.
/// Needs to implement Clone to be able to be passed into Router as State
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ConnectionRegistry>,
    pub validator: Arc<dyn TokenValidator>,
    pub config: Config,
}

impl AppState {
    pub fn new(
        config: Config,
        registry: Arc<ConnectionRegistry>,
        validator: Arc<dyn TokenValidator>,
    ) -> Self {
        Self {
            registry,
            validator,
            config,
        }
    }
}

/// Serve the router on `listener` until `shutdown` is cancelled.
pub async fn init_server(
    app_state: AppState,
    listener: TcpListener,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let router = router::define_routes(app_state);

    info!("Server starting... listening for connections on ws://{}/ws", listener.local_addr()?);

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}
