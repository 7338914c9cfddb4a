use domain::jwt::JwtValidator;
use log::*;
use notebook_realtime::Realtime;
use service::{config::Config, logging::Logger};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() {
    let config = get_config();

    if let Err(e) = Logger::init_logger(&config) {
        eprintln!("Failed to initialize logger: {e}");
    }

    info!("Starting notebook_realtime in {} mode", config.runtime_env());

    let validator = match config.jwt_secret().map(JwtValidator::new) {
        Some(Ok(validator)) => Arc::new(validator),
        Some(Err(e)) => {
            error!("Invalid JWT configuration: {e}");
            std::process::exit(1);
        }
        None => {
            error!("JWT_SECRET is not set; refusing to accept connections");
            std::process::exit(1);
        }
    };

    let address = format!("{}:{}", config.interface(), config.port);
    let listener = match TcpListener::bind(&address).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {address}: {e}");
            std::process::exit(1);
        }
    };

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown signal received");
            }
            cancel.cancel();
        });
    }

    let realtime = Realtime::new();
    if let Err(e) = realtime.serve(config, validator, listener, cancel).await {
        error!("Server error: {e}");
        std::process::exit(1);
    }
}

fn get_config() -> Config {
    Config::new()
}
