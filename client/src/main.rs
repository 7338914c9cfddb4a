use anyhow::Result;
use clap::Parser;
use client::{ClientConfig, ConnectionManager, WsConnector};
use colored::*;
use events::protocol::SubscriptionTarget;
use events::ResourceType;
use std::sync::Arc;

mod output;

use output::{print_event, print_state, print_subscriptions};

#[derive(Parser)]
#[command(name = "realtime-client")]
#[command(about = "Subscribe to real-time events and print them as they arrive")]
struct Cli {
    /// WebSocket endpoint (e.g., ws://localhost:4000/ws)
    #[arg(long, default_value = "ws://127.0.0.1:4000/ws")]
    url: String,

    /// Handshake token (a signed JWT)
    #[arg(long, env = "REALTIME_TOKEN")]
    token: Option<String>,

    /// Subscriptions in key form: `note:<id>`, `notebook` or `event:block.created`.
    /// May be repeated.
    #[arg(long, short, required = true)]
    subscribe: Vec<SubscriptionTarget>,

    /// Enable verbose output
    #[arg(long, short)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();

    println!("{} Connecting to {}", "→".blue(), cli.url.bold());

    let mut config = ClientConfig::new(cli.url);
    config.token = cli.token;
    let manager = ConnectionManager::spawn(config, Arc::new(WsConnector));

    for resource in [
        ResourceType::Note,
        ResourceType::Notebook,
        ResourceType::Block,
        ResourceType::Task,
    ] {
        manager.on_resource(resource, print_event);
    }
    for target in cli.subscribe {
        manager.subscribe(target);
    }

    let mut state = manager.state();
    loop {
        tokio::select! {
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *state.borrow_and_update();
                print_state(current);
            }
            _ = tokio::signal::ctrl_c() => {
                break;
            }
        }
    }

    if let Ok(subscriptions) = manager.subscriptions().await {
        print_subscriptions(&subscriptions);
    }
    manager.shutdown().await;
    Ok(())
}
