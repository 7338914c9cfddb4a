//! Client side of the real-time event layer.
//!
//! [`ConnectionManager`] keeps one WebSocket open to the server for as long as the
//! application wants it: it reconnects with exponential backoff, replays the
//! local subscription set on every new socket, pings to detect dead connections
//! and drops events it has already delivered.
//!
//! ```no_run
//! use client::{ClientConfig, ConnectionManager, WsConnector};
//! use events::ResourceType;
//! use std::sync::Arc;
//!
//! # async fn run() {
//! let config = ClientConfig::new("ws://localhost:4000/ws").with_token("<jwt>");
//! let manager = ConnectionManager::spawn(config, Arc::new(WsConnector));
//! manager.subscribe_resource(ResourceType::Notebook, Some("N1"));
//! manager.on_event("notebook.updated", |event| println!("{:?}", event.payload));
//! # }
//! ```

pub mod backoff;
pub mod config;
pub mod dedup;
pub mod error;
pub mod listeners;
pub mod manager;
pub mod subscriptions;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use config::ClientConfig;
pub use error::Error;
pub use listeners::ReceivedEvent;
pub use manager::{ClientState, ConnectionManager, HaltReason};
pub use subscriptions::SubscriptionState;
pub use transport::{Connector, WsConnector};
