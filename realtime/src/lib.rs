//! Real-time fan-out of domain events to live WebSocket connections.
//!
//! # Architecture
//!
//! - **Dual-index registry**: O(1) lookups both by connection id (session
//!   lifecycle) and by subscription key (event routing), via separate DashMap
//!   indices.
//! - **Resource and event-name subscriptions**: a connection may follow one
//!   resource, every visible resource of a type, or every event with a given name.
//! - **Access control**: every candidate connection is checked against the
//!   injected [`domain::authorization::AccessControl`] before delivery.
//! - **Non-blocking delivery**: each connection owns a bounded outbound queue; a
//!   full queue sheds its oldest notification instead of stalling the consumer.
//! - **Ephemeral**: nothing is buffered for disconnected users. A reconnecting
//!   client resubscribes and re-fetches state.
//!
//! # Message Flow
//!
//! 1. A mutation handler publishes an [`events::Event`] through the producer
//! 2. The notification or sync [`consumer::Consumer`] polls it off the broker
//! 3. Sync events pass through [`ordering::OrderedDelivery`], which drops stale versions
//! 4. [`Manager`] asks the registry for matching, authorized connections
//! 5. The serialized frame is pushed onto each connection's outbound queue
//! 6. The session's writer task drains the queue onto the socket
//!
//! # Modules
//!
//! - `connection`: per-connection state, subscription set and outbound queue
//! - `registry`: ConnectionRegistry with dual-index architecture
//! - `manager`: fan-out of one event to every matching connection
//! - `consumer`: broker consumers with backoff and commit-after-fan-out
//! - `ordering`: per-resource version tracking for sync events
//! - `outbound`: bounded drop-oldest queue
//! - `message`: serialized frames waiting in an outbound queue

pub mod connection;
pub mod consumer;
pub mod error;
pub mod manager;
pub mod message;
pub mod ordering;
pub mod outbound;
pub mod registry;

pub use connection::{Connection, ConnectionId, ConnectionState};
pub use manager::Manager;
pub use registry::ConnectionRegistry;
