//! Domain services the realtime layer consumes but does not own.
//!
//! Token validation and access control are external collaborators of the event
//! distribution layer: sessions validate the handshake token through a
//! [`jwt::TokenValidator`] and the registry filters fan-out through an
//! [`authorization::AccessControl`]. Both are traits so the server composition
//! can inject whatever backs them.

pub use events::{Id, ResourceType};

pub mod authorization;
pub mod error;
pub mod jwt;

/// A type alias for user ids as carried in tokens and events.
pub type UserId = String;
