//! Claims carried by the bearer tokens presented at the WebSocket handshake.
//!
//! Tokens are issued elsewhere; this layer only decodes them. `sub` is the
//! user id that owns the connection.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: String,
    pub exp: usize,
    #[serde(default)]
    pub iat: Option<usize>,
}
