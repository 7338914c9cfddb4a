use std::time::Duration;

/// Tuning for a [`crate::ConnectionManager`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket endpoint, e.g. `ws://localhost:4000/ws`.
    pub url: String,
    /// Handshake token, sent as the `token` query parameter.
    pub token: Option<String>,
    /// First reconnect delay; doubles on each failed attempt.
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    /// Failed attempts in a row before automatic reconnects stop.
    pub max_reconnect_attempts: u32,
    /// Consecutive handshake rejections before automatic reconnects stop until
    /// new credentials arrive.
    pub auth_failure_limit: u32,
    pub ping_interval: Duration,
    /// Silence after which the socket is considered dead and replaced.
    pub liveness_timeout: Duration,
    pub connect_timeout: Duration,
    /// How many recent event ids are remembered to drop redeliveries.
    pub dedup_window: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:4000/ws".to_string(),
            token: None,
            backoff_base: Duration::from_millis(500),
            backoff_max: Duration::from_secs(30),
            max_reconnect_attempts: 10,
            auth_failure_limit: 2,
            ping_interval: Duration::from_secs(15),
            liveness_timeout: Duration::from_secs(45),
            connect_timeout: Duration::from_secs(10),
            dedup_window: 1024,
        }
    }
}

impl ClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}
