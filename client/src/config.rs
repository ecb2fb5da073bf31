//! Client configuration: server address, identity, and connection timing.

use std::time::Duration;

pub const DEFAULT_SERVER_URL: &str = "ws://localhost:8080";
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 3_000;
pub const DEFAULT_MAX_RETRIES: u32 = 10;

/// Timing and retry bounds for the connection manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// How long a dial may take before it counts as a failed attempt.
    pub connect_timeout: Duration,
    /// Pause between an abnormal close and the next dial.
    pub reconnect_delay: Duration,
    /// Reconnects allowed after consecutive failures before giving up.
    pub max_retries: u32,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self::from_millis(DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_RECONNECT_DELAY_MS, DEFAULT_MAX_RETRIES)
    }
}

impl ConnectionSettings {
    #[must_use]
    pub fn from_millis(connect_timeout_ms: u64, reconnect_delay_ms: u64, max_retries: u32) -> Self {
        Self {
            connect_timeout: Duration::from_millis(connect_timeout_ms),
            reconnect_delay: Duration::from_millis(reconnect_delay_ms),
            max_retries,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub url: String,
    /// Identity to chat as from the start, if already known.
    pub identity: Option<String>,
    pub connection: ConnectionSettings,
}

impl ClientConfig {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into(), identity: None, connection: ConnectionSettings::default() }
    }

    #[must_use]
    pub fn with_identity(mut self, identity: Option<String>) -> Self {
        self.identity = identity
            .map(|id| id.trim().to_owned())
            .filter(|id| !id.is_empty());
        self
    }

    #[must_use]
    pub fn with_connection(mut self, connection: ConnectionSettings) -> Self {
        self.connection = connection;
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(DEFAULT_SERVER_URL)
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
