//! Client configuration and reconnection policy.

use std::time::Duration;

/// Default WebSocket URL of the broadcast server
pub const DEFAULT_WS_URL: &str = "ws://127.0.0.1:8080/ws";

/// Default base URL of the analytics backend (for initial HTTP seeding)
pub const DEFAULT_API_URL: &str = "http://127.0.0.1:8000";

/// Connection configuration for [`crate::manager::RealtimeClient`]
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket URL of the broadcast server
    pub url: String,
    /// Maximum number of reconnection attempts before giving up
    pub max_reconnect_attempts: u32,
    /// Delay before the first reconnection attempt
    pub reconnect_delay: Duration,
    /// Ceiling for the growing reconnection delay
    pub reconnect_delay_max: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_WS_URL.to_string(),
            max_reconnect_attempts: 10,
            reconnect_delay: Duration::from_secs(1),
            reconnect_delay_max: Duration::from_secs(10),
        }
    }
}

/// Delay before reconnection attempt number `attempt` (1-indexed).
///
/// Doubles per attempt, capped at `max`.
pub fn reconnect_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    base.saturating_mul(1u32 << exponent).min(max)
}
