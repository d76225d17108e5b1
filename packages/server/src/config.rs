//! Server configuration.
//!
//! CLI flags win over environment variables, which win over the local
//! defaults. The backend URL points at the external analytics service this
//! bridge polls; it is consumed as opaque JSON.

use std::time::Duration;

/// Default base URL of the external analytics backend
pub const DEFAULT_BACKEND_API_URL: &str = "http://127.0.0.1:8000";

/// Default polling period
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;

/// Environment variable overriding the backend base URL
pub const ENV_BACKEND_API_URL: &str = "KAKEHASHI_API_URL";

/// Environment variable setting the allowed CORS origin in production
pub const ENV_CORS_ORIGIN: &str = "KAKEHASHI_CORS_ORIGIN";

/// Runtime configuration for the broadcast server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host address to bind to
    pub host: String,
    /// Port number to bind to
    pub port: u16,
    /// Base URL of the analytics backend to poll
    pub backend_api_url: String,
    /// Fixed polling period
    pub poll_interval: Duration,
    /// Allowed CORS origin; permissive when unset
    pub cors_origin: Option<String>,
}

impl ServerConfig {
    /// Build the config from CLI-provided values, falling back to the
    /// environment and then to the local defaults.
    pub fn resolve(
        host: String,
        port: u16,
        backend_api_url: Option<String>,
        poll_interval_secs: u64,
        cors_origin: Option<String>,
    ) -> Self {
        Self {
            host,
            port,
            backend_api_url: pick(
                backend_api_url,
                std::env::var(ENV_BACKEND_API_URL).ok(),
                DEFAULT_BACKEND_API_URL,
            ),
            poll_interval: Duration::from_secs(poll_interval_secs),
            cors_origin: cors_origin.or_else(|| std::env::var(ENV_CORS_ORIGIN).ok()),
        }
    }
}

/// First of CLI value, environment value, default.
fn pick(cli: Option<String>, env: Option<String>, default: &str) -> String {
    cli.or(env).unwrap_or_else(|| default.to_string())
}
