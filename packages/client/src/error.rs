//! Error types for the bridge client.

use thiserror::Error;

/// Client-specific errors
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport-level connection failure
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Initial HTTP seeding against the analytics backend failed
    #[error("Failed to seed {kind} from {url}: {reason}")]
    SeedError {
        kind: String,
        url: String,
        reason: String,
    },
}
