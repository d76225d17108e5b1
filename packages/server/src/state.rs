//! Shared application state for the broadcast server.

use std::sync::Arc;

use crate::hub::Hub;

/// Shared application state
pub struct AppState {
    /// Broadcast hub: connection registry and room fan-out
    pub hub: Arc<Hub>,
}
