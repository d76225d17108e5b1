//! Server execution logic.

use std::sync::Arc;

use axum::{Router, http::HeaderValue, routing::get};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{
    config::ServerConfig,
    handler::{get_connection_stats, health_check, websocket_handler},
    signal::shutdown_signal,
    state::AppState,
};

/// Build the axum router for the broadcast server.
///
/// Kept separate from [`run_server`] so tests can serve the same router on
/// an ephemeral port.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(websocket_handler))
        .route("/api/health", get(health_check))
        .route("/api/connections", get(get_connection_stats))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the broadcast server until a shutdown signal arrives.
///
/// # Arguments
///
/// * `config` - Runtime configuration (bind address, CORS origin)
/// * `state` - Shared state holding the broadcast hub
pub async fn run_server(
    config: &ServerConfig,
    state: Arc<AppState>,
) -> Result<(), Box<dyn std::error::Error>> {
    let cors = match &config.cors_origin {
        Some(origin) => CorsLayer::new()
            .allow_origin(origin.parse::<HeaderValue>()?)
            .allow_methods(Any)
            .allow_headers(Any),
        None => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    };

    let app = router(state).layer(cors);

    let bind_addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    tracing::info!(
        "Broadcast bridge server listening on {}",
        listener.local_addr()?
    );
    tracing::info!("Connect to: ws://{}/ws", bind_addr);
    tracing::info!("Press Ctrl+C to shutdown gracefully");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");

    Ok(())
}
