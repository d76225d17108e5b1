//! Broadcast bridge server.
//!
//! Polls the analytics backend on a fixed interval and fans out change
//! events to WebSocket subscribers, one room per data kind.
//!
//! Run with:
//! ```not_rust
//! cargo run --bin kakehashi-server
//! cargo run --bin kakehashi-server -- --host 0.0.0.0 --port 3000 \
//!     --backend-api-url http://127.0.0.1:8000 --poll-interval-secs 30
//! ```

use std::sync::Arc;

use clap::Parser;
use tokio::sync::watch;

use kakehashi_server::{
    config::{DEFAULT_POLL_INTERVAL_SECS, ServerConfig},
    fetch::HttpSnapshotFetcher,
    hub::Hub,
    poller::Poller,
    runner::run_server,
    state::AppState,
};
use kakehashi_shared::logger::setup_logger;

#[derive(Parser, Debug)]
#[command(name = "server")]
#[command(about = "Real-time broadcast bridge server", long_about = None)]
struct Args {
    /// Host address to bind the server to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Port number to bind the server to
    #[arg(short = 'p', long, default_value = "8080")]
    port: u16,

    /// Base URL of the analytics backend (falls back to KAKEHASHI_API_URL)
    #[arg(short = 'b', long)]
    backend_api_url: Option<String>,

    /// Polling period in seconds
    #[arg(long, default_value_t = DEFAULT_POLL_INTERVAL_SECS)]
    poll_interval_secs: u64,

    /// Allowed CORS origin (falls back to KAKEHASHI_CORS_ORIGIN)
    #[arg(long)]
    cors_origin: Option<String>,
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    setup_logger(env!("CARGO_BIN_NAME"), "debug");

    let args = Args::parse();
    let config = ServerConfig::resolve(
        args.host,
        args.port,
        args.backend_api_url,
        args.poll_interval_secs,
        args.cors_origin,
    );

    tracing::info!("Polling backend at {}", config.backend_api_url);

    let hub = Arc::new(Hub::new());
    let state = Arc::new(AppState { hub: hub.clone() });

    // Poller runs alongside the server; the watch channel stops its timer
    // once the server shuts down.
    let fetcher = Arc::new(HttpSnapshotFetcher::new(config.backend_api_url.clone()));
    let poller = Poller::new(fetcher, hub, config.poll_interval);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let poller_task = tokio::spawn(poller.run(shutdown_rx));

    if let Err(e) = run_server(&config, state).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }

    if shutdown_tx.send(true).is_ok()
        && let Err(e) = poller_task.await
    {
        tracing::warn!("Polling service task ended abnormally: {}", e);
    }
}
