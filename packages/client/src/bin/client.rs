//! Terminal watcher for the broadcast bridge.
//!
//! Seeds the local store over plain HTTP, connects to the broadcast server,
//! subscribes to the requested rooms, and prints update events as they
//! arrive. An interactive prompt accepts subscription and status commands.
//!
//! Run with:
//! ```not_rust
//! cargo run --bin kakehashi-client
//! cargo run --bin kakehashi-client -- --rooms stats,facilities
//! ```

use std::io::Write;
use std::sync::Arc;

use clap::Parser;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use serde_json::Value;
use tokio::sync::mpsc;

use kakehashi_client::{
    config::{ClientConfig, DEFAULT_API_URL, DEFAULT_WS_URL},
    error::ClientError,
    formatter::UpdateFormatter,
    manager::RealtimeClient,
    store::RealtimeStore,
};
use kakehashi_shared::{
    logger::setup_logger,
    protocol::Room,
    time::{SystemClock, now_epoch_millis},
};

#[derive(Parser, Debug)]
#[command(name = "client")]
#[command(about = "Terminal watcher for the real-time broadcast server", long_about = None)]
struct Args {
    /// WebSocket URL of the broadcast server
    #[arg(short = 'u', long, default_value = DEFAULT_WS_URL)]
    url: String,

    /// Base URL of the analytics backend, used for initial seeding
    #[arg(short = 'a', long, default_value = DEFAULT_API_URL)]
    api_url: String,

    /// Rooms to subscribe to on startup (comma separated)
    #[arg(short = 'r', long, value_delimiter = ',', default_values_t = Room::ALL)]
    rooms: Vec<Room>,

    /// Skip the initial HTTP seeding
    #[arg(long, default_value_t = false)]
    no_seed: bool,
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    setup_logger(env!("CARGO_BIN_NAME"), "info");

    let args = Args::parse();
    run_client(args).await;
}

async fn run_client(args: Args) {
    let store = Arc::new(RealtimeStore::new(Arc::new(SystemClock)));

    if !args.no_seed {
        seed_store(&args.api_url, &args.rooms, &store).await;
    }

    let config = ClientConfig {
        url: args.url,
        ..ClientConfig::default()
    };
    let client = Arc::new(RealtimeClient::new(config, store.clone()));

    let _status_guard = client.on_status_change(|status| {
        print!("{}", UpdateFormatter::format_status(status, now_epoch_millis()));
        redisplay_prompt();
    });
    let _update_guard = client.on_update(|event| {
        if let Some(line) = UpdateFormatter::format_update(event) {
            print!("{}", line);
            redisplay_prompt();
        }
    });

    client.connect();
    client.subscribe(&args.rooms);

    println!("\nCommands: sub <room...>, unsub <room...>, ping, status, quit\n");

    // Rustyline is synchronous; run it on its own thread and feed lines
    // through a channel
    let (input_tx, mut input_rx) = mpsc::unbounded_channel::<String>();
    let _readline_handle = std::thread::spawn(move || {
        let mut rl = match DefaultEditor::new() {
            Ok(rl) => rl,
            Err(e) => {
                eprintln!("Failed to initialize readline: {}", e);
                return;
            }
        };

        loop {
            match rl.readline("> ") {
                Ok(line) => {
                    let line = line.trim();
                    if !line.is_empty() {
                        rl.add_history_entry(line).ok();
                        if input_tx.send(line.to_string()).is_err() {
                            // Channel closed, exit thread
                            break;
                        }
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    // Ctrl+C
                    tracing::info!("Interrupted");
                    break;
                }
                Err(ReadlineError::Eof) => {
                    // Ctrl+D
                    tracing::info!("EOF");
                    break;
                }
                Err(err) => {
                    tracing::error!("Readline error: {}", err);
                    break;
                }
            }
        }
    });

    while let Some(line) = input_rx.recv().await {
        if !handle_command(&line, &client, &store) {
            break;
        }
    }

    client.disconnect().await;
    println!("Bye.");
}

/// Execute one prompt command. Returns `false` when the watcher should exit.
fn handle_command(line: &str, client: &RealtimeClient, store: &RealtimeStore) -> bool {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    match tokens.as_slice() {
        ["sub", rooms @ ..] => {
            if let Some(rooms) = parse_rooms(rooms) {
                client.subscribe(&rooms);
            }
        }
        ["unsub", rooms @ ..] => {
            if let Some(rooms) = parse_rooms(rooms) {
                client.unsubscribe(&rooms);
            }
        }
        ["ping"] => client.ping(),
        ["status"] => print_status(client, store),
        ["quit"] | ["exit"] => return false,
        _ => println!("Unknown command. Commands: sub <room...>, unsub <room...>, ping, status, quit"),
    }
    true
}

fn parse_rooms(tokens: &[&str]) -> Option<Vec<Room>> {
    if tokens.is_empty() {
        println!("Specify at least one room: stats, recommendations, facilities");
        return None;
    }
    let mut rooms = Vec::with_capacity(tokens.len());
    for token in tokens {
        match token.parse::<Room>() {
            Ok(room) => rooms.push(room),
            Err(e) => {
                println!("{}", e);
                return None;
            }
        }
    }
    Some(rooms)
}

fn print_status(client: &RealtimeClient, store: &RealtimeStore) {
    println!(
        "\nconnection: {} (reconnect attempts: {})",
        client.status(),
        store.reconnect_attempts()
    );
    for room in Room::ALL {
        let count = match room {
            Room::Stats => store
                .stats()
                .as_ref()
                .and_then(Value::as_object)
                .map(|obj| obj.len())
                .unwrap_or(0),
            Room::Recommendations => store.recommendations().len(),
            Room::Facilities => store.facilities().len(),
        };
        print!(
            "{}",
            UpdateFormatter::format_room_line(room, count, &store.time_since_update(room))
        );
    }
    println!();
}

/// Fetch the initial snapshot of each room from the analytics backend.
/// Seeding failures are logged and skipped; the room will fill in on its
/// first update event.
async fn seed_store(api_url: &str, rooms: &[Room], store: &RealtimeStore) {
    let http = reqwest::Client::new();
    for &room in rooms {
        match seed_room(&http, api_url, room).await {
            Ok(value) => {
                store.seed(room, value);
                tracing::info!("Seeded {} from {}", room, api_url);
            }
            Err(e) => tracing::warn!("{}", e),
        }
    }
}

async fn seed_room(
    http: &reqwest::Client,
    api_url: &str,
    room: Room,
) -> Result<Value, ClientError> {
    let url = format!("{}/api/{}", api_url.trim_end_matches('/'), room);
    let response = http
        .get(&url)
        .send()
        .await
        .map_err(|e| ClientError::ConnectionError(e.to_string()))?;
    if !response.status().is_success() {
        return Err(ClientError::SeedError {
            kind: room.to_string(),
            url,
            reason: format!("HTTP {}", response.status()),
        });
    }
    response.json::<Value>().await.map_err(|e| ClientError::SeedError {
        kind: room.to_string(),
        url,
        reason: e.to_string(),
    })
}

/// Redisplay the prompt after printing an event line
fn redisplay_prompt() {
    print!("> ");
    std::io::stdout().flush().ok();
}
