//! Background polling service.
//!
//! Polls the external analytics backend on a fixed interval, detects
//! changes against the previously observed snapshots, and publishes update
//! events to the broadcast hub. A failed fetch for one data kind never
//! blocks the others; the previous snapshot is retained and nothing is
//! published for that kind until the next tick.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::watch;

use kakehashi_shared::{
    protocol::{Room, ServerEvent},
    time::now_epoch_millis,
};

use crate::{
    diff::{collection_delta, stats_changed},
    fetch::{FetchError, SnapshotFetcher},
    hub::Hub,
};

/// Previously observed snapshots, per data kind
#[derive(Default)]
struct PreviousSnapshots {
    stats: Option<Value>,
    recommendations: Vec<Value>,
    facilities: Vec<Value>,
}

/// Fixed-interval poller bridging the backend to the hub
pub struct Poller {
    fetcher: Arc<dyn SnapshotFetcher>,
    hub: Arc<Hub>,
    interval: std::time::Duration,
    previous: PreviousSnapshots,
}

impl Poller {
    pub fn new(
        fetcher: Arc<dyn SnapshotFetcher>,
        hub: Arc<Hub>,
        interval: std::time::Duration,
    ) -> Self {
        Self {
            fetcher,
            hub,
            interval,
            previous: PreviousSnapshots::default(),
        }
    }

    /// Run the polling loop until the shutdown signal fires.
    ///
    /// The first poll happens immediately; stopping halts future ticks but
    /// never cancels a poll already in progress.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!("Starting polling service (interval: {:?})", self.interval);
        let mut ticker = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.poll_once().await,
                _ = shutdown.changed() => {
                    tracing::info!("Stopping polling service");
                    break;
                }
            }
        }
    }

    /// Fetch all three data kinds concurrently and publish what changed.
    ///
    /// Public so tests (and operators debugging a deployment) can trigger a
    /// poll without waiting for the timer.
    pub async fn poll_once(&mut self) {
        tracing::debug!("Polling backend for updates");

        let (stats, recommendations, facilities) = tokio::join!(
            self.fetcher.fetch(Room::Stats),
            self.fetcher.fetch(Room::Recommendations),
            self.fetcher.fetch(Room::Facilities),
        );

        if let Some(stats) = log_fetch_failure(Room::Stats, stats)
            && stats_changed(self.previous.stats.as_ref(), &stats)
        {
            let event = ServerEvent::StatsUpdate {
                timestamp: now_epoch_millis(),
                data: stats.clone(),
            };
            self.hub.publish(Room::Stats, &event).await;
            self.previous.stats = Some(stats);
        }

        if let Some(items) = as_collection(Room::Recommendations, recommendations)
            && let Some(delta) = collection_delta(
                Room::Recommendations,
                &self.previous.recommendations,
                &items,
            )
        {
            let event = ServerEvent::RecommendationsUpdate {
                timestamp: now_epoch_millis(),
                delta,
            };
            self.hub.publish(Room::Recommendations, &event).await;
            self.previous.recommendations = items;
        }

        if let Some(items) = as_collection(Room::Facilities, facilities)
            && let Some(delta) =
                collection_delta(Room::Facilities, &self.previous.facilities, &items)
        {
            let event = ServerEvent::FacilitiesUpdate {
                timestamp: now_epoch_millis(),
                delta,
            };
            self.hub.publish(Room::Facilities, &event).await;
            self.previous.facilities = items;
        }
    }
}

/// Log a fetch failure and turn the result into an option, so one failed
/// kind never aborts the tick.
fn log_fetch_failure(room: Room, result: Result<Value, FetchError>) -> Option<Value> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::error!("Failed to fetch {}: {}", room, e);
            None
        }
    }
}

/// Collection kinds are expected to arrive as JSON arrays.
fn as_collection(room: Room, result: Result<Value, FetchError>) -> Option<Vec<Value>> {
    let value = log_fetch_failure(room, result)?;
    match value {
        Value::Array(items) => Some(items),
        other => {
            tracing::warn!("Expected {} payload to be an array, got: {}", room, other);
            None
        }
    }
}
