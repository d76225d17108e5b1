//! Client-side snapshot store.
//!
//! One per client instance: holds the latest snapshot per data kind, a
//! transient "just changed" flash deadline per kind, and the connection
//! status. The connection manager is the only writer; UI layers read
//! through the selector methods and never mutate.
//!
//! Flash flags are deadline-based rather than timer-based: a kind is
//! flashing while `now < deadline` on the injected [`Clock`], which keeps
//! expiry deterministic under test.

use std::sync::{Arc, RwLock};

use serde_json::Value;

use kakehashi_shared::{
    protocol::{ConnectionStatus, Room, ServerEvent, SnapshotDelta},
    time::Clock,
};

use crate::formatter::format_time_since;

/// How long a kind stays marked as "just updated"
pub const FLASH_DURATION_MS: i64 = 600;

#[derive(Debug, Default, Clone)]
struct KindMeta {
    last_updated: Option<i64>,
    flash_until: Option<i64>,
}

#[derive(Default)]
struct StoreState {
    connection_status: ConnectionStatus,
    last_connected: Option<i64>,
    reconnect_attempts: u32,
    stats: Option<Value>,
    recommendations: Vec<Value>,
    facilities: Vec<Value>,
    stats_meta: KindMeta,
    recommendations_meta: KindMeta,
    facilities_meta: KindMeta,
}

impl StoreState {
    fn meta(&self, room: Room) -> &KindMeta {
        match room {
            Room::Stats => &self.stats_meta,
            Room::Recommendations => &self.recommendations_meta,
            Room::Facilities => &self.facilities_meta,
        }
    }

    fn meta_mut(&mut self, room: Room) -> &mut KindMeta {
        match room {
            Room::Stats => &mut self.stats_meta,
            Room::Recommendations => &mut self.recommendations_meta,
            Room::Facilities => &mut self.facilities_meta,
        }
    }
}

/// Process-wide container for the latest real-time data
pub struct RealtimeStore {
    clock: Arc<dyn Clock>,
    state: RwLock<StoreState>,
}

impl RealtimeStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: RwLock::new(StoreState::default()),
        }
    }

    // ---- mutations (connection manager only) ----

    /// Record a connection status transition.
    pub fn set_status(&self, status: ConnectionStatus, reconnect_attempts: u32) {
        let mut state = self.state.write().expect("Store lock poisoned");
        state.connection_status = status;
        state.reconnect_attempts = reconnect_attempts;
        if status == ConnectionStatus::Connected {
            state.last_connected = Some(self.clock.now_millis());
        }
    }

    /// Apply an incoming update event: replace the kind's snapshot (or fold
    /// in the delta), stamp its last-updated time, and arm the flash flag.
    /// Non-update events are ignored.
    pub fn apply_update(&self, event: &ServerEvent) {
        let now = self.clock.now_millis();
        let mut state = self.state.write().expect("Store lock poisoned");

        match event {
            ServerEvent::StatsUpdate { data, .. } => {
                state.stats = Some(data.clone());
            }
            ServerEvent::RecommendationsUpdate { delta, .. } => {
                state.recommendations =
                    apply_delta(Room::Recommendations, &state.recommendations, delta);
            }
            ServerEvent::FacilitiesUpdate { delta, .. } => {
                state.facilities = apply_delta(Room::Facilities, &state.facilities, delta);
            }
            _ => return,
        }

        // event.room() is Some for every update variant
        if let Some(room) = event.room() {
            let meta = state.meta_mut(room);
            meta.last_updated = Some(now);
            meta.flash_until = Some(now + FLASH_DURATION_MS);
        }
    }

    /// Seed a kind from a server-rendered initial snapshot fetched over
    /// plain HTTP. Does not arm the flash flag; the data is not "news".
    pub fn seed(&self, room: Room, value: Value) {
        let now = self.clock.now_millis();
        let mut state = self.state.write().expect("Store lock poisoned");
        match room {
            Room::Stats => state.stats = Some(value),
            Room::Recommendations => {
                state.recommendations = value.as_array().cloned().unwrap_or_default();
            }
            Room::Facilities => {
                state.facilities = value.as_array().cloned().unwrap_or_default();
            }
        }
        state.meta_mut(room).last_updated = Some(now);
    }

    /// Reset to the empty/disconnected initial state.
    pub fn reset(&self) {
        let mut state = self.state.write().expect("Store lock poisoned");
        *state = StoreState::default();
    }

    // ---- selectors (UI-facing, read-only) ----

    pub fn connection_status(&self) -> ConnectionStatus {
        self.state.read().expect("Store lock poisoned").connection_status
    }

    pub fn is_connected(&self) -> bool {
        self.connection_status() == ConnectionStatus::Connected
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.state.read().expect("Store lock poisoned").reconnect_attempts
    }

    pub fn last_connected(&self) -> Option<i64> {
        self.state.read().expect("Store lock poisoned").last_connected
    }

    pub fn stats(&self) -> Option<Value> {
        self.state.read().expect("Store lock poisoned").stats.clone()
    }

    pub fn recommendations(&self) -> Vec<Value> {
        self.state
            .read()
            .expect("Store lock poisoned")
            .recommendations
            .clone()
    }

    pub fn facilities(&self) -> Vec<Value> {
        self.state
            .read()
            .expect("Store lock poisoned")
            .facilities
            .clone()
    }

    /// Whether the kind changed within the last [`FLASH_DURATION_MS`].
    pub fn is_flashing(&self, room: Room) -> bool {
        let state = self.state.read().expect("Store lock poisoned");
        match state.meta(room).flash_until {
            Some(deadline) => self.clock.now_millis() < deadline,
            None => false,
        }
    }

    pub fn last_updated(&self, room: Room) -> Option<i64> {
        self.state
            .read()
            .expect("Store lock poisoned")
            .meta(room)
            .last_updated
    }

    /// Human-readable time since the kind last updated ("Never", "Just
    /// now", "42s ago", ...).
    pub fn time_since_update(&self, room: Room) -> String {
        match self.last_updated(room) {
            Some(last) => format_time_since(self.clock.now_millis() - last),
            None => "Never".to_string(),
        }
    }
}

/// Fold a delta into the current collection: replace updated items, append
/// added ones, drop deleted ids. Items with no derivable key are left
/// untouched.
fn apply_delta(room: Room, current: &[Value], delta: &SnapshotDelta) -> Vec<Value> {
    let mut result: Vec<(Option<String>, Value)> = current
        .iter()
        .map(|item| (room.item_key(item), item.clone()))
        .collect();

    for item in delta.updated.iter().chain(delta.added.iter()) {
        let Some(key) = room.item_key(item) else {
            continue;
        };
        match result
            .iter_mut()
            .find(|(k, _)| k.as_deref() == Some(key.as_str()))
        {
            Some(slot) => slot.1 = item.clone(),
            None => result.push((Some(key), item.clone())),
        }
    }

    result.retain(|(key, _)| match key {
        Some(key) => !delta.deleted.contains(key),
        None => true,
    });

    result.into_iter().map(|(_, item)| item).collect()
}
