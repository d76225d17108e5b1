//! Room-based broadcast hub.
//!
//! The hub owns the connection registry and is the sole mutator of room
//! membership. Handlers register a per-connection sender channel on accept
//! and unregister it on close; the poller publishes through [`Hub::publish`].

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use tokio::sync::{Mutex, mpsc};
use uuid::Uuid;

use kakehashi_shared::protocol::{Room, ServerEvent};

/// Identifier assigned to each accepted transport connection.
pub type ConnectionId = Uuid;

/// Connection information tracked per client
pub struct ClientInfo {
    /// Message sender channel (serialized frames)
    pub sender: mpsc::UnboundedSender<String>,
    /// Rooms this connection is currently subscribed to
    pub rooms: HashSet<Room>,
    /// Unix timestamp when connected (UTC, milliseconds)
    pub connected_at: i64,
}

/// Per-room membership counts, exposed on `/api/connections`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RoomCounts {
    pub stats: usize,
    pub recommendations: usize,
    pub facilities: usize,
}

/// Per-connection entry in the statistics snapshot.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ConnectionDetail {
    pub id: ConnectionId,
    /// Unix timestamp when connected (UTC, milliseconds)
    pub connected_at: i64,
    pub rooms: Vec<Room>,
}

/// Connection statistics snapshot.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ConnectionStats {
    pub connected: usize,
    pub rooms: RoomCounts,
    /// One entry per connection, oldest first
    pub connections: Vec<ConnectionDetail>,
}

/// Room-based publish/subscribe hub over per-connection channels.
pub struct Hub {
    /// Map of connection id to its connection info
    clients: Mutex<HashMap<ConnectionId, ClientInfo>>,
}

impl Hub {
    pub fn new() -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Register a newly accepted connection with an empty room set.
    pub async fn register(
        &self,
        id: ConnectionId,
        sender: mpsc::UnboundedSender<String>,
        connected_at: i64,
    ) {
        let mut clients = self.clients.lock().await;
        clients.insert(
            id,
            ClientInfo {
                sender,
                rooms: HashSet::new(),
                connected_at,
            },
        );
        tracing::info!("Client {} connected and registered", id);
    }

    /// Remove a connection and all of its room memberships.
    pub async fn unregister(&self, id: &ConnectionId) {
        let mut clients = self.clients.lock().await;
        if clients.remove(id).is_some() {
            tracing::info!("Client {} disconnected and removed from registry", id);
        }
    }

    /// Add rooms to a connection's membership set. Idempotent; subscribing
    /// to a room the connection is already in changes nothing.
    pub async fn subscribe(&self, id: &ConnectionId, rooms: &[Room]) {
        let mut clients = self.clients.lock().await;
        let Some(client) = clients.get_mut(id) else {
            tracing::warn!("Subscribe from unknown connection {}", id);
            return;
        };
        for room in rooms {
            if client.rooms.insert(*room) {
                tracing::info!("Client {} subscribed to: {}", id, room);
            }
        }
    }

    /// Remove rooms from a connection's membership set. Idempotent;
    /// unsubscribing from a room the connection is not in is a no-op.
    pub async fn unsubscribe(&self, id: &ConnectionId, rooms: &[Room]) {
        let mut clients = self.clients.lock().await;
        let Some(client) = clients.get_mut(id) else {
            tracing::warn!("Unsubscribe from unknown connection {}", id);
            return;
        };
        for room in rooms {
            if client.rooms.remove(room) {
                tracing::info!("Client {} unsubscribed from: {}", id, room);
            }
        }
    }

    /// Deliver an event to every current member of a room.
    ///
    /// Serializes once and pushes the same frame to each member's channel.
    /// A room with no members is a successful no-op. Members whose channel
    /// is gone are skipped; the disconnect path cleans them up.
    ///
    /// Returns the number of members the event was delivered to.
    pub async fn publish(&self, room: Room, event: &ServerEvent) -> usize {
        let json = match serde_json::to_string(event) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!("Failed to serialize event for room '{}': {}", room, e);
                return 0;
            }
        };

        let clients = self.clients.lock().await;
        let mut delivered = 0;
        for (id, client) in clients.iter() {
            if !client.rooms.contains(&room) {
                continue;
            }
            if client.sender.send(json.clone()).is_err() {
                tracing::warn!("Failed to push event to client {}, channel closed", id);
            } else {
                delivered += 1;
            }
        }

        tracing::debug!("Published event to {} subscriber(s) of '{}'", delivered, room);
        delivered
    }

    /// Push a frame to a single connection (used for ping replies).
    pub async fn push_to(&self, id: &ConnectionId, event: &ServerEvent) -> bool {
        let json = match serde_json::to_string(event) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!("Failed to serialize event for client {}: {}", id, e);
                return false;
            }
        };

        let clients = self.clients.lock().await;
        match clients.get(id) {
            Some(client) => client.sender.send(json).is_ok(),
            None => false,
        }
    }

    /// Rooms the given connection is currently a member of.
    pub async fn rooms_of(&self, id: &ConnectionId) -> Option<HashSet<Room>> {
        let clients = self.clients.lock().await;
        clients.get(id).map(|client| client.rooms.clone())
    }

    /// Current connection count, per-room membership counts, and a
    /// per-connection listing (id, connected-at, rooms) for `/api/connections`.
    pub async fn connection_stats(&self) -> ConnectionStats {
        let clients = self.clients.lock().await;
        let count_members = |room: Room| {
            clients
                .values()
                .filter(|client| client.rooms.contains(&room))
                .count()
        };
        let mut connections: Vec<ConnectionDetail> = clients
            .iter()
            .map(|(id, client)| {
                let mut rooms: Vec<Room> = client.rooms.iter().copied().collect();
                rooms.sort_by_key(|room| room.as_str());
                ConnectionDetail {
                    id: *id,
                    connected_at: client.connected_at,
                    rooms,
                }
            })
            .collect();
        connections.sort_by_key(|detail| (detail.connected_at, detail.id));
        ConnectionStats {
            connected: clients.len(),
            rooms: RoomCounts {
                stats: count_members(Room::Stats),
                recommendations: count_members(Room::Recommendations),
                facilities: count_members(Room::Facilities),
            },
            connections,
        }
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}
