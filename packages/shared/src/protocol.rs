//! Wire protocol for the real-time broadcast bridge.
//!
//! All frames are JSON text messages discriminated by a `type` field.
//! Clients subscribe to rooms (one per data kind) and receive update
//! events whenever the poller detects that the backend data changed.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// A subscription room, one per data kind served by the analytics backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Room {
    Stats,
    Recommendations,
    Facilities,
}

impl Room {
    /// All known rooms. A connection's membership is always a subset of these.
    pub const ALL: [Room; 3] = [Room::Stats, Room::Recommendations, Room::Facilities];

    pub fn as_str(&self) -> &'static str {
        match self {
            Room::Stats => "stats",
            Room::Recommendations => "recommendations",
            Room::Facilities => "facilities",
        }
    }

    /// Extract the identity key of a collection item belonging to this room.
    ///
    /// Items are opaque JSON objects; the backend keys them by `id`, with
    /// per-kind fallbacks (`Title` for recommendations, `geoid` for
    /// facilities). Items with no derivable key cannot participate in delta
    /// computation.
    pub fn item_key(&self, item: &Value) -> Option<String> {
        let primary = item.get("id").and_then(Value::as_str);
        let fallback = match self {
            Room::Stats => None,
            Room::Recommendations => item.get("Title").and_then(Value::as_str),
            Room::Facilities => item.get("geoid").and_then(Value::as_str),
        };
        primary.or(fallback).map(str::to_string)
    }
}

impl fmt::Display for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Room {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stats" => Ok(Room::Stats),
            "recommendations" => Ok(Room::Recommendations),
            "facilities" => Ok(Room::Facilities),
            other => Err(format!("unknown room '{other}'")),
        }
    }
}

/// Connection status as observed by a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Reconnecting => "reconnecting",
            ConnectionStatus::Error => "error",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The changes between two observations of a collection-shaped snapshot.
///
/// In practice `updated` and `added` carry full items, so a client that
/// missed intermediate deltas still converges on the next publish that
/// touches the items it holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SnapshotDelta {
    pub updated: Vec<Value>,
    pub added: Vec<Value>,
    pub deleted: Vec<String>,
}

impl SnapshotDelta {
    pub fn is_empty(&self) -> bool {
        self.updated.is_empty() && self.added.is_empty() && self.deleted.is_empty()
    }
}

/// Events sent from a client to the broadcast server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "subscribe")]
    Subscribe { rooms: Vec<Room> },
    #[serde(rename = "unsubscribe")]
    Unsubscribe { rooms: Vec<Room> },
    #[serde(rename = "ping")]
    Ping { timestamp: i64 },
}

/// Events sent from the broadcast server to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "connection:status")]
    ConnectionStatus {
        status: ConnectionStatus,
        timestamp: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    #[serde(rename = "stats:update")]
    StatsUpdate { timestamp: i64, data: Value },
    #[serde(rename = "recommendations:update")]
    RecommendationsUpdate { timestamp: i64, delta: SnapshotDelta },
    #[serde(rename = "facilities:update")]
    FacilitiesUpdate { timestamp: i64, delta: SnapshotDelta },
    #[serde(rename = "pong")]
    Pong { timestamp: i64 },
}

impl ServerEvent {
    /// The room an update event belongs to, if it is an update event.
    pub fn room(&self) -> Option<Room> {
        match self {
            ServerEvent::StatsUpdate { .. } => Some(Room::Stats),
            ServerEvent::RecommendationsUpdate { .. } => Some(Room::Recommendations),
            ServerEvent::FacilitiesUpdate { .. } => Some(Room::Facilities),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_room_serializes_to_lowercase_name() {
        // テスト項目: Room が小文字のルーム名にシリアライズされる
        // given (前提条件):
        let room = Room::Recommendations;

        // when (操作):
        let json = serde_json::to_string(&room).unwrap();

        // then (期待する結果):
        assert_eq!(json, "\"recommendations\"");
    }

    #[test]
    fn test_room_from_str_rejects_unknown_name() {
        // テスト項目: 未知のルーム名のパースが失敗する
        // given (前提条件):
        let input = "weather";

        // when (操作):
        let result = input.parse::<Room>();

        // then (期待する結果):
        assert!(result.is_err());
    }

    #[test]
    fn test_item_key_prefers_id_field() {
        // テスト項目: id フィールドが存在する場合、fallback より優先される
        // given (前提条件):
        let item = json!({"id": "rec-1", "Title": "Expand mobile clinics"});

        // when (操作):
        let key = Room::Recommendations.item_key(&item);

        // then (期待する結果):
        assert_eq!(key.as_deref(), Some("rec-1"));
    }

    #[test]
    fn test_item_key_falls_back_to_geoid_for_facilities() {
        // テスト項目: id がない facility は geoid をキーとして使う
        // given (前提条件):
        let item = json!({"geoid": "06037101110", "latitude": 34.05});

        // when (操作):
        let key = Room::Facilities.item_key(&item);

        // then (期待する結果):
        assert_eq!(key.as_deref(), Some("06037101110"));
    }

    #[test]
    fn test_item_key_returns_none_without_identity() {
        // テスト項目: キーとなるフィールドを持たないアイテムは None になる
        // given (前提条件):
        let item = json!({"latitude": 34.05});

        // when (操作):
        let key = Room::Facilities.item_key(&item);

        // then (期待する結果):
        assert!(key.is_none());
    }

    #[test]
    fn test_client_event_subscribe_round_trips_with_type_tag() {
        // テスト項目: subscribe イベントが type タグ付き JSON に変換される
        // given (前提条件):
        let event = ClientEvent::Subscribe {
            rooms: vec![Room::Stats, Room::Facilities],
        };

        // when (操作):
        let json = serde_json::to_string(&event).unwrap();
        let parsed: ClientEvent = serde_json::from_str(&json).unwrap();

        // then (期待する結果):
        assert!(json.contains("\"type\":\"subscribe\""));
        assert!(json.contains("\"rooms\":[\"stats\",\"facilities\"]"));
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_server_event_update_uses_colon_separated_type() {
        // テスト項目: update イベントの type が "facilities:update" になる
        // given (前提条件):
        let event = ServerEvent::FacilitiesUpdate {
            timestamp: 1700000000000,
            delta: SnapshotDelta {
                added: vec![json!({"id": "f1"})],
                ..Default::default()
            },
        };

        // when (操作):
        let json = serde_json::to_string(&event).unwrap();

        // then (期待する結果):
        assert!(json.contains("\"type\":\"facilities:update\""));
        assert!(json.contains("\"delta\""));
    }

    #[test]
    fn test_connection_status_message_is_omitted_when_none() {
        // テスト項目: message が None の場合、JSON に含まれない
        // given (前提条件):
        let event = ServerEvent::ConnectionStatus {
            status: ConnectionStatus::Connected,
            timestamp: 1700000000000,
            message: None,
        };

        // when (操作):
        let json = serde_json::to_string(&event).unwrap();

        // then (期待する結果):
        assert!(!json.contains("message"));
        assert!(json.contains("\"status\":\"connected\""));
    }

    #[test]
    fn test_malformed_event_fails_to_parse() {
        // テスト項目: 不正な JSON フレームのパースが失敗する
        // given (前提条件):
        let text = "{\"type\":\"subscribe\",\"rooms\":[\"weather\"]}";

        // when (操作):
        let result = serde_json::from_str::<ClientEvent>(text);

        // then (期待する結果):
        assert!(result.is_err());
    }

    #[test]
    fn test_server_event_room_maps_updates_to_rooms() {
        // テスト項目: update イベントから所属ルームが取得できる
        // given (前提条件):
        let update = ServerEvent::StatsUpdate {
            timestamp: 0,
            data: json!({}),
        };
        let pong = ServerEvent::Pong { timestamp: 0 };

        // when (操作):
        let update_room = update.room();
        let pong_room = pong.room();

        // then (期待する結果):
        assert_eq!(update_room, Some(Room::Stats));
        assert_eq!(pong_room, None);
    }
}
