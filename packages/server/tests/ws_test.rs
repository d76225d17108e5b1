//! Integration tests for the broadcast server over a real WebSocket.
//!
//! Each test serves the router on an ephemeral port and talks to it with a
//! raw tokio-tungstenite client, so the wire format is exercised end to end.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::protocol::Message,
};

use kakehashi_server::{hub::Hub, runner::router, state::AppState};
use kakehashi_shared::{
    protocol::{ClientEvent, Room, ServerEvent, SnapshotDelta},
    time::now_epoch_millis,
};

type WsClient = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

const RECV_TIMEOUT: Duration = Duration::from_secs(2);

async fn start_test_server() -> (String, Arc<Hub>) {
    let hub = Arc::new(Hub::new());
    let state = Arc::new(AppState { hub: hub.clone() });
    let app = router(state);

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test listener");
    let addr = listener.local_addr().expect("Failed to get local addr");

    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("Test server failed");
    });

    (format!("ws://{}/ws", addr), hub)
}

async fn connect_client(url: &str) -> WsClient {
    let (ws, _response) = connect_async(url).await.expect("Failed to connect");
    ws
}

/// Read frames until the next parseable ServerEvent, with a timeout.
async fn recv_event(ws: &mut WsClient) -> ServerEvent {
    loop {
        let msg = tokio::time::timeout(RECV_TIMEOUT, ws.next())
            .await
            .expect("Timed out waiting for server event")
            .expect("Connection closed")
            .expect("WebSocket error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).expect("Unparseable server event");
        }
    }
}

async fn send_event(ws: &mut WsClient, event: &ClientEvent) {
    let json = serde_json::to_string(event).unwrap();
    ws.send(Message::Text(json.into()))
        .await
        .expect("Failed to send event");
}

/// Wait until the hub reports the expected member count for a room.
async fn wait_for_members(hub: &Hub, room: Room, expected: usize) {
    for _ in 0..50 {
        let stats = hub.connection_stats().await;
        let count = match room {
            Room::Stats => stats.rooms.stats,
            Room::Recommendations => stats.rooms.recommendations,
            Room::Facilities => stats.rooms.facilities,
        };
        if count == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("Room {} never reached {} member(s)", room, expected);
}

#[tokio::test]
async fn test_connection_status_is_sent_on_accept() {
    // テスト項目: 接続直後に connection:status (connected) が送られる
    // given (前提条件):
    let (url, _hub) = start_test_server().await;

    // when (操作):
    let mut ws = connect_client(&url).await;
    let event = recv_event(&mut ws).await;

    // then (期待する結果):
    match event {
        ServerEvent::ConnectionStatus {
            status, timestamp, ..
        } => {
            assert_eq!(status.as_str(), "connected");
            assert!(timestamp > 0);
        }
        other => panic!("Expected connection:status, got {:?}", other),
    }
}

#[tokio::test]
async fn test_subscribed_client_receives_published_update() {
    // テスト項目: subscribe したルームへの publish がクライアントに届く
    // given (前提条件):
    let (url, hub) = start_test_server().await;
    let mut ws = connect_client(&url).await;
    let _hello = recv_event(&mut ws).await;

    send_event(
        &mut ws,
        &ClientEvent::Subscribe {
            rooms: vec![Room::Stats],
        },
    )
    .await;
    wait_for_members(&hub, Room::Stats, 1).await;

    // when (操作):
    let update = ServerEvent::StatsUpdate {
        timestamp: now_epoch_millis(),
        data: serde_json::json!({"total_facilities": 1500}),
    };
    let delivered = hub.publish(Room::Stats, &update).await;

    // then (期待する結果):
    assert_eq!(delivered, 1);
    let event = recv_event(&mut ws).await;
    match event {
        ServerEvent::StatsUpdate { data, .. } => {
            assert_eq!(data["total_facilities"], 1500);
        }
        other => panic!("Expected stats:update, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unsubscribed_client_receives_nothing() {
    // テスト項目: unsubscribe 後の publish はクライアントに届かない
    // given (前提条件):
    let (url, hub) = start_test_server().await;
    let mut ws = connect_client(&url).await;
    let _hello = recv_event(&mut ws).await;

    send_event(
        &mut ws,
        &ClientEvent::Subscribe {
            rooms: vec![Room::Facilities],
        },
    )
    .await;
    wait_for_members(&hub, Room::Facilities, 1).await;
    send_event(
        &mut ws,
        &ClientEvent::Unsubscribe {
            rooms: vec![Room::Facilities],
        },
    )
    .await;
    wait_for_members(&hub, Room::Facilities, 0).await;

    // when (操作):
    let update = ServerEvent::FacilitiesUpdate {
        timestamp: now_epoch_millis(),
        delta: SnapshotDelta::default(),
    };
    let delivered = hub.publish(Room::Facilities, &update).await;

    // then (期待する結果):
    assert_eq!(delivered, 0);
    // ping/pong で接続が生きていることと、間に何も届かないことを確認する
    let sent_at = now_epoch_millis();
    send_event(&mut ws, &ClientEvent::Ping { timestamp: sent_at }).await;
    let event = recv_event(&mut ws).await;
    assert!(matches!(event, ServerEvent::Pong { .. }));
}

#[tokio::test]
async fn test_ping_yields_exactly_one_pong() {
    // テスト項目: ping に対して pong が 1 回だけ返り、タイムスタンプが単調である
    // given (前提条件):
    let (url, _hub) = start_test_server().await;
    let mut ws = connect_client(&url).await;
    let _hello = recv_event(&mut ws).await;

    // when (操作):
    let sent_at = now_epoch_millis();
    send_event(&mut ws, &ClientEvent::Ping { timestamp: sent_at }).await;

    // then (期待する結果):
    let event = recv_event(&mut ws).await;
    match event {
        ServerEvent::Pong { timestamp } => assert!(timestamp >= sent_at),
        other => panic!("Expected pong, got {:?}", other),
    }
    // 追加の pong が来ないことをタイムアウトで確認する
    let extra = tokio::time::timeout(Duration::from_millis(300), ws.next()).await;
    assert!(extra.is_err(), "Received an unexpected extra frame");
}

#[tokio::test]
async fn test_malformed_frame_is_ignored_and_connection_survives() {
    // テスト項目: 不正なフレームは無視され、接続は維持される
    // given (前提条件):
    let (url, _hub) = start_test_server().await;
    let mut ws = connect_client(&url).await;
    let _hello = recv_event(&mut ws).await;

    // when (操作):
    ws.send(Message::Text("this is not json".into()))
        .await
        .expect("Failed to send garbage");
    ws.send(Message::Text("{\"type\":\"subscribe\",\"rooms\":[\"weather\"]}".into()))
        .await
        .expect("Failed to send bad subscribe");

    // then (期待する結果):
    let sent_at = now_epoch_millis();
    send_event(&mut ws, &ClientEvent::Ping { timestamp: sent_at }).await;
    let event = recv_event(&mut ws).await;
    assert!(matches!(event, ServerEvent::Pong { .. }));
}

#[tokio::test]
async fn test_disconnect_cleans_up_registry() {
    // テスト項目: 切断された接続がレジストリから削除される
    // given (前提条件):
    let (url, hub) = start_test_server().await;
    let mut ws = connect_client(&url).await;
    let _hello = recv_event(&mut ws).await;
    send_event(
        &mut ws,
        &ClientEvent::Subscribe {
            rooms: vec![Room::Stats],
        },
    )
    .await;
    wait_for_members(&hub, Room::Stats, 1).await;

    // when (操作):
    ws.close(None).await.expect("Failed to close");

    // then (期待する結果):
    for _ in 0..50 {
        if hub.connection_stats().await.connected == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("Connection was not removed after close");
}

#[tokio::test]
async fn test_publish_order_is_preserved_per_subscriber() {
    // テスト項目: 同一ルームの publish 順序が購読者に保存される
    // given (前提条件):
    let (url, hub) = start_test_server().await;
    let mut ws = connect_client(&url).await;
    let _hello = recv_event(&mut ws).await;
    send_event(
        &mut ws,
        &ClientEvent::Subscribe {
            rooms: vec![Room::Stats],
        },
    )
    .await;
    wait_for_members(&hub, Room::Stats, 1).await;

    // when (操作):
    for seq in 0..5i64 {
        let update = ServerEvent::StatsUpdate {
            timestamp: seq,
            data: serde_json::json!({"seq": seq}),
        };
        hub.publish(Room::Stats, &update).await;
    }

    // then (期待する結果):
    for seq in 0..5i64 {
        let event = recv_event(&mut ws).await;
        match event {
            ServerEvent::StatsUpdate { data, .. } => assert_eq!(data["seq"], seq),
            other => panic!("Expected stats:update, got {:?}", other),
        }
    }
}
