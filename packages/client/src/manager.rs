//! Client connection manager.
//!
//! Owns exactly one transport session at a time, drives its lifecycle
//! (connect, bounded reconnection with growing delay, disconnect), and
//! exposes status transitions to observers. Constructed explicitly with its
//! config and store; nothing here is process-global.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use kakehashi_shared::{
    protocol::{ClientEvent, ConnectionStatus, Room, ServerEvent},
    time::now_epoch_millis,
};

use crate::{config::ClientConfig, session, store::RealtimeStore};

type StatusCallback = Arc<dyn Fn(ConnectionStatus) + Send + Sync>;
type UpdateCallback = Arc<dyn Fn(&ServerEvent) + Send + Sync>;

/// State shared between the manager handle and its session task
pub(crate) struct ClientShared {
    status: Mutex<ConnectionStatus>,
    status_observers: Mutex<HashMap<u64, StatusCallback>>,
    update_observers: Mutex<HashMap<u64, UpdateCallback>>,
    next_observer_id: AtomicU64,
    /// Sender into the live session's write loop; `None` while not connected
    pub(crate) outbox: Mutex<Option<mpsc::UnboundedSender<ClientEvent>>>,
    /// Rooms the caller wants to be in; re-sent after every (re)connect
    desired_rooms: Mutex<HashSet<Room>>,
}

impl ClientShared {
    fn new() -> Self {
        Self {
            status: Mutex::new(ConnectionStatus::Disconnected),
            status_observers: Mutex::new(HashMap::new()),
            update_observers: Mutex::new(HashMap::new()),
            next_observer_id: AtomicU64::new(0),
            outbox: Mutex::new(None),
            desired_rooms: Mutex::new(HashSet::new()),
        }
    }

    pub(crate) fn status(&self) -> ConnectionStatus {
        *self.status.lock().expect("Status lock poisoned")
    }

    /// Record a status transition and notify observers. A repeated status
    /// still refreshes the attempt counter in the store but does not
    /// re-notify.
    pub(crate) fn set_status(
        &self,
        store: &RealtimeStore,
        status: ConnectionStatus,
        reconnect_attempts: u32,
    ) {
        {
            let mut current = self.status.lock().expect("Status lock poisoned");
            if *current == status {
                store.set_status(status, reconnect_attempts);
                return;
            }
            *current = status;
        }
        store.set_status(status, reconnect_attempts);

        let callbacks: Vec<StatusCallback> = self
            .status_observers
            .lock()
            .expect("Observer lock poisoned")
            .values()
            .cloned()
            .collect();
        for callback in callbacks {
            callback(status);
        }
    }

    pub(crate) fn notify_update(&self, event: &ServerEvent) {
        let callbacks: Vec<UpdateCallback> = self
            .update_observers
            .lock()
            .expect("Observer lock poisoned")
            .values()
            .cloned()
            .collect();
        for callback in callbacks {
            callback(event);
        }
    }

    pub(crate) fn desired_rooms(&self) -> Vec<Room> {
        let rooms = self.desired_rooms.lock().expect("Rooms lock poisoned");
        let mut rooms: Vec<Room> = rooms.iter().copied().collect();
        rooms.sort_by_key(|room| room.as_str());
        rooms
    }
}

/// Which observer list a guard points into
enum ObserverKind {
    Status,
    Update,
}

/// Cancellation token returned by observer registration.
///
/// Dropping the guard without calling [`ObserverGuard::cancel`] leaves the
/// observer registered for the lifetime of the client.
pub struct ObserverGuard {
    shared: Weak<ClientShared>,
    id: u64,
    kind: ObserverKind,
}

impl ObserverGuard {
    /// Unregister the observer
    pub fn cancel(self) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        match self.kind {
            ObserverKind::Status => {
                shared
                    .status_observers
                    .lock()
                    .expect("Observer lock poisoned")
                    .remove(&self.id);
            }
            ObserverKind::Update => {
                shared
                    .update_observers
                    .lock()
                    .expect("Observer lock poisoned")
                    .remove(&self.id);
            }
        }
    }
}

struct SessionHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Reconnecting WebSocket client for the broadcast bridge
pub struct RealtimeClient {
    config: ClientConfig,
    store: Arc<RealtimeStore>,
    shared: Arc<ClientShared>,
    session: Mutex<Option<SessionHandle>>,
}

impl RealtimeClient {
    pub fn new(config: ClientConfig, store: Arc<RealtimeStore>) -> Self {
        Self {
            config,
            store,
            shared: Arc::new(ClientShared::new()),
            session: Mutex::new(None),
        }
    }

    /// Start the connection session.
    ///
    /// Idempotent: calling this while a session is live is a no-op, so two
    /// `connect()` calls never produce two sockets. After the session ended
    /// (explicit disconnect or exhausted reconnection attempts) a new call
    /// starts fresh.
    pub fn connect(&self) {
        let mut session = self.session.lock().expect("Session lock poisoned");
        if let Some(handle) = session.as_ref() {
            if !handle.task.is_finished() {
                tracing::info!("Already connected, reusing existing session");
                return;
            }
            // Previous session ran to completion; replace it
        }

        tracing::info!("Connecting to {}", self.config.url);
        self.shared
            .set_status(&self.store, ConnectionStatus::Connecting, 0);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(session::run_session_loop(
            self.config.clone(),
            self.shared.clone(),
            self.store.clone(),
            shutdown_rx,
        ));
        *session = Some(SessionHandle {
            shutdown: shutdown_tx,
            task,
        });
    }

    /// Tear down the session and transition to `disconnected`.
    ///
    /// Clears the desired room set, so a later [`RealtimeClient::connect`]
    /// starts fresh.
    pub async fn disconnect(&self) {
        let handle = self.session.lock().expect("Session lock poisoned").take();
        let Some(SessionHandle { shutdown, task }) = handle else {
            tracing::warn!("Cannot disconnect: no active session");
            return;
        };

        tracing::info!("Disconnecting from {}", self.config.url);
        let _ = shutdown.send(true);
        if let Err(e) = task.await {
            tracing::warn!("Session task ended abnormally: {}", e);
        }

        self.shared.outbox.lock().expect("Outbox lock poisoned").take();
        self.shared
            .desired_rooms
            .lock()
            .expect("Rooms lock poisoned")
            .clear();
        self.shared
            .set_status(&self.store, ConnectionStatus::Disconnected, 0);
    }

    /// Current connection status
    pub fn status(&self) -> ConnectionStatus {
        self.shared.status()
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    /// Subscribe to rooms. Remembered across reconnects; warns and does
    /// nothing else when not connected.
    pub fn subscribe(&self, rooms: &[Room]) {
        self.shared
            .desired_rooms
            .lock()
            .expect("Rooms lock poisoned")
            .extend(rooms.iter().copied());
        self.send_event(
            ClientEvent::Subscribe {
                rooms: rooms.to_vec(),
            },
            "subscribe",
        );
    }

    /// Unsubscribe from rooms. Warns and does nothing else when not
    /// connected.
    pub fn unsubscribe(&self, rooms: &[Room]) {
        {
            let mut desired = self.shared.desired_rooms.lock().expect("Rooms lock poisoned");
            for room in rooms {
                desired.remove(room);
            }
        }
        self.send_event(
            ClientEvent::Unsubscribe {
                rooms: rooms.to_vec(),
            },
            "unsubscribe",
        );
    }

    /// Send a liveness probe to the server
    pub fn ping(&self) {
        self.send_event(
            ClientEvent::Ping {
                timestamp: now_epoch_millis(),
            },
            "ping",
        );
    }

    /// Register a status observer.
    ///
    /// The callback is invoked immediately with the current status and then
    /// on every transition. The returned guard unregisters on
    /// [`ObserverGuard::cancel`].
    pub fn on_status_change(
        &self,
        callback: impl Fn(ConnectionStatus) + Send + Sync + 'static,
    ) -> ObserverGuard {
        let callback: StatusCallback = Arc::new(callback);
        let id = self.shared.next_observer_id.fetch_add(1, Ordering::SeqCst);
        self.shared
            .status_observers
            .lock()
            .expect("Observer lock poisoned")
            .insert(id, callback.clone());

        callback(self.status());

        ObserverGuard {
            shared: Arc::downgrade(&self.shared),
            id,
            kind: ObserverKind::Status,
        }
    }

    /// Register an observer invoked after every applied update event.
    pub fn on_update(
        &self,
        callback: impl Fn(&ServerEvent) + Send + Sync + 'static,
    ) -> ObserverGuard {
        let callback: UpdateCallback = Arc::new(callback);
        let id = self.shared.next_observer_id.fetch_add(1, Ordering::SeqCst);
        self.shared
            .update_observers
            .lock()
            .expect("Observer lock poisoned")
            .insert(id, callback);

        ObserverGuard {
            shared: Arc::downgrade(&self.shared),
            id,
            kind: ObserverKind::Update,
        }
    }

    fn send_event(&self, event: ClientEvent, action: &str) {
        let connected = self.is_connected();
        let outbox = self.shared.outbox.lock().expect("Outbox lock poisoned");
        match outbox.as_ref() {
            Some(tx) if connected => {
                if tx.send(event).is_err() {
                    tracing::warn!("Cannot {}: session is shutting down", action);
                }
            }
            _ => tracing::warn!("Cannot {}: not connected", action),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kakehashi_shared::time::FixedClock;
    use std::sync::atomic::AtomicUsize;

    fn test_client() -> RealtimeClient {
        let store = Arc::new(RealtimeStore::new(Arc::new(FixedClock::new(0))));
        RealtimeClient::new(ClientConfig::default(), store)
    }

    #[test]
    fn test_subscribe_while_disconnected_is_a_warned_noop() {
        // テスト項目: 未接続時の subscribe が panic せず no-op になる
        // given (前提条件):
        let client = test_client();

        // when (操作):
        client.subscribe(&[Room::Stats]);
        client.unsubscribe(&[Room::Stats]);
        client.ping();

        // then (期待する結果):
        assert_eq!(client.status(), ConnectionStatus::Disconnected);
    }

    #[test]
    fn test_status_observer_is_called_immediately_with_current_status() {
        // テスト項目: 登録直後に現在のステータスでコールバックが呼ばれる
        // given (前提条件):
        let client = test_client();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(None));

        // when (操作):
        let calls_in_cb = calls.clone();
        let seen_in_cb = seen.clone();
        let _guard = client.on_status_change(move |status| {
            calls_in_cb.fetch_add(1, Ordering::SeqCst);
            *seen_in_cb.lock().unwrap() = Some(status);
        });

        // then (期待する結果):
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            *seen.lock().unwrap(),
            Some(ConnectionStatus::Disconnected)
        );
    }

    #[test]
    fn test_cancelled_observer_is_not_notified() {
        // テスト項目: cancel 後のオブザーバーに通知されない
        // given (前提条件):
        let client = test_client();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in_cb = calls.clone();
        let guard = client.on_status_change(move |_| {
            calls_in_cb.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // when (操作):
        guard.cancel();
        client
            .shared
            .set_status(&client.store, ConnectionStatus::Connecting, 0);

        // then (期待する結果):
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_repeated_registration_does_not_leak_observers() {
        // テスト項目: 登録と解除を繰り返してもオブザーバーが蓄積しない
        // given (前提条件):
        let client = test_client();

        // when (操作):
        for _ in 0..100 {
            let guard = client.on_status_change(|_| {});
            guard.cancel();
        }

        // then (期待する結果):
        assert!(client.shared.status_observers.lock().unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_status_does_not_renotify() {
        // テスト項目: 同一ステータスへの遷移ではオブザーバーが再通知されない
        // given (前提条件):
        let client = test_client();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in_cb = calls.clone();
        let _guard = client.on_status_change(move |_| {
            calls_in_cb.fetch_add(1, Ordering::SeqCst);
        });

        // when (操作):
        client
            .shared
            .set_status(&client.store, ConnectionStatus::Disconnected, 0);

        // then (期待する結果):
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_desired_rooms_are_sorted_and_deduplicated() {
        // テスト項目: desired_rooms が重複なくソートされて返される
        // given (前提条件):
        let client = test_client();
        client.subscribe(&[Room::Stats, Room::Facilities, Room::Stats]);

        // when (操作):
        let rooms = client.shared.desired_rooms();

        // then (期待する結果):
        assert_eq!(rooms, vec![Room::Facilities, Room::Stats]);
    }
}
