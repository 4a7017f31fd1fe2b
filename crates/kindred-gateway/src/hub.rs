use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use kindred_db::Database;
use kindred_types::events::{PresencePayload, ServerEvent};
use kindred_types::models::PresenceStatus;

/// How long a single delivery may wait on a full outbound queue before the
/// peer is treated as unresponsive.
pub const DELIVERY_TIMEOUT: Duration = Duration::from_secs(1);

/// Bound on the detached presence work that follows register/unregister.
pub const PRESENCE_TIMEOUT: Duration = Duration::from_secs(5);

pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// The hub's view of one live socket: who owns it and how to reach it.
///
/// Cloning is cheap; every clone refers to the same queue and close signal.
#[derive(Clone)]
pub struct Connection {
    id: Uuid,
    user_id: i64,
    tx: mpsc::Sender<ServerEvent>,
    closed: CancellationToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueError {
    Timeout,
    Closed,
}

impl Connection {
    pub fn new(user_id: i64) -> (Self, mpsc::Receiver<ServerEvent>) {
        Self::with_capacity(user_id, OUTBOUND_QUEUE_CAPACITY)
    }

    pub fn with_capacity(user_id: i64, capacity: usize) -> (Self, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        let conn = Self {
            id: Uuid::new_v4(),
            user_id,
            tx,
            closed: CancellationToken::new(),
        };
        (conn, rx)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn user_id(&self) -> i64 {
        self.user_id
    }

    /// Signal the owning session to stop. Idempotent.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled() || self.tx.is_closed()
    }

    /// Token the session's write loop waits on.
    pub fn close_signal(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Queue an event, waiting at most `wait` for room.
    pub async fn enqueue(&self, event: ServerEvent, wait: Duration) -> Result<(), EnqueueError> {
        if self.closed.is_cancelled() {
            return Err(EnqueueError::Closed);
        }
        self.tx.send_timeout(event, wait).await.map_err(|e| match e {
            SendTimeoutError::Timeout(_) => EnqueueError::Timeout,
            SendTimeoutError::Closed(_) => EnqueueError::Closed,
        })
    }
}

/// Registry of connected users. Owns presence transitions and best-effort
/// delivery; it never runs business logic.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

struct HubInner {
    db: Arc<Database>,

    /// user_id -> current connection. The lock only ever covers map access.
    connections: RwLock<HashMap<i64, Connection>>,
}

impl Hub {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            inner: Arc::new(HubInner {
                db,
                connections: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.inner.db
    }

    fn read_map(&self) -> RwLockReadGuard<'_, HashMap<i64, Connection>> {
        self.inner.connections.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_map(&self) -> RwLockWriteGuard<'_, HashMap<i64, Connection>> {
        self.inner.connections.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Make `conn` the user's current connection, evicting any previous one,
    /// then announce the user online in the background.
    pub fn register(&self, conn: Connection) {
        let user_id = conn.user_id;
        let conn_id = conn.id;

        let previous = self.write_map().insert(user_id, conn);
        if let Some(old) = previous {
            info!("user {} connected again, evicting connection {}", user_id, old.id);
            old.close();
        }
        debug!("registered connection {} for user {}", conn_id, user_id);

        let hub = self.clone();
        tokio::spawn(async move {
            if tokio::time::timeout(PRESENCE_TIMEOUT, hub.announce_online(user_id, conn_id))
                .await
                .is_err()
            {
                warn!("online presence for user {} timed out", user_id);
            }
        });
    }

    /// Drop `conn` if it is still the user's current connection.
    ///
    /// Returns `false` for a stale handle (a newer connection already took
    /// over); nothing else happens in that case.
    pub fn unregister(&self, conn: &Connection) -> bool {
        let user_id = conn.user_id;

        let removed = {
            let mut map = self.write_map();
            match map.get(&user_id) {
                Some(current) if current.id == conn.id => map.remove(&user_id),
                _ => None,
            }
        };

        let Some(removed) = removed else {
            debug!("stale unregister for user {} (connection {})", user_id, conn.id);
            return false;
        };
        removed.close();
        info!("unregistered connection {} for user {}", removed.id, user_id);

        let hub = self.clone();
        tokio::spawn(async move {
            if tokio::time::timeout(PRESENCE_TIMEOUT, hub.announce_offline(user_id))
                .await
                .is_err()
            {
                warn!("offline presence for user {} timed out", user_id);
            }
        });
        true
    }

    /// Deliver `event` to the user's current connection.
    ///
    /// Waits at most `DELIVERY_TIMEOUT`. A peer whose queue stays full is
    /// evicted as unresponsive. Returns whether the event was queued.
    pub async fn send_to_user(&self, user_id: i64, event: ServerEvent) -> bool {
        let conn = self.read_map().get(&user_id).cloned();
        let Some(conn) = conn else {
            return false;
        };

        let kind = event.kind();
        match conn.enqueue(event, DELIVERY_TIMEOUT).await {
            Ok(()) => true,
            Err(EnqueueError::Timeout) => {
                warn!(
                    "user {} did not drain its queue within {:?} ({} dropped), evicting",
                    user_id, DELIVERY_TIMEOUT, kind
                );
                self.unregister(&conn);
                false
            }
            Err(EnqueueError::Closed) => false,
        }
    }

    /// Send `event` to every connected mutual-like peer of `user_id`.
    /// Returns how many peers received it.
    pub async fn broadcast_to_matches(&self, user_id: i64, event: ServerEvent) -> anyhow::Result<usize> {
        let peers = self.db().call(move |db| db.matched_peer_ids(user_id)).await?;

        let mut delivered = 0;
        for peer in peers {
            if self.send_to_user(peer, event.clone()).await {
                delivered += 1;
            }
        }
        Ok(delivered)
    }

    pub fn is_online(&self, user_id: i64) -> bool {
        self.read_map().contains_key(&user_id)
    }

    pub fn online_count(&self) -> usize {
        self.read_map().len()
    }

    /// Close every connection. Used on process shutdown.
    pub fn shutdown(&self) {
        let drained: Vec<Connection> = self.write_map().drain().map(|(_, c)| c).collect();
        info!("closing {} gateway connections", drained.len());
        for conn in drained {
            conn.close();
        }
    }

    fn is_current(&self, user_id: i64, conn_id: Uuid) -> bool {
        self.read_map().get(&user_id).is_some_and(|c| c.id == conn_id)
    }

    /// Write the stored online flag from the live map. The map is read under
    /// the store lock, so presence tasks finishing out of order cannot leave
    /// a stale value behind. Returns the flag written.
    async fn sync_online_flag(&self, user_id: i64) -> anyhow::Result<bool> {
        let hub = self.clone();
        self.db()
            .call(move |db| db.sync_online(user_id, || hub.is_online(user_id)))
            .await
    }

    /// Tell connected matches that `user_id` came online, and tell the
    /// newcomer where each of its matches stands.
    async fn announce_online(&self, user_id: i64, conn_id: Uuid) {
        if !self.is_current(user_id, conn_id) {
            debug!("connection {} of user {} already gone, skipping online presence", conn_id, user_id);
            return;
        }

        match self.sync_online_flag(user_id).await {
            Ok(true) => {}
            Ok(false) => return,
            Err(e) => warn!("failed to mark user {} online: {:#}", user_id, e),
        }

        let peers = match self.db().call(move |db| db.matched_peer_ids(user_id)).await {
            Ok(peers) => peers,
            Err(e) => {
                warn!("failed to load matches of user {}: {:#}", user_id, e);
                return;
            }
        };

        let online = ServerEvent::Presence(PresencePayload {
            user_id,
            status: PresenceStatus::Online,
            last_seen: None,
        });

        for peer in peers {
            if !self.is_current(user_id, conn_id) {
                return;
            }

            if self.is_online(peer) {
                self.send_to_user(peer, online.clone()).await;
                self.send_to_user(
                    user_id,
                    ServerEvent::Presence(PresencePayload {
                        user_id: peer,
                        status: PresenceStatus::Online,
                        last_seen: None,
                    }),
                )
                .await;
                continue;
            }

            let last_seen = match self.db().call(move |db| db.display_info(peer)).await {
                Ok(info) => info.and_then(|i| i.last_seen),
                Err(e) => {
                    warn!("failed to load last seen of user {}: {:#}", peer, e);
                    None
                }
            };
            self.send_to_user(
                user_id,
                ServerEvent::Presence(PresencePayload {
                    user_id: peer,
                    status: PresenceStatus::Offline,
                    last_seen,
                }),
            )
            .await;
        }
    }

    async fn announce_offline(&self, user_id: i64) {
        let online = match self.sync_online_flag(user_id).await {
            Ok(online) => online,
            Err(e) => {
                warn!("failed to mark user {} offline: {:#}", user_id, e);
                self.is_online(user_id)
            }
        };
        // A reconnect landed while this task was queued.
        if online {
            return;
        }

        let offline = ServerEvent::Presence(PresencePayload {
            user_id,
            status: PresenceStatus::Offline,
            last_seen: Some(Utc::now()),
        });
        if let Err(e) = self.broadcast_to_matches(user_id, offline).await {
            warn!("failed to broadcast offline presence of user {}: {:#}", user_id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kindred_db::NewLike;
    use kindred_db::models::NewUser;
    use kindred_types::models::{ContentType, InteractionKind};

    fn db_with_users(ids: &[i64]) -> Arc<Database> {
        let db = Database::open_in_memory().unwrap();
        for &id in ids {
            db.create_user(&NewUser {
                id,
                name: format!("user{}", id),
                ..Default::default()
            })
            .unwrap();
        }
        Arc::new(db)
    }

    fn like(db: &Database, liker: i64, liked: i64) {
        db.insert_like(&NewLike {
            liker_user_id: liker,
            liked_user_id: liked,
            content_type: ContentType::Media,
            content_identifier: "0",
            kind: InteractionKind::Standard,
            comment: None,
            created_at: Utc::now(),
        })
        .unwrap();
    }

    async fn next_event(rx: &mut mpsc::Receiver<ServerEvent>) -> Option<ServerEvent> {
        tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.ok().flatten()
    }

    #[tokio::test]
    async fn second_registration_evicts_the_first() {
        let hub = Hub::new(db_with_users(&[1]));
        let (first, _rx1) = Connection::new(1);
        let (second, mut rx2) = Connection::new(1);

        hub.register(first.clone());
        hub.register(second.clone());

        assert!(first.is_closed());
        assert!(!second.is_closed());
        assert_eq!(hub.online_count(), 1);

        assert!(hub.send_to_user(1, ServerEvent::error("x")).await);
        assert_eq!(next_event(&mut rx2).await, Some(ServerEvent::error("x")));
    }

    #[tokio::test]
    async fn stale_unregister_keeps_the_newer_connection() {
        let hub = Hub::new(db_with_users(&[1]));
        let (first, _rx1) = Connection::new(1);
        let (second, _rx2) = Connection::new(1);

        hub.register(first.clone());
        hub.register(second.clone());

        assert!(!hub.unregister(&first));
        assert!(hub.is_online(1));

        assert!(hub.unregister(&second));
        assert!(!hub.is_online(1));
        assert!(second.is_closed());
    }

    #[tokio::test]
    async fn send_to_absent_user_is_not_delivered() {
        let hub = Hub::new(db_with_users(&[1]));
        assert!(!hub.send_to_user(1, ServerEvent::error("x")).await);
    }

    #[tokio::test]
    async fn full_queue_evicts_the_peer() {
        let hub = Hub::new(db_with_users(&[1]));
        let (conn, _rx) = Connection::with_capacity(1, 1);
        hub.register(conn.clone());

        assert!(hub.send_to_user(1, ServerEvent::error("fills the queue")).await);
        assert!(!hub.send_to_user(1, ServerEvent::error("times out")).await);

        assert!(!hub.is_online(1));
        assert!(conn.is_closed());
    }

    /// Read until an event matches, skipping duplicates from racing presence tasks.
    async fn wait_for(
        rx: &mut mpsc::Receiver<ServerEvent>,
        pred: impl Fn(&ServerEvent) -> bool,
    ) -> Option<ServerEvent> {
        while let Some(event) = next_event(rx).await {
            if pred(&event) {
                return Some(event);
            }
        }
        None
    }

    fn is_presence(event: &ServerEvent, user: i64, status: PresenceStatus) -> bool {
        matches!(event, ServerEvent::Presence(p) if p.user_id == user && p.status == status)
    }

    #[tokio::test]
    async fn presence_reaches_connected_matches_only() {
        let db = db_with_users(&[1, 2, 3]);
        like(&db, 1, 2);
        like(&db, 2, 1);
        let hub = Hub::new(db.clone());

        let (a, mut rx_a) = Connection::new(1);
        let (c, mut rx_c) = Connection::new(3);
        hub.register(a);
        hub.register(c);
        assert!(wait_for(&mut rx_a, |e| is_presence(e, 2, PresenceStatus::Offline)).await.is_some());

        let (b, mut rx_b) = Connection::new(2);
        hub.register(b.clone());

        assert!(wait_for(&mut rx_a, |e| is_presence(e, 2, PresenceStatus::Online)).await.is_some());

        // The newcomer learns that its match is already online.
        assert!(wait_for(&mut rx_b, |e| is_presence(e, 1, PresenceStatus::Online)).await.is_some());

        hub.unregister(&b);
        let offline = wait_for(&mut rx_a, |e| is_presence(e, 2, PresenceStatus::Offline)).await;
        assert!(matches!(
            offline,
            Some(ServerEvent::Presence(PresencePayload { last_seen: Some(_), .. }))
        ));

        assert!(rx_c.try_recv().is_err());
        assert!(!db.display_info(2).unwrap().unwrap().is_online);
    }

    #[tokio::test]
    async fn newcomer_learns_offline_matches_with_last_seen() {
        let db = db_with_users(&[1, 2]);
        like(&db, 1, 2);
        like(&db, 2, 1);
        db.sync_online(2, || false).unwrap();
        let hub = Hub::new(db);

        let (a, mut rx_a) = Connection::new(1);
        hub.register(a);

        let event = wait_for(&mut rx_a, |e| is_presence(e, 2, PresenceStatus::Offline)).await;
        assert!(matches!(
            event,
            Some(ServerEvent::Presence(PresencePayload { last_seen: Some(_), .. }))
        ));
    }

    /// Poll the stored flag until it settles on `expected` or time runs out.
    async fn stored_online_settles(db: &Database, user_id: i64, expected: bool) -> bool {
        for _ in 0..60 {
            if db.display_info(user_id).unwrap().unwrap().is_online == expected {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        false
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn quick_disconnects_never_leave_users_online() {
        let ids: Vec<i64> = (1..=200).collect();
        let db = db_with_users(&ids);
        let hub = Hub::new(db.clone());

        for &id in &ids {
            let (conn, _rx) = Connection::new(id);
            hub.register(conn.clone());
            hub.unregister(&conn);
        }
        assert_eq!(hub.online_count(), 0);

        for &id in &ids {
            assert!(stored_online_settles(&db, id, false).await, "user {} stuck online", id);
        }
        // Nothing late flips a user back.
        tokio::time::sleep(Duration::from_millis(200)).await;
        for &id in &ids {
            assert!(!db.display_info(id).unwrap().unwrap().is_online);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn reconnect_after_quick_drop_stays_online() {
        let db = db_with_users(&[1]);
        let hub = Hub::new(db.clone());

        let (first, _rx1) = Connection::new(1);
        hub.register(first.clone());
        hub.unregister(&first);
        let (second, _rx2) = Connection::new(1);
        hub.register(second);

        assert!(stored_online_settles(&db, 1, true).await);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(db.display_info(1).unwrap().unwrap().is_online);
    }

    #[tokio::test]
    async fn shutdown_closes_everything() {
        let hub = Hub::new(db_with_users(&[1, 2]));
        let (a, _ra) = Connection::new(1);
        let (b, _rb) = Connection::new(2);
        hub.register(a.clone());
        hub.register(b.clone());

        hub.shutdown();
        assert_eq!(hub.online_count(), 0);
        assert!(a.is_closed() && b.is_closed());
    }
}
