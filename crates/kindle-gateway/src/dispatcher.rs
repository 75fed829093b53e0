use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error};
use uuid::Uuid;

use kindle_engine::EventSink;
use kindle_types::events::GatewayEvent;

/// An event serialized once for every receiver.
#[derive(Debug, Clone)]
pub struct BroadcastMessage {
    /// Chat the event belongs to; `None` for events every connection may see.
    pub chat_id: Option<Uuid>,
    /// User the event is about, for presence filtering.
    pub subject: Option<Uuid>,
    /// Log position of a `MessageCreate`, used to drop replayed duplicates.
    pub sequence: Option<i64>,
    pub json: Arc<str>,
}

/// Manages all connected clients and fans out events.
///
/// Every method is synchronous so the engine can publish from a blocking
/// thread while it still holds a chat's ordering lock.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Chat-scoped and presence events; each connection filters by its subscriptions
    broadcast_tx: broadcast::Sender<BroadcastMessage>,

    /// Online users
    online_users: RwLock<HashSet<Uuid>>,

    /// Per-user targeted send channels: user_id -> (conn_id, sender)
    user_channels: RwLock<HashMap<Uuid, (Uuid, mpsc::UnboundedSender<GatewayEvent>)>>,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner {
                broadcast_tx,
                online_users: RwLock::new(HashSet::new()),
                user_channels: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe to fanned-out events. Returns a broadcast receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastMessage> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Serialize once and hand the event to every connection.
    pub fn broadcast(&self, event: GatewayEvent) {
        let (subject, sequence) = match &event {
            GatewayEvent::PresenceUpdate { user_id, .. } => (Some(*user_id), None),
            GatewayEvent::MessageCreate { message } => (None, Some(message.server_sequence)),
            _ => (None, None),
        };
        let json = match serde_json::to_string(&event) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize gateway event: {}", e);
                return;
            }
        };
        // No receivers is fine: nobody is connected.
        let _ = self.inner.broadcast_tx.send(BroadcastMessage {
            chat_id: event.chat_id(),
            subject,
            sequence,
            json: json.into(),
        });
    }

    /// Register a per-user targeted channel. Returns (conn_id, receiver).
    /// A newer connection for the same user replaces the older one.
    pub fn register_user_channel(&self, user_id: Uuid) -> (Uuid, mpsc::UnboundedReceiver<GatewayEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        write(&self.inner.user_channels).insert(user_id, (conn_id, tx));
        (conn_id, rx)
    }

    /// Unregister a per-user targeted channel, but only if conn_id matches.
    pub fn unregister_user_channel(&self, user_id: Uuid, conn_id: Uuid) {
        let mut channels = write(&self.inner.user_channels);
        if channels.get(&user_id).is_some_and(|(stored, _)| *stored == conn_id) {
            channels.remove(&user_id);
        }
    }

    /// Send a targeted event to a specific user. Dropped if they are offline.
    pub fn send_to_user(&self, user_id: Uuid, event: GatewayEvent) {
        let channels = read(&self.inner.user_channels);
        match channels.get(&user_id) {
            Some((_, tx)) => {
                let _ = tx.send(event);
            }
            None => debug!(user_id = %user_id, "No connection for targeted event"),
        }
    }

    /// Register a user as online.
    pub fn user_online(&self, user_id: Uuid) {
        write(&self.inner.online_users).insert(user_id);
        self.broadcast(GatewayEvent::PresenceUpdate {
            user_id,
            online: true,
        });
    }

    /// Register a user as offline. Only cleans up if conn_id matches.
    /// Returns whether the user actually went offline.
    pub fn user_offline(&self, user_id: Uuid, conn_id: Uuid) -> bool {
        let is_current = read(&self.inner.user_channels)
            .get(&user_id)
            .is_some_and(|(cid, _)| *cid == conn_id);
        if !is_current {
            // A newer connection has taken over
            return false;
        }

        write(&self.inner.online_users).remove(&user_id);
        self.unregister_user_channel(user_id, conn_id);
        self.broadcast(GatewayEvent::PresenceUpdate {
            user_id,
            online: false,
        });
        true
    }

    pub fn is_online(&self, user_id: Uuid) -> bool {
        read(&self.inner.online_users).contains(&user_id)
    }

    /// Get list of online users.
    pub fn online_users(&self) -> Vec<Uuid> {
        read(&self.inner.online_users).iter().copied().collect()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for Dispatcher {
    fn publish(&self, event: GatewayEvent) {
        self.broadcast(event);
    }

    fn send_to_user(&self, user_id: Uuid, event: GatewayEvent) {
        Dispatcher::send_to_user(self, user_id, event);
    }
}
