use std::sync::Mutex;

use serde_json::json;
use uuid::Uuid;

use kindle_types::events::{GatewayEvent, NotificationKind};

/// Where committed changes are pushed. The gateway dispatcher is the
/// production implementation. Delivery is best-effort; the committed log
/// stays the source of truth.
pub trait EventSink: Send + Sync {
    /// Fan out to everyone subscribed to the event's chat.
    fn publish(&self, event: GatewayEvent);

    /// Deliver to a single user's connection, if any.
    fn send_to_user(&self, user_id: Uuid, event: GatewayEvent);
}

pub(crate) fn notify(sink: &dyn EventSink, user_id: Uuid, kind: NotificationKind, payload: serde_json::Value) {
    sink.send_to_user(user_id, GatewayEvent::Notification { kind, payload });
}

pub(crate) fn match_payload(match_id: Uuid, chat_id: Uuid, other_user_id: Uuid) -> serde_json::Value {
    json!({
        "match_id": match_id,
        "chat_id": chat_id,
        "other_user_id": other_user_id,
    })
}

/// Sink that drops everything.
pub struct NullSink;

impl EventSink for NullSink {
    fn publish(&self, _event: GatewayEvent) {}
    fn send_to_user(&self, _user_id: Uuid, _event: GatewayEvent) {}
}

/// Sink that keeps every event in memory, in arrival order.
#[derive(Default)]
pub struct MemorySink {
    events: Mutex<Vec<(Option<Uuid>, GatewayEvent)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Chat-scoped events, in publish order.
    pub fn published(&self) -> Vec<GatewayEvent> {
        self.snapshot()
            .into_iter()
            .filter_map(|(target, event)| target.is_none().then_some(event))
            .collect()
    }

    /// Events sent to `user_id` directly.
    pub fn sent_to(&self, user_id: Uuid) -> Vec<GatewayEvent> {
        self.snapshot()
            .into_iter()
            .filter_map(|(target, event)| (target == Some(user_id)).then_some(event))
            .collect()
    }

    fn snapshot(&self) -> Vec<(Option<Uuid>, GatewayEvent)> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn push(&self, target: Option<Uuid>, event: GatewayEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push((target, event)),
            Err(poisoned) => poisoned.into_inner().push((target, event)),
        }
    }
}

impl EventSink for MemorySink {
    fn publish(&self, event: GatewayEvent) {
        self.push(None, event);
    }

    fn send_to_user(&self, user_id: Uuid, event: GatewayEvent) {
        self.push(Some(user_id), event);
    }
}
