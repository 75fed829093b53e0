use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, info};
use uuid::Uuid;

use kindle_types::events::{ConversionReason, GatewayEvent};

use crate::notify::EventSink;

/// Turns quota and moderation rejections into upgrade prompts, at most one
/// per (user, reason) per window. State lives in memory only.
pub struct ConversionCoordinator {
    window: Duration,
    last_emitted: Mutex<HashMap<(Uuid, ConversionReason), Instant>>,
    sink: Arc<dyn EventSink>,
}

impl ConversionCoordinator {
    pub fn new(window: Duration, sink: Arc<dyn EventSink>) -> Self {
        Self {
            window,
            last_emitted: Mutex::new(HashMap::new()),
            sink,
        }
    }

    /// Record a rejection. Returns `true` if a prompt was emitted.
    pub fn observe(&self, user_id: Uuid, reason: ConversionReason) -> bool {
        self.observe_at(user_id, reason, Instant::now())
    }

    pub fn observe_at(&self, user_id: Uuid, reason: ConversionReason, now: Instant) -> bool {
        let emit = {
            let mut last = match self.last_emitted.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            match last.get(&(user_id, reason)) {
                Some(at) if now.saturating_duration_since(*at) < self.window => false,
                _ => {
                    last.insert((user_id, reason), now);
                    true
                }
            }
        };

        if emit {
            info!(user_id = %user_id, ?reason, "Conversion prompt emitted");
            self.sink
                .send_to_user(user_id, GatewayEvent::ConversionPrompt { user_id, reason });
        } else {
            debug!(user_id = %user_id, ?reason, "Conversion prompt debounced");
        }
        emit
    }

    /// Forget a user's debounce state, e.g. when their session ends.
    pub fn reset(&self, user_id: Uuid) {
        let mut last = match self.last_emitted.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        last.retain(|(uid, _), _| *uid != user_id);
    }
}
