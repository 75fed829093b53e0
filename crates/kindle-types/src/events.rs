use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{MatchRecord, Message};

/// Why the client should show an upgrade prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionReason {
    Messages,
    Moderation,
    Likes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    MatchCreated,
    MessageReceived,
    QuotaExceeded,
}

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms successful authentication
    Ready { user_id: Uuid },

    /// A message was committed to a chat log
    MessageCreate { message: Message },

    /// A participant read everything up to `up_to_sequence`
    MessagesRead {
        chat_id: Uuid,
        reader_id: Uuid,
        up_to_sequence: i64,
    },

    /// Messages addressed to `recipient_id` reached their device
    MessagesDelivered {
        chat_id: Uuid,
        recipient_id: Uuid,
        up_to_sequence: i64,
    },

    /// A mutual like produced a match (sent to each participant)
    MatchCreate { record: MatchRecord },

    /// A match was ended by one side
    MatchTerminated { match_id: Uuid, chat_id: Uuid },

    /// Push/badge payload for a single user
    Notification {
        kind: NotificationKind,
        payload: serde_json::Value,
    },

    /// Debounced upsell signal
    ConversionPrompt {
        user_id: Uuid,
        reason: ConversionReason,
    },

    /// A user came online or went offline
    PresenceUpdate { user_id: Uuid, online: bool },

    /// Replay of a resume request finished; live events follow
    ResumeComplete { chat_id: Uuid, last_sequence: i64 },
}

impl GatewayEvent {
    /// Returns the chat_id if this event is scoped to a specific chat.
    /// Events that return `None` are global or user-targeted.
    pub fn chat_id(&self) -> Option<Uuid> {
        match self {
            Self::MessageCreate { message } => Some(message.chat_id),
            Self::MessagesRead { chat_id, .. } => Some(*chat_id),
            Self::MessagesDelivered { chat_id, .. } => Some(*chat_id),
            Self::MatchTerminated { chat_id, .. } => Some(*chat_id),
            Self::ResumeComplete { chat_id, .. } => Some(*chat_id),
            _ => None,
        }
    }
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection
    Identify { token: String },

    /// Subscribe to live events for specific chats.
    /// Chats the user does not participate in are ignored.
    Subscribe { chat_ids: Vec<Uuid> },

    /// Replay committed messages after `after_sequence`, then continue live.
    Resume { chat_id: Uuid, after_sequence: i64 },
}
