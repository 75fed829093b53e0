use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{
    LastMessage, MatchRecord, Message, ModerationCategory, Profile, QuotaRemaining, SwipeKind,
};

// -- JWT Claims --

/// JWT claims shared across kindle-api (REST middleware) and kindle-gateway
/// (WebSocket authentication). Tokens are minted by the identity provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub exp: usize,
}

// -- Errors --

/// Stable failure tag returned by every public operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    BlockedContent,
    QuotaExceeded,
    LikeLimitReached,
    Retryable,
    NotFound,
    Forbidden,
    ChatInactive,
    Internal,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<ModerationCategory>,
}

// -- Discovery --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryCandidate {
    pub profile: Profile,
    pub age: u32,
    pub distance_km: f64,
    /// The candidate already liked the viewer.
    pub liked_me: bool,
    pub superliked_me: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryPage {
    pub candidates: Vec<DiscoveryCandidate>,
    /// Pass back to fetch the next page. `None` when exhausted.
    pub next_cursor: Option<String>,
}

// -- Swipes --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SwipeRequest {
    pub target_id: Uuid,
    pub kind: SwipeKind,
}

#[derive(Debug, Serialize)]
pub struct SwipeResponse {
    pub kind: SwipeKind,
    pub matched: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReceivedLike {
    pub from_user_id: Uuid,
    pub kind: SwipeKind,
    pub created_at: DateTime<Utc>,
}

/// Positive swipes a user has left today (UTC).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LikeAllowance {
    pub likes: QuotaRemaining,
    pub superlikes: QuotaRemaining,
}

#[derive(Debug, Clone, Serialize)]
pub struct MatchSummary {
    pub match_id: Uuid,
    pub other_user_id: Uuid,
    pub chat_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl MatchSummary {
    pub fn for_user(record: &MatchRecord, user_id: Uuid) -> Option<Self> {
        Some(Self {
            match_id: record.id,
            other_user_id: record.other_user(user_id)?,
            chat_id: record.chat_id,
            created_at: record.created_at,
        })
    }
}

// -- Chats --

#[derive(Debug, Clone, Serialize)]
pub struct ChatSummary {
    pub chat_id: Uuid,
    pub match_id: Option<Uuid>,
    pub other_user_id: Option<Uuid>,
    pub last_message: Option<LastMessage>,
    pub unread_count: u32,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OpenDirectChatRequest {
    pub recipient_id: Uuid,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct SendMessageResponse {
    pub message: Message,
    pub quota: QuotaRemaining,
}

#[derive(Debug, Serialize)]
pub struct ReceiptResponse {
    pub updated: usize,
    pub up_to_sequence: i64,
}

#[derive(Debug, Serialize)]
pub struct QuotaResponse {
    pub chat_id: Uuid,
    pub quota: QuotaRemaining,
}
