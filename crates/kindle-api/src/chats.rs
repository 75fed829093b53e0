use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use uuid::Uuid;

use kindle_engine::ReceiptOutcome;
use kindle_types::api::{
    ChatSummary, Claims, OpenDirectChatRequest, QuotaResponse, ReceiptResponse,
    SendMessageRequest, SendMessageResponse,
};
use kindle_types::models::{Chat, Message};

use crate::error::ApiError;
use crate::{AppState, blocking};

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Backfill: messages with a sequence above this, oldest first.
    pub after: Option<i64>,
    /// History paging: the page ending just before this sequence.
    pub before: Option<i64>,
}

fn default_limit() -> u32 {
    50
}

fn receipt(outcome: ReceiptOutcome) -> ReceiptResponse {
    ReceiptResponse {
        updated: outcome.updated,
        up_to_sequence: outcome.up_to_sequence,
    }
}

pub async fn list_chats(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<ChatSummary>>, ApiError> {
    let user_id = claims.sub;
    let chats = blocking(&state, move |engine| engine.chat.list_chats(user_id)).await?;
    Ok(Json(chats))
}

pub async fn open_direct_chat(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<OpenDirectChatRequest>,
) -> Result<(StatusCode, Json<Chat>), ApiError> {
    let user_id = claims.sub;
    let (chat, created) = blocking(&state, move |engine| {
        engine.chat.open_direct_chat(user_id, req.recipient_id)
    })
    .await?;

    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(chat)))
}

pub async fn get_messages(
    State(state): State<AppState>,
    Path(chat_id): Path<Uuid>,
    Query(query): Query<MessageQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let user_id = claims.sub;
    let messages = blocking(&state, move |engine| match query.after {
        Some(after) => engine.chat.messages_after(chat_id, user_id, after, query.limit),
        None => engine
            .chat
            .recent_messages(chat_id, user_id, query.before, query.limit),
    })
    .await?;
    Ok(Json(messages))
}

pub async fn send_message(
    State(state): State<AppState>,
    Path(chat_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<SendMessageResponse>), ApiError> {
    let sender_id = claims.sub;
    let sent = blocking(&state, move |engine| {
        engine.chat.send_message(chat_id, sender_id, &req.text)
    })
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(SendMessageResponse {
            message: sent.message,
            quota: sent.quota,
        }),
    ))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Path(chat_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<ReceiptResponse>, ApiError> {
    let user_id = claims.sub;
    let outcome = blocking(&state, move |engine| engine.chat.mark_read(chat_id, user_id)).await?;
    Ok(Json(receipt(outcome)))
}

pub async fn mark_delivered(
    State(state): State<AppState>,
    Path(chat_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<ReceiptResponse>, ApiError> {
    let user_id = claims.sub;
    let outcome = blocking(&state, move |engine| engine.chat.mark_delivered(chat_id, user_id)).await?;
    Ok(Json(receipt(outcome)))
}

pub async fn get_quota(
    State(state): State<AppState>,
    Path(chat_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<QuotaResponse>, ApiError> {
    let user_id = claims.sub;
    let quota = blocking(&state, move |engine| engine.chat.quota(chat_id, user_id)).await?;
    Ok(Json(QuotaResponse { chat_id, quota }))
}
