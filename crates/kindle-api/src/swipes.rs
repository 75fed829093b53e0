use axum::{
    Extension, Json,
    extract::{Path, State},
};
use tracing::info;
use uuid::Uuid;

use kindle_types::api::{
    Claims, LikeAllowance, MatchSummary, ReceivedLike, SwipeRequest, SwipeResponse,
};
use kindle_types::models::MatchRecord;

use crate::error::ApiError;
use crate::{AppState, blocking};

pub async fn record_swipe(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SwipeRequest>,
) -> Result<Json<SwipeResponse>, ApiError> {
    let actor_id = claims.sub;
    let outcome = blocking(&state, move |engine| {
        engine.actions.record_swipe(actor_id, req.target_id, req.kind)
    })
    .await?;

    Ok(Json(SwipeResponse {
        kind: outcome.swipe.kind,
        matched: outcome.matched.is_some(),
        match_id: outcome.matched.as_ref().map(|m| m.id),
        chat_id: outcome.matched.as_ref().map(|m| m.chat_id),
    }))
}

pub async fn likes_received(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<ReceivedLike>>, ApiError> {
    let user_id = claims.sub;
    let likes = blocking(&state, move |engine| engine.actions.likes_received(user_id)).await?;
    Ok(Json(likes))
}

pub async fn like_allowance(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<LikeAllowance>, ApiError> {
    let user_id = claims.sub;
    let allowance = blocking(&state, move |engine| engine.actions.like_allowance(user_id)).await?;
    Ok(Json(allowance))
}

pub async fn list_matches(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<MatchSummary>>, ApiError> {
    let user_id = claims.sub;
    let matches = blocking(&state, move |engine| engine.actions.list_matches(user_id)).await?;
    Ok(Json(matches))
}

pub async fn unmatch(
    State(state): State<AppState>,
    Path(match_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<MatchRecord>, ApiError> {
    let user_id = claims.sub;
    let record = blocking(&state, move |engine| engine.actions.unmatch(match_id, user_id)).await?;
    info!(match_id = %match_id, user_id = %user_id, "Unmatch requested");
    Ok(Json(record))
}
