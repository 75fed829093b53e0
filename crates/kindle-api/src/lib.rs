pub mod chats;
pub mod discovery;
pub mod error;
pub mod middleware;
pub mod swipes;

use std::sync::Arc;

use axum::{
    Router, middleware as axum_middleware,
    routing::{delete, get, post},
};
use tracing::error;

use kindle_engine::Engine;
use kindle_gateway::Dispatcher;

use crate::error::ApiError;
use crate::middleware::require_auth;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub engine: Arc<Engine>,
    pub dispatcher: Dispatcher,
    pub jwt_secret: String,
}

/// Authenticated REST routes.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/discovery", get(discovery::discover))
        .route("/swipes", post(swipes::record_swipe))
        .route("/likes/received", get(swipes::likes_received))
        .route("/likes/allowance", get(swipes::like_allowance))
        .route("/matches", get(swipes::list_matches))
        .route("/matches/{match_id}", delete(swipes::unmatch))
        .route("/chats", get(chats::list_chats))
        .route("/chats/direct", post(chats::open_direct_chat))
        .route(
            "/chats/{chat_id}/messages",
            get(chats::get_messages).post(chats::send_message),
        )
        .route("/chats/{chat_id}/read", post(chats::mark_read))
        .route("/chats/{chat_id}/delivered", post(chats::mark_delivered))
        .route("/chats/{chat_id}/quota", get(chats::get_quota))
        .layer(axum_middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state)
}

/// Run an engine call off the async runtime.
pub(crate) async fn blocking<T, F>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Engine) -> kindle_engine::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let engine = state.engine.clone();
    tokio::task::spawn_blocking(move || f(&engine))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal(e.to_string())
        })?
        .map_err(ApiError::from)
}
