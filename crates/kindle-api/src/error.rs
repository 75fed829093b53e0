use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;

use kindle_engine::EngineError;
use kindle_types::api::{ErrorBody, ErrorKind};

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::BlockedContent => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::QuotaExceeded | ErrorKind::LikeLimitReached => StatusCode::PAYMENT_REQUIRED,
        ErrorKind::Retryable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Forbidden => StatusCode::FORBIDDEN,
        ErrorKind::ChatInactive => StatusCode::CONFLICT,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = match self {
            ApiError::Engine(EngineError::Store(e)) => {
                error!("Storage failure: {:#}", e);
                internal()
            }
            ApiError::Engine(e) => ErrorBody {
                kind: e.kind(),
                message: e.to_string(),
                category: match e {
                    EngineError::BlockedContent { category } => Some(category),
                    _ => None,
                },
            },
            ApiError::Internal(e) => {
                error!("Internal failure: {}", e);
                internal()
            }
        };

        (status_for(body.kind), Json(body)).into_response()
    }
}

// Storage details stay in the logs.
fn internal() -> ErrorBody {
    ErrorBody {
        kind: ErrorKind::Internal,
        message: "Internal server error".into(),
        category: None,
    }
}
