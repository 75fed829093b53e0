use thiserror::Error;

use kindle_types::api::ErrorKind;
use kindle_types::models::ModerationCategory;

pub type Result<T> = std::result::Result<T, EngineError>;

/// Failure taxonomy of every public engine operation.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Malformed input. Never retried.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Moderation rejected the message body.
    #[error("Message blocked by moderation ({category})")]
    BlockedContent { category: ModerationCategory },

    /// The sender has no free messages left in this chat.
    #[error("Message quota exhausted for this chat")]
    QuotaExceeded,

    /// The swiper spent today's free likes or superlikes.
    #[error("Daily like limit reached")]
    LikeLimitReached,

    /// Write contention outlived the retry budget. Safe to resubmit.
    #[error("Store contention, retry later: {0}")]
    Retryable(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Not allowed: {0}")]
    Forbidden(String),

    #[error("Chat is no longer active")]
    ChatInactive,

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl EngineError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    /// Stable tag surfaced to callers.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::BlockedContent { .. } => ErrorKind::BlockedContent,
            Self::QuotaExceeded => ErrorKind::QuotaExceeded,
            Self::LikeLimitReached => ErrorKind::LikeLimitReached,
            Self::Retryable(_) => ErrorKind::Retryable,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Forbidden(_) => ErrorKind::Forbidden,
            Self::ChatInactive => ErrorKind::ChatInactive,
            Self::Store(_) => ErrorKind::Internal,
        }
    }

    /// Pull an engine error back out of a failed transaction closure. Domain
    /// rejections raised inside `Database::transaction` travel as
    /// `anyhow::Error` so the transaction rolls back.
    pub(crate) fn from_store(err: anyhow::Error) -> Self {
        match err.downcast::<EngineError>() {
            Ok(engine) => engine,
            Err(other) => Self::Store(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_errors_survive_a_transaction_roundtrip() {
        let wrapped = anyhow::Error::new(EngineError::QuotaExceeded);
        let err = EngineError::from_store(wrapped);
        assert_eq!(err.kind(), ErrorKind::QuotaExceeded);
    }

    #[test]
    fn foreign_errors_become_internal() {
        let err = EngineError::from_store(anyhow::anyhow!("disk on fire"));
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(err.to_string().contains("disk on fire"));
    }
}
