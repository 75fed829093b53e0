pub mod actions;
pub mod chat;
pub mod config;
pub mod conversion;
pub mod directory;
pub mod discovery;
pub mod error;
pub mod moderation;
pub mod notify;
pub mod quota;
pub mod retry;

use std::sync::Arc;

use kindle_db::Database;

pub use actions::{ActionProcessor, SwipeLimits, SwipeOutcome};
pub use chat::{ChatEngine, ReceiptOutcome, SentMessage};
pub use config::EngineConfig;
pub use conversion::ConversionCoordinator;
pub use directory::{PremiumStatus, UserDirectory};
pub use discovery::{DiscoveryFilter, DiscoverySettings};
pub use error::{EngineError, Result};
pub use moderation::{FailurePolicy, ModerationFilter};
pub use notify::EventSink;
pub use quota::QuotaTracker;
pub use retry::RetryPolicy;

/// The matching and conversation core, wired to one database and one
/// event sink. Every operation is synchronous; async callers should run
/// them on a blocking thread.
pub struct Engine {
    pub db: Arc<Database>,
    pub discovery: DiscoveryFilter,
    pub actions: ActionProcessor,
    pub chat: ChatEngine,
    pub quota: Arc<QuotaTracker>,
    pub conversion: Arc<ConversionCoordinator>,
}

impl Engine {
    /// Build an engine whose profiles and premium flags come from `db`.
    pub fn new(db: Arc<Database>, sink: Arc<dyn EventSink>, config: &EngineConfig) -> Self {
        let directory: Arc<dyn UserDirectory> = db.clone();
        let premium: Arc<dyn PremiumStatus> = db.clone();
        Self::with_collaborators(db, directory, premium, sink, config)
    }

    pub fn with_collaborators(
        db: Arc<Database>,
        directory: Arc<dyn UserDirectory>,
        premium: Arc<dyn PremiumStatus>,
        sink: Arc<dyn EventSink>,
        config: &EngineConfig,
    ) -> Self {
        let retry = RetryPolicy::new(config.retry_attempts, config.retry_base);
        let policy = if config.moderation_fail_open {
            FailurePolicy::Open
        } else {
            FailurePolicy::Closed
        };
        let moderation = Arc::new(
            ModerationFilter::new(policy).with_allow_list(&config.moderation_allow_list),
        );
        let quota = Arc::new(QuotaTracker::new(db.clone(), premium.clone(), retry));
        let conversion = Arc::new(ConversionCoordinator::new(
            config.conversion_window,
            sink.clone(),
        ));

        Self {
            discovery: DiscoveryFilter::new(db.clone(), directory.clone()),
            actions: ActionProcessor::new(
                db.clone(),
                directory.clone(),
                premium,
                sink.clone(),
                conversion.clone(),
                retry,
                SwipeLimits {
                    allotment: config.message_allotment,
                    daily_likes: config.daily_likes,
                    daily_superlikes: config.daily_superlikes,
                },
            ),
            chat: ChatEngine::new(
                db.clone(),
                directory,
                sink,
                moderation,
                quota.clone(),
                conversion.clone(),
                retry,
                config.message_allotment,
            ),
            quota,
            conversion,
            db,
        }
    }
}
