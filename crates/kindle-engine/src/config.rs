use std::time::Duration;

/// Tunables for the engine. The server fills this from the environment.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Free messages each participant gets when a chat is created.
    pub message_allotment: u32,
    /// Positive swipes a free user may make per UTC day.
    pub daily_likes: u32,
    /// Of those, how many may be superlikes.
    pub daily_superlikes: u32,
    pub retry_attempts: u32,
    pub retry_base: Duration,
    /// How long a conversion prompt for the same (user, reason) stays muted.
    pub conversion_window: Duration,
    /// Allow messages through when the secondary classifier is down.
    pub moderation_fail_open: bool,
    /// Terms moderation never treats as violations.
    pub moderation_allow_list: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            message_allotment: 5,
            daily_likes: 25,
            daily_superlikes: 1,
            retry_attempts: 3,
            retry_base: Duration::from_millis(25),
            conversion_window: Duration::from_secs(600),
            moderation_fail_open: false,
            moderation_allow_list: Vec::new(),
        }
    }
}
