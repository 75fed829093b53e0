use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{EngineError, Result};

/// Bounded exponential backoff around a storage transaction.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, base: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            base,
        }
    }

    /// Delay before attempt `n + 1`, where `n` starts at 1.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base.saturating_mul(1u32 << attempt.saturating_sub(1).min(16))
    }

    /// Run `op` until it succeeds, fails for a non-transient reason, or the
    /// attempt budget runs out. Engine errors raised inside `op` are
    /// returned as-is and never retried.
    pub fn run<T, F>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> anyhow::Result<T>,
    {
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if kindle_db::is_transient(&err) => {
                    if attempt >= self.attempts {
                        warn!("{} gave up after {} attempts: {}", label, attempt, err);
                        return Err(EngineError::Retryable(format!(
                            "{} failed after {} attempts",
                            label, attempt
                        )));
                    }
                    let delay = self.backoff(attempt);
                    debug!("{} hit contention (attempt {}), retrying in {:?}", label, attempt, delay);
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                Err(err) => return Err(EngineError::from_store(err)),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(25))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kindle_types::api::ErrorKind;

    fn busy() -> anyhow::Error {
        rusqlite::Error::SqliteFailure(rusqlite::ffi::Error::new(5), None).into()
    }

    #[test]
    fn backoff_doubles() {
        let policy = RetryPolicy::new(3, Duration::from_millis(10));
        assert_eq!(policy.backoff(1), Duration::from_millis(10));
        assert_eq!(policy.backoff(2), Duration::from_millis(20));
        assert_eq!(policy.backoff(3), Duration::from_millis(40));
    }

    #[test]
    fn backoff_is_total() {
        let policy = RetryPolicy::new(3, Duration::from_millis(10));
        assert_eq!(policy.backoff(0), Duration::from_millis(10));
        assert_eq!(policy.backoff(u32::MAX), Duration::from_millis(10) * (1 << 16));
    }

    #[test]
    fn contention_is_retried_until_success() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        let mut calls = 0;
        let res = policy.run("test", || {
            calls += 1;
            if calls < 3 { Err(busy()) } else { Ok(calls) }
        });
        assert_eq!(res.unwrap(), 3);
    }

    #[test]
    fn exhausted_budget_is_retryable() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        let mut calls = 0;
        let res: Result<()> = policy.run("test", || {
            calls += 1;
            Err(busy())
        });
        assert_eq!(res.unwrap_err().kind(), ErrorKind::Retryable);
        assert_eq!(calls, 3);
    }

    #[test]
    fn engine_errors_are_not_retried() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        let mut calls = 0;
        let res: Result<()> = policy.run("test", || {
            calls += 1;
            Err(EngineError::QuotaExceeded.into())
        });
        assert_eq!(res.unwrap_err().kind(), ErrorKind::QuotaExceeded);
        assert_eq!(calls, 1);
    }
}
