use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use kindle_db::{Connection, Database, quotas};
use kindle_types::models::QuotaRemaining;

use crate::directory::PremiumStatus;
use crate::error::{EngineError, Result};
use crate::retry::RetryPolicy;

/// Per-chat, per-user free message counters. Premium users bypass them.
pub struct QuotaTracker {
    db: Arc<Database>,
    premium: Arc<dyn PremiumStatus>,
    retry: RetryPolicy,
}

impl QuotaTracker {
    pub fn new(db: Arc<Database>, premium: Arc<dyn PremiumStatus>, retry: RetryPolicy) -> Self {
        Self { db, premium, retry }
    }

    pub fn is_premium(&self, user_id: Uuid) -> Result<bool> {
        Ok(self.premium.is_premium(user_id)?)
    }

    pub fn get_remaining(&self, chat_id: Uuid, user_id: Uuid) -> Result<QuotaRemaining> {
        if self.is_premium(user_id)? {
            return Ok(QuotaRemaining::Unlimited);
        }
        self.db
            .quota_remaining(chat_id, user_id)?
            .map(QuotaRemaining::Limited)
            .ok_or_else(|| EngineError::not_found(format!("no quota for {} in chat {}", user_id, chat_id)))
    }

    /// Spend one message. `false` means the counter was already at zero and
    /// nothing changed.
    pub fn consume(&self, chat_id: Uuid, user_id: Uuid) -> Result<bool> {
        let premium = self.is_premium(user_id)?;
        let charged = self.retry.run("quota consume", || {
            self.db.transaction(|tx| charge(tx, chat_id, user_id, premium))
        })?;
        Ok(charged.is_some())
    }

    /// Add purchased messages to a counter.
    pub fn grant(&self, chat_id: Uuid, user_id: Uuid, amount: u32) -> Result<QuotaRemaining> {
        if amount == 0 {
            return Err(EngineError::validation("grant amount must be positive"));
        }
        let remaining = self
            .retry
            .run("quota grant", || self.db.transaction(|tx| quotas::grant(tx, chat_id, user_id, amount)))?;
        info!(chat_id = %chat_id, user_id = %user_id, amount, remaining, "Quota granted");
        Ok(QuotaRemaining::Limited(remaining))
    }
}

/// Charge one message inside an open transaction. Returns the remaining
/// allowance, or `None` when a non-premium counter is exhausted.
pub(crate) fn charge(
    conn: &Connection,
    chat_id: Uuid,
    user_id: Uuid,
    premium: bool,
) -> anyhow::Result<Option<QuotaRemaining>> {
    if premium {
        return Ok(Some(QuotaRemaining::Unlimited));
    }
    Ok(quotas::try_consume(conn, chat_id, user_id)?.map(QuotaRemaining::Limited))
}
