use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use kindle_db::{Database, chats, likes, matches, quotas, swipes};
use kindle_types::api::{LikeAllowance, MatchSummary, ReceivedLike};
use kindle_types::events::{ConversionReason, GatewayEvent, NotificationKind};
use kindle_types::models::{ChatOrigin, MatchRecord, MatchStatus, QuotaRemaining, SwipeAction, SwipeKind};
use kindle_types::pair_key;

use crate::conversion::ConversionCoordinator;
use crate::directory::{PremiumStatus, UserDirectory};
use crate::error::{EngineError, Result};
use crate::notify::{EventSink, match_payload, notify};
use crate::retry::RetryPolicy;

#[derive(Debug, Clone)]
pub struct SwipeOutcome {
    pub swipe: SwipeAction,
    /// The pair's active match, if this swipe completed or found one.
    pub matched: Option<MatchRecord>,
    /// This call created the match (as opposed to attaching to one).
    pub created: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct SwipeLimits {
    /// Free messages seeded into each new match chat.
    pub allotment: u32,
    pub daily_likes: u32,
    pub daily_superlikes: u32,
}

/// Records swipes and turns reciprocated likes into a Match plus Chat.
/// Free users get a daily budget of likes; premium users swipe freely.
pub struct ActionProcessor {
    db: Arc<Database>,
    directory: Arc<dyn UserDirectory>,
    premium: Arc<dyn PremiumStatus>,
    sink: Arc<dyn EventSink>,
    conversion: Arc<ConversionCoordinator>,
    retry: RetryPolicy,
    limits: SwipeLimits,
}

impl ActionProcessor {
    pub fn new(
        db: Arc<Database>,
        directory: Arc<dyn UserDirectory>,
        premium: Arc<dyn PremiumStatus>,
        sink: Arc<dyn EventSink>,
        conversion: Arc<ConversionCoordinator>,
        retry: RetryPolicy,
        limits: SwipeLimits,
    ) -> Self {
        Self {
            db,
            directory,
            premium,
            sink,
            conversion,
            retry,
            limits,
        }
    }

    /// Record `actor`'s judgement of `target`. Reciprocated likes create the
    /// pair's Match and Chat in the same transaction as the swipe. A writer
    /// that finds the pair key taken attaches to the existing Match.
    pub fn record_swipe(&self, actor_id: Uuid, target_id: Uuid, kind: SwipeKind) -> Result<SwipeOutcome> {
        if actor_id == target_id {
            return Err(EngineError::validation("cannot swipe on yourself"));
        }
        if self.directory.lookup(target_id)?.is_none() {
            return Err(EngineError::not_found(format!("profile {}", target_id)));
        }

        let metered = kind.is_positive() && !self.premium.is_premium(actor_id)?;

        let recorded = self.retry.run("record swipe", || {
            self.db.transaction(|tx| {
                let now = Utc::now();
                if metered {
                    let charged = likes::try_consume_like(
                        tx,
                        actor_id,
                        now.date_naive(),
                        kind == SwipeKind::Superlike,
                        self.limits.daily_likes,
                        self.limits.daily_superlikes,
                    )?;
                    if charged.is_none() {
                        return Err(EngineError::LikeLimitReached.into());
                    }
                }
                let swipe = swipes::upsert_swipe(tx, actor_id, target_id, kind, now)?;
                let no_match = |swipe: SwipeAction| SwipeOutcome {
                    swipe,
                    matched: None,
                    created: false,
                };

                if !kind.is_positive() {
                    return Ok(no_match(swipe));
                }
                let reciprocated = swipes::query_swipe(tx, target_id, actor_id)?
                    .is_some_and(|s| s.kind.is_positive());
                if !reciprocated {
                    return Ok(no_match(swipe));
                }

                let key = pair_key(actor_id, target_id);
                let record = MatchRecord {
                    id: Uuid::new_v4(),
                    pair_key: key.clone(),
                    user_ids: [actor_id, target_id],
                    chat_id: Uuid::new_v4(),
                    status: MatchStatus::Active,
                    created_at: now,
                };
                if !matches::try_insert_match(tx, &record)? {
                    let existing = matches::query_match_by_pair(tx, &key)?
                        .ok_or_else(|| anyhow::anyhow!("match for {} vanished after conflict", key))?;
                    // An ended match keeps the pair key reserved forever.
                    let matched = (existing.status == MatchStatus::Active).then_some(existing);
                    return Ok(SwipeOutcome {
                        swipe,
                        matched,
                        created: false,
                    });
                }

                chats::insert_chat(
                    tx,
                    &chats::NewChat {
                        id: record.chat_id,
                        match_id: Some(record.id),
                        origin: ChatOrigin::Match,
                        pair_key: &key,
                        participants: &record.user_ids,
                        now,
                    },
                )?;
                quotas::seed_quota(tx, record.chat_id, &record.user_ids, self.limits.allotment)?;

                Ok(SwipeOutcome {
                    swipe,
                    matched: Some(record),
                    created: true,
                })
            })
        });

        let outcome = match recorded {
            Ok(outcome) => outcome,
            Err(EngineError::LikeLimitReached) => {
                info!(actor_id = %actor_id, kind = kind.as_str(), "Daily like limit reached");
                self.conversion.observe(actor_id, ConversionReason::Likes);
                return Err(EngineError::LikeLimitReached);
            }
            Err(e) => return Err(e),
        };

        debug!(
            actor_id = %actor_id,
            target_id = %target_id,
            kind = kind.as_str(),
            "Swipe recorded"
        );

        if let (true, Some(record)) = (outcome.created, &outcome.matched) {
            info!(match_id = %record.id, chat_id = %record.chat_id, "Match created between {} and {}", actor_id, target_id);
            self.announce_match(record);
        }

        Ok(outcome)
    }

    fn announce_match(&self, record: &MatchRecord) {
        for user_id in record.user_ids {
            self.sink
                .send_to_user(user_id, GatewayEvent::MatchCreate { record: record.clone() });
            if let Some(other) = record.other_user(user_id) {
                notify(
                    self.sink.as_ref(),
                    user_id,
                    NotificationKind::MatchCreated,
                    match_payload(record.id, record.chat_id, other),
                );
            }
        }
    }

    /// What `user_id` may still spend today.
    pub fn like_allowance(&self, user_id: Uuid) -> Result<LikeAllowance> {
        if self.premium.is_premium(user_id)? {
            return Ok(LikeAllowance {
                likes: QuotaRemaining::Unlimited,
                superlikes: QuotaRemaining::Unlimited,
            });
        }
        let used = self.db.like_usage(user_id, Utc::now().date_naive())?;
        let likes_left = self.limits.daily_likes.saturating_sub(used.likes);
        Ok(LikeAllowance {
            likes: QuotaRemaining::Limited(likes_left),
            superlikes: QuotaRemaining::Limited(
                self.limits.daily_superlikes.saturating_sub(used.superlikes).min(likes_left),
            ),
        })
    }

    /// Pending likes on `user_id`, newest first.
    pub fn likes_received(&self, user_id: Uuid) -> Result<Vec<ReceivedLike>> {
        Ok(self
            .db
            .positive_swipes_on(user_id, true)?
            .into_iter()
            .map(|s| ReceivedLike {
                from_user_id: s.actor_id,
                kind: s.kind,
                created_at: s.created_at,
            })
            .collect())
    }

    pub fn list_matches(&self, user_id: Uuid) -> Result<Vec<MatchSummary>> {
        Ok(self
            .db
            .list_active_matches(user_id)?
            .iter()
            .filter_map(|m| MatchSummary::for_user(m, user_id))
            .collect())
    }

    /// End a match. The chat is deactivated and the pair key stays taken, so
    /// the two users never match again. Repeating the call is a no-op.
    pub fn unmatch(&self, match_id: Uuid, user_id: Uuid) -> Result<MatchRecord> {
        let (record, changed) = self.retry.run("unmatch", || {
            self.db.transaction(|tx| {
                let mut record = matches::query_match(tx, match_id)?
                    .ok_or_else(|| EngineError::not_found(format!("match {}", match_id)))?;
                if !record.user_ids.contains(&user_id) {
                    return Err(EngineError::forbidden("not a participant of this match").into());
                }
                let now = Utc::now();
                let changed = matches::terminate_match(tx, match_id, user_id, now)?;
                if changed {
                    chats::set_chat_active(tx, record.chat_id, false, now)?;
                }
                record.status = MatchStatus::Terminated;
                Ok((record, changed))
            })
        })?;

        if changed {
            info!(match_id = %match_id, by = %user_id, "Match terminated");
            let event = GatewayEvent::MatchTerminated {
                match_id,
                chat_id: record.chat_id,
            };
            self.sink.publish(event.clone());
            if let Some(other) = record.other_user(user_id) {
                self.sink.send_to_user(other, event);
            }
        }
        Ok(record)
    }
}
