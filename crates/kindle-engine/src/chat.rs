//! Chat Engine: message send, receipts, history, and fan-out.
//!
//! Sequence assignment, commit, and publish for a chat all happen while the
//! chat's lock is held, so subscribers see messages in commit order.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use kindle_db::{Database, chats, quotas};
use kindle_types::api::ChatSummary;
use kindle_types::events::{ConversionReason, GatewayEvent, NotificationKind};
use kindle_types::models::{
    Chat, ChatOrigin, Message, MessageStatus, ModerationCategory, QuotaRemaining,
};
use kindle_types::pair_key;

use crate::conversion::ConversionCoordinator;
use crate::directory::UserDirectory;
use crate::error::{EngineError, Result};
use crate::moderation::ModerationFilter;
use crate::notify::{EventSink, notify};
use crate::quota::{QuotaTracker, charge};
use crate::retry::RetryPolicy;

pub const MAX_MESSAGE_CHARS: usize = 2000;
pub const MAX_PAGE: u32 = 200;

/// Chats hash onto a fixed set of ordering locks.
const CHAT_LOCK_STRIPES: usize = 64;

/// A committed message and what the sender has left afterwards.
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub message: Message,
    pub quota: QuotaRemaining,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiptOutcome {
    pub updated: usize,
    pub up_to_sequence: i64,
}

pub struct ChatEngine {
    db: Arc<Database>,
    directory: Arc<dyn UserDirectory>,
    sink: Arc<dyn EventSink>,
    moderation: Arc<ModerationFilter>,
    quota: Arc<QuotaTracker>,
    conversion: Arc<ConversionCoordinator>,
    retry: RetryPolicy,
    allotment: u32,
    chat_locks: Vec<Mutex<()>>,
}

impl ChatEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<Database>,
        directory: Arc<dyn UserDirectory>,
        sink: Arc<dyn EventSink>,
        moderation: Arc<ModerationFilter>,
        quota: Arc<QuotaTracker>,
        conversion: Arc<ConversionCoordinator>,
        retry: RetryPolicy,
        allotment: u32,
    ) -> Self {
        Self {
            db,
            directory,
            sink,
            moderation,
            quota,
            conversion,
            retry,
            allotment,
            chat_locks: (0..CHAT_LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }

    fn stripe(chat_id: Uuid) -> usize {
        (chat_id.as_u128() % CHAT_LOCK_STRIPES as u128) as usize
    }

    /// Serializes commit and publish for one chat. Unrelated chats may share
    /// a stripe.
    fn chat_lock(&self, chat_id: Uuid) -> MutexGuard<'_, ()> {
        match self.chat_locks[Self::stripe(chat_id)].lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Load a chat the caller takes part in.
    pub fn chat_for(&self, chat_id: Uuid, user_id: Uuid) -> Result<Chat> {
        let chat = self
            .db
            .get_chat(chat_id)?
            .ok_or_else(|| EngineError::not_found(format!("chat {}", chat_id)))?;
        if !chat.is_participant(user_id) {
            return Err(EngineError::forbidden("not a participant of this chat"));
        }
        Ok(chat)
    }

    pub fn send_message(&self, chat_id: Uuid, sender_id: Uuid, text: &str) -> Result<SentMessage> {
        let text = text.trim();
        if text.is_empty() {
            return Err(EngineError::validation("message text is empty"));
        }
        if text.chars().count() > MAX_MESSAGE_CHARS {
            return Err(EngineError::validation(format!(
                "message exceeds {} characters",
                MAX_MESSAGE_CHARS
            )));
        }

        let chat = self.chat_for(chat_id, sender_id)?;
        if !chat.active {
            return Err(EngineError::ChatInactive);
        }

        let verdict = self.moderation.classify(text);
        if verdict.is_blocked() {
            let category = verdict
                .category
                .unwrap_or(ModerationCategory::ClassifierUnavailable);
            warn!(chat_id = %chat_id, sender_id = %sender_id, %category, score = verdict.score, "Message blocked");
            self.conversion.observe(sender_id, ConversionReason::Moderation);
            return Err(EngineError::BlockedContent { category });
        }
        let (body, moderated) = match verdict.sanitized {
            Some(sanitized) => (sanitized, true),
            None => (text.to_string(), false),
        };

        let premium = self.quota.is_premium(sender_id)?;

        let guard = self.chat_lock(chat_id);

        let committed = self.retry.run("send message", || {
            self.db.transaction(|tx| {
                if !chats::chat_active(tx, chat_id)? {
                    return Err(EngineError::ChatInactive.into());
                }
                let quota = charge(tx, chat_id, sender_id, premium)?
                    .ok_or(EngineError::QuotaExceeded)?;
                let message = Message {
                    id: Uuid::new_v4(),
                    chat_id,
                    sender_id,
                    text: body.clone(),
                    created_at: Utc::now(),
                    server_sequence: chats::claim_sequence(tx, chat_id)?,
                    status: MessageStatus::Sent,
                    moderation_category: verdict.category,
                    moderated,
                };
                chats::append_message(tx, &message)?;
                Ok(SentMessage { message, quota })
            })
        });

        let sent = match committed {
            Ok(sent) => sent,
            Err(EngineError::QuotaExceeded) => {
                drop(guard);
                info!(chat_id = %chat_id, sender_id = %sender_id, "Message quota exhausted");
                self.conversion.observe(sender_id, ConversionReason::Messages);
                notify(
                    self.sink.as_ref(),
                    sender_id,
                    NotificationKind::QuotaExceeded,
                    json!({ "chat_id": chat_id }),
                );
                return Err(EngineError::QuotaExceeded);
            }
            Err(e) => return Err(e),
        };

        self.sink.publish(GatewayEvent::MessageCreate {
            message: sent.message.clone(),
        });
        drop(guard);

        debug!(
            chat_id = %chat_id,
            seq = sent.message.server_sequence,
            moderated,
            "Message committed"
        );

        if let Some(recipient) = chat.other_participant(sender_id) {
            notify(
                self.sink.as_ref(),
                recipient,
                NotificationKind::MessageReceived,
                json!({
                    "chat_id": chat_id,
                    "message_id": sent.message.id,
                    "sender_id": sender_id,
                    "server_sequence": sent.message.server_sequence,
                }),
            );
        }

        Ok(sent)
    }

    /// Mark everything addressed to `user_id` as read. Idempotent.
    pub fn mark_read(&self, chat_id: Uuid, user_id: Uuid) -> Result<ReceiptOutcome> {
        self.chat_for(chat_id, user_id)?;
        let _guard = self.chat_lock(chat_id);

        let receipt = self.retry.run("mark read", || {
            self.db
                .transaction(|tx| chats::mark_read(tx, chat_id, user_id, Utc::now()))
        })?;

        if receipt.updated > 0 {
            self.sink.publish(GatewayEvent::MessagesRead {
                chat_id,
                reader_id: user_id,
                up_to_sequence: receipt.up_to_sequence,
            });
        }
        Ok(ReceiptOutcome {
            updated: receipt.updated,
            up_to_sequence: receipt.up_to_sequence,
        })
    }

    /// Forward-only `sent -> delivered` for messages addressed to `user_id`.
    pub fn mark_delivered(&self, chat_id: Uuid, user_id: Uuid) -> Result<ReceiptOutcome> {
        self.chat_for(chat_id, user_id)?;
        let _guard = self.chat_lock(chat_id);

        let receipt = self.retry.run("mark delivered", || {
            self.db
                .transaction(|tx| chats::mark_delivered(tx, chat_id, user_id))
        })?;

        if receipt.updated > 0 {
            self.sink.publish(GatewayEvent::MessagesDelivered {
                chat_id,
                recipient_id: user_id,
                up_to_sequence: receipt.up_to_sequence,
            });
        }
        Ok(ReceiptOutcome {
            updated: receipt.updated,
            up_to_sequence: receipt.up_to_sequence,
        })
    }

    /// Committed messages after `after_sequence`, ascending. Used to close
    /// gaps after a reconnect.
    pub fn messages_after(&self, chat_id: Uuid, user_id: Uuid, after_sequence: i64, limit: u32) -> Result<Vec<Message>> {
        self.chat_for(chat_id, user_id)?;
        Ok(self
            .db
            .messages_after(chat_id, after_sequence, limit.clamp(1, MAX_PAGE))?)
    }

    /// A page of history ending before `before_sequence`, ascending.
    pub fn recent_messages(
        &self,
        chat_id: Uuid,
        user_id: Uuid,
        before_sequence: Option<i64>,
        limit: u32,
    ) -> Result<Vec<Message>> {
        self.chat_for(chat_id, user_id)?;
        Ok(self
            .db
            .messages_before(chat_id, before_sequence, limit.clamp(1, MAX_PAGE))?)
    }

    pub fn list_chats(&self, user_id: Uuid) -> Result<Vec<ChatSummary>> {
        Ok(self
            .db
            .list_chats_for(user_id)?
            .into_iter()
            .map(|chat| ChatSummary {
                chat_id: chat.id,
                match_id: chat.match_id,
                other_user_id: chat.other_participant(user_id),
                unread_count: chat.unread_counts.get(&user_id).copied().unwrap_or(0),
                last_message: chat.last_message,
                updated_at: chat.updated_at,
            })
            .collect())
    }

    /// Open (or return) the single direct chat between two users. Direct
    /// chats have no Match behind them but get the same quota seeding.
    pub fn open_direct_chat(&self, user_id: Uuid, recipient_id: Uuid) -> Result<(Chat, bool)> {
        if user_id == recipient_id {
            return Err(EngineError::validation("cannot open a chat with yourself"));
        }
        if self.directory.lookup(recipient_id)?.is_none() {
            return Err(EngineError::not_found(format!("profile {}", recipient_id)));
        }

        let key = format!("direct:{}", pair_key(user_id, recipient_id));
        let (chat_id, created) = self.retry.run("open direct chat", || {
            self.db.transaction(|tx| {
                if let Some(existing) = chats::query_chat_by_pair(tx, ChatOrigin::Direct, &key)? {
                    return Ok((existing.id, false));
                }
                let id = Uuid::new_v4();
                let participants = [user_id, recipient_id];
                chats::insert_chat(
                    tx,
                    &chats::NewChat {
                        id,
                        match_id: None,
                        origin: ChatOrigin::Direct,
                        pair_key: &key,
                        participants: &participants,
                        now: Utc::now(),
                    },
                )?;
                quotas::seed_quota(tx, id, &participants, self.allotment)?;
                Ok((id, true))
            })
        })?;

        if created {
            info!(chat_id = %chat_id, "Direct chat opened between {} and {}", user_id, recipient_id);
        }
        let chat = self
            .db
            .get_chat(chat_id)?
            .ok_or_else(|| EngineError::not_found(format!("chat {}", chat_id)))?;
        Ok((chat, created))
    }

    /// The caller's remaining allowance in a chat they take part in.
    pub fn quota(&self, chat_id: Uuid, user_id: Uuid) -> Result<QuotaRemaining> {
        self.chat_for(chat_id, user_id)?;
        self.quota.get_remaining(chat_id, user_id)
    }
}
