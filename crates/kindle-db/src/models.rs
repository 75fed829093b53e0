//! Database row types. These map directly to SQLite rows; each converts into
//! its kindle-types model and reports corrupt columns instead of guessing.

use anyhow::{Result, anyhow};
use chrono::NaiveDate;
use uuid::Uuid;

use kindle_types::models::{
    Coordinates, Gender, GenderPreference, LastMessage, MatchRecord, MatchStatus, Message,
    MessageStatus, ModerationCategory, Profile, SwipeAction, SwipeKind,
};

use crate::parse_ts;

pub(crate) fn parse_uuid(raw: &str) -> Result<Uuid> {
    raw.parse().map_err(|e| anyhow!("Corrupt id '{}': {}", raw, e))
}

pub struct ProfileRow {
    pub id: String,
    pub display_name: String,
    pub birth_date: String,
    pub gender: String,
    pub gender_preference: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub photos: String,
    pub show_me: bool,
}

impl ProfileRow {
    pub fn into_profile(self) -> Result<Profile> {
        let coordinates = match (self.latitude, self.longitude) {
            (Some(latitude), Some(longitude)) => Some(Coordinates { latitude, longitude }),
            _ => None,
        };
        Ok(Profile {
            id: parse_uuid(&self.id)?,
            display_name: self.display_name,
            birth_date: NaiveDate::parse_from_str(&self.birth_date, "%Y-%m-%d")
                .map_err(|e| anyhow!("Corrupt birth_date '{}': {}", self.birth_date, e))?,
            gender: Gender::parse(&self.gender)
                .ok_or_else(|| anyhow!("Corrupt gender '{}'", self.gender))?,
            gender_preference: GenderPreference::parse(&self.gender_preference)
                .ok_or_else(|| anyhow!("Corrupt gender_preference '{}'", self.gender_preference))?,
            coordinates,
            photos: serde_json::from_str(&self.photos)?,
            show_me: self.show_me,
        })
    }
}

pub struct SwipeRow {
    pub actor_id: String,
    pub target_id: String,
    pub kind: String,
    pub created_at: String,
}

impl SwipeRow {
    pub fn into_swipe(self) -> Result<SwipeAction> {
        Ok(SwipeAction {
            actor_id: parse_uuid(&self.actor_id)?,
            target_id: parse_uuid(&self.target_id)?,
            kind: SwipeKind::parse(&self.kind)
                .ok_or_else(|| anyhow!("Corrupt swipe kind '{}'", self.kind))?,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

pub struct MatchRow {
    pub id: String,
    pub pair_key: String,
    pub user_a: String,
    pub user_b: String,
    pub chat_id: String,
    pub status: String,
    pub created_at: String,
}

impl MatchRow {
    pub fn into_record(self) -> Result<MatchRecord> {
        Ok(MatchRecord {
            id: parse_uuid(&self.id)?,
            pair_key: self.pair_key,
            user_ids: [parse_uuid(&self.user_a)?, parse_uuid(&self.user_b)?],
            chat_id: parse_uuid(&self.chat_id)?,
            status: MatchStatus::parse(&self.status)
                .ok_or_else(|| anyhow!("Corrupt match status '{}'", self.status))?,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

pub struct ChatRow {
    pub id: String,
    pub match_id: Option<String>,
    pub origin: String,
    pub pair_key: String,
    pub active: bool,
    pub last_text: Option<String>,
    pub last_sender_id: Option<String>,
    pub last_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl ChatRow {
    pub fn last_message(&self) -> Result<Option<LastMessage>> {
        match (&self.last_text, &self.last_sender_id, &self.last_at) {
            (Some(text), Some(sender), Some(at)) => Ok(Some(LastMessage {
                text: text.clone(),
                sender_id: parse_uuid(sender)?,
                created_at: parse_ts(at)?,
            })),
            _ => Ok(None),
        }
    }
}

pub struct ChatMemberRow {
    pub chat_id: String,
    pub user_id: String,
    pub unread_count: u32,
    pub last_read_at: Option<String>,
    pub last_read_sequence: i64,
}

pub struct MessageRow {
    pub id: String,
    pub chat_id: String,
    pub sender_id: String,
    pub text: String,
    pub server_sequence: i64,
    pub status: String,
    pub moderation_category: Option<String>,
    pub moderated: bool,
    pub created_at: String,
}

impl MessageRow {
    pub fn into_message(self) -> Result<Message> {
        let moderation_category = match self.moderation_category.as_deref() {
            Some(raw) => Some(
                ModerationCategory::parse(raw)
                    .ok_or_else(|| anyhow!("Corrupt moderation category '{}'", raw))?,
            ),
            None => None,
        };
        Ok(Message {
            id: parse_uuid(&self.id)?,
            chat_id: parse_uuid(&self.chat_id)?,
            sender_id: parse_uuid(&self.sender_id)?,
            text: self.text,
            created_at: parse_ts(&self.created_at)?,
            server_sequence: self.server_sequence,
            status: MessageStatus::parse(&self.status)
                .ok_or_else(|| anyhow!("Corrupt message status '{}'", self.status))?,
            moderation_category,
            moderated: self.moderated,
        })
    }
}
