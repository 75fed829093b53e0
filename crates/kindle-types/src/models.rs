use std::collections::HashMap;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// -- Profiles --

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Male,
    Female,
    NonBinary,
    Other,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Male => "male",
            Self::Female => "female",
            Self::NonBinary => "non_binary",
            Self::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "male" => Some(Self::Male),
            "female" => Some(Self::Female),
            "non_binary" => Some(Self::NonBinary),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

/// Which genders a user wants to see in discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenderPreference {
    Men,
    Women,
    Everyone,
}

impl GenderPreference {
    pub fn accepts(&self, gender: Gender) -> bool {
        match self {
            Self::Men => gender == Gender::Male,
            Self::Women => gender == Gender::Female,
            Self::Everyone => true,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Men => "men",
            Self::Women => "women",
            Self::Everyone => "everyone",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "men" => Some(Self::Men),
            "women" => Some(Self::Women),
            "everyone" => Some(Self::Everyone),
            _ => None,
        }
    }
}

/// Read-only view of a user's profile. Owned by the profile-edit flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    pub display_name: String,
    pub birth_date: NaiveDate,
    pub gender: Gender,
    pub gender_preference: GenderPreference,
    pub coordinates: Option<Coordinates>,
    pub photos: Vec<String>,
    pub show_me: bool,
}

impl Profile {
    /// Age in whole years on `today`.
    pub fn age_on(&self, today: NaiveDate) -> u32 {
        let mut age = today.year() - self.birth_date.year();
        if (today.month(), today.day()) < (self.birth_date.month(), self.birth_date.day()) {
            age -= 1;
        }
        age.max(0) as u32
    }
}

// -- Swipes and matches --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwipeKind {
    Like,
    Pass,
    Superlike,
}

impl SwipeKind {
    /// Like and superlike count towards a match; pass never does.
    pub fn is_positive(&self) -> bool {
        matches!(self, Self::Like | Self::Superlike)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Like => "like",
            Self::Pass => "pass",
            Self::Superlike => "superlike",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "like" => Some(Self::Like),
            "pass" => Some(Self::Pass),
            "superlike" => Some(Self::Superlike),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwipeAction {
    pub actor_id: Uuid,
    pub target_id: Uuid,
    pub kind: SwipeKind,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Active,
    Terminated,
}

impl MatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Terminated => "terminated",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "terminated" => Some(Self::Terminated),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchRecord {
    pub id: Uuid,
    pub pair_key: String,
    pub user_ids: [Uuid; 2],
    pub chat_id: Uuid,
    pub status: MatchStatus,
    pub created_at: DateTime<Utc>,
}

impl MatchRecord {
    pub fn other_user(&self, user_id: Uuid) -> Option<Uuid> {
        match self.user_ids {
            [a, b] if a == user_id => Some(b),
            [a, b] if b == user_id => Some(a),
            _ => None,
        }
    }
}

/// Canonical, order-independent key for a pair of users.
pub fn pair_key(a: Uuid, b: Uuid) -> String {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    format!("{}_{}", lo, hi)
}

// -- Chats and messages --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatOrigin {
    Match,
    Direct,
}

impl ChatOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Match => "match",
            Self::Direct => "direct",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "match" => Some(Self::Match),
            "direct" => Some(Self::Direct),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastMessage {
    pub text: String,
    pub sender_id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    pub id: Uuid,
    pub match_id: Option<Uuid>,
    pub origin: ChatOrigin,
    pub participant_ids: Vec<Uuid>,
    pub last_message: Option<LastMessage>,
    pub unread_counts: HashMap<Uuid, u32>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Chat {
    pub fn is_participant(&self, user_id: Uuid) -> bool {
        self.participant_ids.contains(&user_id)
    }

    pub fn other_participant(&self, user_id: Uuid) -> Option<Uuid> {
        self.participant_ids.iter().copied().find(|id| *id != user_id)
    }
}

/// Delivery state. Variants are ordered so transitions can be checked as
/// `new > old`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Read,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Read => "read",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sent" => Some(Self::Sent),
            "delivered" => Some(Self::Delivered),
            "read" => Some(Self::Read),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModerationClassification {
    Allowed,
    Blocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModerationCategory {
    ContactInfo,
    ExternalLink,
    Explicit,
    Profanity,
    Spam,
    Harassment,
    Scam,
    HateSpeech,
    ClassifierUnavailable,
}

impl ModerationCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ContactInfo => "contact_info",
            Self::ExternalLink => "external_link",
            Self::Explicit => "explicit",
            Self::Profanity => "profanity",
            Self::Spam => "spam",
            Self::Harassment => "harassment",
            Self::Scam => "scam",
            Self::HateSpeech => "hate_speech",
            Self::ClassifierUnavailable => "classifier_unavailable",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "contact_info" => Some(Self::ContactInfo),
            "external_link" => Some(Self::ExternalLink),
            "explicit" => Some(Self::Explicit),
            "profanity" => Some(Self::Profanity),
            "spam" => Some(Self::Spam),
            "harassment" => Some(Self::Harassment),
            "scam" => Some(Self::Scam),
            "hate_speech" => Some(Self::HateSpeech),
            "classifier_unavailable" => Some(Self::ClassifierUnavailable),
            _ => None,
        }
    }
}

impl std::fmt::Display for ModerationCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of classifying a message body. Only ever stored alongside the
/// message it gated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModerationVerdict {
    pub classification: ModerationClassification,
    pub category: Option<ModerationCategory>,
    /// Risk score in 0..=100.
    pub score: u8,
    /// Masked body when the text was allowed but partially censored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sanitized: Option<String>,
}

impl ModerationVerdict {
    pub fn allowed() -> Self {
        Self {
            classification: ModerationClassification::Allowed,
            category: None,
            score: 0,
            sanitized: None,
        }
    }

    pub fn blocked(category: ModerationCategory, score: u8) -> Self {
        Self {
            classification: ModerationClassification::Blocked,
            category: Some(category),
            score,
            sanitized: None,
        }
    }

    pub fn is_blocked(&self) -> bool {
        self.classification == ModerationClassification::Blocked
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub sender_id: Uuid,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub server_sequence: i64,
    pub status: MessageStatus,
    pub moderation_category: Option<ModerationCategory>,
    /// True when the stored text is a sanitized version of what was sent.
    pub moderated: bool,
}

// -- Quota --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "remaining", rename_all = "snake_case")]
pub enum QuotaRemaining {
    Limited(u32),
    Unlimited,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_key_is_order_independent() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_eq!(pair_key(a, b), pair_key(b, a));
        assert_ne!(pair_key(a, b), pair_key(a, Uuid::new_v4()));
    }

    #[test]
    fn age_respects_birthday_not_yet_reached() {
        let profile = Profile {
            id: Uuid::new_v4(),
            display_name: "Ana".into(),
            birth_date: NaiveDate::from_ymd_opt(2000, 6, 15).unwrap(),
            gender: Gender::Female,
            gender_preference: GenderPreference::Men,
            coordinates: None,
            photos: vec![],
            show_me: true,
        };
        assert_eq!(profile.age_on(NaiveDate::from_ymd_opt(2026, 6, 14).unwrap()), 25);
        assert_eq!(profile.age_on(NaiveDate::from_ymd_opt(2026, 6, 15).unwrap()), 26);
    }

    #[test]
    fn message_status_only_moves_forward() {
        assert!(MessageStatus::Read > MessageStatus::Delivered);
        assert!(MessageStatus::Delivered > MessageStatus::Sent);
    }

    #[test]
    fn gender_preference_filters() {
        assert!(GenderPreference::Women.accepts(Gender::Female));
        assert!(!GenderPreference::Women.accepts(Gender::NonBinary));
        assert!(GenderPreference::Everyone.accepts(Gender::Other));
    }
}
