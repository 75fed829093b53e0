use std::collections::HashMap;

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row};
use uuid::Uuid;

use kindle_types::models::{Chat, ChatOrigin, Message, MessageStatus};

use crate::models::{ChatMemberRow, ChatRow, MessageRow, parse_uuid};
use crate::{Database, OptionalExt, format_ts, parse_ts};

const CHAT_COLUMNS: &str =
    "id, match_id, origin, pair_key, active, last_text, last_sender_id, last_at, created_at, updated_at";

const MESSAGE_COLUMNS: &str =
    "id, chat_id, sender_id, text, server_sequence, status, moderation_category, moderated, created_at";

/// Result of a bulk status transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Receipt {
    pub updated: usize,
    pub up_to_sequence: i64,
}

pub struct NewChat<'a> {
    pub id: Uuid,
    pub match_id: Option<Uuid>,
    pub origin: ChatOrigin,
    pub pair_key: &'a str,
    pub participants: &'a [Uuid],
    pub now: DateTime<Utc>,
}

impl Database {
    pub fn get_chat(&self, id: Uuid) -> Result<Option<Chat>> {
        self.with_conn(|conn| query_chat(conn, id))
    }

    /// Active chats `user_id` participates in, most recently updated first.
    pub fn list_chats_for(&self, user_id: Uuid) -> Result<Vec<Chat>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id FROM chats c
                 JOIN chat_members m ON m.chat_id = c.id
                 WHERE m.user_id = ?1 AND c.active = 1
                 ORDER BY c.updated_at DESC",
            )?;
            let ids = stmt
                .query_map([user_id.to_string()], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let mut chats = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(chat) = query_chat(conn, parse_uuid(&id)?)? {
                    chats.push(chat);
                }
            }
            Ok(chats)
        })
    }

    /// Messages with `server_sequence > after`, ascending.
    pub fn messages_after(&self, chat_id: Uuid, after: i64, limit: u32) -> Result<Vec<Message>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM messages
                 WHERE chat_id = ?1 AND server_sequence > ?2
                 ORDER BY server_sequence ASC
                 LIMIT ?3",
                MESSAGE_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params![chat_id.to_string(), after, limit], map_message_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.into_iter().map(MessageRow::into_message).collect()
        })
    }

    /// The newest `limit` messages below `before` (or the newest overall),
    /// returned ascending.
    pub fn messages_before(&self, chat_id: Uuid, before: Option<i64>, limit: u32) -> Result<Vec<Message>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM messages
                 WHERE chat_id = ?1 AND server_sequence < ?2
                 ORDER BY server_sequence DESC
                 LIMIT ?3",
                MESSAGE_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(
                    rusqlite::params![chat_id.to_string(), before.unwrap_or(i64::MAX), limit],
                    map_message_row,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            let mut messages = rows
                .into_iter()
                .map(MessageRow::into_message)
                .collect::<Result<Vec<_>>>()?;
            messages.reverse();
            Ok(messages)
        })
    }

    pub fn count_messages(&self, chat_id: Uuid) -> Result<i64> {
        self.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE chat_id = ?1",
                [chat_id.to_string()],
                |row| row.get(0),
            )?)
        })
    }

    /// Unread count recomputed from the message log: messages from other
    /// participants that are not read and were sent after the user's last
    /// read. Must always equal the stored counter.
    pub fn derived_unread_count(&self, chat_id: Uuid, user_id: Uuid) -> Result<u32> {
        self.with_conn(|conn| {
            let member = query_member(conn, chat_id, user_id)?
                .ok_or_else(|| anyhow!("{} is not a member of chat {}", user_id, chat_id))?;
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM messages
                 WHERE chat_id = ?1 AND sender_id != ?2 AND status != 'read'
                   AND server_sequence > ?3",
                rusqlite::params![chat_id.to_string(), user_id.to_string(), member.last_read_sequence],
                |row| row.get(0),
            )?;
            Ok(count as u32)
        })
    }

    pub fn last_read_at(&self, chat_id: Uuid, user_id: Uuid) -> Result<Option<DateTime<Utc>>> {
        self.with_conn(|conn| {
            match query_member(conn, chat_id, user_id)?.and_then(|m| m.last_read_at) {
                Some(raw) => Ok(Some(parse_ts(&raw)?)),
                None => Ok(None),
            }
        })
    }
}

pub fn insert_chat(conn: &Connection, chat: &NewChat<'_>) -> Result<()> {
    let now = format_ts(chat.now);
    conn.execute(
        "INSERT INTO chats (id, match_id, origin, pair_key, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
        rusqlite::params![
            chat.id.to_string(),
            chat.match_id.map(|id| id.to_string()),
            chat.origin.as_str(),
            chat.pair_key,
            now,
        ],
    )?;
    for user_id in chat.participants {
        conn.execute(
            "INSERT INTO chat_members (chat_id, user_id) VALUES (?1, ?2)",
            [chat.id.to_string(), user_id.to_string()],
        )?;
    }
    Ok(())
}

pub fn query_chat(conn: &Connection, id: Uuid) -> Result<Option<Chat>> {
    let sql = format!("SELECT {} FROM chats WHERE id = ?1", CHAT_COLUMNS);
    match conn.query_row(&sql, [id.to_string()], map_chat_row).optional()? {
        Some(row) => Ok(Some(assemble_chat(conn, row)?)),
        None => Ok(None),
    }
}

pub fn query_chat_by_pair(conn: &Connection, origin: ChatOrigin, pair_key: &str) -> Result<Option<Chat>> {
    let sql = format!("SELECT {} FROM chats WHERE origin = ?1 AND pair_key = ?2", CHAT_COLUMNS);
    match conn
        .query_row(&sql, [origin.as_str(), pair_key], map_chat_row)
        .optional()?
    {
        Some(row) => Ok(Some(assemble_chat(conn, row)?)),
        None => Ok(None),
    }
}

pub fn set_chat_active(conn: &Connection, id: Uuid, active: bool, now: DateTime<Utc>) -> Result<()> {
    conn.execute(
        "UPDATE chats SET active = ?2, updated_at = ?3 WHERE id = ?1",
        rusqlite::params![id.to_string(), active, format_ts(now)],
    )?;
    Ok(())
}

pub fn chat_active(conn: &Connection, id: Uuid) -> Result<bool> {
    let active: Option<bool> = conn
        .query_row("SELECT active FROM chats WHERE id = ?1", [id.to_string()], |row| row.get(0))
        .optional()?;
    Ok(active.unwrap_or(false))
}

/// Claim the next sequence number for a chat. Must run inside the same
/// transaction that inserts the message.
pub fn claim_sequence(conn: &Connection, chat_id: Uuid) -> Result<i64> {
    let seq = conn.query_row(
        "UPDATE chats SET next_sequence = next_sequence + 1 WHERE id = ?1
         RETURNING next_sequence - 1",
        [chat_id.to_string()],
        |row| row.get(0),
    )?;
    Ok(seq)
}

/// Append a message, refresh the chat snapshot and bump every other
/// participant's unread counter.
pub fn append_message(conn: &Connection, message: &Message) -> Result<()> {
    let created_at = format_ts(message.created_at);
    conn.execute(
        "INSERT INTO messages (id, chat_id, sender_id, text, server_sequence, status, moderation_category, moderated, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        rusqlite::params![
            message.id.to_string(),
            message.chat_id.to_string(),
            message.sender_id.to_string(),
            message.text,
            message.server_sequence,
            message.status.as_str(),
            message.moderation_category.map(|c| c.as_str()),
            message.moderated,
            created_at,
        ],
    )?;
    conn.execute(
        "UPDATE chats SET last_text = ?2, last_sender_id = ?3, last_at = ?4, updated_at = ?4 WHERE id = ?1",
        rusqlite::params![
            message.chat_id.to_string(),
            message.text,
            message.sender_id.to_string(),
            created_at,
        ],
    )?;
    conn.execute(
        "UPDATE chat_members SET unread_count = unread_count + 1 WHERE chat_id = ?1 AND user_id != ?2",
        [message.chat_id.to_string(), message.sender_id.to_string()],
    )?;
    Ok(())
}

/// Mark everything addressed to `user_id` as read and zero their counter.
/// A second call finds nothing to update and leaves the member row alone.
pub fn mark_read(conn: &Connection, chat_id: Uuid, user_id: Uuid, now: DateTime<Utc>) -> Result<Receipt> {
    let chat = chat_id.to_string();
    let user = user_id.to_string();

    let updated = conn.execute(
        "UPDATE messages SET status = 'read'
         WHERE chat_id = ?1 AND sender_id != ?2 AND status != 'read'",
        [&chat, &user],
    )?;
    let up_to_sequence: i64 = conn.query_row(
        "SELECT COALESCE(MAX(server_sequence), 0) FROM messages WHERE chat_id = ?1 AND sender_id != ?2",
        [&chat, &user],
        |row| row.get(0),
    )?;

    let unread = query_member(conn, chat_id, user_id)?.map_or(0, |m| m.unread_count);
    if updated > 0 || unread > 0 {
        conn.execute(
            "UPDATE chat_members SET unread_count = 0, last_read_at = ?3, last_read_sequence = ?4
             WHERE chat_id = ?1 AND user_id = ?2",
            rusqlite::params![chat, user, format_ts(now), up_to_sequence],
        )?;
    }

    Ok(Receipt {
        updated,
        up_to_sequence,
    })
}

/// Forward-only `sent -> delivered` for messages addressed to `user_id`.
pub fn mark_delivered(conn: &Connection, chat_id: Uuid, user_id: Uuid) -> Result<Receipt> {
    let chat = chat_id.to_string();
    let user = user_id.to_string();

    let up_to_sequence: i64 = conn.query_row(
        "SELECT COALESCE(MAX(server_sequence), 0) FROM messages
         WHERE chat_id = ?1 AND sender_id != ?2 AND status = ?3",
        [chat.as_str(), user.as_str(), MessageStatus::Sent.as_str()],
        |row| row.get(0),
    )?;
    let updated = conn.execute(
        "UPDATE messages SET status = ?3 WHERE chat_id = ?1 AND sender_id != ?2 AND status = ?4",
        [
            chat.as_str(),
            user.as_str(),
            MessageStatus::Delivered.as_str(),
            MessageStatus::Sent.as_str(),
        ],
    )?;

    Ok(Receipt {
        updated,
        up_to_sequence,
    })
}

fn query_member(conn: &Connection, chat_id: Uuid, user_id: Uuid) -> Result<Option<ChatMemberRow>> {
    conn.query_row(
        "SELECT chat_id, user_id, unread_count, last_read_at, last_read_sequence
         FROM chat_members WHERE chat_id = ?1 AND user_id = ?2",
        [chat_id.to_string(), user_id.to_string()],
        map_member_row,
    )
    .optional()
}

fn assemble_chat(conn: &Connection, row: ChatRow) -> Result<Chat> {
    let mut stmt = conn.prepare(
        "SELECT chat_id, user_id, unread_count, last_read_at, last_read_sequence
         FROM chat_members WHERE chat_id = ?1 ORDER BY user_id",
    )?;
    let members = stmt
        .query_map([&row.id], map_member_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut participant_ids = Vec::with_capacity(members.len());
    let mut unread_counts = HashMap::with_capacity(members.len());
    for member in &members {
        let user_id = parse_uuid(&member.user_id)?;
        participant_ids.push(user_id);
        unread_counts.insert(user_id, member.unread_count);
    }

    let last_message = row.last_message()?;
    Ok(Chat {
        id: parse_uuid(&row.id)?,
        match_id: row.match_id.as_deref().map(parse_uuid).transpose()?,
        origin: ChatOrigin::parse(&row.origin)
            .ok_or_else(|| anyhow!("Corrupt chat origin '{}'", row.origin))?,
        participant_ids,
        last_message,
        unread_counts,
        active: row.active,
        created_at: parse_ts(&row.created_at)?,
        updated_at: parse_ts(&row.updated_at)?,
    })
}

fn map_chat_row(row: &Row<'_>) -> rusqlite::Result<ChatRow> {
    Ok(ChatRow {
        id: row.get(0)?,
        match_id: row.get(1)?,
        origin: row.get(2)?,
        pair_key: row.get(3)?,
        active: row.get(4)?,
        last_text: row.get(5)?,
        last_sender_id: row.get(6)?,
        last_at: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

fn map_member_row(row: &Row<'_>) -> rusqlite::Result<ChatMemberRow> {
    Ok(ChatMemberRow {
        chat_id: row.get(0)?,
        user_id: row.get(1)?,
        unread_count: row.get(2)?,
        last_read_at: row.get(3)?,
        last_read_sequence: row.get(4)?,
    })
}

fn map_message_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        chat_id: row.get(1)?,
        sender_id: row.get(2)?,
        text: row.get(3)?,
        server_sequence: row.get(4)?,
        status: row.get(5)?,
        moderation_category: row.get(6)?,
        moderated: row.get(7)?,
        created_at: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use kindle_types::pair_key;

    fn setup() -> (Database, Uuid, Uuid, Uuid) {
        let db = Database::open_in_memory().unwrap();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let chat_id = Uuid::new_v4();
        let key = pair_key(a, b);
        db.transaction(|tx| {
            insert_chat(
                tx,
                &NewChat {
                    id: chat_id,
                    match_id: None,
                    origin: ChatOrigin::Direct,
                    pair_key: &key,
                    participants: &[a, b],
                    now: Utc::now(),
                },
            )
        })
        .unwrap();
        (db, chat_id, a, b)
    }

    fn send(db: &Database, chat_id: Uuid, sender: Uuid, text: &str) -> Message {
        db.transaction(|tx| {
            let message = Message {
                id: Uuid::new_v4(),
                chat_id,
                sender_id: sender,
                text: text.into(),
                created_at: Utc::now(),
                server_sequence: claim_sequence(tx, chat_id)?,
                status: MessageStatus::Sent,
                moderation_category: None,
                moderated: false,
            };
            append_message(tx, &message)?;
            Ok(message)
        })
        .unwrap()
    }

    #[test]
    fn sequences_increase_per_chat() {
        let (db, chat_id, a, b) = setup();
        let first = send(&db, chat_id, a, "oi");
        let second = send(&db, chat_id, b, "oi!");
        assert_eq!(first.server_sequence, 1);
        assert_eq!(second.server_sequence, 2);

        let chat = db.get_chat(chat_id).unwrap().unwrap();
        assert_eq!(chat.last_message.unwrap().text, "oi!");
        assert_eq!(chat.unread_counts[&a], 1);
        assert_eq!(chat.unread_counts[&b], 1);
    }

    #[test]
    fn duplicate_sequence_is_transient() {
        let (db, chat_id, a, _) = setup();
        let first = send(&db, chat_id, a, "one");
        let err = db
            .transaction(|tx| {
                let dup = Message {
                    id: Uuid::new_v4(),
                    ..first.clone()
                };
                append_message(tx, &dup)
            })
            .unwrap_err();
        assert!(crate::is_transient(&err));
    }

    #[test]
    fn mark_read_zeroes_counter_once() {
        let (db, chat_id, a, b) = setup();
        send(&db, chat_id, a, "1");
        send(&db, chat_id, a, "2");
        assert_eq!(db.derived_unread_count(chat_id, b).unwrap(), 2);

        let receipt = db.transaction(|tx| mark_read(tx, chat_id, b, Utc::now())).unwrap();
        assert_eq!(receipt.updated, 2);
        assert_eq!(receipt.up_to_sequence, 2);
        let read_at = db.last_read_at(chat_id, b).unwrap();
        assert!(read_at.is_some());

        let again = db.transaction(|tx| mark_read(tx, chat_id, b, Utc::now())).unwrap();
        assert_eq!(again.updated, 0);
        assert_eq!(db.last_read_at(chat_id, b).unwrap(), read_at);
        assert_eq!(db.get_chat(chat_id).unwrap().unwrap().unread_counts[&b], 0);
    }

    #[test]
    fn delivered_never_downgrades_read() {
        let (db, chat_id, a, b) = setup();
        send(&db, chat_id, a, "1");
        db.transaction(|tx| mark_read(tx, chat_id, b, Utc::now())).unwrap();
        send(&db, chat_id, a, "2");

        let receipt = db.transaction(|tx| mark_delivered(tx, chat_id, b)).unwrap();
        assert_eq!(receipt.updated, 1);

        let messages = db.messages_after(chat_id, 0, 10).unwrap();
        assert_eq!(messages[0].status, MessageStatus::Read);
        assert_eq!(messages[1].status, MessageStatus::Delivered);
    }

    #[test]
    fn history_pages_are_ascending() {
        let (db, chat_id, a, _) = setup();
        for i in 0..5 {
            send(&db, chat_id, a, &i.to_string());
        }
        let page = db.messages_before(chat_id, Some(5), 2).unwrap();
        let seqs: Vec<i64> = page.iter().map(|m| m.server_sequence).collect();
        assert_eq!(seqs, vec![3, 4]);

        let tail = db.messages_after(chat_id, 3, 10).unwrap();
        assert_eq!(tail.len(), 2);
    }
}
