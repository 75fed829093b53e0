use anyhow::Result;
use rusqlite::Connection;
use uuid::Uuid;

use crate::{Database, OptionalExt};

impl Database {
    pub fn quota_remaining(&self, chat_id: Uuid, user_id: Uuid) -> Result<Option<u32>> {
        self.with_conn(|conn| query_remaining(conn, chat_id, user_id))
    }
}

/// Give every participant of a new chat the same starting allotment.
pub fn seed_quota(conn: &Connection, chat_id: Uuid, user_ids: &[Uuid], allotment: u32) -> Result<()> {
    for user_id in user_ids {
        conn.execute(
            "INSERT INTO quota_counters (chat_id, user_id, remaining) VALUES (?1, ?2, ?3)
             ON CONFLICT(chat_id, user_id) DO NOTHING",
            rusqlite::params![chat_id.to_string(), user_id.to_string(), allotment],
        )?;
    }
    Ok(())
}

pub fn query_remaining(conn: &Connection, chat_id: Uuid, user_id: Uuid) -> Result<Option<u32>> {
    conn.query_row(
        "SELECT remaining FROM quota_counters WHERE chat_id = ?1 AND user_id = ?2",
        [chat_id.to_string(), user_id.to_string()],
        |row| row.get(0),
    )
    .optional()
}

/// Conditional decrement. Returns the new remaining count, or `None` when
/// the counter is missing or already at zero; nothing is written then.
pub fn try_consume(conn: &Connection, chat_id: Uuid, user_id: Uuid) -> Result<Option<u32>> {
    conn.query_row(
        "UPDATE quota_counters SET remaining = remaining - 1
         WHERE chat_id = ?1 AND user_id = ?2 AND remaining > 0
         RETURNING remaining",
        [chat_id.to_string(), user_id.to_string()],
        |row| row.get(0),
    )
    .optional()
}

/// Add `amount` messages to a counter, creating it when absent.
pub fn grant(conn: &Connection, chat_id: Uuid, user_id: Uuid, amount: u32) -> Result<u32> {
    let remaining = conn.query_row(
        "INSERT INTO quota_counters (chat_id, user_id, remaining) VALUES (?1, ?2, ?3)
         ON CONFLICT(chat_id, user_id) DO UPDATE SET remaining = remaining + excluded.remaining
         RETURNING remaining",
        rusqlite::params![chat_id.to_string(), user_id.to_string(), amount],
        |row| row.get(0),
    )?;
    Ok(remaining)
}
