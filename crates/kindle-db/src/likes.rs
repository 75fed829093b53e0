use anyhow::Result;
use chrono::NaiveDate;
use rusqlite::Connection;
use uuid::Uuid;

use crate::{Database, OptionalExt};

/// Positive swipes spent by one user on one day.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LikeUsage {
    pub likes: u32,
    pub superlikes: u32,
}

impl Database {
    pub fn like_usage(&self, user_id: Uuid, day: NaiveDate) -> Result<LikeUsage> {
        self.with_conn(|conn| query_usage(conn, user_id, day))
    }
}

fn day_key(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}

pub fn query_usage(conn: &Connection, user_id: Uuid, day: NaiveDate) -> Result<LikeUsage> {
    let usage = conn
        .query_row(
            "SELECT likes_used, superlikes_used FROM daily_like_counters WHERE user_id = ?1 AND day = ?2",
            [user_id.to_string(), day_key(day)],
            |row| {
                Ok(LikeUsage {
                    likes: row.get(0)?,
                    superlikes: row.get(1)?,
                })
            },
        )
        .optional()?;
    Ok(usage.unwrap_or_default())
}

/// Conditionally spend one like, plus one superlike when `superlike` is set.
/// A superlike counts against both limits. Returns the usage after the
/// charge, or `None` when a limit is already reached; nothing is written then.
pub fn try_consume_like(
    conn: &Connection,
    user_id: Uuid,
    day: NaiveDate,
    superlike: bool,
    like_limit: u32,
    superlike_limit: u32,
) -> Result<Option<LikeUsage>> {
    let (user, day) = (user_id.to_string(), day_key(day));
    conn.execute(
        "INSERT INTO daily_like_counters (user_id, day) VALUES (?1, ?2)
         ON CONFLICT(user_id, day) DO NOTHING",
        [&user, &day],
    )?;
    conn.query_row(
        "UPDATE daily_like_counters
         SET likes_used = likes_used + 1,
             superlikes_used = superlikes_used + ?3
         WHERE user_id = ?1 AND day = ?2
           AND likes_used < ?4
           AND (?3 = 0 OR superlikes_used < ?5)
         RETURNING likes_used, superlikes_used",
        rusqlite::params![user, day, superlike as i64, like_limit, superlike_limit],
        |row| {
            Ok(LikeUsage {
                likes: row.get(0)?,
                superlikes: row.get(1)?,
            })
        },
    )
    .optional()
}
