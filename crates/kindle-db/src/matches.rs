use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row};
use uuid::Uuid;

use kindle_types::models::{MatchRecord, MatchStatus};

use crate::models::{MatchRow, parse_uuid};
use crate::{Database, OptionalExt, format_ts};

const MATCH_COLUMNS: &str = "id, pair_key, user_a, user_b, chat_id, status, created_at";

impl Database {
    pub fn get_match(&self, id: Uuid) -> Result<Option<MatchRecord>> {
        self.with_conn(|conn| query_match(conn, id))
    }

    pub fn get_match_by_pair(&self, pair_key: &str) -> Result<Option<MatchRecord>> {
        self.with_conn(|conn| query_match_by_pair(conn, pair_key))
    }

    /// Active matches involving `user_id`, newest first.
    pub fn list_active_matches(&self, user_id: Uuid) -> Result<Vec<MatchRecord>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM matches
                 WHERE (user_a = ?1 OR user_b = ?1) AND status = 'active'
                 ORDER BY created_at DESC",
                MATCH_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([user_id.to_string()], map_match_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.into_iter().map(MatchRow::into_record).collect()
        })
    }

    /// Everyone `user_id` has ever matched with, including ended matches.
    pub fn matched_ids(&self, user_id: Uuid) -> Result<Vec<Uuid>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT CASE WHEN user_a = ?1 THEN user_b ELSE user_a END
                 FROM matches WHERE user_a = ?1 OR user_b = ?1",
            )?;
            let ids = stmt
                .query_map([user_id.to_string()], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            ids.iter().map(|id| parse_uuid(id)).collect()
        })
    }
}

/// Conditional write keyed by `pair_key`. Returns `false` when another
/// writer already owns the key; the caller must re-read and attach.
pub fn try_insert_match(conn: &Connection, record: &MatchRecord) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT INTO matches (id, pair_key, user_a, user_b, chat_id, status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(pair_key) DO NOTHING",
        rusqlite::params![
            record.id.to_string(),
            record.pair_key,
            record.user_ids[0].to_string(),
            record.user_ids[1].to_string(),
            record.chat_id.to_string(),
            record.status.as_str(),
            format_ts(record.created_at),
        ],
    )?;
    Ok(inserted == 1)
}

pub fn query_match(conn: &Connection, id: Uuid) -> Result<Option<MatchRecord>> {
    let sql = format!("SELECT {} FROM matches WHERE id = ?1", MATCH_COLUMNS);
    let row = conn.query_row(&sql, [id.to_string()], map_match_row).optional()?;
    row.map(MatchRow::into_record).transpose()
}

pub fn query_match_by_pair(conn: &Connection, pair_key: &str) -> Result<Option<MatchRecord>> {
    let sql = format!("SELECT {} FROM matches WHERE pair_key = ?1", MATCH_COLUMNS);
    let row = conn.query_row(&sql, [pair_key], map_match_row).optional()?;
    row.map(MatchRow::into_record).transpose()
}

/// Move an active match to `terminated`. Returns `false` if it already was.
pub fn terminate_match(conn: &Connection, id: Uuid, by: Uuid, now: DateTime<Utc>) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE matches SET status = ?2, terminated_by = ?3, terminated_at = ?4
         WHERE id = ?1 AND status = 'active'",
        rusqlite::params![
            id.to_string(),
            MatchStatus::Terminated.as_str(),
            by.to_string(),
            format_ts(now),
        ],
    )?;
    Ok(changed == 1)
}

fn map_match_row(row: &Row<'_>) -> rusqlite::Result<MatchRow> {
    Ok(MatchRow {
        id: row.get(0)?,
        pair_key: row.get(1)?,
        user_a: row.get(2)?,
        user_b: row.get(3)?,
        chat_id: row.get(4)?,
        status: row.get(5)?,
        created_at: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use kindle_types::pair_key;

    fn record(a: Uuid, b: Uuid) -> MatchRecord {
        MatchRecord {
            id: Uuid::new_v4(),
            pair_key: pair_key(a, b),
            user_ids: [a, b],
            chat_id: Uuid::new_v4(),
            status: MatchStatus::Active,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn second_insert_for_same_pair_is_rejected() {
        let db = Database::open_in_memory().unwrap();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let first = record(a, b);
        let second = record(b, a);

        assert!(db.transaction(|tx| try_insert_match(tx, &first)).unwrap());
        assert!(!db.transaction(|tx| try_insert_match(tx, &second)).unwrap());

        let stored = db.get_match_by_pair(&pair_key(a, b)).unwrap().unwrap();
        assert_eq!(stored.id, first.id);
    }

    #[test]
    fn terminate_is_one_shot() {
        let db = Database::open_in_memory().unwrap();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let m = record(a, b);
        db.transaction(|tx| try_insert_match(tx, &m)).unwrap();

        assert!(db.transaction(|tx| terminate_match(tx, m.id, a, Utc::now())).unwrap());
        assert!(!db.transaction(|tx| terminate_match(tx, m.id, a, Utc::now())).unwrap());
        assert!(db.list_active_matches(a).unwrap().is_empty());
        assert_eq!(db.matched_ids(b).unwrap(), vec![a]);
    }
}
