use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row};
use uuid::Uuid;

use kindle_types::models::{SwipeAction, SwipeKind};

use crate::models::{SwipeRow, parse_uuid};
use crate::{Database, OptionalExt, format_ts};

impl Database {
    pub fn get_swipe(&self, actor_id: Uuid, target_id: Uuid) -> Result<Option<SwipeAction>> {
        self.with_conn(|conn| query_swipe(conn, actor_id, target_id))
    }

    /// Everyone `actor_id` has judged, whatever the verdict.
    pub fn judged_ids(&self, actor_id: Uuid) -> Result<Vec<Uuid>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT target_id FROM swipes WHERE actor_id = ?1")?;
            let ids = stmt
                .query_map([actor_id.to_string()], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            ids.iter().map(|id| parse_uuid(id)).collect()
        })
    }

    /// Like/superlike swipes targeting `user_id`, newest first. With
    /// `pending_only`, swipes that already turned into a match are skipped.
    pub fn positive_swipes_on(&self, user_id: Uuid, pending_only: bool) -> Result<Vec<SwipeAction>> {
        self.with_conn(|conn| {
            let sql = if pending_only {
                "SELECT s.actor_id, s.target_id, s.kind, s.created_at FROM swipes s
                 WHERE s.target_id = ?1 AND s.kind IN ('like', 'superlike')
                   AND NOT EXISTS (
                       SELECT 1 FROM matches m
                       WHERE (m.user_a = s.actor_id AND m.user_b = s.target_id)
                          OR (m.user_a = s.target_id AND m.user_b = s.actor_id)
                   )
                 ORDER BY s.created_at DESC"
            } else {
                "SELECT s.actor_id, s.target_id, s.kind, s.created_at FROM swipes s
                 WHERE s.target_id = ?1 AND s.kind IN ('like', 'superlike')
                 ORDER BY s.created_at DESC"
            };
            let mut stmt = conn.prepare(sql)?;
            let rows = stmt
                .query_map([user_id.to_string()], map_swipe_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.into_iter().map(SwipeRow::into_swipe).collect()
        })
    }
}

/// Record the latest judgement for (actor, target). A repeated swipe
/// overwrites the stored kind instead of adding a row.
pub fn upsert_swipe(
    conn: &Connection,
    actor_id: Uuid,
    target_id: Uuid,
    kind: SwipeKind,
    now: DateTime<Utc>,
) -> Result<SwipeAction> {
    conn.execute(
        "INSERT INTO swipes (actor_id, target_id, kind, created_at) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(actor_id, target_id) DO UPDATE SET kind = excluded.kind, created_at = excluded.created_at",
        rusqlite::params![actor_id.to_string(), target_id.to_string(), kind.as_str(), format_ts(now)],
    )?;
    Ok(SwipeAction {
        actor_id,
        target_id,
        kind,
        created_at: now,
    })
}

pub fn query_swipe(conn: &Connection, actor_id: Uuid, target_id: Uuid) -> Result<Option<SwipeAction>> {
    let row = conn
        .query_row(
            "SELECT actor_id, target_id, kind, created_at FROM swipes WHERE actor_id = ?1 AND target_id = ?2",
            [actor_id.to_string(), target_id.to_string()],
            map_swipe_row,
        )
        .optional()?;
    row.map(SwipeRow::into_swipe).transpose()
}

fn map_swipe_row(row: &Row<'_>) -> rusqlite::Result<SwipeRow> {
    Ok(SwipeRow {
        actor_id: row.get(0)?,
        target_id: row.get(1)?,
        kind: row.get(2)?,
        created_at: row.get(3)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_swipe_overwrites_kind() {
        let db = Database::open_in_memory().unwrap();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        db.transaction(|tx| upsert_swipe(tx, a, b, SwipeKind::Pass, Utc::now()))
            .unwrap();
        db.transaction(|tx| upsert_swipe(tx, a, b, SwipeKind::Like, Utc::now()))
            .unwrap();

        assert_eq!(db.get_swipe(a, b).unwrap().unwrap().kind, SwipeKind::Like);
        assert_eq!(db.judged_ids(a).unwrap(), vec![b]);
    }

    #[test]
    fn passes_are_not_positive() {
        let db = Database::open_in_memory().unwrap();
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        db.transaction(|tx| {
            upsert_swipe(tx, a, c, SwipeKind::Pass, Utc::now())?;
            upsert_swipe(tx, b, c, SwipeKind::Superlike, Utc::now())
        })
        .unwrap();

        let likes = db.positive_swipes_on(c, true).unwrap();
        assert_eq!(likes.len(), 1);
        assert_eq!(likes[0].actor_id, b);
    }
}
