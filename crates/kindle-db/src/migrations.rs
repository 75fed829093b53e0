use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE profiles (
                id                  TEXT PRIMARY KEY,
                display_name        TEXT NOT NULL,
                birth_date          TEXT NOT NULL,
                gender              TEXT NOT NULL,
                gender_preference   TEXT NOT NULL,
                latitude            REAL,
                longitude           REAL,
                photos              TEXT NOT NULL DEFAULT '[]',
                show_me             INTEGER NOT NULL DEFAULT 1,
                premium_until       TEXT
            );

            -- Latest judgement per (actor, target); a later swipe overwrites.
            CREATE TABLE swipes (
                actor_id    TEXT NOT NULL,
                target_id   TEXT NOT NULL,
                kind        TEXT NOT NULL,
                created_at  TEXT NOT NULL,
                PRIMARY KEY (actor_id, target_id)
            );

            CREATE INDEX idx_swipes_target ON swipes(target_id, kind);

            -- pair_key is the conditional-write target: one match per pair, ever.
            CREATE TABLE matches (
                id              TEXT PRIMARY KEY,
                pair_key        TEXT NOT NULL UNIQUE,
                user_a          TEXT NOT NULL,
                user_b          TEXT NOT NULL,
                chat_id         TEXT NOT NULL,
                status          TEXT NOT NULL DEFAULT 'active',
                created_at      TEXT NOT NULL,
                terminated_by   TEXT,
                terminated_at   TEXT
            );

            CREATE INDEX idx_matches_user_a ON matches(user_a);
            CREATE INDEX idx_matches_user_b ON matches(user_b);

            CREATE TABLE chats (
                id              TEXT PRIMARY KEY,
                match_id        TEXT,
                origin          TEXT NOT NULL,
                pair_key        TEXT NOT NULL,
                active          INTEGER NOT NULL DEFAULT 1,
                last_text       TEXT,
                last_sender_id  TEXT,
                last_at         TEXT,
                next_sequence   INTEGER NOT NULL DEFAULT 1,
                created_at      TEXT NOT NULL,
                updated_at      TEXT NOT NULL,
                UNIQUE(origin, pair_key)
            );

            CREATE TABLE chat_members (
                chat_id             TEXT NOT NULL REFERENCES chats(id),
                user_id             TEXT NOT NULL,
                unread_count        INTEGER NOT NULL DEFAULT 0 CHECK (unread_count >= 0),
                last_read_at        TEXT,
                last_read_sequence  INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (chat_id, user_id)
            );

            CREATE INDEX idx_chat_members_user ON chat_members(user_id);

            CREATE TABLE messages (
                id                  TEXT PRIMARY KEY,
                chat_id             TEXT NOT NULL REFERENCES chats(id),
                sender_id           TEXT NOT NULL,
                text                TEXT NOT NULL,
                server_sequence     INTEGER NOT NULL,
                status              TEXT NOT NULL DEFAULT 'sent',
                moderation_category TEXT,
                moderated           INTEGER NOT NULL DEFAULT 0,
                created_at          TEXT NOT NULL,
                UNIQUE(chat_id, server_sequence)
            );

            CREATE TABLE quota_counters (
                chat_id     TEXT NOT NULL REFERENCES chats(id),
                user_id     TEXT NOT NULL,
                remaining   INTEGER NOT NULL CHECK (remaining >= 0),
                PRIMARY KEY (chat_id, user_id)
            );

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    if version < 2 {
        info!("Running migration v2 (daily like counters)");
        conn.execute_batch(
            "
            -- One row per user per UTC day; a new day starts from zero.
            CREATE TABLE daily_like_counters (
                user_id         TEXT NOT NULL,
                day             TEXT NOT NULL,
                likes_used      INTEGER NOT NULL DEFAULT 0 CHECK (likes_used >= 0),
                superlikes_used INTEGER NOT NULL DEFAULT 0 CHECK (superlikes_used >= 0),
                PRIMARY KEY (user_id, day)
            );

            INSERT INTO schema_version (version) VALUES (2);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
