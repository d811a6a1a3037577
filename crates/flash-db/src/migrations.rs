use rusqlite::Connection;
use tracing::info;

use crate::error::Result;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Message DB: running migration v1 (initial schema)");
        conn.execute_batch(
            "
            BEGIN;

            -- location and reactions hold the flat encodings from codecs.rs
            CREATE TABLE messages (
                id          TEXT PRIMARY KEY,
                room_id     TEXT NOT NULL,
                content     TEXT NOT NULL DEFAULT '',
                sender_id   TEXT NOT NULL,
                sender_name TEXT NOT NULL,
                created_at  INTEGER NOT NULL,
                type        TEXT NOT NULL,
                read        INTEGER NOT NULL DEFAULT 0,
                delivered   INTEGER NOT NULL DEFAULT 0,
                reply_to    TEXT,
                image       TEXT,
                audio       TEXT,
                location    TEXT,
                duration    INTEGER,
                reactions   TEXT NOT NULL DEFAULT ''
            );

            CREATE INDEX idx_messages_room_created
                ON messages(room_id, created_at);

            INSERT INTO schema_version (version) VALUES (1);

            COMMIT;
            ",
        )?;
    }

    if version < 2 {
        info!("Message DB: running migration v2 (sync state)");
        conn.execute_batch(
            "
            BEGIN;

            -- newest remote created_at pulled into each room, in epoch millis
            CREATE TABLE sync_state (
                room_id   TEXT PRIMARY KEY,
                watermark INTEGER NOT NULL
            );

            INSERT INTO schema_version (version) VALUES (2);

            COMMIT;
            ",
        )?;
    }

    info!("Message DB migrations complete (schema v2)");
    Ok(())
}
