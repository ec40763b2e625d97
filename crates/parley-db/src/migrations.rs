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
        info!("Running migration v1 (transcript schema)");
        conn.execute_batch(
            "
            BEGIN;

            CREATE TABLE IF NOT EXISTS users (
                id          TEXT PRIMARY KEY,
                created_at  TEXT NOT NULL DEFAULT (datetime('now'))
            );

            -- One row per (user, participant); the upserts depend on this key.
            CREATE TABLE IF NOT EXISTS participants (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id         TEXT NOT NULL REFERENCES users(id),
                participant_id  TEXT NOT NULL,
                created_at      TEXT NOT NULL DEFAULT (datetime('now')),
                UNIQUE(user_id, participant_id)
            );

            -- seq is the append order of a transcript.
            CREATE TABLE IF NOT EXISTS transcript_entries (
                seq              INTEGER PRIMARY KEY AUTOINCREMENT,
                relationship_id  INTEGER NOT NULL REFERENCES participants(id),
                sender           TEXT NOT NULL,
                receiver         TEXT NOT NULL,
                text             TEXT NOT NULL,
                time             TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_entries_relationship
                ON transcript_entries(relationship_id, seq);

            INSERT INTO schema_version (version) VALUES (1);

            COMMIT;
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
