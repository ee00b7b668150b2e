//! Metadata cache schema

use rusqlite::Connection;

use crate::error::{Error, Result};

/// One row per content ID, plus the owned format list in insertion order.
/// Timestamps are unix seconds.
const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS videos (
    video_id    TEXT PRIMARY KEY,
    title       TEXT NOT NULL,
    description TEXT NOT NULL,
    uploader    TEXT NOT NULL,
    duration    INTEGER NOT NULL,
    fetched_at  INTEGER NOT NULL,
    expires_at  INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS formats (
    video_id  TEXT NOT NULL,
    pos       INTEGER NOT NULL,
    label     TEXT NOT NULL,
    container TEXT NOT NULL,
    url       TEXT NOT NULL,
    size_hint TEXT NOT NULL,
    PRIMARY KEY (video_id, pos),
    FOREIGN KEY (video_id) REFERENCES videos(video_id)
);
";

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)
        .map_err(|e| Error::PersistenceUnavailable(format!("Failed to create schema: {e}")))
}
