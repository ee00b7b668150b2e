//! Durable metadata cache (SQLite)
//!
//! Writer discipline: all writes go through one mutex-guarded read-write
//! connection, serializing them application-wide; callers block rather than
//! fail. Reads use a separate read-only connection so they are not held up
//! by unrelated writes.
//!
//! An expired row is indistinguishable from a missing one: `lookup` answers
//! `None` for both, and callers never special-case the difference.

mod schema;

use std::path::Path;
use std::sync::Mutex;

use chrono::{TimeZone, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::upstream::{Format, VideoMetadata};

pub struct MetadataStore {
    writer: Mutex<Connection>,
    /// Absent for in-memory stores, where reads share the writer.
    reader: Option<Mutex<Connection>>,
}

impl MetadataStore {
    /// Open or create the cache database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening metadata cache at {:?}", path);

        let writer = Connection::open(path).map_err(open_err)?;
        // WAL keeps readers unblocked while a write is in flight
        writer
            .execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(open_err)?;
        schema::init_schema(&writer)?;

        let reader =
            Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY).map_err(open_err)?;

        Ok(Self {
            writer: Mutex::new(writer),
            reader: Some(Mutex::new(reader)),
        })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        let writer = Connection::open_in_memory().map_err(open_err)?;
        schema::init_schema(&writer)?;
        Ok(Self {
            writer: Mutex::new(writer),
            reader: None,
        })
    }

    fn read_conn(&self) -> &Mutex<Connection> {
        self.reader.as_ref().unwrap_or(&self.writer)
    }

    /// Fetch a still-valid row, or `None` when it is missing or expired.
    pub fn lookup(&self, video_id: &str) -> Result<Option<VideoMetadata>> {
        let conn = self.read_conn().lock().map_err(lock_err)?;

        let row = conn
            .query_row(
                "SELECT title, description, uploader, duration, fetched_at, expires_at
                 FROM videos WHERE video_id = ?1",
                [video_id],
                |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        r.get::<_, String>(1)?,
                        r.get::<_, String>(2)?,
                        r.get::<_, i64>(3)?,
                        r.get::<_, i64>(4)?,
                        r.get::<_, i64>(5)?,
                    ))
                },
            )
            .optional()
            .map_err(query_err)?;

        let Some((title, description, uploader, duration, fetched_at, expires_at)) = row else {
            return Ok(None);
        };

        if Utc::now().timestamp() >= expires_at {
            debug!(video_id, "Cached row has expired");
            return Ok(None);
        }

        let mut stmt = conn
            .prepare(
                "SELECT label, container, url, size_hint
                 FROM formats WHERE video_id = ?1 ORDER BY pos",
            )
            .map_err(query_err)?;
        let formats = stmt
            .query_map([video_id], |r| {
                Ok(Format {
                    label: r.get(0)?,
                    container: r.get(1)?,
                    url: r.get(2)?,
                    size_hint: r.get(3)?,
                })
            })
            .map_err(query_err)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(query_err)?;

        Ok(Some(VideoMetadata {
            video_id: video_id.to_string(),
            title,
            description,
            uploader,
            duration_seconds: duration,
            formats,
            expires_at: Utc.timestamp_opt(expires_at, 0).single().unwrap_or_else(crate::upstream::epoch),
            fetched_at: Utc.timestamp_opt(fetched_at, 0).single().unwrap_or_else(crate::upstream::epoch),
        }))
    }

    /// Upsert a row, replacing any existing format list.
    pub fn store(&self, meta: &VideoMetadata) -> Result<()> {
        let mut conn = self.writer.lock().map_err(lock_err)?;
        let tx = conn.transaction().map_err(query_err)?;

        tx.execute(
            "INSERT OR REPLACE INTO videos
             (video_id, title, description, uploader, duration, fetched_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                meta.video_id,
                meta.title,
                meta.description,
                meta.uploader,
                meta.duration_seconds,
                meta.fetched_at.timestamp(),
                meta.expires_at.timestamp(),
            ],
        )
        .map_err(query_err)?;

        tx.execute("DELETE FROM formats WHERE video_id = ?1", [&meta.video_id])
            .map_err(query_err)?;

        for (pos, f) in meta.formats.iter().enumerate() {
            tx.execute(
                "INSERT INTO formats (video_id, pos, label, container, url, size_hint)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![meta.video_id, pos as i64, f.label, f.container, f.url, f.size_hint],
            )
            .map_err(query_err)?;
        }

        tx.commit().map_err(query_err)?;
        debug!(video_id = %meta.video_id, formats = meta.formats.len(), "Metadata row stored");
        Ok(())
    }

    /// Remove every row unconditionally. Credential checking happens at the
    /// service boundary, not here.
    pub fn clear(&self) -> Result<()> {
        let conn = self.writer.lock().map_err(lock_err)?;
        conn.execute("DELETE FROM formats", [])
            .map_err(query_err)?;
        conn.execute("DELETE FROM videos", [])
            .map_err(query_err)?;
        info!("Metadata cache cleared");
        Ok(())
    }
}

fn open_err(e: rusqlite::Error) -> Error {
    Error::PersistenceUnavailable(format!("Failed to open metadata cache: {e}"))
}

fn query_err(e: rusqlite::Error) -> Error {
    Error::PersistenceUnavailable(format!("Query failed: {e}"))
}

fn lock_err<T>(_: std::sync::PoisonError<T>) -> Error {
    Error::PersistenceUnavailable("Connection lock poisoned".to_string())
}
