use super::{StoreSession, SubtitleStore, TABLE};
use crate::error::{IngestError, Result};
use crate::subtitle::SubtitleSegment;
use crate::video_id::VideoId;
use async_trait::async_trait;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Embedded store backed by a single SQLite connection.
///
/// Calls run on the blocking thread pool. Concurrent requests share the
/// connection and are serialized by its mutex.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| {
            IngestError::StoreUnavailable(format!("failed to open {}: {e}", path.display()))
        })?;
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA busy_timeout=5000;
            ",
        )
        .map_err(|e| IngestError::StoreUnavailable(e.to_string()))?;
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| IngestError::StoreUnavailable(e.to_string()))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// All rows stored for a video, ordered by language then start time.
    pub async fn rows(&self, video_id: &VideoId) -> Result<Vec<SubtitleSegment>> {
        let conn = self.conn.clone();
        let video_id = video_id.to_string();
        run_blocking(move || {
            let conn = lock(&conn)?;
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT language, start_ms, duration_ms, text FROM {TABLE}
                     WHERE video_id = ?1 ORDER BY language, start_ms"
                ))
                .map_err(read_error)?;
            let rows = stmt
                .query_map(params![video_id], |row| {
                    Ok(SubtitleSegment {
                        language: row.get(0)?,
                        start_ms: row.get::<_, i64>(1)? as u64,
                        duration_ms: row.get::<_, i64>(2)? as u64,
                        text: row.get(3)?,
                    })
                })
                .map_err(read_error)?;
            let rows = rows
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(read_error)?;
            Ok(rows)
        })
        .await
    }
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(&format!(
        "
        CREATE TABLE IF NOT EXISTS {TABLE} (
            video_id    TEXT    NOT NULL,
            language    TEXT    NOT NULL,
            start_ms    INTEGER NOT NULL,
            duration_ms INTEGER NOT NULL,
            text        TEXT    NOT NULL,
            PRIMARY KEY (video_id, language, start_ms)
        );
        "
    ))
    .map_err(|e| IngestError::StoreUnavailable(format!("failed to create schema: {e}")))
}

fn lock(conn: &Mutex<Connection>) -> Result<std::sync::MutexGuard<'_, Connection>> {
    conn.lock()
        .map_err(|_| IngestError::StoreUnavailable("sqlite connection poisoned".to_string()))
}

fn read_error(e: rusqlite::Error) -> IngestError {
    IngestError::StoreUnavailable(e.to_string())
}

async fn run_blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| IngestError::StoreWriteError(format!("sqlite task failed: {e}")))?
}

#[async_trait]
impl SubtitleStore for SqliteStore {
    async fn acquire(&self) -> Result<Box<dyn StoreSession>> {
        let conn = self.conn.clone();
        // Surface a poisoned connection before any write is attempted.
        run_blocking(move || {
            drop(lock(&conn)?);
            Ok(())
        })
        .await?;
        Ok(Box::new(SqliteSession {
            conn: self.conn.clone(),
        }))
    }

    async fn count_rows(&self, video_id: &VideoId) -> Result<u64> {
        let conn = self.conn.clone();
        let video_id = video_id.to_string();
        run_blocking(move || {
            let conn = lock(&conn)?;
            let count: i64 = conn
                .query_row(
                    &format!("SELECT COUNT(*) FROM {TABLE} WHERE video_id = ?1"),
                    params![video_id],
                    |row| row.get(0),
                )
                .map_err(read_error)?;
            Ok(count as u64)
        })
        .await
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }
}

struct SqliteSession {
    conn: Arc<Mutex<Connection>>,
}

#[async_trait]
impl StoreSession for SqliteSession {
    async fn insert_or_ignore(
        &mut self,
        video_id: &VideoId,
        segment: &SubtitleSegment,
    ) -> Result<bool> {
        let conn = self.conn.clone();
        let video_id = video_id.to_string();
        let segment = segment.clone();
        let start_ms = to_i64(segment.start_ms, "start_ms")?;
        let duration_ms = to_i64(segment.duration_ms, "duration_ms")?;

        let changed = run_blocking(move || {
            let conn = lock(&conn)?;
            let changed = conn
                .execute(
                    &format!(
                        "INSERT INTO {TABLE} (video_id, language, start_ms, duration_ms, text)
                         VALUES (?1, ?2, ?3, ?4, ?5)
                         ON CONFLICT (video_id, language, start_ms) DO NOTHING"
                    ),
                    params![video_id, segment.language, start_ms, duration_ms, segment.text],
                )
                .map_err(|e| IngestError::StoreWriteError(e.to_string()))?;
            Ok(changed)
        })
        .await?;

        debug!("sqlite insert changed {} row(s)", changed);
        Ok(changed > 0)
    }
}

pub(crate) fn to_i64(value: u64, field: &str) -> Result<i64> {
    i64::try_from(value)
        .map_err(|_| IngestError::StoreWriteError(format!("{field} value {value} exceeds i64 range")))
}
