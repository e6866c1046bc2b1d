pub mod persist;
pub mod postgres;
pub mod sqlite;

pub use persist::{persist_track, PersistReport};
pub use postgres::PostgresStore;
pub use sqlite::SqliteStore;

use crate::error::{IngestError, Result};
use crate::subtitle::SubtitleSegment;
use crate::video_id::VideoId;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

/// Columns and uniqueness key shared by every backend.
pub(crate) const TABLE: &str = "subtitles";

/// Durable home for subtitle rows keyed by `(video_id, language, start_ms)`.
#[async_trait]
pub trait SubtitleStore: Send + Sync {
    /// Borrow a connection for one request. Fails with `StoreUnavailable`.
    async fn acquire(&self) -> Result<Box<dyn StoreSession>>;

    /// Number of rows currently stored for a video.
    async fn count_rows(&self, video_id: &VideoId) -> Result<u64>;

    fn name(&self) -> &'static str;
}

/// A connection borrowed from a [`SubtitleStore`].
#[async_trait]
pub trait StoreSession: Send {
    /// Insert a row unless its key already exists. Returns `true` when a new
    /// row was created. Existing rows are never modified.
    async fn insert_or_ignore(
        &mut self,
        video_id: &VideoId,
        segment: &SubtitleSegment,
    ) -> Result<bool>;
}

/// Which backend a database URL points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    SqliteMemory,
    SqliteFile(PathBuf),
    Postgres(String),
}

impl StoreBackend {
    pub fn from_url(url: &str) -> Result<Self> {
        let url = url.trim();
        if url == "sqlite::memory:" || url == "sqlite://:memory:" {
            return Ok(StoreBackend::SqliteMemory);
        }
        if let Some(path) = url
            .strip_prefix("sqlite://")
            .or_else(|| url.strip_prefix("sqlite:"))
        {
            if path.is_empty() {
                return Err(IngestError::Config(
                    "sqlite URL is missing a path".to_string(),
                ));
            }
            return Ok(StoreBackend::SqliteFile(PathBuf::from(path)));
        }
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            return Ok(StoreBackend::Postgres(url.to_string()));
        }
        Err(IngestError::Config(format!(
            "Unsupported database URL '{url}'. Use sqlite://<path>, sqlite::memory: or postgres://..."
        )))
    }
}

/// Open the store a database URL points at and make sure the table exists.
pub async fn open_store(database_url: &str, pool_size: usize) -> Result<Arc<dyn SubtitleStore>> {
    let store: Arc<dyn SubtitleStore> = match StoreBackend::from_url(database_url)? {
        StoreBackend::SqliteMemory => Arc::new(SqliteStore::in_memory()?),
        StoreBackend::SqliteFile(path) => Arc::new(SqliteStore::open(&path)?),
        StoreBackend::Postgres(url) => Arc::new(PostgresStore::connect(&url, pool_size).await?),
    };
    Ok(store)
}
