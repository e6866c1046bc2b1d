use super::sqlite::to_i64;
use super::{StoreSession, SubtitleStore, TABLE};
use crate::error::{IngestError, Result};
use crate::subtitle::SubtitleSegment;
use crate::video_id::VideoId;
use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use tokio_postgres::NoTls;
use tracing::{debug, info};

/// PostgreSQL store; each request borrows its own pooled connection.
pub struct PostgresStore {
    pool: Pool,
}

impl PostgresStore {
    /// Build the pool, check connectivity and create the table if missing.
    pub async fn connect(database_url: &str, pool_size: usize) -> Result<Self> {
        let pg_config: tokio_postgres::Config = database_url
            .parse()
            .map_err(|e| IngestError::Config(format!("invalid postgres URL: {e}")))?;
        let mut manager_config = ManagerConfig::default();
        manager_config.recycling_method = RecyclingMethod::Fast;
        let manager = Manager::from_config(pg_config, NoTls, manager_config);
        let pool = Pool::builder(manager)
            .max_size(pool_size.max(1))
            .build()
            .map_err(|e| IngestError::Config(format!("failed to build connection pool: {e}")))?;

        let store = Self { pool };
        store.init_schema().await?;
        info!("Connected to PostgreSQL (pool size {})", pool_size.max(1));
        Ok(store)
    }

    async fn client(&self) -> Result<Object> {
        self.pool
            .get()
            .await
            .map_err(|e| IngestError::StoreUnavailable(e.to_string()))
    }

    async fn init_schema(&self) -> Result<()> {
        let client = self.client().await?;
        client
            .batch_execute(&format!(
                "
                CREATE TABLE IF NOT EXISTS {TABLE} (
                    video_id    TEXT   NOT NULL,
                    language    TEXT   NOT NULL,
                    start_ms    BIGINT NOT NULL,
                    duration_ms BIGINT NOT NULL,
                    text        TEXT   NOT NULL,
                    PRIMARY KEY (video_id, language, start_ms)
                );
                "
            ))
            .await
            .map_err(|e| IngestError::StoreUnavailable(format!("failed to create schema: {e}")))
    }
}

#[async_trait]
impl SubtitleStore for PostgresStore {
    async fn acquire(&self) -> Result<Box<dyn StoreSession>> {
        let client = self.client().await?;
        Ok(Box::new(PostgresSession { client }))
    }

    async fn count_rows(&self, video_id: &VideoId) -> Result<u64> {
        let client = self.client().await?;
        let row = client
            .query_one(
                &format!("SELECT COUNT(*) FROM {TABLE} WHERE video_id = $1"),
                &[&video_id.as_str()],
            )
            .await
            .map_err(|e| IngestError::StoreUnavailable(e.to_string()))?;
        let count: i64 = row.get(0);
        Ok(count as u64)
    }

    fn name(&self) -> &'static str {
        "postgres"
    }
}

struct PostgresSession {
    client: Object,
}

#[async_trait]
impl StoreSession for PostgresSession {
    async fn insert_or_ignore(
        &mut self,
        video_id: &VideoId,
        segment: &SubtitleSegment,
    ) -> Result<bool> {
        let start_ms = to_i64(segment.start_ms, "start_ms")?;
        let duration_ms = to_i64(segment.duration_ms, "duration_ms")?;

        let statement = self
            .client
            .prepare_cached(&format!(
                "INSERT INTO {TABLE} (video_id, language, start_ms, duration_ms, text) \
                 VALUES ($1, $2, $3, $4, $5) \
                 ON CONFLICT (video_id, language, start_ms) DO NOTHING"
            ))
            .await
            .map_err(|e| IngestError::StoreWriteError(e.to_string()))?;

        let changed = self
            .client
            .execute(
                &statement,
                &[
                    &video_id.as_str(),
                    &segment.language,
                    &start_ms,
                    &duration_ms,
                    &segment.text,
                ],
            )
            .await
            .map_err(|e| IngestError::StoreWriteError(e.to_string()))?;

        debug!("postgres insert changed {} row(s)", changed);
        Ok(changed > 0)
    }
}
