//! PostgreSQL coordination store.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use tracing::{debug, info};
use vstream_models::{
    CurrentEncode, MarkerId, NewVideo, Resolution, VariantId, Video, VideoId, VideoVariant,
};

use crate::error::{DbError, DbResult};
use crate::store::{CoordinationStore, JobTally};

/// Database connection pool configuration.
#[derive(Clone)]
pub struct DbConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
    /// Apply bundled migrations on connect
    pub run_migrations: bool,
}

impl fmt::Debug for DbConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbConfig")
            .field("database_url", &"[REDACTED]")
            .field("max_connections", &self.max_connections)
            .field("acquire_timeout_secs", &self.acquire_timeout_secs)
            .field("run_migrations", &self.run_migrations)
            .finish()
    }
}

impl DbConfig {
    /// Create config from environment variables.
    pub fn from_env() -> DbResult<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| DbError::Config("DATABASE_URL not set".to_string()))?;

        Ok(Self {
            database_url,
            max_connections: std::env::var("DB_MAX_CONNECTIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
            acquire_timeout_secs: std::env::var("DB_ACQUIRE_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
            run_migrations: std::env::var("DB_RUN_MIGRATIONS")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(true),
        })
    }
}

const VIDEO_COLUMNS: &str = "id, title, description, source_key, processing, dash_ready, \
     manifest_key, dash_base_path, duration, has_audio, encode_started_at, expected_jobs, \
     finished_jobs, created_at";

const VARIANT_COLUMNS: &str = "id, video_id, resolution, file_key, last_error, created_at";

#[derive(sqlx::FromRow)]
struct VideoRow {
    id: i64,
    title: String,
    description: String,
    source_key: String,
    processing: bool,
    dash_ready: bool,
    manifest_key: Option<String>,
    dash_base_path: Option<String>,
    duration: Option<f64>,
    has_audio: Option<bool>,
    encode_started_at: Option<DateTime<Utc>>,
    expected_jobs: i32,
    finished_jobs: i32,
    created_at: DateTime<Utc>,
}

impl From<VideoRow> for Video {
    fn from(r: VideoRow) -> Self {
        Video {
            id: VideoId(r.id),
            title: r.title,
            description: r.description,
            source_key: r.source_key,
            processing: r.processing,
            dash_ready: r.dash_ready,
            manifest_key: r.manifest_key,
            dash_base_path: r.dash_base_path,
            duration: r.duration,
            has_audio: r.has_audio,
            encode_started_at: r.encode_started_at,
            expected_jobs: r.expected_jobs,
            finished_jobs: r.finished_jobs,
            created_at: r.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct VariantRow {
    id: i64,
    video_id: i64,
    resolution: String,
    file_key: Option<String>,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<VariantRow> for VideoVariant {
    type Error = DbError;

    fn try_from(r: VariantRow) -> DbResult<Self> {
        let resolution: Resolution = r
            .resolution
            .parse()
            .map_err(|e: vstream_models::ResolutionParseError| DbError::decode(e.to_string()))?;
        Ok(VideoVariant {
            id: VariantId(r.id),
            video_id: VideoId(r.video_id),
            resolution,
            file_key: r.file_key,
            last_error: r.last_error,
            created_at: r.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct MarkerRow {
    id: i64,
    variant_id: Option<i64>,
    started_at: DateTime<Utc>,
}

impl From<MarkerRow> for CurrentEncode {
    fn from(r: MarkerRow) -> Self {
        CurrentEncode {
            id: MarkerId(r.id),
            variant_id: r.variant_id.map(VariantId),
            started_at: r.started_at,
        }
    }
}

/// [`CoordinationStore`] on PostgreSQL.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect and, if configured, apply migrations.
    pub async fn connect(config: &DbConfig) -> DbResult<Self> {
        info!(max_connections = config.max_connections, "Connecting to PostgreSQL");

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect(&config.database_url)
            .await?;

        let store = Self { pool };
        if config.run_migrations {
            store.migrate().await?;
        }
        Ok(store)
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> DbResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations applied");
        Ok(())
    }

    /// Variant update + marker delete + tally increment in one transaction.
    async fn settle_variant(
        &self,
        mut tx: Transaction<'_, Postgres>,
        variant_video: Option<(i64,)>,
        marker_id: MarkerId,
    ) -> DbResult<Option<JobTally>> {
        sqlx::query("DELETE FROM current_encodes WHERE id = $1")
            .bind(marker_id.get())
            .execute(&mut *tx)
            .await?;

        let tally = match variant_video {
            Some((video_id,)) => {
                let (finished, expected): (i32, i32) = sqlx::query_as(
                    "UPDATE videos SET finished_jobs = finished_jobs + 1 \
                     WHERE id = $1 RETURNING finished_jobs, expected_jobs",
                )
                .bind(video_id)
                .fetch_one(&mut *tx)
                .await?;
                Some(JobTally { finished, expected })
            }
            None => None,
        };

        tx.commit().await?;
        Ok(tally)
    }
}

#[async_trait]
impl CoordinationStore for PgStore {
    async fn create_video(&self, new: NewVideo) -> DbResult<Video> {
        let row: VideoRow = sqlx::query_as(&format!(
            "INSERT INTO videos (title, description, source_key) VALUES ($1, $2, $3) \
             RETURNING {VIDEO_COLUMNS}"
        ))
        .bind(&new.title)
        .bind(&new.description)
        .bind(&new.source_key)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    async fn get_video(&self, id: VideoId) -> DbResult<Option<Video>> {
        let row: Option<VideoRow> =
            sqlx::query_as(&format!("SELECT {VIDEO_COLUMNS} FROM videos WHERE id = $1"))
                .bind(id.get())
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(Into::into))
    }

    async fn delete_video(&self, id: VideoId) -> DbResult<Option<(Video, Vec<VideoVariant>)>> {
        let mut tx = self.pool.begin().await?;

        let variants: Vec<VariantRow> = sqlx::query_as(&format!(
            "DELETE FROM video_variants WHERE video_id = $1 RETURNING {VARIANT_COLUMNS}"
        ))
        .bind(id.get())
        .fetch_all(&mut *tx)
        .await?;

        let video: Option<VideoRow> = sqlx::query_as(&format!(
            "DELETE FROM videos WHERE id = $1 RETURNING {VIDEO_COLUMNS}"
        ))
        .bind(id.get())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(video) = video else {
            tx.rollback().await?;
            return Ok(None);
        };
        tx.commit().await?;

        let variants = variants
            .into_iter()
            .map(VideoVariant::try_from)
            .collect::<DbResult<Vec<_>>>()?;
        Ok(Some((video.into(), variants)))
    }

    async fn begin_encoding(&self, id: VideoId) -> DbResult<bool> {
        let mut tx = self.pool.begin().await?;

        let row: Option<(bool,)> =
            sqlx::query_as("SELECT processing FROM videos WHERE id = $1 FOR UPDATE")
                .bind(id.get())
                .fetch_optional(&mut *tx)
                .await?;

        let Some((processing,)) = row else {
            tx.rollback().await?;
            return Err(DbError::not_found(format!("video {id}")));
        };

        if processing {
            tx.rollback().await?;
            debug!(video_id = %id, "Encode already running");
            return Ok(false);
        }

        sqlx::query(
            "UPDATE videos SET processing = TRUE, expected_jobs = 0, finished_jobs = 0, \
             encode_started_at = now() WHERE id = $1",
        )
        .bind(id.get())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn plan_encodes(&self, id: VideoId, expected: i32) -> DbResult<()> {
        let result = sqlx::query("UPDATE videos SET expected_jobs = $2 WHERE id = $1")
            .bind(id.get())
            .bind(expected)
            .execute(&self.pool)
            .await?;
        require_row(result.rows_affected(), id)
    }

    async fn record_probe(&self, id: VideoId, duration: f64, has_audio: bool) -> DbResult<()> {
        let result = sqlx::query("UPDATE videos SET duration = $2, has_audio = $3 WHERE id = $1")
            .bind(id.get())
            .bind(duration)
            .bind(has_audio)
            .execute(&self.pool)
            .await?;
        require_row(result.rows_affected(), id)
    }

    async fn finish_encode_jobs(&self, id: VideoId, count: i32) -> DbResult<JobTally> {
        let row: Option<(i32, i32)> = sqlx::query_as(
            "UPDATE videos SET finished_jobs = finished_jobs + $2 \
             WHERE id = $1 RETURNING finished_jobs, expected_jobs",
        )
        .bind(id.get())
        .bind(count)
        .fetch_optional(&self.pool)
        .await?;

        let (finished, expected) = row.ok_or_else(|| DbError::not_found(format!("video {id}")))?;
        Ok(JobTally { finished, expected })
    }

    async fn mark_dash_ready(&self, id: VideoId, manifest_key: &str, base_path: &str) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE videos SET manifest_key = $2, dash_base_path = $3, dash_ready = TRUE, \
             processing = FALSE WHERE id = $1",
        )
        .bind(id.get())
        .bind(manifest_key)
        .bind(base_path)
        .execute(&self.pool)
        .await?;
        require_row(result.rows_affected(), id)
    }

    async fn end_encoding(&self, id: VideoId) -> DbResult<()> {
        let result = sqlx::query("UPDATE videos SET processing = FALSE WHERE id = $1")
            .bind(id.get())
            .execute(&self.pool)
            .await?;
        require_row(result.rows_affected(), id)
    }

    async fn create_variant(&self, video_id: VideoId, resolution: Resolution) -> DbResult<VideoVariant> {
        let row: VariantRow = sqlx::query_as(&format!(
            "INSERT INTO video_variants (video_id, resolution) VALUES ($1, $2) \
             RETURNING {VARIANT_COLUMNS}"
        ))
        .bind(video_id.get())
        .bind(resolution.as_str())
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }

    async fn get_variant(&self, id: VariantId) -> DbResult<Option<VideoVariant>> {
        let row: Option<VariantRow> = sqlx::query_as(&format!(
            "SELECT {VARIANT_COLUMNS} FROM video_variants WHERE id = $1"
        ))
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn list_variants(&self, video_id: VideoId) -> DbResult<Vec<VideoVariant>> {
        let rows: Vec<VariantRow> = sqlx::query_as(&format!(
            "SELECT {VARIANT_COLUMNS} FROM video_variants WHERE video_id = $1 ORDER BY id"
        ))
        .bind(video_id.get())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn complete_variant(
        &self,
        variant_id: VariantId,
        marker_id: MarkerId,
        file_key: &str,
    ) -> DbResult<Option<JobTally>> {
        let mut tx = self.pool.begin().await?;
        let video: Option<(i64,)> = sqlx::query_as(
            "UPDATE video_variants SET file_key = $2, last_error = NULL \
             WHERE id = $1 RETURNING video_id",
        )
        .bind(variant_id.get())
        .bind(file_key)
        .fetch_optional(&mut *tx)
        .await?;
        self.settle_variant(tx, video, marker_id).await
    }

    async fn fail_variant(
        &self,
        variant_id: VariantId,
        marker_id: MarkerId,
        error: &str,
    ) -> DbResult<Option<JobTally>> {
        let mut tx = self.pool.begin().await?;
        let video: Option<(i64,)> = sqlx::query_as(
            "UPDATE video_variants SET last_error = $2 WHERE id = $1 RETURNING video_id",
        )
        .bind(variant_id.get())
        .bind(error)
        .fetch_optional(&mut *tx)
        .await?;
        self.settle_variant(tx, video, marker_id).await
    }

    async fn delete_variant(&self, id: VariantId) -> DbResult<Option<VideoVariant>> {
        let row: Option<VariantRow> = sqlx::query_as(&format!(
            "DELETE FROM video_variants WHERE id = $1 RETURNING {VARIANT_COLUMNS}"
        ))
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn create_marker(&self, variant_id: VariantId) -> DbResult<CurrentEncode> {
        let row: MarkerRow = sqlx::query_as(
            "INSERT INTO current_encodes (variant_id) VALUES ($1) \
             RETURNING id, variant_id, started_at",
        )
        .bind(variant_id.get())
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    async fn delete_marker(&self, id: MarkerId) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM current_encodes WHERE id = $1")
            .bind(id.get())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_markers(&self) -> DbResult<Vec<CurrentEncode>> {
        let rows: Vec<MarkerRow> =
            sqlx::query_as("SELECT id, variant_id, started_at FROM current_encodes ORDER BY id")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn claim_orphan(&self, marker_id: MarkerId) -> DbResult<Option<VideoVariant>> {
        let mut tx = self.pool.begin().await?;
        let marker: Option<(Option<i64>,)> =
            sqlx::query_as("SELECT variant_id FROM current_encodes WHERE id = $1")
                .bind(marker_id.get())
                .fetch_optional(&mut *tx)
                .await?;
        let Some((variant_id,)) = marker else {
            return Ok(None);
        };

        // Variant before marker, the same lock order as settle_variant. A
        // settle racing this claim commits first and leaves file_key set or
        // the marker gone.
        let claimed: Option<VariantRow> = match variant_id {
            Some(id) => {
                sqlx::query_as(&format!(
                    "DELETE FROM video_variants WHERE id = $1 AND file_key IS NULL \
                     RETURNING {VARIANT_COLUMNS}"
                ))
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?
            }
            None => None,
        };

        let released = sqlx::query("DELETE FROM current_encodes WHERE id = $1")
            .bind(marker_id.get())
            .execute(&mut *tx)
            .await?
            .rows_affected()
            > 0;
        if !released {
            // Settled meanwhile; dropping the transaction rolls the claim back
            return Ok(None);
        }

        tx.commit().await?;
        debug!(marker_id = %marker_id, claimed = claimed.is_some(), "Orphan marker claimed");
        claimed.map(TryInto::try_into).transpose()
    }

    async fn ping(&self) -> DbResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

fn require_row(rows_affected: u64, id: VideoId) -> DbResult<()> {
    if rows_affected == 0 {
        Err(DbError::not_found(format!("video {id}")))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_debug_redacts_url() {
        let config = DbConfig {
            database_url: "postgres://user:secret@db/vstream".into(),
            max_connections: 5,
            acquire_timeout_secs: 3,
            run_migrations: true,
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("REDACTED"));
    }

    // Requires a live database: DATABASE_URL=postgres://... cargo test -- --ignored
    #[tokio::test]
    #[ignore]
    async fn test_begin_encoding_against_postgres() {
        let config = DbConfig::from_env().unwrap();
        let store = PgStore::connect(&config).await.unwrap();
        let video = store
            .create_video(NewVideo {
                title: "pg".into(),
                description: String::new(),
                source_key: "videos/originals/pg.mp4".into(),
            })
            .await
            .unwrap();

        assert!(store.begin_encoding(video.id).await.unwrap());
        assert!(!store.begin_encoding(video.id).await.unwrap());
        store.delete_video(video.id).await.unwrap();
    }

    #[tokio::test]
    #[ignore]
    async fn test_claim_orphan_against_postgres() {
        let config = DbConfig::from_env().unwrap();
        let store = PgStore::connect(&config).await.unwrap();
        let video = store
            .create_video(NewVideo {
                title: "pg-claim".into(),
                description: String::new(),
                source_key: "videos/originals/pg.mp4".into(),
            })
            .await
            .unwrap();

        let settled = store.create_variant(video.id, Resolution::P360).await.unwrap();
        let settled_marker = store.create_marker(settled.id).await.unwrap();
        store
            .complete_variant(settled.id, settled_marker.id, "dash/pg/rendition_360p_1.webm")
            .await
            .unwrap();
        assert!(store.claim_orphan(settled_marker.id).await.unwrap().is_none());
        assert!(store.get_variant(settled.id).await.unwrap().is_some());

        let orphan = store.create_variant(video.id, Resolution::P480).await.unwrap();
        let orphan_marker = store.create_marker(orphan.id).await.unwrap();
        let claimed = store.claim_orphan(orphan_marker.id).await.unwrap().unwrap();
        assert_eq!(claimed.id, orphan.id);
        assert!(store.get_variant(orphan.id).await.unwrap().is_none());

        store.delete_video(video.id).await.unwrap();
    }
}
