//! Priority queue on a Redis sorted set.
//!
//! Jobs are members of one sorted set scored by [`QueueJob::score`];
//! `BZPOPMAX` hands the best-scored job to exactly one consumer. Failed jobs
//! go to a dead-letter stream.

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use tracing::{debug, info, warn};

use crate::backend::WorkQueue;
use crate::error::{QueueError, QueueResult};
use crate::job::QueueJob;

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub redis_url: String,
    /// Sorted set holding pending jobs
    pub queue_key: String,
    /// Dead letter queue stream name
    pub dlq_stream_name: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            queue_key: "vstream:jobs".to_string(),
            dlq_stream_name: "vstream:dlq".to_string(),
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            queue_key: std::env::var("QUEUE_KEY").unwrap_or(defaults.queue_key),
            dlq_stream_name: std::env::var("QUEUE_DLQ_STREAM").unwrap_or(defaults.dlq_stream_name),
        }
    }
}

/// Redis-backed [`WorkQueue`].
pub struct RedisQueue {
    client: redis::Client,
    config: QueueConfig,
}

impl RedisQueue {
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        Self::new(QueueConfig::from_env())
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    async fn connection(&self) -> QueueResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(QueueError::unreachable)
    }

    /// Get dead letter queue length.
    pub async fn dlq_len(&self) -> QueueResult<u64> {
        let mut conn = self.connection().await?;
        let len: u64 = redis::cmd("XLEN")
            .arg(&self.config.dlq_stream_name)
            .query_async(&mut conn)
            .await?;
        Ok(len)
    }

    async fn dead_letter_raw(&self, payload: &str, error: &str) -> QueueResult<()> {
        let mut conn = self.connection().await?;
        redis::cmd("XADD")
            .arg(&self.config.dlq_stream_name)
            .arg("*")
            .arg("job")
            .arg(payload)
            .arg("error")
            .arg(error)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| QueueError::DeadLetter(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl WorkQueue for RedisQueue {
    async fn push(&self, job: &QueueJob) -> QueueResult<()> {
        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(job)?;

        let added: u64 = conn
            .zadd(&self.config.queue_key, &payload, job.score())
            .await
            .map_err(|e| QueueError::push(job.job_id(), e))?;

        if added == 0 {
            // Identical payload already pending
            debug!(job_id = %job.job_id(), "Job already queued");
        }

        info!(
            job_id = %job.job_id(),
            video_id = %job.video_id(),
            kind = job.kind(),
            priority = job.priority(),
            "Enqueued job"
        );
        Ok(())
    }

    async fn pop(&self, wait: Duration) -> QueueResult<Option<QueueJob>> {
        let mut conn = self.connection().await?;

        let popped: Option<(String, String, f64)> = redis::cmd("BZPOPMAX")
            .arg(&self.config.queue_key)
            // A zero timeout would block forever
            .arg(wait.as_secs_f64().max(0.01))
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::pop(&self.config.queue_key, e))?;

        let Some((_, payload, _)) = popped else {
            return Ok(None);
        };

        match serde_json::from_str::<QueueJob>(&payload) {
            Ok(job) => {
                debug!(job_id = %job.job_id(), kind = job.kind(), "Dequeued job");
                Ok(Some(job))
            }
            Err(e) => {
                warn!(error = %e, "Unparseable job payload, moving to DLQ");
                self.dead_letter_raw(&payload, &format!("invalid payload: {e}"))
                    .await?;
                Ok(None)
            }
        }
    }

    async fn dead_letter(&self, job: &QueueJob, error: &str) -> QueueResult<()> {
        let payload = serde_json::to_string(job)?;
        self.dead_letter_raw(&payload, error).await?;
        warn!(job_id = %job.job_id(), error = %error, "Job moved to DLQ");
        Ok(())
    }

    async fn len(&self) -> QueueResult<u64> {
        let mut conn = self.connection().await?;
        let len: u64 = conn.zcard(&self.config.queue_key).await?;
        Ok(len)
    }

    async fn ping(&self) -> QueueResult<()> {
        let mut conn = self.connection().await?;
        redis::cmd("PING").query_async::<()>(&mut conn).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{EncodeResolutionJob, StartEncodingJob};
    use vstream_models::{Resolution, VideoId};

    #[test]
    fn test_config_defaults() {
        let config = QueueConfig::default();
        assert_eq!(config.queue_key, "vstream:jobs");
        assert_eq!(config.dlq_stream_name, "vstream:dlq");
    }

    // Requires a live Redis: REDIS_URL=redis://... cargo test -- --ignored
    #[tokio::test]
    #[ignore]
    async fn test_priority_order_against_redis() {
        let queue = RedisQueue::new(QueueConfig {
            queue_key: format!("vstream:test:{}", unique_suffix()),
            ..QueueConfig::from_env()
        })
        .unwrap();

        let low = QueueJob::EncodeResolution(EncodeResolutionJob::new(VideoId(1), Resolution::P1080, 6));
        let high = QueueJob::StartEncoding(StartEncodingJob::new(VideoId(1)));
        queue.push(&low).await.unwrap();
        queue.push(&high).await.unwrap();

        let first = queue.pop(Duration::from_secs(1)).await.unwrap().unwrap();
        assert_eq!(first, high);
        let second = queue.pop(Duration::from_secs(1)).await.unwrap().unwrap();
        assert_eq!(second, low);
        assert!(queue.pop(Duration::from_millis(100)).await.unwrap().is_none());
    }

    fn unique_suffix() -> i64 {
        chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
    }
}
