//! Job executor.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use vstream_queue::QueueJob;

use crate::context::PipelineContext;
use crate::dispatcher::start_encoding;
use crate::encode::encode_resolution;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics;
use crate::recovery::recover_orphans;

/// Consumes the work queue with bounded concurrency.
pub struct JobExecutor {
    ctx: Arc<PipelineContext>,
    job_semaphore: Arc<Semaphore>,
    shutdown: watch::Sender<bool>,
    consumer_name: String,
}

impl JobExecutor {
    pub fn new(ctx: PipelineContext) -> Self {
        let job_semaphore = Arc::new(Semaphore::new(ctx.config.max_concurrent_jobs));
        let (shutdown, _) = watch::channel(false);
        let consumer_name = format!("worker-{}", Uuid::new_v4());

        Self {
            ctx: Arc::new(ctx),
            job_semaphore,
            shutdown,
            consumer_name,
        }
    }

    /// Recover orphaned encodes, then consume until shutdown.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(
            "Starting job executor '{}' with {} max concurrent jobs",
            self.consumer_name, self.ctx.config.max_concurrent_jobs
        );

        tokio::fs::create_dir_all(&self.ctx.config.work_dir).await?;

        // Must finish before the first pop
        recover_orphans(&self.ctx).await?;

        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            let permit = tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping executor");
                        break;
                    }
                    continue;
                }
                permit = Arc::clone(&self.job_semaphore).acquire_owned() => {
                    permit.map_err(|_| WorkerError::config_error("job semaphore closed"))?
                }
            };

            if *shutdown_rx.borrow() {
                break;
            }

            // Not raced against shutdown: a cancelled pop could lose a job
            match self.ctx.queue.pop(self.ctx.config.poll_wait).await {
                Ok(Some(job)) => {
                    let ctx = Arc::clone(&self.ctx);
                    tokio::spawn(async move {
                        let _permit = permit;
                        Self::execute_job(ctx, job).await;
                    });
                }
                Ok(None) => {}
                Err(e) => {
                    error!("Error consuming jobs: {}", e);
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
            }
        }

        info!("Waiting for in-flight jobs to complete...");
        if tokio::time::timeout(self.ctx.config.shutdown_timeout, self.wait_for_jobs())
            .await
            .is_err()
        {
            warn!("Shutdown timeout elapsed with jobs still running");
        }

        info!("Job executor stopped");
        Ok(())
    }

    /// Run one job; failures are logged and dead-lettered.
    async fn execute_job(ctx: Arc<PipelineContext>, job: QueueJob) {
        let logger = JobLogger::new(&job);
        let span = logger.create_span();

        async {
            debug!("Executing job");
            match process_job(&ctx, &job).await {
                Ok(()) => metrics::record_job_completed(job.kind()),
                Err(e) => {
                    logger.log_error(&e.to_string());
                    metrics::record_job_failed(job.kind(), e.kind());
                    if let Err(dlq_err) = ctx.queue.dead_letter(&job, &e.summary()).await {
                        error!("Failed to move job {} to DLQ: {}", job.job_id(), dlq_err);
                    }
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn wait_for_jobs(&self) {
        loop {
            if self.job_semaphore.available_permits() == self.ctx.config.max_concurrent_jobs {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

/// Route a job to its pipeline stage.
pub async fn process_job(ctx: &PipelineContext, job: &QueueJob) -> WorkerResult<()> {
    match job {
        QueueJob::StartEncoding(j) => start_encoding(ctx, j).await.map(|_| ()),
        QueueJob::EncodeResolution(j) => encode_resolution(ctx, j).await,
    }
}
