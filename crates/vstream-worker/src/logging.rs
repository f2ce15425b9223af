//! Structured job logging.
//!
//! Every lifecycle event of a queue job carries the job id, job kind and
//! video id as fields, so a single video's encode can be followed across
//! workers.

use tracing::{error, info, warn, Span};
use vstream_models::VideoId;
use vstream_queue::QueueJob;

/// Logger bound to one queue job.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    operation: &'static str,
    video_id: VideoId,
}

impl JobLogger {
    pub fn new(job: &QueueJob) -> Self {
        Self {
            job_id: job.job_id().to_string(),
            operation: job.kind(),
            video_id: job.video_id(),
        }
    }

    /// Logger for work that is not driven by a queue job, such as recovery.
    pub fn for_operation(operation: &'static str, video_id: VideoId) -> Self {
        Self {
            job_id: String::from("-"),
            operation,
            video_id,
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            operation = self.operation,
            video_id = %self.video_id,
            "Job started: {}", message
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            operation = self.operation,
            video_id = %self.video_id,
            "Job progress: {}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            job_id = %self.job_id,
            operation = self.operation,
            video_id = %self.video_id,
            "Job warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            job_id = %self.job_id,
            operation = self.operation,
            video_id = %self.video_id,
            "Job error: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            operation = self.operation,
            video_id = %self.video_id,
            "Job completed: {}", message
        );
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn operation(&self) -> &'static str {
        self.operation
    }

    pub fn video_id(&self) -> VideoId {
        self.video_id
    }

    /// Span to instrument the job's future with.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "job",
            job_id = %self.job_id,
            operation = self.operation,
            video_id = %self.video_id
        )
    }
}
