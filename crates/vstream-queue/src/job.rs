//! Job types for the queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use vstream_models::{JobId, Resolution, VideoId};

/// Priority of dispatch jobs; above every resolution job.
pub const DISPATCH_PRIORITY: u8 = 10;
/// Priority of the lowest resolution; higher tiers count down from here.
pub const BASE_PRIORITY: u8 = 9;
/// Priority for jobs resubmitted by crash recovery.
pub const DEFAULT_PRIORITY: u8 = 5;

/// Priority of the resolution at `index` in the lowest-first plan.
pub fn resolution_priority(index: usize) -> u8 {
    BASE_PRIORITY.saturating_sub(u8::try_from(index).unwrap_or(u8::MAX))
}

/// Job that plans and fans out a video's encode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartEncodingJob {
    pub job_id: JobId,
    pub video_id: VideoId,
    pub priority: u8,
    pub created_at: DateTime<Utc>,
}

impl StartEncodingJob {
    pub fn new(video_id: VideoId) -> Self {
        Self {
            job_id: JobId::new(),
            video_id,
            priority: DISPATCH_PRIORITY,
            created_at: Utc::now(),
        }
    }
}

/// Job that encodes one resolution of a video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodeResolutionJob {
    pub job_id: JobId,
    pub video_id: VideoId,
    pub resolution: Resolution,
    pub priority: u8,
    pub created_at: DateTime<Utc>,
}

impl EncodeResolutionJob {
    pub fn new(video_id: VideoId, resolution: Resolution, priority: u8) -> Self {
        Self {
            job_id: JobId::new(),
            video_id,
            resolution,
            priority,
            created_at: Utc::now(),
        }
    }
}

/// Wrapper for all job types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueJob {
    StartEncoding(StartEncodingJob),
    EncodeResolution(EncodeResolutionJob),
}

impl QueueJob {
    pub fn job_id(&self) -> &JobId {
        match self {
            QueueJob::StartEncoding(j) => &j.job_id,
            QueueJob::EncodeResolution(j) => &j.job_id,
        }
    }

    pub fn video_id(&self) -> VideoId {
        match self {
            QueueJob::StartEncoding(j) => j.video_id,
            QueueJob::EncodeResolution(j) => j.video_id,
        }
    }

    pub fn priority(&self) -> u8 {
        match self {
            QueueJob::StartEncoding(j) => j.priority,
            QueueJob::EncodeResolution(j) => j.priority,
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            QueueJob::StartEncoding(j) => j.created_at,
            QueueJob::EncodeResolution(j) => j.created_at,
        }
    }

    /// Short job type name for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            QueueJob::StartEncoding(_) => "start_encoding",
            QueueJob::EncodeResolution(_) => "encode_resolution",
        }
    }

    /// Sorted-set score: higher priority first, then oldest first.
    pub fn score(&self) -> f64 {
        f64::from(self.priority()) * 1e13 - self.created_at().timestamp_millis() as f64
    }
}
