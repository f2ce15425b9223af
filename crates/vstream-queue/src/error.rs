//! Queue error types.

use thiserror::Error;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue unreachable: {0}")]
    Unreachable(String),

    #[error("Failed to push job {job_id}: {message}")]
    Push { job_id: String, message: String },

    #[error("Failed to pop from {queue}: {message}")]
    Pop { queue: String, message: String },

    #[error("Failed to dead-letter job: {0}")]
    DeadLetter(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Job payload error: {0}")]
    Payload(#[from] serde_json::Error),
}

impl QueueError {
    pub fn unreachable(err: impl std::fmt::Display) -> Self {
        Self::Unreachable(err.to_string())
    }

    pub fn push(job_id: impl std::fmt::Display, err: impl std::fmt::Display) -> Self {
        Self::Push {
            job_id: job_id.to_string(),
            message: err.to_string(),
        }
    }

    pub fn pop(queue: &str, err: impl std::fmt::Display) -> Self {
        Self::Pop {
            queue: queue.to_string(),
            message: err.to_string(),
        }
    }
}
