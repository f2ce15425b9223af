//! The work queue seam.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::QueueResult;
use crate::job::QueueJob;

/// Priority work queue. Delivery order follows the priority hint on a
/// best-effort basis; a popped job is owned by the caller.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    async fn push(&self, job: &QueueJob) -> QueueResult<()>;

    /// Wait up to `wait` for the highest-priority job.
    async fn pop(&self, wait: Duration) -> QueueResult<Option<QueueJob>>;

    /// Record a failed job with its error for operators.
    async fn dead_letter(&self, job: &QueueJob, error: &str) -> QueueResult<()>;

    async fn len(&self) -> QueueResult<u64>;

    async fn ping(&self) -> QueueResult<()>;
}
