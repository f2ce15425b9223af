//! Priority work queue for encode jobs.
//!
//! This crate provides:
//! - Job types for dispatch and per-resolution encodes
//! - A Redis sorted-set queue with a dead-letter stream
//! - An in-memory queue for tests and single-node runs

pub mod backend;
pub mod error;
pub mod job;
pub mod memory;
pub mod queue;

pub use backend::WorkQueue;
pub use error::{QueueError, QueueResult};
pub use job::{
    resolution_priority, EncodeResolutionJob, QueueJob, StartEncodingJob, BASE_PRIORITY,
    DEFAULT_PRIORITY, DISPATCH_PRIORITY,
};
pub use memory::MemoryQueue;
pub use queue::{QueueConfig, RedisQueue};
