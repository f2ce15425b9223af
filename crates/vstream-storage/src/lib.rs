//! Durable media storage.
//!
//! This crate provides:
//! - The [`MediaStorage`] seam with S3-compatible and local filesystem backends
//! - The storage key layout for sources, renditions and DASH output
//! - [`StorageLifecycle`], which cascades record deletions into storage

pub mod backend;
pub mod config;
pub mod error;
pub mod keys;
pub mod lifecycle;
pub mod local;
pub mod s3;

pub use backend::MediaStorage;
pub use config::{StorageBackend, StorageConfig};
pub use error::{StorageError, StorageResult};
pub use lifecycle::{CleanupReport, StorageLifecycle};
pub use local::LocalStorage;
pub use s3::{S3Config, S3Storage};
