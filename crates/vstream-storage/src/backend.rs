//! The durable storage seam.

use async_trait::async_trait;
use std::path::Path;

use crate::error::StorageResult;

/// Durable file storage addressed by slash-separated keys.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaStorage: Send + Sync {
    /// Upload a local file under `key`, replacing any existing object.
    async fn put_file(&self, path: &Path, key: &str, content_type: &str) -> StorageResult<()>;

    /// Download `key` into a local file, creating parent directories.
    async fn get_file(&self, key: &str, path: &Path) -> StorageResult<()>;

    /// Delete one object. Deleting a missing object is not an error.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Delete every object under `prefix`; returns how many were removed.
    async fn delete_prefix(&self, prefix: &str) -> StorageResult<u32>;

    async fn exists(&self, key: &str) -> StorageResult<bool>;

    async fn check_connectivity(&self) -> StorageResult<()>;

    /// Short backend name for logs and health output.
    fn backend_name(&self) -> &'static str;
}
