//! Filesystem-backed media storage.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::backend::MediaStorage;
use crate::error::{StorageError, StorageResult};

/// Stores objects as files below a root directory; keys map to relative paths.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a key below the root, rejecting anything that could escape it.
    pub fn path_for(&self, key: &str) -> StorageResult<PathBuf> {
        let rel = Path::new(key.trim_start_matches('/'));
        let valid = !key.is_empty() && rel.components().all(|c| matches!(c, Component::Normal(_)));
        if !valid {
            return Err(StorageError::invalid_key(key));
        }
        Ok(self.root.join(rel))
    }
}

#[async_trait]
impl MediaStorage for LocalStorage {
    async fn put_file(&self, path: &Path, key: &str, _content_type: &str) -> StorageResult<()> {
        let dest = self.path_for(key)?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(path, &dest)
            .await
            .map_err(|e| StorageError::write(key, e))?;
        debug!("Stored {} at {}", path.display(), dest.display());
        Ok(())
    }

    async fn get_file(&self, key: &str, path: &Path) -> StorageResult<()> {
        let src = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        match tokio::fs::copy(&src, path).await {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::not_found(key)),
            Err(e) => Err(StorageError::read(key, e)),
        }
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::delete(key, e)),
        }
    }

    async fn delete_prefix(&self, prefix: &str) -> StorageResult<u32> {
        let dir = self.path_for(prefix.trim_end_matches('/'))?;
        if !tokio::fs::try_exists(&dir).await? {
            return Ok(0);
        }

        let removed = count_files(&dir).await?;
        tokio::fs::remove_dir_all(&dir)
            .await
            .map_err(|e| StorageError::delete(prefix, e))?;
        Ok(removed)
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        Ok(tokio::fs::try_exists(self.path_for(key)?).await?)
    }

    async fn check_connectivity(&self) -> StorageResult<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "local"
    }
}

async fn count_files(dir: &Path) -> StorageResult<u32> {
    let mut count = 0;
    let mut pending = vec![dir.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                pending.push(entry.path());
            } else {
                count += 1;
            }
        }
    }
    Ok(count)
}
