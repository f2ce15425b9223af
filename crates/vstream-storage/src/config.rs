//! Storage backend selection.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use crate::backend::MediaStorage;
use crate::error::{StorageError, StorageResult};
use crate::local::LocalStorage;
use crate::s3::{S3Config, S3Storage};

#[derive(Debug, Clone)]
pub enum StorageBackend {
    S3(S3Config),
    Local { root: PathBuf },
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Base URL players fetch manifests and segments from
    pub public_base_url: String,
}

impl StorageConfig {
    /// Create config from environment variables.
    ///
    /// `STORAGE_BACKEND` selects `s3` or `local` (default).
    pub fn from_env() -> StorageResult<Self> {
        let backend = match std::env::var("STORAGE_BACKEND")
            .unwrap_or_else(|_| "local".to_string())
            .to_lowercase()
            .as_str()
        {
            "s3" => StorageBackend::S3(S3Config::from_env()?),
            "local" => StorageBackend::Local {
                root: std::env::var("STORAGE_ROOT")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from("./media")),
            },
            other => {
                return Err(StorageError::config(format!(
                    "unknown STORAGE_BACKEND: {other}"
                )))
            }
        };

        Ok(Self {
            backend,
            public_base_url: std::env::var("MEDIA_PUBLIC_BASE_URL")
                .unwrap_or_else(|_| "/media".to_string()),
        })
    }

    /// Build the configured backend.
    pub fn connect(&self) -> Arc<dyn MediaStorage> {
        match &self.backend {
            StorageBackend::S3(config) => {
                info!(bucket = %config.bucket_name, "Using S3 storage");
                Arc::new(S3Storage::new(config.clone()))
            }
            StorageBackend::Local { root } => {
                info!(root = %root.display(), "Using local storage");
                Arc::new(LocalStorage::new(root.clone()))
            }
        }
    }

    /// Public URL for a stored key.
    pub fn public_url(&self, key: &str) -> String {
        format!(
            "{}/{}",
            self.public_base_url.trim_end_matches('/'),
            key.trim_start_matches('/')
        )
    }
}
