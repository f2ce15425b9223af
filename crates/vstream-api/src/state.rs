//! Application state.

use std::sync::Arc;

use vstream_db::{CoordinationStore, DbConfig, PgStore};
use vstream_queue::{RedisQueue, WorkQueue};
use vstream_storage::{MediaStorage, StorageConfig, StorageLifecycle};

use crate::config::ApiConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub store: Arc<dyn CoordinationStore>,
    pub queue: Arc<dyn WorkQueue>,
    pub storage: Arc<dyn MediaStorage>,
    pub lifecycle: StorageLifecycle,
    /// Base URL players fetch manifests from
    pub public_base_url: String,
}

impl AppState {
    pub fn new(
        config: ApiConfig,
        store: Arc<dyn CoordinationStore>,
        queue: Arc<dyn WorkQueue>,
        storage: Arc<dyn MediaStorage>,
        public_base_url: impl Into<String>,
    ) -> Self {
        let lifecycle = StorageLifecycle::new(Arc::clone(&storage));
        Self {
            config,
            store,
            queue,
            storage,
            lifecycle,
            public_base_url: public_base_url.into(),
        }
    }

    /// Connect the production backends from environment variables.
    pub async fn from_env(config: ApiConfig) -> anyhow::Result<Self> {
        let store = PgStore::connect(&DbConfig::from_env()?).await?;
        let queue = RedisQueue::from_env()?;
        let storage_config = StorageConfig::from_env()?;
        let storage = storage_config.connect();

        Ok(Self::new(
            config,
            Arc::new(store),
            Arc::new(queue),
            storage,
            storage_config.public_base_url,
        ))
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
