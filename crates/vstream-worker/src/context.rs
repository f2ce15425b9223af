//! Shared handles passed to every job.

use std::sync::Arc;

use tempfile::TempDir;
use vstream_db::CoordinationStore;
use vstream_media::Transcoder;
use vstream_queue::WorkQueue;
use vstream_storage::{MediaStorage, StorageLifecycle};

use crate::config::WorkerConfig;
use crate::error::WorkerResult;

/// Collaborators of the pipeline stages.
#[derive(Clone)]
pub struct PipelineContext {
    pub config: WorkerConfig,
    pub store: Arc<dyn CoordinationStore>,
    pub queue: Arc<dyn WorkQueue>,
    pub storage: Arc<dyn MediaStorage>,
    pub transcoder: Arc<dyn Transcoder>,
    pub lifecycle: StorageLifecycle,
}

impl PipelineContext {
    pub fn new(
        config: WorkerConfig,
        store: Arc<dyn CoordinationStore>,
        queue: Arc<dyn WorkQueue>,
        storage: Arc<dyn MediaStorage>,
        transcoder: Arc<dyn Transcoder>,
    ) -> Self {
        let lifecycle = StorageLifecycle::new(Arc::clone(&storage));
        Self {
            config,
            store,
            queue,
            storage,
            transcoder,
            lifecycle,
        }
    }

    /// Fresh scratch directory under the work dir, removed on drop.
    pub async fn scratch_dir(&self, prefix: &str) -> WorkerResult<TempDir> {
        tokio::fs::create_dir_all(&self.config.work_dir).await?;
        let dir = tempfile::Builder::new()
            .prefix(prefix)
            .tempdir_in(&self.config.work_dir)?;
        Ok(dir)
    }
}
