//! Keeps stored files consistent with deleted records.
//!
//! Each removal is best-effort: a failure is logged and the remaining
//! removals still run.

use std::sync::Arc;

use tracing::{info, warn};
use vstream_models::{Video, VideoVariant};

use crate::backend::MediaStorage;
use crate::keys;

/// What a cleanup pass managed to remove.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub removed: u32,
    pub failed: u32,
}

/// Cascades record deletions into durable storage.
#[derive(Clone)]
pub struct StorageLifecycle {
    storage: Arc<dyn MediaStorage>,
}

impl StorageLifecycle {
    pub fn new(storage: Arc<dyn MediaStorage>) -> Self {
        Self { storage }
    }

    /// Remove the source, the manifest and the per-video directory.
    pub async fn video_deleted(&self, video: &Video) -> CleanupReport {
        let mut report = CleanupReport::default();

        self.remove_one(&video.source_key, &mut report).await;

        if let Some(manifest) = &video.manifest_key {
            self.remove_one(manifest, &mut report).await;
        }

        if let Some(base) = &video.dash_base_path {
            match self.storage.delete_prefix(base).await {
                Ok(n) => report.removed += n,
                Err(e) => {
                    warn!(video_id = %video.id, prefix = %base, error = %e, "Failed to remove DASH directory");
                    report.failed += 1;
                }
            }
        }

        info!(
            video_id = %video.id,
            removed = report.removed,
            failed = report.failed,
            "Storage cleanup for deleted video"
        );
        report
    }

    /// Remove a variant's rendition file, if it has one.
    pub async fn variant_deleted(&self, variant: &VideoVariant) -> CleanupReport {
        let mut report = CleanupReport::default();
        if let Some(key) = &variant.file_key {
            self.remove_one(key, &mut report).await;
        }
        report
    }

    /// Remove whatever a dead worker uploaded for a variant it never settled.
    pub async fn rendition_abandoned(&self, variant: &VideoVariant) -> CleanupReport {
        let mut report = CleanupReport::default();
        let key = keys::rendition_key(variant.video_id, variant.resolution, variant.id);
        self.remove_one(&key, &mut report).await;
        report
    }

    async fn remove_one(&self, key: &str, report: &mut CleanupReport) {
        match self.storage.delete(key).await {
            Ok(()) => report.removed += 1,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to remove stored file");
                report.failed += 1;
            }
        }
    }
}
