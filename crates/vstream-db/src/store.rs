//! The coordination store seam.

use async_trait::async_trait;
use vstream_models::{
    CurrentEncode, MarkerId, NewVideo, Resolution, VariantId, Video, VideoId, VideoVariant,
};

use crate::error::DbResult;

/// Fan-out progress of a video's current dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobTally {
    pub finished: i32,
    pub expected: i32,
}

impl JobTally {
    /// The caller's increment was the one that completed the dispatch.
    pub fn is_last(&self) -> bool {
        self.expected > 0 && self.finished == self.expected
    }
}

/// Transactional store shared by the dispatcher, workers and recovery.
///
/// Every method is atomic on its own. Methods that touch several records
/// (`begin_encoding`, `complete_variant`, `fail_variant`, `claim_orphan`)
/// run in a single transaction.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    async fn create_video(&self, new: NewVideo) -> DbResult<Video>;

    async fn get_video(&self, id: VideoId) -> DbResult<Option<Video>>;

    /// Delete a video with its variants; returns what was removed.
    async fn delete_video(&self, id: VideoId) -> DbResult<Option<(Video, Vec<VideoVariant>)>>;

    /// Compare-and-set `processing` from false to true under a row lock.
    ///
    /// Returns `false` without changes when an encode is already running.
    /// On success the fan-out tally is reset and `encode_started_at` stamped.
    async fn begin_encoding(&self, id: VideoId) -> DbResult<bool>;

    /// Record how many resolution jobs the current dispatch fans out.
    async fn plan_encodes(&self, id: VideoId, expected: i32) -> DbResult<()>;

    async fn record_probe(&self, id: VideoId, duration: f64, has_audio: bool) -> DbResult<()>;

    /// Count `count` jobs of the current dispatch as finished.
    async fn finish_encode_jobs(&self, id: VideoId, count: i32) -> DbResult<JobTally>;

    /// Publish the manifest: sets manifest fields and `dash_ready`, clears `processing`.
    async fn mark_dash_ready(&self, id: VideoId, manifest_key: &str, base_path: &str) -> DbResult<()>;

    /// Clear `processing` without publishing anything.
    async fn end_encoding(&self, id: VideoId) -> DbResult<()>;

    async fn create_variant(&self, video_id: VideoId, resolution: Resolution) -> DbResult<VideoVariant>;

    async fn get_variant(&self, id: VariantId) -> DbResult<Option<VideoVariant>>;

    /// Variants of a video, oldest first.
    async fn list_variants(&self, video_id: VideoId) -> DbResult<Vec<VideoVariant>>;

    /// Record the encoded file, delete the marker and count the job finished.
    ///
    /// Returns `None` when the variant no longer exists (recovery superseded
    /// this encode); nothing is counted in that case.
    async fn complete_variant(
        &self,
        variant_id: VariantId,
        marker_id: MarkerId,
        file_key: &str,
    ) -> DbResult<Option<JobTally>>;

    /// Record a failure on the variant, delete the marker and count the job
    /// finished. The variant row is kept. Returns `None` like `complete_variant`.
    async fn fail_variant(
        &self,
        variant_id: VariantId,
        marker_id: MarkerId,
        error: &str,
    ) -> DbResult<Option<JobTally>>;

    async fn delete_variant(&self, id: VariantId) -> DbResult<Option<VideoVariant>>;

    async fn create_marker(&self, variant_id: VariantId) -> DbResult<CurrentEncode>;

    /// Returns whether a marker was removed.
    async fn delete_marker(&self, id: MarkerId) -> DbResult<bool>;

    async fn list_markers(&self) -> DbResult<Vec<CurrentEncode>>;

    /// Take over the encode behind an orphaned marker.
    ///
    /// Deletes the marker together with its variant, provided the variant
    /// is still unsettled, and returns the deleted variant. Returns `None`
    /// when there is nothing to resubmit: the marker is already gone (its
    /// worker settled meanwhile) or its variant was deleted. A marker
    /// without a variant is removed either way.
    async fn claim_orphan(&self, marker_id: MarkerId) -> DbResult<Option<VideoVariant>>;

    async fn ping(&self) -> DbResult<()>;
}
