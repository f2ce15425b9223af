//! In-process coordination store.
//!
//! A single mutex guards all tables, so every operation is one critical
//! section. Used by tests and single-node development setups.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use vstream_models::{
    CurrentEncode, MarkerId, NewVideo, Resolution, VariantId, Video, VideoId, VideoVariant,
};

use crate::error::{DbError, DbResult};
use crate::store::{CoordinationStore, JobTally};

#[derive(Default)]
struct Tables {
    next_id: i64,
    videos: BTreeMap<VideoId, Video>,
    variants: BTreeMap<VariantId, VideoVariant>,
    markers: BTreeMap<MarkerId, CurrentEncode>,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn video_mut(&mut self, id: VideoId) -> DbResult<&mut Video> {
        self.videos
            .get_mut(&id)
            .ok_or_else(|| DbError::not_found(format!("video {id}")))
    }

    fn count_finished(&mut self, id: VideoId, count: i32) -> DbResult<JobTally> {
        let video = self.video_mut(id)?;
        video.finished_jobs += count;
        Ok(JobTally {
            finished: video.finished_jobs,
            expected: video.expected_jobs,
        })
    }

    /// Shared tail of complete/fail: marker gone, job counted.
    fn settle_variant(&mut self, variant_id: VariantId, marker_id: MarkerId) -> DbResult<Option<JobTally>> {
        let Some(video_id) = self.variants.get(&variant_id).map(|v| v.video_id) else {
            self.markers.remove(&marker_id);
            return Ok(None);
        };
        self.markers.remove(&marker_id);
        self.count_finished(video_id, 1).map(Some)
    }
}

/// [`CoordinationStore`] held entirely in memory.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn create_video(&self, new: NewVideo) -> DbResult<Video> {
        let mut t = self.tables.lock().await;
        let id = VideoId(t.next_id());
        let video = Video {
            id,
            title: new.title,
            description: new.description,
            source_key: new.source_key,
            processing: false,
            dash_ready: false,
            manifest_key: None,
            dash_base_path: None,
            duration: None,
            has_audio: None,
            encode_started_at: None,
            expected_jobs: 0,
            finished_jobs: 0,
            created_at: Utc::now(),
        };
        t.videos.insert(id, video.clone());
        Ok(video)
    }

    async fn get_video(&self, id: VideoId) -> DbResult<Option<Video>> {
        Ok(self.tables.lock().await.videos.get(&id).cloned())
    }

    async fn delete_video(&self, id: VideoId) -> DbResult<Option<(Video, Vec<VideoVariant>)>> {
        let mut t = self.tables.lock().await;
        let Some(video) = t.videos.remove(&id) else {
            return Ok(None);
        };

        let doomed: Vec<VariantId> = t
            .variants
            .values()
            .filter(|v| v.video_id == id)
            .map(|v| v.id)
            .collect();
        let mut removed = Vec::with_capacity(doomed.len());
        for variant_id in doomed {
            if let Some(v) = t.variants.remove(&variant_id) {
                removed.push(v);
            }
            for marker in t.markers.values_mut() {
                if marker.variant_id == Some(variant_id) {
                    marker.variant_id = None;
                }
            }
        }

        Ok(Some((video, removed)))
    }

    async fn begin_encoding(&self, id: VideoId) -> DbResult<bool> {
        let mut t = self.tables.lock().await;
        let video = t.video_mut(id)?;
        if video.processing {
            return Ok(false);
        }
        video.processing = true;
        video.expected_jobs = 0;
        video.finished_jobs = 0;
        video.encode_started_at = Some(Utc::now());
        Ok(true)
    }

    async fn plan_encodes(&self, id: VideoId, expected: i32) -> DbResult<()> {
        let mut t = self.tables.lock().await;
        t.video_mut(id)?.expected_jobs = expected;
        Ok(())
    }

    async fn record_probe(&self, id: VideoId, duration: f64, has_audio: bool) -> DbResult<()> {
        let mut t = self.tables.lock().await;
        let video = t.video_mut(id)?;
        video.duration = Some(duration);
        video.has_audio = Some(has_audio);
        Ok(())
    }

    async fn finish_encode_jobs(&self, id: VideoId, count: i32) -> DbResult<JobTally> {
        self.tables.lock().await.count_finished(id, count)
    }

    async fn mark_dash_ready(&self, id: VideoId, manifest_key: &str, base_path: &str) -> DbResult<()> {
        let mut t = self.tables.lock().await;
        let video = t.video_mut(id)?;
        video.manifest_key = Some(manifest_key.to_string());
        video.dash_base_path = Some(base_path.to_string());
        video.dash_ready = true;
        video.processing = false;
        Ok(())
    }

    async fn end_encoding(&self, id: VideoId) -> DbResult<()> {
        let mut t = self.tables.lock().await;
        t.video_mut(id)?.processing = false;
        Ok(())
    }

    async fn create_variant(&self, video_id: VideoId, resolution: Resolution) -> DbResult<VideoVariant> {
        let mut t = self.tables.lock().await;
        if !t.videos.contains_key(&video_id) {
            return Err(DbError::not_found(format!("video {video_id}")));
        }
        let variant = VideoVariant {
            id: VariantId(t.next_id()),
            video_id,
            resolution,
            file_key: None,
            last_error: None,
            created_at: Utc::now(),
        };
        t.variants.insert(variant.id, variant.clone());
        Ok(variant)
    }

    async fn get_variant(&self, id: VariantId) -> DbResult<Option<VideoVariant>> {
        Ok(self.tables.lock().await.variants.get(&id).cloned())
    }

    async fn list_variants(&self, video_id: VideoId) -> DbResult<Vec<VideoVariant>> {
        // BTreeMap order is id order, which is creation order
        Ok(self
            .tables
            .lock()
            .await
            .variants
            .values()
            .filter(|v| v.video_id == video_id)
            .cloned()
            .collect())
    }

    async fn complete_variant(
        &self,
        variant_id: VariantId,
        marker_id: MarkerId,
        file_key: &str,
    ) -> DbResult<Option<JobTally>> {
        let mut t = self.tables.lock().await;
        if let Some(variant) = t.variants.get_mut(&variant_id) {
            variant.file_key = Some(file_key.to_string());
            variant.last_error = None;
        }
        t.settle_variant(variant_id, marker_id)
    }

    async fn fail_variant(
        &self,
        variant_id: VariantId,
        marker_id: MarkerId,
        error: &str,
    ) -> DbResult<Option<JobTally>> {
        let mut t = self.tables.lock().await;
        if let Some(variant) = t.variants.get_mut(&variant_id) {
            variant.last_error = Some(error.to_string());
        }
        t.settle_variant(variant_id, marker_id)
    }

    async fn delete_variant(&self, id: VariantId) -> DbResult<Option<VideoVariant>> {
        let mut t = self.tables.lock().await;
        let removed = t.variants.remove(&id);
        if removed.is_some() {
            for marker in t.markers.values_mut() {
                if marker.variant_id == Some(id) {
                    marker.variant_id = None;
                }
            }
        }
        Ok(removed)
    }

    async fn create_marker(&self, variant_id: VariantId) -> DbResult<CurrentEncode> {
        let mut t = self.tables.lock().await;
        if !t.variants.contains_key(&variant_id) {
            return Err(DbError::not_found(format!("variant {variant_id}")));
        }
        let marker = CurrentEncode {
            id: MarkerId(t.next_id()),
            variant_id: Some(variant_id),
            started_at: Utc::now(),
        };
        t.markers.insert(marker.id, marker.clone());
        Ok(marker)
    }

    async fn delete_marker(&self, id: MarkerId) -> DbResult<bool> {
        Ok(self.tables.lock().await.markers.remove(&id).is_some())
    }

    async fn list_markers(&self) -> DbResult<Vec<CurrentEncode>> {
        Ok(self.tables.lock().await.markers.values().cloned().collect())
    }

    async fn claim_orphan(&self, marker_id: MarkerId) -> DbResult<Option<VideoVariant>> {
        let mut t = self.tables.lock().await;
        let Some(variant_id) = t.markers.remove(&marker_id).and_then(|m| m.variant_id) else {
            return Ok(None);
        };

        let unsettled = t
            .variants
            .get(&variant_id)
            .is_some_and(|v| v.file_key.is_none());
        if !unsettled {
            return Ok(None);
        }

        let claimed = t.variants.remove(&variant_id);
        for marker in t.markers.values_mut() {
            if marker.variant_id == Some(variant_id) {
                marker.variant_id = None;
            }
        }
        Ok(claimed)
    }

    async fn ping(&self) -> DbResult<()> {
        Ok(())
    }
}
