//! Manifest assembly.
//!
//! Runs once per dispatch, from whichever resolution job finished last.
//! Packages the newest completed rendition of every planned tier into a
//! single MPEG-DASH manifest and publishes it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures_util::future::try_join_all;
use tracing::{info, warn};
use vstream_models::{Resolution, Video, VideoId, VideoVariant};
use vstream_storage::keys;

use crate::context::PipelineContext;
use crate::error::{WorkerError, WorkerResult};
use crate::metrics;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssemblyOutcome {
    Published { manifest_key: String },
    /// Too few renditions completed; `processing` was cleared.
    Skipped { completed: usize, expected: usize },
}

/// Newest completed variant per resolution, created at or after `since`.
/// Ordered lowest resolution first.
pub fn select_renditions<'a>(
    variants: &'a [VideoVariant],
    since: Option<DateTime<Utc>>,
) -> Vec<&'a VideoVariant> {
    let mut latest: BTreeMap<Resolution, &VideoVariant> = BTreeMap::new();
    for variant in variants {
        if !variant.is_complete() {
            continue;
        }
        if since.is_some_and(|t| variant.created_at < t) {
            continue;
        }
        match latest.get(&variant.resolution) {
            Some(current) if current.created_at > variant.created_at => {}
            _ => {
                latest.insert(variant.resolution, variant);
            }
        }
    }
    latest.into_values().collect()
}

/// Assemble and publish the manifest of `video_id`, or clear `processing`
/// if not every planned tier completed.
pub async fn assemble_manifest(ctx: &PipelineContext, video_id: VideoId) -> WorkerResult<AssemblyOutcome> {
    let video = ctx
        .store
        .get_video(video_id)
        .await?
        .ok_or(WorkerError::VideoNotFound(video_id))?;

    let variants = ctx.store.list_variants(video_id).await?;
    let renditions = select_renditions(&variants, video.encode_started_at);
    let expected = usize::try_from(video.expected_jobs).unwrap_or(0);

    if renditions.is_empty() || renditions.len() < expected {
        warn!(
            video_id = %video_id,
            completed = renditions.len(),
            expected,
            "Not every resolution completed, skipping manifest"
        );
        ctx.store.end_encoding(video_id).await?;
        return Ok(AssemblyOutcome::Skipped {
            completed: renditions.len(),
            expected,
        });
    }

    let started = Instant::now();
    match package_and_publish(ctx, &video, &renditions).await {
        Ok(manifest_key) => {
            metrics::record_package_duration(started.elapsed().as_secs_f64());
            metrics::record_manifest_published();
            info!(
                video_id = %video_id,
                manifest_key = %manifest_key,
                renditions = renditions.len(),
                "Manifest published"
            );
            Ok(AssemblyOutcome::Published { manifest_key })
        }
        Err(e) => {
            if let Err(end_err) = ctx.store.end_encoding(video_id).await {
                warn!(video_id = %video_id, error = %end_err, "Failed to clear processing flag");
            }
            Err(e)
        }
    }
}

async fn package_and_publish(
    ctx: &PipelineContext,
    video: &Video,
    renditions: &[&VideoVariant],
) -> WorkerResult<String> {
    let scratch = ctx.scratch_dir(&format!("package-{}-", video.id)).await?;
    let inputs = fetch_renditions(ctx, renditions, scratch.path()).await?;

    let out_dir = scratch.path().join("dash");
    tokio::fs::create_dir_all(&out_dir).await?;

    let with_audio = video.has_audio.unwrap_or(false);
    let output = ctx
        .transcoder
        .package(&inputs, &out_dir, with_audio)
        .await
        .map_err(WorkerError::packaging)?;

    for segment in &output.segments {
        let Some(name) = segment.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        ctx.storage
            .put_file(segment, &keys::segment_key(video.id, name), keys::content_type_for(segment))
            .await
            .map_err(WorkerError::storage_write)?;
    }

    // The manifest goes last so it never references a missing segment
    let manifest_key = keys::manifest_key(video.id);
    ctx.storage
        .put_file(&output.manifest, &manifest_key, keys::content_type_for(&output.manifest))
        .await
        .map_err(WorkerError::storage_write)?;

    ctx.store
        .mark_dash_ready(video.id, &manifest_key, &keys::dash_prefix(video.id))
        .await?;

    Ok(manifest_key)
}

/// Download every rendition concurrently, lowest resolution first.
async fn fetch_renditions(
    ctx: &PipelineContext,
    renditions: &[&VideoVariant],
    dir: &Path,
) -> WorkerResult<Vec<PathBuf>> {
    let downloads = renditions.iter().filter_map(|variant| {
        let key = variant.file_key.as_deref()?;
        let local = dir.join(format!("rendition_{}.webm", variant.resolution));
        Some(async move {
            ctx.storage.get_file(key, &local).await?;
            Ok::<_, WorkerError>(local)
        })
    });
    try_join_all(downloads).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use vstream_models::VariantId;

    fn variant(id: i64, res: Resolution, file: Option<&str>, at: DateTime<Utc>) -> VideoVariant {
        VideoVariant {
            id: VariantId(id),
            video_id: VideoId(1),
            resolution: res,
            file_key: file.map(str::to_string),
            last_error: None,
            created_at: at,
        }
    }

    #[test]
    fn test_select_newest_completed_per_tier() {
        let t0 = Utc::now();
        let variants = vec![
            variant(1, Resolution::P720, Some("old-720"), t0),
            variant(2, Resolution::P360, Some("a-360"), t0 + Duration::seconds(1)),
            variant(3, Resolution::P720, Some("new-720"), t0 + Duration::seconds(2)),
            variant(4, Resolution::P480, None, t0 + Duration::seconds(3)),
        ];

        let picked = select_renditions(&variants, None);
        let keys: Vec<_> = picked.iter().filter_map(|v| v.file_key.as_deref()).collect();
        assert_eq!(keys, vec!["a-360", "new-720"]);
    }

    #[test]
    fn test_select_ignores_previous_dispatch() {
        let t0 = Utc::now();
        let variants = vec![
            variant(1, Resolution::P360, Some("stale"), t0 - Duration::minutes(5)),
            variant(2, Resolution::P480, Some("fresh"), t0 + Duration::seconds(1)),
        ];

        let picked = select_renditions(&variants, Some(t0));
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].resolution, Resolution::P480);
    }
}
