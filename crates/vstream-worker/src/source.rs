//! Fetching and probing a video's uploaded source.

use std::path::{Path, PathBuf};

use tracing::debug;
use vstream_media::MediaInfo;
use vstream_models::Video;

use crate::context::PipelineContext;
use crate::error::{WorkerError, WorkerResult};

/// Download the source into `dir` and probe it.
///
/// The probe result is recorded on the video.
pub async fn fetch_and_probe(
    ctx: &PipelineContext,
    video: &Video,
    dir: &Path,
) -> WorkerResult<(PathBuf, MediaInfo)> {
    let ext = Path::new(&video.source_key)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("bin");
    let local = dir.join(format!("source.{ext}"));

    ctx.storage.get_file(&video.source_key, &local).await?;

    let info = ctx
        .transcoder
        .probe(&local)
        .await
        .map_err(WorkerError::from_media)?;

    debug!(
        video_id = %video.id,
        width = info.width,
        height = info.height,
        duration = info.duration,
        has_audio = info.has_audio,
        "Probed source"
    );

    ctx.store
        .record_probe(video.id, info.duration, info.has_audio)
        .await?;

    Ok((local, info))
}
