//! Per-resolution encode.
//!
//! One job encodes one tier of one video:
//!
//! 1. insert a variant row and an in-flight marker for it
//! 2. fetch and probe the source, pick the tier's profile
//! 3. encode one VP9 rendition and upload it
//! 4. settle the variant (file reference or failure summary), drop the
//!    marker and count the job in a single store transaction
//!
//! The variant row is kept on failure. The job that finishes the dispatch
//! runs manifest assembly.

use std::time::Instant;

use tracing::warn;
use vstream_models::{AudioProfile, Video, VideoId, VideoVariant};
use vstream_queue::{EncodeResolutionJob, QueueJob};
use vstream_storage::keys;

use crate::assembler::assemble_manifest;
use crate::context::PipelineContext;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::marker::EncodeMarker;
use crate::metrics;
use crate::source::fetch_and_probe;

/// Encode one resolution of a video.
pub async fn encode_resolution(ctx: &PipelineContext, job: &EncodeResolutionJob) -> WorkerResult<()> {
    let logger = JobLogger::new(&QueueJob::EncodeResolution(job.clone()));
    let video_id = job.video_id;

    let Some(video) = ctx.store.get_video(video_id).await? else {
        logger.log_warning("video no longer exists, dropping job");
        return Ok(());
    };

    logger.log_start(&format!("encoding {}", job.resolution));

    let variant = match ctx.store.create_variant(video_id, job.resolution).await {
        Ok(variant) => variant,
        Err(e) => {
            count_unstarted(ctx, video_id).await;
            return Err(e.into());
        }
    };

    let marker = match EncodeMarker::acquire(ctx.store.clone(), variant.id).await {
        Ok(marker) => marker,
        Err(e) => {
            count_unstarted(ctx, video_id).await;
            return Err(e);
        }
    };

    let started = Instant::now();
    let outcome = produce_rendition(ctx, &video, &variant).await;

    let settled = match &outcome {
        Ok(file_key) => {
            metrics::record_encode_duration(job.resolution.as_str(), started.elapsed().as_secs_f64());
            ctx.store.complete_variant(variant.id, marker.id(), file_key).await
        }
        Err(e) => {
            logger.log_error(&e.to_string());
            ctx.store.fail_variant(variant.id, marker.id(), &e.summary()).await
        }
    };

    marker.release().await;

    let tally = match settled {
        Ok(tally) => tally,
        Err(e) => {
            warn!(video_id = %video_id, error = %e, "Failed to settle variant, counting job directly");
            Some(ctx.store.finish_encode_jobs(video_id, 1).await?)
        }
    };

    let assembled = match tally {
        None => {
            logger.log_warning("variant was superseded by recovery, not counted");
            Ok(())
        }
        Some(tally) => {
            logger.log_progress(&format!("{}/{} resolution jobs finished", tally.finished, tally.expected));
            if tally.is_last() {
                finish_dispatch(ctx, video_id, &logger).await
            } else {
                Ok(())
            }
        }
    };

    let file_key = outcome?;
    logger.log_completion(&format!("stored {file_key}"));
    // An assembly failure fails the job that ran it
    assembled
}

/// Download, probe, encode and upload. Returns the stored rendition key.
async fn produce_rendition(
    ctx: &PipelineContext,
    video: &Video,
    variant: &VideoVariant,
) -> WorkerResult<String> {
    let resolution = variant.resolution;
    let scratch = ctx
        .scratch_dir(&format!("encode-{}-{}-", video.id, resolution))
        .await?;
    let (source, info) = fetch_and_probe(ctx, video, scratch.path()).await?;

    let profile = resolution.select_profile(info.dimensions());
    let audio = info.has_audio.then(AudioProfile::default);

    let output = scratch.path().join(format!("rendition_{resolution}.webm"));
    ctx.transcoder
        .encode(&source, &output, &profile, audio.as_ref())
        .await
        .map_err(WorkerError::from_media)?;

    let key = keys::rendition_key(video.id, resolution, variant.id);
    ctx.storage
        .put_file(&output, &key, keys::content_type_for(&output))
        .await
        .map_err(WorkerError::storage_write)?;

    Ok(key)
}

/// Count a job that failed before its variant could be settled.
async fn count_unstarted(ctx: &PipelineContext, video_id: VideoId) {
    match ctx.store.finish_encode_jobs(video_id, 1).await {
        Ok(tally) if tally.is_last() => {
            let logger = JobLogger::for_operation("encode_resolution", video_id);
            // The job's own error is what propagates
            if let Err(e) = finish_dispatch(ctx, video_id, &logger).await {
                warn!(video_id = %video_id, error = %e, "Assembly after unstarted job failed");
            }
        }
        Ok(_) => {}
        Err(e) => warn!(video_id = %video_id, error = %e, "Failed to count unstarted job"),
    }
}

/// Last job out: assemble, or clear `processing` if assembly is skipped.
async fn finish_dispatch(ctx: &PipelineContext, video_id: VideoId, logger: &JobLogger) -> WorkerResult<()> {
    match assemble_manifest(ctx, video_id).await {
        Ok(outcome) => {
            logger.log_progress(&format!("assembly: {outcome:?}"));
            Ok(())
        }
        Err(e) => {
            logger.log_error(&format!("manifest assembly failed: {e}"));
            Err(e)
        }
    }
}
