//! Encode dispatch.
//!
//! Claims a video's processing flag, probes its source to plan the tiers and
//! fans out one resolution job per tier, lowest tier at the highest priority.

use tracing::{info, warn};
use vstream_models::{Resolution, Video, VideoId};
use vstream_queue::{resolution_priority, EncodeResolutionJob, QueueJob, StartEncodingJob};

use crate::assembler::assemble_manifest;
use crate::context::PipelineContext;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::source::fetch_and_probe;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Another dispatch holds the processing flag.
    AlreadyRunning,
    Dispatched { resolutions: Vec<Resolution> },
}

/// Dispatch the encode of one video.
pub async fn start_encoding(ctx: &PipelineContext, job: &StartEncodingJob) -> WorkerResult<DispatchOutcome> {
    let logger = JobLogger::new(&QueueJob::StartEncoding(job.clone()));
    let video_id = job.video_id;

    let video = ctx
        .store
        .get_video(video_id)
        .await?
        .ok_or(WorkerError::VideoNotFound(video_id))?;

    if !ctx.store.begin_encoding(video_id).await? {
        logger.log_progress("encode already in progress, nothing to do");
        return Ok(DispatchOutcome::AlreadyRunning);
    }

    let plan = match plan_tiers(ctx, &video).await {
        Ok(plan) => plan,
        Err(e) => {
            logger.log_error(&format!("planning failed: {e}"));
            end_encoding_quietly(ctx, video_id).await;
            return Err(e);
        }
    };

    fan_out(ctx, video_id, &plan).await?;

    logger.log_completion(&format!("dispatched {} resolution jobs", plan.len()));
    Ok(DispatchOutcome::Dispatched { resolutions: plan })
}

async fn plan_tiers(ctx: &PipelineContext, video: &Video) -> WorkerResult<Vec<Resolution>> {
    let scratch = ctx.scratch_dir(&format!("dispatch-{}-", video.id)).await?;
    let (_, info) = fetch_and_probe(ctx, video, scratch.path()).await?;

    let plan = Resolution::plan_for_height(info.height);
    // At most one job per ladder tier
    ctx.store.plan_encodes(video.id, plan.len() as i32).await?;

    info!(
        video_id = %video.id,
        source_height = info.height,
        tiers = ?plan.iter().map(Resolution::as_str).collect::<Vec<_>>(),
        "Planned encode"
    );
    Ok(plan)
}

/// Push one job per tier. On a failed push, the unsent jobs are counted as
/// finished so the dispatch still terminates.
async fn fan_out(ctx: &PipelineContext, video_id: VideoId, plan: &[Resolution]) -> WorkerResult<()> {
    for (index, resolution) in plan.iter().enumerate() {
        let job = QueueJob::EncodeResolution(EncodeResolutionJob::new(
            video_id,
            *resolution,
            resolution_priority(index),
        ));

        if let Err(e) = ctx.queue.push(&job).await {
            let unsent = i32::try_from(plan.len() - index).unwrap_or(i32::MAX);
            warn!(video_id = %video_id, unsent, error = %e, "Fan-out interrupted");

            let tally = ctx.store.finish_encode_jobs(video_id, unsent).await?;
            if tally.is_last() {
                if let Err(assembly_err) = assemble_manifest(ctx, video_id).await {
                    warn!(video_id = %video_id, error = %assembly_err, "Assembly after interrupted fan-out failed");
                }
            }
            return Err(e.into());
        }
    }
    Ok(())
}

async fn end_encoding_quietly(ctx: &PipelineContext, video_id: VideoId) {
    if let Err(e) = ctx.store.end_encoding(video_id).await {
        warn!(video_id = %video_id, error = %e, "Failed to clear processing flag");
    }
}
