//! Crash recovery.
//!
//! Markers still present when a worker pool starts belong to encodes whose
//! worker died. Each marker is claimed together with its unsettled variant
//! in one store transaction, and only a successful claim is resubmitted. A
//! worker that settles before the claim keeps its result. A slow worker that
//! settles after it finds its variant gone and is not counted, so an encode
//! may run twice but is never counted twice.

use tracing::{info, warn};
use vstream_models::CurrentEncode;
use vstream_queue::{EncodeResolutionJob, QueueJob, DEFAULT_PRIORITY};

use crate::assembler::assemble_manifest;
use crate::context::PipelineContext;
use crate::error::WorkerResult;
use crate::metrics;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Markers whose encode was queued again
    pub resubmitted: u32,
    /// Markers dropped without resubmission
    pub discarded: u32,
}

/// Resubmit every orphaned encode and clear the markers.
pub async fn recover_orphans(ctx: &PipelineContext) -> WorkerResult<RecoveryReport> {
    let markers = ctx.store.list_markers().await?;
    let mut report = RecoveryReport::default();

    for marker in &markers {
        if recover_one(ctx, marker).await? {
            report.resubmitted += 1;
        } else {
            report.discarded += 1;
        }
    }

    metrics::record_orphans_recovered(report.resubmitted);
    info!(
        resubmitted = report.resubmitted,
        discarded = report.discarded,
        "Crash recovery finished"
    );
    Ok(report)
}

/// Returns whether the marker's encode was resubmitted.
async fn recover_one(ctx: &PipelineContext, marker: &CurrentEncode) -> WorkerResult<bool> {
    let Some(variant) = ctx.store.claim_orphan(marker.id).await? else {
        info!(marker_id = %marker.id, "Discarded settled or variant-less marker");
        return Ok(false);
    };

    let cleanup = ctx.lifecycle.rendition_abandoned(&variant).await;
    if cleanup.failed > 0 {
        warn!(variant_id = %variant.id, "Abandoned rendition could not be removed");
    }

    let job = QueueJob::EncodeResolution(EncodeResolutionJob::new(
        variant.video_id,
        variant.resolution,
        DEFAULT_PRIORITY,
    ));
    if let Err(e) = ctx.queue.push(&job).await {
        warn!(
            video_id = %variant.video_id,
            resolution = %variant.resolution,
            error = %e,
            "Resubmission failed, counting the encode as finished"
        );

        let tally = ctx.store.finish_encode_jobs(variant.video_id, 1).await?;
        if tally.is_last() {
            if let Err(assembly_err) = assemble_manifest(ctx, variant.video_id).await {
                warn!(video_id = %variant.video_id, error = %assembly_err, "Assembly after failed resubmission failed");
            }
        }
        return Err(e.into());
    }

    info!(
        marker_id = %marker.id,
        video_id = %variant.video_id,
        resolution = %variant.resolution,
        "Resubmitted orphaned encode"
    );
    Ok(true)
}
