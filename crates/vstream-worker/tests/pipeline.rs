//! End-to-end pipeline tests on the in-memory store and queue, local storage
//! and a scripted transcoder.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use vstream_db::{CoordinationStore, DbError, DbResult, JobTally, MemoryStore};
use vstream_media::{MediaError, MediaInfo, MediaResult, PackageOutput, Transcoder};
use vstream_models::{
    AudioProfile, CurrentEncode, EncodingProfile, MarkerId, NewVideo, Resolution, VariantId, Video,
    VideoId, VideoVariant,
};
use vstream_queue::{
    EncodeResolutionJob, MemoryQueue, QueueJob, StartEncodingJob, WorkQueue, DEFAULT_PRIORITY,
};
use vstream_storage::{keys, LocalStorage};
use vstream_worker::{
    process_job, recover_orphans, start_encoding, DispatchOutcome, PipelineContext, WorkerConfig,
    WorkerError, WorkerResult,
};

const SOURCE_KEY: &str = "videos/originals/clip.mp4";

#[derive(Default)]
struct FakeTranscoder {
    /// `None` probes as a source without a video stream
    info: Option<MediaInfo>,
    failing: Vec<Resolution>,
    fail_package: bool,
    encodes: Mutex<Vec<(EncodingProfile, bool)>>,
    packages: Mutex<Vec<(usize, bool)>>,
}

impl FakeTranscoder {
    fn source(width: u32, height: u32, has_audio: bool) -> Self {
        Self {
            info: Some(MediaInfo {
                duration: 12.5,
                width,
                height,
                video_codec: "h264".into(),
                has_audio,
            }),
            ..Self::default()
        }
    }

    fn encodes(&self) -> Vec<(EncodingProfile, bool)> {
        self.encodes.lock().unwrap().clone()
    }

    fn packages(&self) -> Vec<(usize, bool)> {
        self.packages.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    async fn probe(&self, source: &Path) -> MediaResult<MediaInfo> {
        assert!(source.exists(), "source was not fetched before probing");
        self.info.clone().ok_or(MediaError::NoVideoStream)
    }

    async fn encode(
        &self,
        _source: &Path,
        output: &Path,
        profile: &EncodingProfile,
        audio: Option<&AudioProfile>,
    ) -> MediaResult<()> {
        self.encodes
            .lock()
            .unwrap()
            .push((profile.clone(), audio.is_some()));

        if self.failing.contains(&profile.resolution) {
            return Err(MediaError::ffmpeg_failed(
                "ffmpeg exited with status 1",
                Some("Error while opening encoder for output stream #0:0".into()),
                Some(1),
            ));
        }
        tokio::fs::write(output, format!("{}x{}", profile.width, profile.height)).await?;
        Ok(())
    }

    async fn package(
        &self,
        renditions: &[PathBuf],
        out_dir: &Path,
        with_audio: bool,
    ) -> MediaResult<PackageOutput> {
        self.packages
            .lock()
            .unwrap()
            .push((renditions.len(), with_audio));

        if self.fail_package {
            return Err(MediaError::ffmpeg_failed("dash muxer failed", None, Some(1)));
        }

        let mut segments = Vec::new();
        for idx in 0..renditions.len() {
            for name in [format!("init-{idx}.webm"), format!("chunk-{idx}-00001.webm")] {
                let path = out_dir.join(name);
                tokio::fs::write(&path, b"segment").await?;
                segments.push(path);
            }
        }
        let manifest = out_dir.join("manifest.mpd");
        tokio::fs::write(&manifest, b"<MPD/>").await?;
        Ok(PackageOutput { manifest, segments })
    }
}

/// `MemoryStore` with scripted interference.
struct RacingStore {
    inner: Arc<MemoryStore>,
    /// Settled right after the next marker scan, so the scan returns stale rows
    settle_during_scan: Mutex<Option<(VariantId, MarkerId, String)>>,
    refuse_variants: bool,
}

impl RacingStore {
    fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            settle_during_scan: Mutex::new(None),
            refuse_variants: false,
        }
    }
}

#[async_trait]
impl CoordinationStore for RacingStore {
    async fn create_video(&self, new: NewVideo) -> DbResult<Video> {
        self.inner.create_video(new).await
    }

    async fn get_video(&self, id: VideoId) -> DbResult<Option<Video>> {
        self.inner.get_video(id).await
    }

    async fn delete_video(&self, id: VideoId) -> DbResult<Option<(Video, Vec<VideoVariant>)>> {
        self.inner.delete_video(id).await
    }

    async fn begin_encoding(&self, id: VideoId) -> DbResult<bool> {
        self.inner.begin_encoding(id).await
    }

    async fn plan_encodes(&self, id: VideoId, expected: i32) -> DbResult<()> {
        self.inner.plan_encodes(id, expected).await
    }

    async fn record_probe(&self, id: VideoId, duration: f64, has_audio: bool) -> DbResult<()> {
        self.inner.record_probe(id, duration, has_audio).await
    }

    async fn finish_encode_jobs(&self, id: VideoId, count: i32) -> DbResult<JobTally> {
        self.inner.finish_encode_jobs(id, count).await
    }

    async fn mark_dash_ready(&self, id: VideoId, manifest_key: &str, base_path: &str) -> DbResult<()> {
        self.inner.mark_dash_ready(id, manifest_key, base_path).await
    }

    async fn end_encoding(&self, id: VideoId) -> DbResult<()> {
        self.inner.end_encoding(id).await
    }

    async fn create_variant(&self, video_id: VideoId, resolution: Resolution) -> DbResult<VideoVariant> {
        if self.refuse_variants {
            return Err(DbError::decode("variant insert refused"));
        }
        self.inner.create_variant(video_id, resolution).await
    }

    async fn get_variant(&self, id: VariantId) -> DbResult<Option<VideoVariant>> {
        self.inner.get_variant(id).await
    }

    async fn list_variants(&self, video_id: VideoId) -> DbResult<Vec<VideoVariant>> {
        self.inner.list_variants(video_id).await
    }

    async fn complete_variant(
        &self,
        variant_id: VariantId,
        marker_id: MarkerId,
        file_key: &str,
    ) -> DbResult<Option<JobTally>> {
        self.inner.complete_variant(variant_id, marker_id, file_key).await
    }

    async fn fail_variant(
        &self,
        variant_id: VariantId,
        marker_id: MarkerId,
        error: &str,
    ) -> DbResult<Option<JobTally>> {
        self.inner.fail_variant(variant_id, marker_id, error).await
    }

    async fn delete_variant(&self, id: VariantId) -> DbResult<Option<VideoVariant>> {
        self.inner.delete_variant(id).await
    }

    async fn create_marker(&self, variant_id: VariantId) -> DbResult<CurrentEncode> {
        self.inner.create_marker(variant_id).await
    }

    async fn delete_marker(&self, id: MarkerId) -> DbResult<bool> {
        self.inner.delete_marker(id).await
    }

    async fn list_markers(&self) -> DbResult<Vec<CurrentEncode>> {
        let markers = self.inner.list_markers().await?;
        let pending = self.settle_during_scan.lock().unwrap().take();
        if let Some((variant_id, marker_id, file_key)) = pending {
            self.inner
                .complete_variant(variant_id, marker_id, &file_key)
                .await?;
        }
        Ok(markers)
    }

    async fn claim_orphan(&self, marker_id: MarkerId) -> DbResult<Option<VideoVariant>> {
        self.inner.claim_orphan(marker_id).await
    }

    async fn ping(&self) -> DbResult<()> {
        self.inner.ping().await
    }
}

struct Harness {
    _dir: TempDir,
    store: Arc<MemoryStore>,
    queue: Arc<MemoryQueue>,
    storage_root: PathBuf,
    transcoder: Arc<FakeTranscoder>,
    ctx: PipelineContext,
}

impl Harness {
    fn new(transcoder: FakeTranscoder) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let storage_root = dir.path().join("storage");
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryQueue::new());
        let transcoder = Arc::new(transcoder);

        let config = WorkerConfig {
            work_dir: dir.path().join("work"),
            ..WorkerConfig::default()
        };
        let ctx = PipelineContext::new(
            config,
            store.clone(),
            queue.clone(),
            Arc::new(LocalStorage::new(storage_root.clone())),
            transcoder.clone(),
        );

        Self {
            _dir: dir,
            store,
            queue,
            storage_root,
            transcoder,
            ctx,
        }
    }

    async fn upload(&self) -> Video {
        let path = self.storage_root.join(SOURCE_KEY);
        tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        tokio::fs::write(&path, b"source bytes").await.unwrap();

        self.store
            .create_video(NewVideo {
                title: "clip".into(),
                description: String::new(),
                source_key: SOURCE_KEY.into(),
            })
            .await
            .unwrap()
    }

    async fn video(&self, id: VideoId) -> Video {
        self.store.get_video(id).await.unwrap().unwrap()
    }

    /// Process queued jobs in priority order until the queue is empty.
    async fn drain(&self) -> Vec<(QueueJob, WorkerResult<()>)> {
        let mut results = Vec::new();
        while let Some(job) = self.queue.pop(Duration::ZERO).await.unwrap() {
            let result = process_job(&self.ctx, &job).await;
            results.push((job, result));
        }
        results
    }

    async fn encode_jobs(&self, video_id: VideoId) -> Vec<EncodeResolutionJob> {
        self.queue
            .pushed()
            .await
            .into_iter()
            .filter_map(|job| match job {
                QueueJob::EncodeResolution(j) if j.video_id == video_id => Some(j),
                _ => None,
            })
            .collect()
    }

    fn stored(&self, key: &str) -> bool {
        self.storage_root.join(key).exists()
    }

    /// Same queue, storage and transcoder over a different store.
    fn context_with(&self, store: RacingStore) -> PipelineContext {
        PipelineContext::new(
            self.ctx.config.clone(),
            Arc::new(store),
            self.ctx.queue.clone(),
            self.ctx.storage.clone(),
            self.ctx.transcoder.clone(),
        )
    }
}

fn start(video_id: VideoId) -> QueueJob {
    QueueJob::StartEncoding(StartEncodingJob::new(video_id))
}

#[tokio::test]
async fn full_hd_source_encodes_four_tiers_and_publishes_manifest() {
    let h = Harness::new(FakeTranscoder::source(1920, 1080, true));
    let video = h.upload().await;

    h.queue.push(&start(video.id)).await.unwrap();
    let results = h.drain().await;
    assert!(results.iter().all(|(_, r)| r.is_ok()), "a job failed");

    let jobs = h.encode_jobs(video.id).await;
    let planned: Vec<(Resolution, u8)> = jobs.iter().map(|j| (j.resolution, j.priority)).collect();
    assert_eq!(
        planned,
        vec![
            (Resolution::P360, 9),
            (Resolution::P480, 8),
            (Resolution::P720, 7),
            (Resolution::P1080, 6),
        ]
    );

    let variants = h.store.list_variants(video.id).await.unwrap();
    assert_eq!(variants.len(), 4);
    assert!(variants.iter().all(|v| v.is_complete()));
    let full_hd = variants
        .iter()
        .find(|v| v.resolution == Resolution::P1080)
        .unwrap();
    assert_eq!(
        full_hd.file_key.as_deref(),
        Some(format!("dash/1/rendition_1080p_{}.webm", full_hd.id).as_str())
    );
    assert!(h.stored(full_hd.file_key.as_deref().unwrap()));

    let video = h.video(video.id).await;
    assert!(video.dash_ready);
    assert!(!video.processing);
    assert!(video.is_streamable());
    assert_eq!(video.manifest_key.as_deref(), Some("dash/1/manifest.mpd"));
    assert_eq!(video.dash_base_path.as_deref(), Some("dash/1"));
    assert_eq!(video.has_audio, Some(true));
    assert!(h.stored("dash/1/manifest.mpd"));
    assert!(h.stored("dash/1/init-3.webm"));

    assert!(h.store.list_markers().await.unwrap().is_empty());
    assert!(h.transcoder.encodes().iter().all(|(_, audio)| *audio));
    assert_eq!(h.transcoder.packages(), vec![(4, true)]);
}

#[tokio::test]
async fn small_source_gets_single_source_tier() {
    let h = Harness::new(FakeTranscoder::source(320, 240, false));
    let video = h.upload().await;

    h.queue.push(&start(video.id)).await.unwrap();
    h.drain().await;

    let variants = h.store.list_variants(video.id).await.unwrap();
    assert_eq!(variants.len(), 1);
    assert_eq!(variants[0].resolution, Resolution::Source);
    assert_eq!(
        variants[0].file_key.as_deref(),
        Some(format!("dash/1/rendition_source_{}.webm", variants[0].id).as_str())
    );

    let encodes = h.transcoder.encodes();
    assert_eq!(encodes.len(), 1);
    let (profile, audio) = &encodes[0];
    assert_eq!((profile.width, profile.height), (320, 240));
    assert!(!audio);

    assert_eq!(h.transcoder.packages(), vec![(1, false)]);
    assert!(h.video(video.id).await.dash_ready);
}

#[tokio::test]
async fn planned_tiers_follow_source_height() {
    use Resolution::*;
    let cases = [
        (359, vec![Source]),
        (360, vec![P360]),
        (479, vec![P360]),
        (720, vec![P360, P480, P720]),
        (1440, vec![P360, P480, P720, P1080]),
        (2160, vec![P360, P480, P720, P1080, P2160]),
    ];

    for (height, expected) in cases {
        let h = Harness::new(FakeTranscoder::source(height * 16 / 9, height, true));
        let video = h.upload().await;

        let outcome = start_encoding(&h.ctx, &StartEncodingJob::new(video.id))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            DispatchOutcome::Dispatched {
                resolutions: expected.clone()
            },
            "height {height}"
        );

        let planned: Vec<Resolution> = h
            .encode_jobs(video.id)
            .await
            .iter()
            .map(|j| j.resolution)
            .collect();
        assert_eq!(planned, expected, "height {height}");
        assert_eq!(h.video(video.id).await.expected_jobs, expected.len() as i32);
    }
}

#[tokio::test]
async fn concurrent_dispatch_fans_out_once() {
    let h = Harness::new(FakeTranscoder::source(1280, 720, true));
    let video = h.upload().await;

    let first = StartEncodingJob::new(video.id);
    let second = StartEncodingJob::new(video.id);
    let (a, b) = tokio::join!(start_encoding(&h.ctx, &first), start_encoding(&h.ctx, &second));
    let outcomes = [a.unwrap(), b.unwrap()];

    assert_eq!(
        outcomes
            .iter()
            .filter(|o| **o == DispatchOutcome::AlreadyRunning)
            .count(),
        1
    );
    assert_eq!(h.encode_jobs(video.id).await.len(), 3);

    // While the encode runs, further dispatches are no-ops
    let again = start_encoding(&h.ctx, &StartEncodingJob::new(video.id))
        .await
        .unwrap();
    assert_eq!(again, DispatchOutcome::AlreadyRunning);
    assert_eq!(h.encode_jobs(video.id).await.len(), 3);
}

#[tokio::test]
async fn encode_failure_releases_marker_and_skips_manifest() {
    let mut transcoder = FakeTranscoder::source(1280, 720, true);
    transcoder.failing = vec![Resolution::P480];
    let h = Harness::new(transcoder);
    let video = h.upload().await;

    h.queue.push(&start(video.id)).await.unwrap();
    let results = h.drain().await;

    let failed: Vec<&WorkerError> = results.iter().filter_map(|(_, r)| r.as_ref().err()).collect();
    assert_eq!(failed.len(), 1);
    assert!(matches!(failed[0], WorkerError::EncodeProcess { .. }));

    assert!(h.store.list_markers().await.unwrap().is_empty());

    let variants = h.store.list_variants(video.id).await.unwrap();
    assert_eq!(variants.len(), 3, "failed variant row is kept");
    let broken = variants
        .iter()
        .find(|v| v.resolution == Resolution::P480)
        .unwrap();
    assert!(broken.file_key.is_none());
    assert!(broken
        .last_error
        .as_deref()
        .unwrap()
        .contains("Error while opening encoder"));

    let video = h.video(video.id).await;
    assert!(!video.dash_ready);
    assert!(!video.processing);
    assert!(video.manifest_key.is_none());
    assert_eq!(video.finished_jobs, 3);
    assert!(h.transcoder.packages().is_empty());
}

#[tokio::test]
async fn source_without_video_stream_clears_processing() {
    let h = Harness::new(FakeTranscoder::default());
    let video = h.upload().await;

    h.queue.push(&start(video.id)).await.unwrap();
    let results = h.drain().await;

    assert_eq!(results.len(), 1);
    assert!(matches!(results[0].1, Err(WorkerError::Probe(_))));
    assert!(h.encode_jobs(video.id).await.is_empty());

    let video = h.video(video.id).await;
    assert!(!video.processing);
    assert!(!video.dash_ready);
    assert!(h.store.list_variants(video.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn probe_failure_in_resolution_job_records_error() {
    let h = Harness::new(FakeTranscoder::default());
    let video = h.upload().await;

    assert!(h.store.begin_encoding(video.id).await.unwrap());
    h.store.plan_encodes(video.id, 1).await.unwrap();
    h.queue
        .push(&QueueJob::EncodeResolution(EncodeResolutionJob::new(
            video.id,
            Resolution::P360,
            9,
        )))
        .await
        .unwrap();

    let results = h.drain().await;
    assert!(matches!(results[0].1, Err(WorkerError::Probe(_))));

    let variants = h.store.list_variants(video.id).await.unwrap();
    assert_eq!(variants.len(), 1);
    assert!(variants[0].file_key.is_none());
    assert!(variants[0].last_error.as_deref().unwrap().starts_with("Probe failed"));

    assert!(h.store.list_markers().await.unwrap().is_empty());
    assert!(!h.video(video.id).await.processing);
}

#[tokio::test]
async fn recovery_resubmits_orphans_and_finishes_the_encode() {
    let h = Harness::new(FakeTranscoder::source(1280, 720, false));
    let video = h.upload().await;

    // A dispatch whose three workers all died mid-encode
    assert!(h.store.begin_encoding(video.id).await.unwrap());
    h.store.plan_encodes(video.id, 3).await.unwrap();
    for res in [Resolution::P360, Resolution::P480, Resolution::P720] {
        let variant = h.store.create_variant(video.id, res).await.unwrap();
        h.store.create_marker(variant.id).await.unwrap();
    }

    // A marker whose variant went away with its video
    let other = h.upload().await;
    let doomed = h.store.create_variant(other.id, Resolution::P360).await.unwrap();
    h.store.create_marker(doomed.id).await.unwrap();
    h.store.delete_video(other.id).await.unwrap();

    let report = recover_orphans(&h.ctx).await.unwrap();
    assert_eq!(report.resubmitted, 3);
    assert_eq!(report.discarded, 1);
    assert!(h.store.list_markers().await.unwrap().is_empty());
    assert!(h.store.list_variants(video.id).await.unwrap().is_empty());

    let pending = h.queue.pending().await;
    assert_eq!(pending.len(), 3);
    assert!(pending.iter().all(|j| j.priority() == DEFAULT_PRIORITY));

    let results = h.drain().await;
    assert!(results.iter().all(|(_, r)| r.is_ok()));

    let video = h.video(video.id).await;
    assert!(video.dash_ready);
    assert!(!video.processing);
    assert_eq!(h.transcoder.packages(), vec![(3, false)]);
}

#[tokio::test]
async fn recovery_keeps_encode_that_settles_during_scan() {
    let h = Harness::new(FakeTranscoder::source(854, 480, true));
    let video = h.upload().await;

    assert!(h.store.begin_encoding(video.id).await.unwrap());
    h.store.plan_encodes(video.id, 2).await.unwrap();
    let live = h.store.create_variant(video.id, Resolution::P360).await.unwrap();
    let live_marker = h.store.create_marker(live.id).await.unwrap();
    let dead = h.store.create_variant(video.id, Resolution::P480).await.unwrap();
    h.store.create_marker(dead.id).await.unwrap();

    // The 360p worker is alive and uploads its rendition as recovery scans
    let live_key = keys::rendition_key(video.id, Resolution::P360, live.id);
    let live_path = h.storage_root.join(&live_key);
    tokio::fs::create_dir_all(live_path.parent().unwrap()).await.unwrap();
    tokio::fs::write(&live_path, b"360p").await.unwrap();

    let racing = RacingStore::new(h.store.clone());
    *racing.settle_during_scan.lock().unwrap() = Some((live.id, live_marker.id, live_key.clone()));
    let ctx = h.context_with(racing);

    let report = recover_orphans(&ctx).await.unwrap();
    assert_eq!(report.resubmitted, 1);
    assert_eq!(report.discarded, 1);

    let kept = h.store.get_variant(live.id).await.unwrap().unwrap();
    assert_eq!(kept.file_key.as_deref(), Some(live_key.as_str()));
    assert!(h.stored(&live_key));
    assert!(h.store.get_variant(dead.id).await.unwrap().is_none());

    let video_row = h.video(video.id).await;
    assert_eq!(video_row.finished_jobs, 1);
    assert!(video_row.processing);

    let resubmitted: Vec<Resolution> = h
        .queue
        .pending()
        .await
        .iter()
        .filter_map(|job| match job {
            QueueJob::EncodeResolution(j) => Some(j.resolution),
            _ => None,
        })
        .collect();
    assert_eq!(resubmitted, vec![Resolution::P480]);

    let results = h.drain().await;
    assert!(results.iter().all(|(_, r)| r.is_ok()));

    let video_row = h.video(video.id).await;
    assert_eq!(video_row.finished_jobs, 2);
    assert!(video_row.dash_ready);
    assert!(!video_row.processing);
    assert_eq!(h.transcoder.packages(), vec![(2, true)]);
}

#[tokio::test]
async fn unstarted_last_job_still_finishes_dispatch() {
    let h = Harness::new(FakeTranscoder::source(640, 360, true));
    let video = h.upload().await;
    assert!(h.store.begin_encoding(video.id).await.unwrap());
    h.store.plan_encodes(video.id, 1).await.unwrap();

    let mut store = RacingStore::new(h.store.clone());
    store.refuse_variants = true;
    let ctx = h.context_with(store);

    let job = QueueJob::EncodeResolution(EncodeResolutionJob::new(video.id, Resolution::P360, 9));
    let result = process_job(&ctx, &job).await;

    // The insert failure is reported, not the skipped assembly
    assert!(matches!(result, Err(WorkerError::Store(_))));
    let video = h.video(video.id).await;
    assert_eq!(video.finished_jobs, 1);
    assert!(!video.processing);
    assert!(!video.dash_ready);
    assert!(h.transcoder.encodes().is_empty());
}

#[tokio::test]
async fn packaging_failure_leaves_video_not_ready() {
    let mut transcoder = FakeTranscoder::source(640, 360, true);
    transcoder.fail_package = true;
    let h = Harness::new(transcoder);
    let video = h.upload().await;

    h.queue.push(&start(video.id)).await.unwrap();
    let results = h.drain().await;

    let (last_job, last_result) = results.last().unwrap();
    assert_eq!(last_job.kind(), "encode_resolution");
    assert!(matches!(last_result, Err(WorkerError::Packaging { .. })));

    let video = h.video(video.id).await;
    assert!(!video.dash_ready);
    assert!(!video.processing);
    assert!(video.manifest_key.is_none());
    assert!(!h.stored("dash/1/manifest.mpd"));

    // The rendition itself completed
    let variants = h.store.list_variants(video.id).await.unwrap();
    assert!(variants[0].is_complete());
}

#[tokio::test]
async fn reencode_publishes_only_fresh_renditions() {
    let h = Harness::new(FakeTranscoder::source(854, 480, true));
    let video = h.upload().await;

    h.queue.push(&start(video.id)).await.unwrap();
    h.drain().await;
    assert!(h.video(video.id).await.dash_ready);

    h.queue.push(&start(video.id)).await.unwrap();
    let results = h.drain().await;
    assert!(results.iter().all(|(_, r)| r.is_ok()));

    assert_eq!(h.store.list_variants(video.id).await.unwrap().len(), 4);
    assert_eq!(h.transcoder.packages(), vec![(2, true), (2, true)]);
    assert!(!h.video(video.id).await.processing);
}
