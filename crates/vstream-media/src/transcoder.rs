//! The transcoding engine seen by the pipeline.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use vstream_models::{AudioProfile, EncodingProfile};

use crate::dash::{package_dash, PackageOutput};
use crate::error::MediaResult;
use crate::probe::{probe_media, MediaInfo};
use crate::transcode::encode_rendition;

/// Black-box engine: probe a source, encode one rendition, package a set of
/// renditions. Each call either succeeds or reports captured diagnostics.
#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn probe(&self, source: &Path) -> MediaResult<MediaInfo>;

    async fn encode(
        &self,
        source: &Path,
        output: &Path,
        profile: &EncodingProfile,
        audio: Option<&AudioProfile>,
    ) -> MediaResult<()>;

    async fn package(
        &self,
        renditions: &[PathBuf],
        out_dir: &Path,
        with_audio: bool,
    ) -> MediaResult<PackageOutput>;
}

/// [`Transcoder`] backed by the `ffmpeg` and `ffprobe` binaries on `PATH`.
#[derive(Debug, Default, Clone, Copy)]
pub struct FfmpegTranscoder;

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn probe(&self, source: &Path) -> MediaResult<MediaInfo> {
        probe_media(source).await
    }

    async fn encode(
        &self,
        source: &Path,
        output: &Path,
        profile: &EncodingProfile,
        audio: Option<&AudioProfile>,
    ) -> MediaResult<()> {
        encode_rendition(source, output, profile, audio).await
    }

    async fn package(
        &self,
        renditions: &[PathBuf],
        out_dir: &Path,
        with_audio: bool,
    ) -> MediaResult<PackageOutput> {
        package_dash(renditions, out_dir, with_audio).await
    }
}
