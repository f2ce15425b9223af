//! Single-rendition VP9/Opus encoding.

use std::path::Path;
use tracing::debug;
use vstream_models::resolution::{GOP_SIZE, VP9_CRF};
use vstream_models::{AudioProfile, EncodingProfile};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::MediaResult;

/// Build the FFmpeg command for one rendition.
///
/// Every rendition shares the same GOP with scene-cut keyframes disabled so
/// segment boundaries align across the ladder. Audio is dropped when `audio`
/// is `None`.
pub fn rendition_command(
    source: &Path,
    output: &Path,
    profile: &EncodingProfile,
    audio: Option<&AudioProfile>,
) -> FfmpegCommand {
    let gop = GOP_SIZE.to_string();

    let cmd = FfmpegCommand::new(source, output)
        .video_codec("libvpx-vp9")
        .output_args([
            "-b:v".to_string(),
            format!("{}k", profile.bitrate_kbps),
            "-minrate".to_string(),
            format!("{}k", profile.min_bitrate_kbps),
            "-maxrate".to_string(),
            format!("{}k", profile.max_bitrate_kbps),
            "-bufsize".to_string(),
            format!("{}k", profile.bufsize_kbps),
        ])
        .crf(VP9_CRF)
        .video_filter(format!("scale={}:{}", profile.width, profile.height))
        .output_args([
            "-cpu-used",
            "2",
            "-row-mt",
            "1",
            "-tile-columns",
            "2",
            "-g",
            gop.as_str(),
            "-keyint_min",
            gop.as_str(),
            "-sc_threshold",
            "0",
        ]);

    let cmd = match audio {
        Some(audio) => cmd
            .audio_codec(audio.codec.clone())
            .audio_bitrate(format!("{}k", audio.bitrate_kbps))
            .output_args([
                "-ar".to_string(),
                audio.sample_rate.to_string(),
                "-ac".to_string(),
                audio.channels.to_string(),
            ]),
        None => cmd.output_arg("-an"),
    };

    cmd.format("webm")
}

/// Encode one rendition of `source` into `output`.
pub async fn encode_rendition(
    source: &Path,
    output: &Path,
    profile: &EncodingProfile,
    audio: Option<&AudioProfile>,
) -> MediaResult<()> {
    let cmd = rendition_command(source, output, profile, audio);
    let resolution = profile.resolution;

    FfmpegRunner::new()
        .run_with_progress(&cmd, move |p| {
            debug!(resolution = %resolution, frame = p.frame, out_time_ms = p.out_time_ms, speed = p.speed, "encode progress");
        })
        .await
}
