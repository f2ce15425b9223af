//! MPEG-DASH packaging of encoded renditions.

use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};

pub const MANIFEST_FILE_NAME: &str = "manifest.mpd";
/// Target segment duration in seconds.
pub const SEGMENT_DURATION_SECS: u32 = 4;

/// Files written by a packaging run.
#[derive(Debug, Clone)]
pub struct PackageOutput {
    pub manifest: PathBuf,
    /// Init and media segments, excluding the manifest
    pub segments: Vec<PathBuf>,
}

/// Build the packaging command.
///
/// `renditions` are mapped video-only, one representation each; when
/// `with_audio` is set the audio track of the first rendition is mapped once
/// into its own adaptation set.
pub fn dash_command(renditions: &[PathBuf], out_dir: &Path, with_audio: bool) -> MediaResult<FfmpegCommand> {
    let (first, rest) = renditions
        .split_first()
        .ok_or_else(|| MediaError::invalid_input("no renditions to package"))?;

    let mut cmd = FfmpegCommand::new(first, out_dir.join(MANIFEST_FILE_NAME));
    for input in rest {
        cmd = cmd.input(input);
    }

    for idx in 0..renditions.len() {
        cmd = cmd.map(format!("{idx}:v"));
    }

    let adaptation_sets = if with_audio {
        cmd = cmd.map("0:a");
        "id=0,streams=v id=1,streams=a"
    } else {
        "id=0,streams=v"
    };

    let cmd = cmd
        .output_args(["-c", "copy"])
        .format("dash")
        .output_args([
            "-dash_segment_type".to_string(),
            "webm".to_string(),
            "-seg_duration".to_string(),
            SEGMENT_DURATION_SECS.to_string(),
            "-use_template".to_string(),
            "1".to_string(),
            "-use_timeline".to_string(),
            "0".to_string(),
            "-init_seg_name".to_string(),
            "init-$RepresentationID$.webm".to_string(),
            "-media_seg_name".to_string(),
            "chunk-$RepresentationID$-$Number%05d$.webm".to_string(),
            "-adaptation_sets".to_string(),
            adaptation_sets.to_string(),
        ]);

    Ok(cmd)
}

/// Package `renditions` into a manifest plus segments inside `out_dir`.
pub async fn package_dash(renditions: &[PathBuf], out_dir: &Path, with_audio: bool) -> MediaResult<PackageOutput> {
    tokio::fs::create_dir_all(out_dir).await?;

    let cmd = dash_command(renditions, out_dir, with_audio)?;
    FfmpegRunner::new().run(&cmd).await?;

    let output = collect_output(out_dir).await?;
    info!(
        segments = output.segments.len(),
        manifest = %output.manifest.display(),
        "DASH packaging complete"
    );
    Ok(output)
}

/// Gather the manifest and segment files from a packaging directory.
pub async fn collect_output(out_dir: &Path) -> MediaResult<PackageOutput> {
    let manifest = out_dir.join(MANIFEST_FILE_NAME);
    if !tokio::fs::try_exists(&manifest).await? {
        return Err(MediaError::FileNotFound(manifest));
    }

    let mut segments = Vec::new();
    let mut entries = tokio::fs::read_dir(out_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path == manifest || !entry.file_type().await?.is_file() {
            continue;
        }
        debug!(segment = %path.display(), "found DASH output");
        segments.push(path);
    }
    segments.sort();

    Ok(PackageOutput { manifest, segments })
}
