//! FFprobe media information.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use vstream_models::SourceDimensions;

use crate::command::check_ffprobe;
use crate::error::{MediaError, MediaResult};

/// What the pipeline needs to know about a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    /// Duration in seconds
    pub duration: f64,
    pub width: u32,
    pub height: u32,
    pub video_codec: String,
    /// Missing audio degrades output to video-only
    pub has_audio: bool,
}

impl MediaInfo {
    pub fn dimensions(&self) -> SourceDimensions {
        SourceDimensions {
            width: self.width,
            height: self.height,
        }
    }
}

/// FFprobe JSON output format.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: String,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    duration: Option<String>,
}

/// Probe a media file.
pub async fn probe_media(path: impl AsRef<Path>) -> MediaResult<MediaInfo> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(MediaError::FileNotFound(path.to_path_buf()));
    }

    check_ffprobe()?;

    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    if !output.status.success() {
        return Err(MediaError::FfprobeFailed {
            message: format!("FFprobe exited with {}", output.status),
            stderr: Some(String::from_utf8_lossy(&output.stderr).to_string()),
        });
    }

    parse_probe_output(&output.stdout)
}

/// Interpret ffprobe's JSON report.
pub fn parse_probe_output(json: &[u8]) -> MediaResult<MediaInfo> {
    let probe: FfprobeOutput = serde_json::from_slice(json)?;

    let video = probe
        .streams
        .iter()
        .find(|s| s.codec_type == "video")
        .ok_or(MediaError::NoVideoStream)?;

    let has_audio = probe.streams.iter().any(|s| s.codec_type == "audio");

    // Container duration first, then the video stream's own
    let duration = probe
        .format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .or(video.duration.as_deref())
        .and_then(|d| d.parse::<f64>().ok())
        .unwrap_or(0.0);

    let (width, height) = match (video.width, video.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => {
            return Err(MediaError::FfprobeFailed {
                message: "video stream reports no dimensions".to_string(),
                stderr: None,
            })
        }
    };

    Ok(MediaInfo {
        duration,
        width,
        height,
        video_codec: video.codec_name.clone().unwrap_or_default(),
        has_audio,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_video_with_audio() {
        let json = br#"{
            "streams": [
                {"codec_type": "video", "codec_name": "h264", "width": 1920, "height": 1080},
                {"codec_type": "audio", "codec_name": "aac"}
            ],
            "format": {"duration": "12.500000"}
        }"#;

        let info = parse_probe_output(json).unwrap();
        assert_eq!((info.width, info.height), (1920, 1080));
        assert!(info.has_audio);
        assert!((info.duration - 12.5).abs() < 1e-9);
        assert_eq!(info.video_codec, "h264");
    }

    #[test]
    fn test_parse_video_only_uses_stream_duration() {
        let json = br#"{
            "streams": [{"codec_type": "video", "width": 320, "height": 240, "duration": "3.0"}],
            "format": {}
        }"#;

        let info = parse_probe_output(json).unwrap();
        assert!(!info.has_audio);
        assert!((info.duration - 3.0).abs() < 1e-9);
        assert_eq!(info.dimensions(), SourceDimensions { width: 320, height: 240 });
    }

    #[test]
    fn test_parse_audio_only_is_rejected() {
        let json = br#"{"streams": [{"codec_type": "audio"}], "format": {"duration": "1"}}"#;
        assert!(matches!(
            parse_probe_output(json),
            Err(MediaError::NoVideoStream)
        ));
    }

    #[test]
    fn test_parse_video_without_dimensions_is_rejected() {
        for stream in [
            r#"{"codec_type": "video", "codec_name": "h264"}"#,
            r#"{"codec_type": "video", "width": 0, "height": 0}"#,
            r#"{"codec_type": "video", "width": 640}"#,
        ] {
            let json = format!(r#"{{"streams": [{stream}], "format": {{"duration": "2"}}}}"#);
            let err = parse_probe_output(json.as_bytes()).unwrap_err();
            assert!(err.is_probe_failure(), "{stream}");
            assert!(err.to_string().contains("no dimensions"), "{stream}");
        }
    }

    #[tokio::test]
    async fn test_probe_missing_file() {
        let err = probe_media("/nonexistent/source.mp4").await.unwrap_err();
        assert!(matches!(err, MediaError::FileNotFound(_)));
    }
}
