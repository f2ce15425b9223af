//! FFmpeg CLI wrapper for the encode pipeline.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building
//! - Progress parsing from `-progress pipe:2` and captured diagnostics on failure
//! - Source probing via FFprobe
//! - VP9/Opus rendition encoding and MPEG-DASH packaging

pub mod command;
pub mod dash;
pub mod error;
pub mod probe;
pub mod progress;
pub mod transcode;
pub mod transcoder;

pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
pub use dash::{package_dash, PackageOutput, MANIFEST_FILE_NAME, SEGMENT_DURATION_SECS};
pub use error::{MediaError, MediaResult};
pub use probe::{parse_probe_output, probe_media, MediaInfo};
pub use progress::FfmpegProgress;
pub use transcode::{encode_rendition, rendition_command};
pub use transcoder::{FfmpegTranscoder, Transcoder};
