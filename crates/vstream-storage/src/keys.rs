//! Storage key layout.
//!
//! ```text
//! videos/originals/<file>                           uploaded source
//! dash/<video_id>/manifest.mpd                      assembled manifest
//! dash/<video_id>/rendition_<res>_<variant_id>.webm encoded renditions
//! dash/<video_id>/<segments>                        init and media segments
//! ```

use std::path::Path;
use vstream_models::{Resolution, VariantId, VideoId};

pub const MANIFEST_FILE_NAME: &str = "manifest.mpd";

/// Per-video directory for renditions, segments and the manifest.
pub fn dash_prefix(video_id: VideoId) -> String {
    format!("dash/{video_id}")
}

pub fn manifest_key(video_id: VideoId) -> String {
    format!("{}/{MANIFEST_FILE_NAME}", dash_prefix(video_id))
}

/// Rendition of one variant. Re-encodes of a tier never share a key.
pub fn rendition_key(video_id: VideoId, resolution: Resolution, variant_id: VariantId) -> String {
    format!("{}/rendition_{resolution}_{variant_id}.webm", dash_prefix(video_id))
}

/// Key for a packaging output file, placed next to the manifest.
pub fn segment_key(video_id: VideoId, file_name: &str) -> String {
    format!("{}/{file_name}", dash_prefix(video_id))
}

/// Content type to store a file under, from its extension.
pub fn content_type_for(path: impl AsRef<Path>) -> &'static str {
    match path.as_ref().extension().and_then(|e| e.to_str()) {
        Some("mpd") => "application/dash+xml",
        Some("webm") => "video/webm",
        Some("mp4") | Some("m4s") => "video/mp4",
        Some("mov") => "video/quicktime",
        Some("mkv") => "video/x-matroska",
        Some("avi") => "video/x-msvideo",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        let id = VideoId(12);
        assert_eq!(dash_prefix(id), "dash/12");
        assert_eq!(manifest_key(id), "dash/12/manifest.mpd");
        assert_eq!(
            rendition_key(id, Resolution::P1080, VariantId(40)),
            "dash/12/rendition_1080p_40.webm"
        );
        assert_ne!(
            rendition_key(id, Resolution::P360, VariantId(13)),
            rendition_key(id, Resolution::P360, VariantId(14))
        );
        assert_eq!(
            segment_key(id, "chunk-0-00001.webm"),
            "dash/12/chunk-0-00001.webm"
        );
    }

    #[test]
    fn test_content_types() {
        assert_eq!(content_type_for("a/manifest.mpd"), "application/dash+xml");
        assert_eq!(content_type_for("init-0.webm"), "video/webm");
        assert_eq!(content_type_for("noext"), "application/octet-stream");
    }
}
