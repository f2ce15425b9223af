//! Worker error types.

use thiserror::Error;
use vstream_media::MediaError;
use vstream_models::VideoId;

pub type WorkerResult<T> = Result<T, WorkerError>;

/// Longest failure summary stored on a variant.
pub const MAX_ERROR_SUMMARY: usize = 2000;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Probe failed: {0}")]
    Probe(String),

    #[error("Encode process failed: {message}")]
    EncodeProcess {
        message: String,
        diagnostics: Option<String>,
    },

    #[error("Packaging failed: {message}")]
    Packaging {
        message: String,
        diagnostics: Option<String>,
    },

    #[error("Storage write failed: {0}")]
    StorageWrite(String),

    #[error("Video not found: {0}")]
    VideoNotFound(VideoId),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(#[from] vstream_storage::StorageError),

    #[error("Store error: {0}")]
    Store(#[from] vstream_db::DbError),

    #[error("Queue error: {0}")]
    Queue(#[from] vstream_queue::QueueError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    /// Map a failure from the probe or encode step.
    pub fn from_media(err: MediaError) -> Self {
        if err.is_probe_failure() {
            return Self::Probe(err.to_string());
        }
        Self::EncodeProcess {
            diagnostics: err.diagnostics().map(str::to_string),
            message: err.to_string(),
        }
    }

    /// Map a failure from the packaging step.
    pub fn packaging(err: MediaError) -> Self {
        Self::Packaging {
            diagnostics: err.diagnostics().map(str::to_string),
            message: err.to_string(),
        }
    }

    pub fn storage_write(msg: impl std::fmt::Display) -> Self {
        Self::StorageWrite(msg.to_string())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn diagnostics(&self) -> Option<&str> {
        match self {
            Self::EncodeProcess { diagnostics, .. } | Self::Packaging { diagnostics, .. } => {
                diagnostics.as_deref()
            }
            _ => None,
        }
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Probe(_) => "probe",
            Self::EncodeProcess { .. } => "encode_process",
            Self::Packaging { .. } => "packaging",
            Self::StorageWrite(_) | Self::Storage(_) => "storage",
            Self::VideoNotFound(_) => "not_found",
            Self::Config(_) => "config",
            Self::Store(_) => "store",
            Self::Queue(_) => "queue",
            Self::Io(_) => "io",
        }
    }

    /// Message plus the tail of any diagnostics, bounded for storage.
    pub fn summary(&self) -> String {
        let mut text = self.to_string();
        if let Some(diag) = self.diagnostics() {
            text.push('\n');
            text.push_str(diag.trim());
        }
        truncate_tail(&text, MAX_ERROR_SUMMARY)
    }
}

/// Keep the last `max` bytes of `text`, cut on a char boundary.
fn truncate_tail(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut start = text.len() - max;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    format!("...{}", &text[start..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_mapping() {
        assert!(matches!(
            WorkerError::from_media(MediaError::NoVideoStream),
            WorkerError::Probe(_)
        ));

        let err = WorkerError::from_media(MediaError::ffmpeg_failed(
            "exit status 1",
            Some("Unknown encoder".into()),
            Some(1),
        ));
        assert_eq!(err.kind(), "encode_process");
        assert_eq!(err.diagnostics(), Some("Unknown encoder"));
        assert!(err.summary().ends_with("Unknown encoder"));
    }

    #[test]
    fn test_summary_is_bounded() {
        let err = WorkerError::EncodeProcess {
            message: "exit status 1".into(),
            diagnostics: Some("é".repeat(MAX_ERROR_SUMMARY)),
        };
        let summary = err.summary();
        assert!(summary.len() <= MAX_ERROR_SUMMARY + 3);
        assert!(summary.starts_with("..."));
    }
}
