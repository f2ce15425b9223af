//! Video records.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::VideoId;

/// Source containers accepted on registration.
pub const SUPPORTED_SOURCE_EXTENSIONS: [&str; 5] = ["mp4", "mov", "avi", "mkv", "webm"];

/// Storage prefix for uploaded sources.
pub const SOURCE_PREFIX: &str = "videos/originals/";

/// Two-state encode lock owned by a video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingState {
    #[default]
    Idle,
    Encoding,
}

impl ProcessingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingState::Idle => "idle",
            ProcessingState::Encoding => "encoding",
        }
    }
}

impl fmt::Display for ProcessingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A source media asset and its streaming output.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Video {
    pub id: VideoId,

    pub title: String,

    #[serde(default)]
    pub description: String,

    /// Storage key of the uploaded source, under `videos/originals/`
    pub source_key: String,

    /// True from dispatch until every fanned-out job has finished
    pub processing: bool,

    /// True once a manifest has been assembled and published
    pub dash_ready: bool,

    /// Storage key of `manifest.mpd`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest_key: Option<String>,

    /// Storage prefix holding renditions and segments
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dash_base_path: Option<String>,

    /// Duration in seconds (populated after probing)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,

    /// Whether the source carries an audio stream (populated after probing)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_audio: Option<bool>,

    /// When the most recent dispatch started
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encode_started_at: Option<DateTime<Utc>>,

    /// Jobs fanned out by the most recent dispatch
    #[serde(default)]
    pub expected_jobs: i32,

    /// Jobs of the most recent dispatch that have finished, either way
    #[serde(default)]
    pub finished_jobs: i32,

    pub created_at: DateTime<Utc>,
}

impl Video {
    pub fn processing_state(&self) -> ProcessingState {
        if self.processing {
            ProcessingState::Encoding
        } else {
            ProcessingState::Idle
        }
    }

    /// A player can be pointed at this video.
    pub fn is_streamable(&self) -> bool {
        self.dash_ready && self.manifest_key.is_some()
    }
}

/// Fields supplied when registering an uploaded video.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct NewVideo {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub source_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceKeyError {
    #[error("source key must live under videos/originals/")]
    WrongPrefix,

    #[error("unsupported source extension: {0}")]
    UnsupportedExtension(String),
}

/// Check that a source key points at an accepted upload.
pub fn validate_source_key(key: &str) -> Result<(), SourceKeyError> {
    let Some(name) = key.strip_prefix(SOURCE_PREFIX) else {
        return Err(SourceKeyError::WrongPrefix);
    };

    let ext = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    if SUPPORTED_SOURCE_EXTENSIONS.contains(&ext.as_str()) {
        Ok(())
    } else {
        Err(SourceKeyError::UnsupportedExtension(ext))
    }
}
