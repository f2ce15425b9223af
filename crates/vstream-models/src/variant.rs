//! Encoded variants and in-flight markers.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{MarkerId, Resolution, VariantId, VideoId};

/// One encoded rendition of a video.
///
/// A variant without a `file_key` is an encode that is still running, crashed,
/// or failed.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct VideoVariant {
    pub id: VariantId,
    pub video_id: VideoId,
    pub resolution: Resolution,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_key: Option<String>,
    /// Truncated diagnostics of the failure that left this variant incomplete
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl VideoVariant {
    pub fn is_complete(&self) -> bool {
        self.file_key.is_some()
    }
}

/// Marker row that exists while a variant is being encoded.
///
/// `variant_id` becomes `None` when the variant row is deleted underneath it.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CurrentEncode {
    pub id: MarkerId,
    pub variant_id: Option<VariantId>,
    pub started_at: DateTime<Utc>,
}

/// Per-resolution encode state, derived from variant and marker rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "state", content = "file_key", rename_all = "snake_case")]
pub enum EncodeState {
    NotStarted,
    InFlight,
    Done(String),
    Orphaned,
}

impl EncodeState {
    /// Derive the state of the newest variant for a resolution.
    pub fn derive(latest: Option<&VideoVariant>, has_marker: bool) -> Self {
        match latest {
            None => EncodeState::NotStarted,
            Some(v) => match (&v.file_key, has_marker) {
                (Some(key), _) => EncodeState::Done(key.clone()),
                (None, true) => EncodeState::InFlight,
                (None, false) => EncodeState::Orphaned,
            },
        }
    }
}
