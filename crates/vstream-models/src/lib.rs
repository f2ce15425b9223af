//! Shared data models for the vstream encode pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Videos and their processing state
//! - The resolution ladder and per-tier encoding profiles
//! - Encoded variants and in-flight encode markers
//! - Identifiers shared by the queue, store and worker

pub mod ids;
pub mod resolution;
pub mod variant;
pub mod video;

// Re-export common types
pub use ids::{JobId, MarkerId, VariantId, VideoId};
pub use resolution::{
    AudioProfile, EncodingProfile, Resolution, ResolutionParseError, SourceDimensions,
};
pub use variant::{CurrentEncode, EncodeState, VideoVariant};
pub use video::{
    validate_source_key, NewVideo, ProcessingState, SourceKeyError, Video, SOURCE_PREFIX,
    SUPPORTED_SOURCE_EXTENSIONS,
};
