//! Encode pipeline worker.
//!
//! This crate provides:
//! - Dispatch of a video's encode into per-resolution jobs
//! - Per-resolution VP9 encodes guarded by in-flight markers
//! - MPEG-DASH manifest assembly by the last finishing job
//! - Crash recovery of orphaned encodes at startup
//! - The queue executor with bounded concurrency and graceful shutdown

pub mod assembler;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod encode;
pub mod error;
pub mod executor;
pub mod logging;
pub mod marker;
pub mod metrics;
pub mod recovery;
pub mod source;

pub use assembler::{assemble_manifest, select_renditions, AssemblyOutcome};
pub use config::WorkerConfig;
pub use context::PipelineContext;
pub use dispatcher::{start_encoding, DispatchOutcome};
pub use encode::encode_resolution;
pub use error::{WorkerError, WorkerResult};
pub use executor::{process_job, JobExecutor};
pub use logging::JobLogger;
pub use marker::EncodeMarker;
pub use recovery::{recover_orphans, RecoveryReport};
