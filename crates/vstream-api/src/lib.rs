//! Axum HTTP API for the vstream encode pipeline.
//!
//! This crate provides:
//! - Video registration, which queues the first encode
//! - Explicit encode triggers and per-resolution status
//! - Video and variant deletion with storage cleanup
//! - Per-client rate limiting and Prometheus metrics

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
