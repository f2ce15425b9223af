//! Prometheus metrics for the worker.

use std::net::SocketAddr;

use axum::routing::get;
use axum::Router;
use metrics::{counter, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::{error, info};

use crate::error::{WorkerError, WorkerResult};

/// Metric names as constants for consistency.
pub mod names {
    pub const JOBS_COMPLETED_TOTAL: &str = "vstream_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "vstream_jobs_failed_total";
    pub const ENCODE_DURATION_SECONDS: &str = "vstream_encode_duration_seconds";
    pub const PACKAGE_DURATION_SECONDS: &str = "vstream_package_duration_seconds";
    pub const ORPHANS_RECOVERED_TOTAL: &str = "vstream_orphans_recovered_total";
    pub const MANIFESTS_PUBLISHED_TOTAL: &str = "vstream_manifests_published_total";
}

/// Install the Prometheus recorder.
pub fn init_metrics() -> WorkerResult<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| WorkerError::config_error(format!("metrics recorder: {e}")))
}

/// Serve `GET /metrics` on `port` until the process exits.
pub async fn serve_metrics(handle: PrometheusHandle, port: u16) -> WorkerResult<()> {
    let app = Router::new().route(
        "/metrics",
        get(move || {
            let handle = handle.clone();
            async move { handle.render() }
        }),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Metrics listening on {}", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Metrics server error: {}", e);
        }
    });
    Ok(())
}

pub fn record_job_completed(job_type: &str) {
    let labels = [("type", job_type.to_string())];
    counter!(names::JOBS_COMPLETED_TOTAL, &labels).increment(1);
}

pub fn record_job_failed(job_type: &str, error_kind: &str) {
    let labels = [
        ("type", job_type.to_string()),
        ("error", error_kind.to_string()),
    ];
    counter!(names::JOBS_FAILED_TOTAL, &labels).increment(1);
}

/// Record wall time of one rendition encode.
pub fn record_encode_duration(resolution: &str, duration_secs: f64) {
    let labels = [("resolution", resolution.to_string())];
    histogram!(names::ENCODE_DURATION_SECONDS, &labels).record(duration_secs);
}

pub fn record_package_duration(duration_secs: f64) {
    histogram!(names::PACKAGE_DURATION_SECONDS).record(duration_secs);
}

pub fn record_orphans_recovered(count: u32) {
    counter!(names::ORPHANS_RECOVERED_TOTAL).increment(u64::from(count));
}

pub fn record_manifest_published() {
    counter!(names::MANIFESTS_PUBLISHED_TOTAL).increment(1);
}
