//! Prometheus metrics for the API server.

use axum::body::Body;
use axum::http::{Request, Response};
use axum::middleware::Next;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Instant;

/// Install the Prometheus recorder.
pub fn init_metrics() -> anyhow::Result<PrometheusHandle> {
    Ok(PrometheusBuilder::new().install_recorder()?)
}

/// Metric names as constants for consistency.
pub mod names {
    pub const HTTP_REQUESTS_TOTAL: &str = "vstream_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "vstream_http_request_duration_seconds";
    pub const HTTP_REQUESTS_IN_FLIGHT: &str = "vstream_http_requests_in_flight";

    pub const JOBS_ENQUEUED_TOTAL: &str = "vstream_jobs_enqueued_total";
    pub const VIDEOS_DELETED_TOTAL: &str = "vstream_videos_deleted_total";
    pub const RATE_LIMIT_HITS_TOTAL: &str = "vstream_rate_limit_hits_total";
}

pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let labels = [
        ("method", method.to_string()),
        ("path", sanitize_path(path)),
        ("status", status.to_string()),
    ];

    counter!(names::HTTP_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(names::HTTP_REQUEST_DURATION_SECONDS, &labels).record(duration_secs);
}

pub fn record_job_enqueued(job_type: &str) {
    let labels = [("type", job_type.to_string())];
    counter!(names::JOBS_ENQUEUED_TOTAL, &labels).increment(1);
}

pub fn record_video_deleted() {
    counter!(names::VIDEOS_DELETED_TOTAL).increment(1);
}

pub fn record_rate_limit_hit(endpoint: &str) {
    let labels = [("endpoint", sanitize_path(endpoint))];
    counter!(names::RATE_LIMIT_HITS_TOTAL, &labels).increment(1);
}

/// Replace numeric path segments with `:id` to bound label cardinality.
fn sanitize_path(path: &str) -> String {
    path.split('/')
        .map(|seg| {
            if !seg.is_empty() && seg.bytes().all(|b| b.is_ascii_digit()) {
                ":id"
            } else {
                seg
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Metrics middleware for HTTP requests.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).increment(1.0);
    let response = next.run(request).await;
    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).decrement(1.0);

    record_http_request(
        &method,
        &path,
        response.status().as_u16(),
        start.elapsed().as_secs_f64(),
    );

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_path() {
        assert_eq!(
            sanitize_path("/api/videos/42/variants/7"),
            "/api/videos/:id/variants/:id"
        );
        assert_eq!(sanitize_path("/api/videos"), "/api/videos");
        assert_eq!(sanitize_path("/health"), "/health");
    }
}
