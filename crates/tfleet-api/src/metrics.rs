//! Prometheus metrics for the API server.

use std::time::Instant;

use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use axum::middleware::Next;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder and return the handle that renders it.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Metric names as constants for consistency.
pub mod names {
    pub const HTTP_REQUESTS_TOTAL: &str = "tfleet_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "tfleet_http_request_duration_seconds";
    pub const HTTP_REQUESTS_IN_FLIGHT: &str = "tfleet_http_requests_in_flight";

    pub const QUEUE_LENGTH: &str = "tfleet_queue_length";
    pub const JOBS_SUBMITTED_TOTAL: &str = "tfleet_jobs_submitted_total";
}

/// Record an HTTP request.
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let labels = [
        ("method", method.to_string()),
        ("path", path.to_string()),
        ("status", status.to_string()),
    ];

    counter!(names::HTTP_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(names::HTTP_REQUEST_DURATION_SECONDS, &labels).record(duration_secs);
}

/// Update queue length gauge.
pub fn set_queue_length(length: u64) {
    gauge!(names::QUEUE_LENGTH).set(length as f64);
}

/// Record job submitted.
pub fn record_job_submitted(job_type: &str) {
    let labels = [("type", job_type.to_string())];
    counter!(names::JOBS_SUBMITTED_TOTAL, &labels).increment(1);
}

/// Path label for a request. Unrouted paths share one label.
fn path_label(path: &str, status: StatusCode) -> String {
    if status == StatusCode::NOT_FOUND {
        "unmatched".to_string()
    } else {
        path.trim_end_matches('/').to_string()
    }
}

/// Metrics middleware for HTTP requests.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).increment(1.0);
    let response = next.run(request).await;
    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).decrement(1.0);

    let status = response.status();
    let duration = start.elapsed().as_secs_f64();
    record_http_request(&method, &path_label(&path, status), status.as_u16(), duration);

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_label() {
        assert_eq!(path_label("/jobs/", StatusCode::CREATED), "/jobs");
        assert_eq!(path_label("/random/12345", StatusCode::NOT_FOUND), "unmatched");
    }
}
