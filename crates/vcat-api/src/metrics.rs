//! Prometheus metrics for the API server.

use std::time::Instant;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::middleware::Next;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder and return the render handle.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Metric names as constants for consistency.
pub mod names {
    pub const HTTP_REQUESTS_TOTAL: &str = "vcat_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "vcat_http_request_duration_seconds";
    pub const HTTP_REQUESTS_IN_FLIGHT: &str = "vcat_http_requests_in_flight";

    pub const MESSAGES_PUBLISHED_TOTAL: &str = "vcat_api_messages_published_total";
}

/// Record an HTTP request.
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let labels = [
        ("method", method.to_string()),
        ("path", sanitize_path(path)),
        ("status", status.to_string()),
    ];

    counter!(names::HTTP_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(names::HTTP_REQUEST_DURATION_SECONDS, &labels).record(duration_secs);
}

/// Record a message the API put on a queue.
pub fn record_message_published(queue: &str, task: &str) {
    let labels = [("queue", queue.to_string()), ("task", task.to_string())];
    counter!(names::MESSAGES_PUBLISHED_TOTAL, &labels).increment(1);
}

/// Collapse ids and served file names so label cardinality stays bounded.
fn sanitize_path(path: &str) -> String {
    if path.starts_with("/videos/") {
        return "/videos/:file".to_string();
    }
    path.split('/')
        .map(|segment| {
            if !segment.is_empty() && segment.chars().all(|c| c.is_ascii_digit()) {
                ":id"
            } else {
                segment
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

    let status = response.status().as_u16();
    record_http_request(&method, &path, status, start.elapsed().as_secs_f64());

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_path() {
        assert_eq!(sanitize_path("/catalog/videos/42"), "/catalog/videos/:id");
        assert_eq!(sanitize_path("/catalog/videos/42/retry"), "/catalog/videos/:id/retry");
        assert_eq!(sanitize_path("/catalog/stream"), "/catalog/stream");
        assert_eq!(sanitize_path("/videos/shows/s01/e01.mp4"), "/videos/:file");
    }
}
