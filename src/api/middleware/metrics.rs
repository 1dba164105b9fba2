//! HTTP Metrics Middleware
//!
//! Records metrics for every request that passes through the router:
//! - Request count by method, path template, and status
//! - Request duration histogram with the same labels
//! - In-flight request gauge
//!
//! The path label is always the matched route template (`/users/:id`), never
//! the raw path, so label cardinality stays bounded. Requests that match no
//! route are recorded under the reserved `unmatched` path. Recording happens
//! from a drop guard, so a request abandoned mid-flight (client disconnect)
//! still produces a completion observation with a `canceled` status instead
//! of leaking an open measurement.

use std::time::Instant;

use axum::{
    extract::{MatchedPath, Request, State},
    middleware::Next,
    response::Response,
};

use crate::metrics::{values, AppMetrics};

struct RequestRecorder {
    metrics: AppMetrics,
    method: String,
    path: String,
    start: Instant,
    status: Option<u16>,
}

impl RequestRecorder {
    fn begin(metrics: AppMetrics, method: String, path: String) -> Self {
        metrics.http_requests_in_flight.add(&[], 1.0);
        Self {
            metrics,
            method,
            path,
            start: Instant::now(),
            status: None,
        }
    }
}

impl Drop for RequestRecorder {
    fn drop(&mut self) {
        let status = match self.status {
            Some(code) => code.to_string(),
            None => values::STATUS_CANCELED.to_string(),
        };
        let labels = [self.method.as_str(), self.path.as_str(), status.as_str()];
        let elapsed = self.start.elapsed().as_secs_f64();

        self.metrics.http_requests_total.increment(&labels, 1);
        self.metrics
            .http_request_duration_seconds
            .observe(&labels, elapsed);
        self.metrics.http_requests_in_flight.decrement(&[], 1.0);
    }
}

/// Middleware to record HTTP metrics for each request
pub async fn metrics_middleware(
    State(metrics): State<AppMetrics>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().to_string();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| values::PATH_UNMATCHED.to_string());

    let mut recorder = RequestRecorder::begin(metrics, method, path);
    let response = next.run(request).await;
    recorder.status = Some(response.status().as_u16());
    response
}
