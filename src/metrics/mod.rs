//! Metrics Module
//!
//! In-process metrics pipeline for the service:
//! - Registry of named counter/gauge/histogram families with labeled series
//! - HTTP request metrics (count, latency, in-flight)
//! - Database metrics (operation count, query latency, active connections)
//! - Business-event counters
//! - Prometheus text exposition for the scrape endpoint
//!
//! Nothing here is global. The binary builds one `MetricRegistry`, derives an
//! `AppMetrics` handle set from it, and hands clones to the middleware and
//! the database layer.

pub mod exposition;
pub mod instruments;
pub mod registry;

use std::time::Instant;

pub use registry::{Counter, Gauge, Histogram, MetricError, MetricRegistry};

/// Metric names as constants for consistency
pub mod names {
    // HTTP
    pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "http_request_duration_seconds";
    pub const HTTP_REQUESTS_IN_FLIGHT: &str = "http_requests_in_flight";

    // Database
    pub const DB_OPERATIONS_TOTAL: &str = "db_operations_total";
    pub const DB_QUERY_DURATION_SECONDS: &str = "db_query_duration_seconds";
    pub const DB_CONNECTIONS_ACTIVE: &str = "db_connections_active";

    // Business events
    pub const DATA_ITEMS_CREATED_TOTAL: &str = "data_items_created_total";
}

/// Label keys
pub mod labels {
    pub const METHOD: &str = "method";
    pub const PATH: &str = "path";
    pub const STATUS: &str = "status";
    pub const OPERATION: &str = "operation";
}

/// Reserved label values
pub mod values {
    /// Path label for requests that matched no route template. Keeps raw
    /// paths (and their unbounded cardinality) out of the registry.
    pub const PATH_UNMATCHED: &str = "unmatched";
    /// Status label recorded when a request is abandoned mid-flight.
    pub const STATUS_CANCELED: &str = "canceled";
    pub const STATUS_SUCCESS: &str = "success";
    pub const STATUS_ERROR: &str = "error";
}

/// Default duration buckets, sub-millisecond through multi-second.
pub const DEFAULT_HTTP_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];
pub const DEFAULT_DB_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0,
];

/// Histogram bucket configuration, overridable from `AppConfig`.
#[derive(Debug, Clone)]
pub struct BucketConfig {
    pub http: Vec<f64>,
    pub db: Vec<f64>,
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            http: DEFAULT_HTTP_BUCKETS.to_vec(),
            db: DEFAULT_DB_BUCKETS.to_vec(),
        }
    }
}

/// Pre-registered handles for every metric the service records. Built once at
/// startup; registration failures here are programming errors and abort boot.
#[derive(Debug, Clone)]
pub struct AppMetrics {
    pub http_requests_total: Counter,
    pub http_request_duration_seconds: Histogram,
    pub http_requests_in_flight: Gauge,
    pub db_operations_total: Counter,
    pub db_query_duration_seconds: Histogram,
    pub db_connections_active: Gauge,
    pub data_items_created_total: Counter,
}

impl AppMetrics {
    pub fn new(registry: &MetricRegistry, buckets: &BucketConfig) -> Result<Self, MetricError> {
        let http_labels = [labels::METHOD, labels::PATH, labels::STATUS];
        Ok(Self {
            http_requests_total: registry.counter(names::HTTP_REQUESTS_TOTAL, &http_labels)?,
            http_request_duration_seconds: registry.histogram(
                names::HTTP_REQUEST_DURATION_SECONDS,
                &http_labels,
                &buckets.http,
            )?,
            http_requests_in_flight: registry.gauge(names::HTTP_REQUESTS_IN_FLIGHT, &[])?,
            db_operations_total: registry
                .counter(names::DB_OPERATIONS_TOTAL, &[labels::OPERATION, labels::STATUS])?,
            db_query_duration_seconds: registry.histogram(
                names::DB_QUERY_DURATION_SECONDS,
                &[labels::OPERATION],
                &buckets.db,
            )?,
            db_connections_active: registry.gauge(names::DB_CONNECTIONS_ACTIVE, &[])?,
            data_items_created_total: registry.counter(names::DATA_ITEMS_CREATED_TOTAL, &[])?,
        })
    }
}

/// Timer for measuring durations
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer() {
        let timer = Timer::new();
        std::thread::sleep(std::time::Duration::from_millis(10));
        let elapsed = timer.elapsed_secs();
        assert!(elapsed >= 0.01);
        assert!(elapsed < 0.5);
    }

    #[test]
    fn app_metrics_register_idempotently() {
        let registry = MetricRegistry::new();
        let buckets = BucketConfig::default();
        AppMetrics::new(&registry, &buckets).unwrap();
        // Same shapes on re-registration, so a second build must succeed.
        AppMetrics::new(&registry, &buckets).unwrap();
    }

    #[test]
    fn app_metrics_reject_kind_drift() {
        let registry = MetricRegistry::new();
        registry
            .gauge(
                names::HTTP_REQUESTS_TOTAL,
                &[labels::METHOD, labels::PATH, labels::STATUS],
            )
            .unwrap();
        let err = AppMetrics::new(&registry, &BucketConfig::default()).unwrap_err();
        assert!(matches!(err, MetricError::KindMismatch { .. }));
    }

    #[test]
    fn test_metric_names() {
        assert_eq!(names::HTTP_REQUESTS_TOTAL, "http_requests_total");
        assert_eq!(names::DB_OPERATIONS_TOTAL, "db_operations_total");
        assert_eq!(names::DATA_ITEMS_CREATED_TOTAL, "data_items_created_total");
    }

    #[test]
    fn test_label_keys() {
        assert_eq!(labels::METHOD, "method");
        assert_eq!(labels::PATH, "path");
        assert_eq!(labels::OPERATION, "operation");
    }
}
