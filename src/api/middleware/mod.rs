//! API Middleware
//!
//! Contains middleware for:
//! - Per-client rate limiting (runs first, rejected requests go no further)
//! - HTTP metrics recording

pub mod metrics;
pub mod rate_limit;

pub use metrics::metrics_middleware;
pub use rate_limit::{rate_limit_middleware, RateLimitConfig, RateLimiterState};
