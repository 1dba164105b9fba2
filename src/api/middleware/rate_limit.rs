//! Rate Limiting Middleware
//!
//! Fixed-window rate limiting per client identity, backed by DashMap for
//! thread-safe in-memory storage. Suitable for single-instance deployments;
//! for distributed deployments, consider Redis-based rate limiting.
//!
//! Windows reset once their duration elapses, which allows up to a 2x burst
//! around a boundary. That is the accepted trade-off for O(1) cost per
//! request: this is a defensive control, not a precision one.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header::RETRY_AFTER, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use dashmap::DashMap;
use thiserror::Error;

use crate::utils::response::ApiResponse;

/// Idle windows older than this many window durations are swept out.
const IDLE_EVICTION_FACTOR: u32 = 4;

/// Rate limiter configuration
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum requests per window
    pub max_requests: u32,
    /// Window duration
    pub window: Duration,
    /// Admit requests when the limiter itself cannot decide (table full).
    /// Fail-open keeps the protected service available; fail-closed trades
    /// availability for strict enforcement.
    pub fail_open: bool,
    /// Upper bound on tracked client identities
    pub max_clients: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window: Duration::from_secs(60),
            fail_open: true,
            max_clients: 10_000,
        }
    }
}

/// Per-client fixed window
#[derive(Debug, Clone)]
struct ClientWindow {
    request_count: u32,
    window_start: Instant,
    last_seen: Instant,
}

/// Outcome of an admission check
#[derive(Debug)]
pub enum RateLimitDecision {
    Admitted(RateLimitInfo),
    Rejected(RateLimitExceeded),
}

/// Rate limit information returned to admitted clients
#[derive(Debug)]
pub struct RateLimitInfo {
    pub limit: u32,
    pub remaining: u32,
    pub reset: Duration,
}

/// Rejection with a retry hint of the remaining window time
#[derive(Debug)]
pub struct RateLimitExceeded {
    pub retry_after: Duration,
}

/// The limiter cannot track another client; policy decides admit vs reject.
#[derive(Debug, Error)]
#[error("rate limiter client table is full ({tracked} clients)")]
pub struct LimiterUnavailable {
    pub tracked: usize,
}

/// In-memory fixed-window rate limiter
pub struct RateLimiter {
    windows: DashMap<String, ClientWindow>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            windows: DashMap::new(),
            config,
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Check whether a request from `client_id` is admitted. The window is
    /// created lazily on the client's first request and reset in place once
    /// its duration has elapsed.
    pub fn check(&self, client_id: &str) -> Result<RateLimitDecision, LimiterUnavailable> {
        let now = Instant::now();

        // Bound memory under many distinct clients. Known identities keep
        // working even when the table is full.
        if self.windows.len() >= self.config.max_clients && !self.windows.contains_key(client_id) {
            return Err(LimiterUnavailable {
                tracked: self.windows.len(),
            });
        }

        let mut entry = self
            .windows
            .entry(client_id.to_string())
            .or_insert_with(|| ClientWindow {
                request_count: 0,
                window_start: now,
                last_seen: now,
            });

        if now.duration_since(entry.window_start) >= self.config.window {
            entry.request_count = 0;
            entry.window_start = now;
        }

        entry.request_count += 1;
        entry.last_seen = now;

        let reset = self
            .config
            .window
            .saturating_sub(now.duration_since(entry.window_start));

        if entry.request_count > self.config.max_requests {
            Ok(RateLimitDecision::Rejected(RateLimitExceeded {
                retry_after: reset,
            }))
        } else {
            Ok(RateLimitDecision::Admitted(RateLimitInfo {
                limit: self.config.max_requests,
                remaining: self.config.max_requests.saturating_sub(entry.request_count),
                reset,
            }))
        }
    }

    /// Drop windows with no traffic for several window durations. Racing a
    /// concurrent request for the same client is safe: the loser simply
    /// recreates a fresh window, which only favors admission.
    pub fn evict_idle(&self) {
        let now = Instant::now();
        let idle_cutoff = self.config.window * IDLE_EVICTION_FACTOR;
        self.windows
            .retain(|_, window| now.duration_since(window.last_seen) < idle_cutoff);
    }

    fn tracked_clients(&self) -> usize {
        self.windows.len()
    }
}

/// Shared limiter handle for use as middleware state
#[derive(Clone)]
pub struct RateLimiterState(pub Arc<RateLimiter>);

impl RateLimiterState {
    pub fn new(config: RateLimitConfig) -> Self {
        Self(Arc::new(RateLimiter::new(config)))
    }

    /// Spawn the background sweep that bounds the window table under many
    /// transient clients.
    pub fn start_sweeper(&self) {
        let limiter = self.0.clone();
        let period = limiter.config.window * 2;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                let before = limiter.tracked_clients();
                limiter.evict_idle();
                let evicted = before.saturating_sub(limiter.tracked_clients());
                if evicted > 0 {
                    tracing::debug!(evicted, "swept idle rate-limit windows");
                }
            }
        });
    }
}

/// Client identity: forwarded headers first (deployments behind a proxy),
/// then the peer address, then a shared bucket.
fn client_identity(request: &Request) -> String {
    request
        .headers()
        .get("X-Forwarded-For")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(|s| s.trim().to_string())
        .or_else(|| {
            request
                .headers()
                .get("X-Real-IP")
                .and_then(|h| h.to_str().ok())
                .map(|s| s.to_string())
        })
        .or_else(|| {
            request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        })
        .unwrap_or_else(|| "unknown".to_string())
}

fn retry_after_secs(retry_after: Duration) -> u64 {
    retry_after.as_secs().max(1)
}

/// Rate limiting middleware. Runs before the metrics interceptor and the
/// handler; rejected requests never reach either.
pub async fn rate_limit_middleware(
    State(limiter): State<RateLimiterState>,
    request: Request,
    next: Next,
) -> Response {
    let client_id = client_identity(&request);

    match limiter.0.check(&client_id) {
        Ok(RateLimitDecision::Admitted(info)) => {
            let mut response = next.run(request).await;
            let headers = response.headers_mut();
            headers.insert("X-RateLimit-Limit", HeaderValue::from(info.limit));
            headers.insert("X-RateLimit-Remaining", HeaderValue::from(info.remaining));
            headers.insert(
                "X-RateLimit-Reset",
                HeaderValue::from(info.reset.as_secs()),
            );
            response
        }
        Ok(RateLimitDecision::Rejected(exceeded)) => {
            let retry_secs = retry_after_secs(exceeded.retry_after);
            tracing::warn!(
                client = %client_id,
                retry_after_secs = retry_secs,
                "rate limit exceeded"
            );

            let body = ApiResponse::<()>::error(
                "RATE_LIMITED",
                "Too many requests. Please try again later.",
            );
            let mut response =
                (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(retry_secs));
            response
        }
        Err(err) => {
            if limiter.0.config().fail_open {
                tracing::warn!(client = %client_id, %err, "rate limiter unavailable, admitting");
                next.run(request).await
            } else {
                tracing::warn!(client = %client_id, %err, "rate limiter unavailable, rejecting");
                let body = ApiResponse::<()>::error(
                    "RATE_LIMITER_UNAVAILABLE",
                    "Service is shedding load. Please try again later.",
                );
                (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, routing::get, Router};
    use tower::ServiceExt;

    fn limiter(max_requests: u32, window: Duration) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            max_requests,
            window,
            ..RateLimitConfig::default()
        })
    }

    #[test]
    fn admits_up_to_limit_then_rejects() {
        let limiter = limiter(5, Duration::from_secs(60));
        for i in 1..=5 {
            match limiter.check("10.0.0.1").unwrap() {
                RateLimitDecision::Admitted(info) => {
                    assert_eq!(info.remaining, 5 - i);
                }
                RateLimitDecision::Rejected(_) => panic!("request {} should be admitted", i),
            }
        }
        assert!(matches!(
            limiter.check("10.0.0.1").unwrap(),
            RateLimitDecision::Rejected(_)
        ));
    }

    #[test]
    fn window_reset_readmits() {
        let window = Duration::from_millis(50);
        let limiter = limiter(1, window);
        assert!(matches!(
            limiter.check("10.0.0.1").unwrap(),
            RateLimitDecision::Admitted(_)
        ));
        assert!(matches!(
            limiter.check("10.0.0.1").unwrap(),
            RateLimitDecision::Rejected(_)
        ));
        std::thread::sleep(window + Duration::from_millis(10));
        assert!(matches!(
            limiter.check("10.0.0.1").unwrap(),
            RateLimitDecision::Admitted(_)
        ));
    }

    #[test]
    fn clients_are_limited_independently() {
        let limiter = limiter(1, Duration::from_secs(60));
        assert!(matches!(
            limiter.check("10.0.0.1").unwrap(),
            RateLimitDecision::Admitted(_)
        ));
        assert!(matches!(
            limiter.check("10.0.0.2").unwrap(),
            RateLimitDecision::Admitted(_)
        ));
        assert!(matches!(
            limiter.check("10.0.0.1").unwrap(),
            RateLimitDecision::Rejected(_)
        ));
    }

    #[test]
    fn full_table_reports_unavailable_for_new_clients_only() {
        let limiter = RateLimiter::new(RateLimitConfig {
            max_requests: 10,
            window: Duration::from_secs(60),
            fail_open: true,
            max_clients: 1,
        });
        assert!(limiter.check("10.0.0.1").is_ok());
        assert!(limiter.check("10.0.0.2").is_err());
        // The known client is still tracked.
        assert!(limiter.check("10.0.0.1").is_ok());
    }

    #[test]
    fn idle_windows_are_evicted() {
        let window = Duration::from_millis(10);
        let limiter = limiter(10, window);
        limiter.check("10.0.0.1").unwrap();
        std::thread::sleep(window * (IDLE_EVICTION_FACTOR + 1));
        limiter.evict_idle();
        assert_eq!(limiter.tracked_clients(), 0);
    }

    #[test]
    fn eviction_keeps_active_windows() {
        let limiter = limiter(10, Duration::from_secs(60));
        limiter.check("10.0.0.1").unwrap();
        limiter.evict_idle();
        assert_eq!(limiter.tracked_clients(), 1);
    }

    fn test_router(config: RateLimitConfig) -> Router {
        let state = RateLimiterState::new(config);
        Router::new()
            .route("/ping", get(|| async { "pong" }))
            .layer(axum::middleware::from_fn_with_state(
                state,
                rate_limit_middleware,
            ))
    }

    fn request_from(ip: &str) -> axum::http::Request<Body> {
        axum::http::Request::builder()
            .uri("/ping")
            .header("X-Forwarded-For", ip)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn middleware_rejects_with_429_and_retry_after() {
        let app = test_router(RateLimitConfig {
            max_requests: 2,
            window: Duration::from_secs(60),
            ..RateLimitConfig::default()
        });

        for _ in 0..2 {
            let response = app.clone().oneshot(request_from("1.2.3.4")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert!(response.headers().contains_key("X-RateLimit-Remaining"));
        }

        let response = app.clone().oneshot(request_from("1.2.3.4")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().contains_key(RETRY_AFTER));

        // A different client is unaffected.
        let response = app.oneshot(request_from("5.6.7.8")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn middleware_fails_open_when_table_is_full() {
        let app = test_router(RateLimitConfig {
            max_requests: 1,
            window: Duration::from_secs(60),
            fail_open: true,
            max_clients: 1,
        });

        let response = app.clone().oneshot(request_from("1.2.3.4")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let response = app.oneshot(request_from("5.6.7.8")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn middleware_fails_closed_when_configured() {
        let app = test_router(RateLimitConfig {
            max_requests: 1,
            window: Duration::from_secs(60),
            fail_open: false,
            max_clients: 1,
        });

        let response = app.clone().oneshot(request_from("1.2.3.4")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let response = app.oneshot(request_from("5.6.7.8")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
