use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{middleware as axum_middleware, routing::get, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod config;
mod db;
mod metrics;
mod models;
mod utils;

use crate::api::handlers::system;
use crate::api::middleware::{
    metrics_middleware, rate_limit_middleware, RateLimitConfig, RateLimiterState,
};
use crate::config::AppConfig;
use crate::db::Database;
use crate::metrics::{AppMetrics, BucketConfig, MetricRegistry};

pub struct AppState {
    pub config: AppConfig,
    pub db: Database,
    pub metrics: AppMetrics,
    pub registry: Arc<MetricRegistry>,
    pub started_at: Instant,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pulse_backend=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = AppConfig::load()?;

    tracing::info!("Starting pulse-backend v{}", env!("CARGO_PKG_VERSION"));

    // One registry per process; every component gets a handle, nothing is
    // global.
    let registry = Arc::new(MetricRegistry::new());
    let app_metrics = AppMetrics::new(
        &registry,
        &BucketConfig {
            http: config.http_duration_buckets.clone(),
            db: config.db_duration_buckets.clone(),
        },
    )?;
    tracing::info!("Metric registry initialized");

    // Database must be reachable and the schema bootstrapped before the
    // service accepts traffic.
    let db = Database::connect(
        &config.database_url,
        config.db_max_connections,
        app_metrics.clone(),
    )
    .await?;
    db.init_schema().await?;
    tracing::info!("Database connected, schema ready");

    // Rate limiter with background eviction of idle client windows
    let rate_limiter = RateLimiterState::new(RateLimitConfig {
        max_requests: config.rate_limit_max_requests,
        window: Duration::from_secs(config.rate_limit_window_secs),
        fail_open: config.rate_limit_fail_open,
        max_clients: config.rate_limit_max_clients,
    });
    rate_limiter.start_sweeper();
    tracing::info!(
        enabled = config.rate_limit_enabled,
        limit = config.rate_limit_max_requests,
        window_secs = config.rate_limit_window_secs,
        "Rate limiter initialized"
    );

    // Build application state
    let state = Arc::new(AppState {
        config: config.clone(),
        db,
        metrics: app_metrics.clone(),
        registry,
        started_at: Instant::now(),
    });

    // Build router. The metrics interceptor wraps every route; the rate
    // limiter wraps the interceptor, so rejected requests never reach it.
    let mut app = Router::new()
        .route("/", get(system::root))
        .route("/health", get(system::health))
        .route("/metrics", get(system::metrics))
        .nest("/api", api::routes::create_router())
        .layer(axum_middleware::from_fn_with_state(
            app_metrics,
            metrics_middleware,
        ));
    if config.rate_limit_enabled {
        app = app.layer(axum_middleware::from_fn_with_state(
            rate_limiter,
            rate_limit_middleware,
        ));
    }
    let app = app
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
