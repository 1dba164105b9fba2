//! Service-level endpoints: root banner, health check, and the metrics
//! scrape endpoint.

use axum::{
    extract::State,
    http::{header::CONTENT_TYPE, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

use crate::metrics::exposition;
use crate::AppState;

pub async fn root() -> Json<serde_json::Value> {
    Json(json!({ "message": "pulse-backend running" }))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: String,
    pub uptime_secs: f64,
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        timestamp: chrono::Utc::now().to_rfc3339(),
        uptime_secs: state.started_at.elapsed().as_secs_f64(),
    })
}

/// Pull-based exposition of the current registry state. Read-only; an
/// external collector scrapes this on its own interval.
pub async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    let body = exposition::render(&state.registry);
    (
        StatusCode::OK,
        [(
            CONTENT_TYPE,
            HeaderValue::from_static(exposition::CONTENT_TYPE),
        )],
        body,
    )
        .into_response()
}
