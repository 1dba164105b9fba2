//! CRUD handlers for the `user_data` table.
//!
//! These are deliberately plain: all instrumentation happens in the
//! middleware stack and the database wrapper, so the handlers stay unaware
//! of metrics except for explicit business events.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use validator::Validate;

use crate::models::{CreateDataItem, DataItem};
use crate::utils::response::{ApiResponse, AppError};
use crate::AppState;

const DEFAULT_LIST_LIMIT: i64 = 100;
const MAX_LIST_LIMIT: i64 = 1000;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<i64>,
}

pub async fn create_item(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateDataItem>,
) -> Result<(StatusCode, Json<ApiResponse<DataItem>>), AppError> {
    payload.validate()?;

    let item = state
        .db
        .insert_item(&payload.name, &payload.email, payload.message.as_deref())
        .await?;

    state.metrics.data_items_created_total.increment(&[], 1);
    tracing::info!(id = item.id, "data item created");

    Ok((StatusCode::CREATED, Json(ApiResponse::success(item))))
}

pub async fn list_items(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ApiResponse<Vec<DataItem>>>, AppError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);
    let items = state.db.list_items(limit).await?;
    Ok(Json(ApiResponse::success(items)))
}

pub async fn get_item(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> Result<Json<ApiResponse<DataItem>>, AppError> {
    match state.db.get_item(id).await? {
        Some(item) => Ok(Json(ApiResponse::success(item))),
        None => Err(AppError::NotFound(format!("item {} not found", id))),
    }
}

pub async fn delete_item(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> Result<StatusCode, AppError> {
    if state.db.delete_item(id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(format!("item {} not found", id)))
    }
}
