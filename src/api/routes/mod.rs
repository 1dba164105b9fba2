use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::api::handlers;
use crate::AppState;

pub fn create_router() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/data",
            post(handlers::data::create_item).get(handlers::data::list_items),
        )
        .route(
            "/data/:id",
            get(handlers::data::get_item).delete(handlers::data::delete_item),
        )
}
