//! Combined API router.
//!
//! Each domain module exposes a `configure()` router; this merges them into
//! the single surface the server binds.

use axum::routing::get;
use axum::{Json, Router};
use std::sync::Arc;

use crate::core::shared::state::AppState;

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

pub fn configure_api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health))
        .route("/auth/login", axum::routing::post(crate::security::auth::login))
        .merge(crate::directory::configure())
        .merge(crate::leads::configure())
        .merge(crate::meetings::configure())
        .merge(crate::pricing::configure())
        .merge(crate::approvals::configure())
        .merge(crate::sow::configure())
        .merge(crate::quotations::configure())
        .merge(crate::agreements::configure())
        .merge(crate::payments::configure())
        .merge(crate::kickoff::configure())
        .merge(crate::projects::configure())
        .merge(crate::notifications::configure())
}
