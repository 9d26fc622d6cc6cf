//! Welcome and health endpoints.

use crate::db::PoolStats;
use crate::routes::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use serde_json::{Value as JsonValue, json};
use std::sync::Arc;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub pools: Vec<PoolStats>,
}

/// GET /
async fn root() -> Json<JsonValue> {
    Json(json!({"message": "Bienvenido a la API OVIE Tuxtla 2026"}))
}

/// GET /health - 503 while either database is unavailable
async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthResponse>) {
    let available = state.gateway.is_available();
    let (code, status) = if available {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    (
        code,
        Json(HealthResponse {
            status,
            version: env!("CARGO_PKG_VERSION"),
            pools: state.gateway.stats(),
        }),
    )
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
}
