//! Health, metrics and store statistics.
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Serialize;

use super::{ApiError, AppState};
use crate::store::DatabaseStats;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

pub async fn metrics() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, crate::metrics::CONTENT_TYPE)],
        crate::metrics::gather(),
    )
}

pub async fn db_stats(State(state): State<AppState>) -> Result<Json<DatabaseStats>, ApiError> {
    state
        .shared
        .database
        .get_stats()
        .map(Json)
        .map_err(|e| ApiError::internal(format!("failed to read database stats: {}", e)))
}
