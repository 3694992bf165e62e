//! HTTP surface: job intake, webhook, job status, health and metrics.

pub mod admin_api;
pub mod conversation_api;
pub mod webhook_api;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::jobs::{JobQueue, QueueError};
use crate::shared_state::SharedState;

pub use admin_api::{db_stats, health, metrics};
pub use conversation_api::{enqueue_conversation, get_job, EnqueueRequest, EnqueueResponse};
pub use webhook_api::crisp_webhook;

#[derive(Clone)]
pub struct AppState {
    pub shared: Arc<SharedState>,
    pub queue: Arc<JobQueue>,
}

impl AppState {
    pub fn new(shared: Arc<SharedState>, queue: Arc<JobQueue>) -> Self {
        Self { shared, queue }
    }
}

/// Error body: `{"error": message, "code": code}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self { status, code, message: message.into() }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "validation", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
    }
}

impl From<QueueError> for ApiError {
    fn from(err: QueueError) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, "queue_unavailable", err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message, "code": self.code }))).into_response()
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/conversations", post(enqueue_conversation))
        .route("/webhooks/crisp", post(crisp_webhook))
        .route("/jobs/:id", get(get_job))
        .route("/stats", get(db_stats))
        .route("/healthz", get(health))
        .route("/metrics", get(metrics))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(Duration::from_secs(30)))
                .layer(cors),
        )
        .with_state(state)
}
