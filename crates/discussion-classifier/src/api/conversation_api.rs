// Job intake and job status.
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use validator::{Validate, ValidationError};

use super::{ApiError, AppState};
use crate::jobs::{ConversationJob, JobKind, JobRecord};

#[derive(Debug, Deserialize, Validate)]
pub struct EnqueueRequest {
    #[validate(custom = "not_blank")]
    pub conversation_id: String,
}

fn not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new("blank"));
    }
    Ok(())
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EnqueueResponse {
    pub job_id: String,
    pub status: String,
}

/// `POST /conversations`: queue a conversation for classification.
pub async fn enqueue_conversation(
    State(state): State<AppState>,
    Json(req): Json<EnqueueRequest>,
) -> Result<(StatusCode, Json<EnqueueResponse>), ApiError> {
    req.validate()
        .map_err(|_| ApiError::bad_request("conversation_id must be a non-empty string"))?;

    let job = ConversationJob::new(JobKind::ProcessNewConversation, req.conversation_id.trim());
    let job_id = state.queue.enqueue(job)?;
    info!("Queued conversation {} as job {}", req.conversation_id.trim(), job_id);

    Ok((
        StatusCode::ACCEPTED,
        Json(EnqueueResponse { job_id, status: "queued".to_string() }),
    ))
}

pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobRecord>, ApiError> {
    state
        .queue
        .get(&id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("job {} not found", id)))
}

#[cfg(test)]
mod tests {
    use super::super::{build_router, test_support::app_state};
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_enqueue_returns_accepted_with_job_id() {
        let state = app_state(&[]);
        let app = build_router(state.clone());

        let response = app
            .oneshot(post_json("/conversations", r#"{"conversation_id":"session_abc"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: EnqueueResponse = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body.status, "queued");

        let record = state.queue.get(&body.job_id).unwrap();
        assert_eq!(record.conversation_id, "session_abc");
        assert_eq!(record.kind, JobKind::ProcessNewConversation);
    }

    #[tokio::test]
    async fn test_blank_conversation_id_is_rejected() {
        let app = build_router(app_state(&[]));
        let response = app
            .oneshot(post_json("/conversations", r#"{"conversation_id":"   "}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["code"], "validation");
    }

    #[tokio::test]
    async fn test_unknown_job_is_not_found() {
        let app = build_router(app_state(&[]));
        let response = app
            .oneshot(Request::builder().uri("/jobs/missing").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
