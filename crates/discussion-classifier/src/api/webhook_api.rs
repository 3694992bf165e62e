// Crisp "message updated" webhook.
use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{ApiError, AppState};
use crate::jobs::{ConversationJob, JobKind};
use crate::transcript::RESOLVED_NAMESPACE;

#[derive(Debug, Default, Deserialize)]
pub struct WebhookQuery {
    pub secret: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CrispWebhook {
    #[serde(default)]
    pub event: Option<String>,
    #[serde(default)]
    pub data: Option<CrispWebhookData>,
}

#[derive(Debug, Deserialize)]
pub struct CrispWebhookData {
    #[serde(default)]
    pub session_id: Option<String>,
    /// Text for plain messages, an object for events.
    #[serde(default)]
    pub content: Option<serde_json::Value>,
}

impl CrispWebhook {
    /// Session id of a resolution event, if this is one.
    pub fn resolved_session(&self) -> Option<&str> {
        let data = self.data.as_ref()?;
        let namespace = data.content.as_ref()?.get("namespace")?.as_str()?;
        if namespace != RESOLVED_NAMESPACE {
            return None;
        }
        data.session_id.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WebhookAck {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
}

/// `POST /webhooks/crisp`: queues resolved conversations, acknowledges everything else.
pub async fn crisp_webhook(
    State(state): State<AppState>,
    Query(query): Query<WebhookQuery>,
    Json(body): Json<CrispWebhook>,
) -> Result<Json<WebhookAck>, ApiError> {
    if let Some(expected) = state.shared.config.crisp_webhook_secret.as_deref() {
        if query.secret.as_deref() != Some(expected) {
            warn!("Rejected Crisp webhook with an invalid secret");
            return Err(ApiError::bad_request("Invalid secret"));
        }
    }

    let job_id = match body.resolved_session() {
        Some(session_id) => {
            let job = ConversationJob::new(JobKind::ProcessCrispConversation, session_id);
            let job_id = state.queue.enqueue(job)?;
            info!("Crisp conversation {} resolved, queued job {}", session_id, job_id);
            Some(job_id)
        }
        None => {
            debug!("Ignoring Crisp webhook event {:?}", body.event);
            None
        }
    };

    Ok(Json(WebhookAck { status: "success".to_string(), job_id }))
}
