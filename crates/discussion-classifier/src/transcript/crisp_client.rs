//! Crisp helpdesk client
//!
//! Fetches the full message history of a conversation over the REST API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{Message, TranscriptError, TranscriptSource};

#[derive(Debug, Deserialize)]
struct CrispEnvelope {
    #[serde(default)]
    error: bool,
    #[serde(default)]
    reason: String,
    #[serde(default)]
    data: Option<Vec<Message>>,
}

pub struct CrispClient {
    base_url: String,
    api_key: String,
    http_client: reqwest::Client,
}

impl CrispClient {
    /// `base_url` is the website-scoped API root, e.g. `https://api.crisp.chat/v1/website/{id}`.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            http_client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
        }
    }

    fn messages_url(&self, conversation_id: &str) -> String {
        format!("{}/conversation/{}/messages", self.base_url, conversation_id)
    }
}

#[async_trait]
impl TranscriptSource for CrispClient {
    async fn fetch_messages(&self, conversation_id: &str) -> Result<Vec<Message>, TranscriptError> {
        debug!("Fetching transcript for conversation {}", conversation_id);

        let response = self
            .http_client
            .get(self.messages_url(conversation_id))
            .header("Authorization", format!("Basic {}", self.api_key))
            .header("X-Crisp-Tier", "plugin")
            .send()
            .await
            .map_err(|e| TranscriptError::Unavailable(format!("request failed: {}", e)))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(TranscriptError::NotFound(conversation_id.to_string()));
        }
        if status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(TranscriptError::Unavailable(format!("{}: {}", status, body)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Crisp rejected transcript request for {}: {}", conversation_id, status);
            return Err(TranscriptError::Rejected(format!("{}: {}", status, body)));
        }

        let envelope: CrispEnvelope = response
            .json()
            .await
            .map_err(|e| TranscriptError::InvalidResponse(e.to_string()))?;

        if envelope.error {
            return Err(TranscriptError::Rejected(envelope.reason));
        }

        let messages = envelope.data.unwrap_or_default();
        debug!(
            "Fetched {} messages for conversation {}",
            messages.len(),
            conversation_id
        );
        Ok(messages)
    }
}
