//! HTTP adapter for OpenAI-compatible chat and embedding endpoints.
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{ChatMessage, ChatModel, ChatOptions, EmbeddingModel, LlmError};

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ChoiceMessage>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    dimensions: usize,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

pub struct OpenAiCompatibleClient {
    base_url: String,
    api_key: Option<String>,
    chat_model: String,
    embedding_model: String,
    embedding_dimensions: usize,
    http_client: reqwest::Client,
}

impl OpenAiCompatibleClient {
    /// `base_url` includes the API version prefix, e.g. `https://host/v1`.
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        chat_model: impl Into<String>,
        embedding_model: impl Into<String>,
        embedding_dimensions: usize,
        timeout: Duration,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        debug!("Model client initialized with backend: {}", base_url);
        Self {
            base_url,
            api_key: api_key.filter(|k| !k.is_empty()),
            chat_model: chat_model.into(),
            embedding_model: embedding_model.into(),
            embedding_dimensions,
            http_client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
        }
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn embeddings_url(&self) -> String {
        format!("{}/embeddings", self.base_url)
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, LlmError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        if status.is_server_error() {
            warn!("Model backend returned {}", status);
            Err(LlmError::Unavailable(format!("{}: {}", status, body)))
        } else {
            Err(LlmError::Rejected {
                status: status.as_u16(),
                body,
            })
        }
    }
}

#[async_trait]
impl ChatModel for OpenAiCompatibleClient {
    async fn chat(&self, messages: &[ChatMessage], options: &ChatOptions) -> Result<String, LlmError> {
        let request = ChatCompletionRequest {
            model: options.model.as_deref().unwrap_or(&self.chat_model),
            messages,
            temperature: options.temperature,
            response_format: options.json_mode.then_some(ResponseFormat { kind: "json_object" }),
            stream: false,
        };
        let response = self
            .authorized(self.http_client.post(self.completions_url()))
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::Unavailable(format!("chat request failed: {}", e)))?;
        let response = Self::check_status(response).await?;

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(format!("failed to parse chat response: {}", e)))?;
        completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .ok_or_else(|| LlmError::InvalidResponse("chat response has no content".to_string()))
    }
}

#[async_trait]
impl EmbeddingModel for OpenAiCompatibleClient {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        let request = EmbeddingRequest {
            model: &self.embedding_model,
            input: texts,
            dimensions: self.embedding_dimensions,
        };
        let response = self
            .authorized(self.http_client.post(self.embeddings_url()))
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::Unavailable(format!("embedding request failed: {}", e)))?;
        let response = Self::check_status(response).await?;

        let mut parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(format!("failed to parse embedding response: {}", e)))?;
        if parsed.data.iter().all(|d| d.index.is_some()) {
            parsed.data.sort_by_key(|d| d.index);
        }
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}
