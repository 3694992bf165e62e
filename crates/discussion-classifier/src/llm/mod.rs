//! Model access: a chat capability and an embedding capability.
//!
//! The pipeline only depends on these two traits; `OpenAiCompatibleClient`
//! is the HTTP implementation used in production.

pub mod openai_compat;

pub use openai_compat::OpenAiCompatibleClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    pub temperature: Option<f32>,
    /// Overrides the adapter's default chat model.
    pub model: Option<String>,
    /// Ask the backend for a JSON object response.
    pub json_mode: bool,
}

#[derive(Debug, Error)]
pub enum LlmError {
    /// Transport failure or 5xx; worth retrying later.
    #[error("model backend unavailable: {0}")]
    Unavailable(String),
    #[error("model backend rejected the request ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("invalid model response: {0}")]
    InvalidResponse(String),
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn chat(&self, messages: &[ChatMessage], options: &ChatOptions) -> Result<String, LlmError>;
}

#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    /// One vector per input text, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError>;
}
