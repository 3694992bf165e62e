//! Runs the classification prompt over one discussion.

use std::sync::Arc;

use tracing::{debug, error};
use uuid::Uuid;

use super::schema::{ClassificationPayload, ClassificationResult};
use super::structured::{complete_structured, StructuredRequest};
use crate::error::{PipelineError, PipelineResult};
use crate::llm::{ChatMessage, ChatModel, ChatOptions};
use crate::memory::ConversationMemory;
use crate::pipeline::{discussion_hash, Discussion};
use crate::prompts::PromptTemplate;

pub struct ClassificationClient {
    model: Arc<dyn ChatModel>,
    memory: ConversationMemory,
    prompt: PromptTemplate,
    options: ChatOptions,
    max_attempts: u32,
}

impl ClassificationClient {
    pub fn new(
        model: Arc<dyn ChatModel>,
        memory: ConversationMemory,
        prompt: PromptTemplate,
        temperature: f32,
        max_attempts: u32,
    ) -> Self {
        Self {
            model,
            memory,
            prompt,
            options: ChatOptions {
                temperature: Some(temperature),
                model: None,
                json_mode: true,
            },
            max_attempts: max_attempts.max(1),
        }
    }

    /// No persistence happens here; failures come back as
    /// [`PipelineError::ClassificationFailure`] or an upstream error.
    pub async fn classify(&self, payload: &ClassificationPayload<'_>) -> PipelineResult<ClassificationResult> {
        let body = serde_json::to_string(payload)
            .map_err(|e| PipelineError::Validation(format!("unserializable discussion: {}", e)))?;
        let messages = [ChatMessage::system(self.prompt.text()), ChatMessage::user(body)];
        let memory_key = memory_key(payload.conversation)?;

        let request = StructuredRequest {
            model: self.model.as_ref(),
            options: &self.options,
            max_attempts: self.max_attempts,
            memory: &self.memory,
            memory_key: &memory_key,
        };
        let result = complete_structured(request, &messages, ClassificationResult::validate)
            .await
            .map_err(|e| {
                error!(
                    "Classification failed for session {} discussion {}: {}",
                    payload.session_id, payload.conversation.timestamp, e
                );
                PipelineError::from_structured(e)
            })?;

        debug!(
            "Session {} discussion {} classified as '{}'",
            payload.session_id, payload.conversation.timestamp, result.conversation.label
        );
        Ok(result)
    }
}

/// Repair turns live under the discussion's content hash plus a per-call
/// suffix, so overlapping runs over the same conversation never share them.
fn memory_key(discussion: &Discussion) -> PipelineResult<String> {
    let hash = discussion_hash(discussion)
        .map_err(|e| PipelineError::Validation(format!("unhashable discussion: {}", e)))?;
    Ok(format!("classify:{}:{}", hash, Uuid::new_v4().simple()))
}
