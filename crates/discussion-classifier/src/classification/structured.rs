//! Ask a chat model for JSON, validate it, and feed failures back until the
//! reply conforms or the attempt budget runs out.

use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::{SchemaValidationError, StructuredOutputError};
use crate::llm::{ChatMessage, ChatModel, ChatOptions};
use crate::memory::ConversationMemory;
use crate::utils::TextUtils;

pub struct StructuredRequest<'a> {
    pub model: &'a dyn ChatModel,
    pub options: &'a ChatOptions,
    pub max_attempts: u32,
    pub memory: &'a ConversationMemory,
    /// Isolates this exchange's repair turns in `memory`.
    pub memory_key: &'a str,
}

/// Pulls the JSON object out of a model reply. Handles Markdown fences and
/// prose around the object.
pub fn extract_json(reply: &str) -> Result<&str, SchemaValidationError> {
    let trimmed = reply.trim();
    let unfenced = match trimmed.strip_prefix("```") {
        Some(rest) => {
            let body = rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric());
            body.trim_end().trim_end_matches("```").trim()
        }
        None => trimmed,
    };
    match (unfenced.find('{'), unfenced.rfind('}')) {
        (Some(start), Some(end)) if start < end => Ok(&unfenced[start..=end]),
        _ => Err(SchemaValidationError(
            "la réponse ne contient aucun objet JSON".to_string(),
        )),
    }
}

fn parse_reply<T: DeserializeOwned>(reply: &str) -> Result<T, SchemaValidationError> {
    let json = extract_json(reply)?;
    serde_json::from_str(json).map_err(|e| SchemaValidationError(format!("JSON invalide: {}", e)))
}

fn correction_message(err: &SchemaValidationError) -> ChatMessage {
    ChatMessage::user(format!(
        "Ta réponse précédente ne respecte pas le format attendu ({}). \
         Réponds uniquement avec un objet JSON valide conforme au schéma demandé.",
        err
    ))
}

pub async fn complete_structured<T, F>(
    request: StructuredRequest<'_>,
    base_messages: &[ChatMessage],
    validate: F,
) -> Result<T, StructuredOutputError>
where
    T: DeserializeOwned + Send,
    F: Fn(T) -> Result<T, SchemaValidationError> + Send + Sync,
{
    let StructuredRequest { model, options, max_attempts, memory, memory_key } = request;
    let attempts = max_attempts.max(1);
    memory.clear(memory_key);

    let mut last_error = String::new();
    for attempt in 1..=attempts {
        let mut messages = base_messages.to_vec();
        messages.extend(memory.history(memory_key));

        let reply = match model.chat(&messages, options).await {
            Ok(reply) => reply,
            Err(e) => {
                memory.clear(memory_key);
                return Err(e.into());
            }
        };

        match parse_reply::<T>(&reply).and_then(&validate) {
            Ok(value) => {
                debug!("Structured reply accepted on attempt {}/{}", attempt, attempts);
                memory.clear(memory_key);
                return Ok(value);
            }
            Err(err) => {
                warn!(
                    "Structured reply rejected (attempt {}/{}): {} | reply: {}",
                    attempt,
                    attempts,
                    err,
                    TextUtils::truncate_chars(&reply, 200)
                );
                let correction = correction_message(&err);
                memory.append_many(memory_key, [ChatMessage::assistant(reply), correction]);
                last_error = err.0;
            }
        }
    }

    memory.clear(memory_key);
    Err(StructuredOutputError::SchemaExhausted { attempts, last_error })
}
