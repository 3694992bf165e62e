//! Discussion classification through a chat model with a strict JSON contract.

pub mod client;
pub mod schema;
pub mod structured;

pub use client::ClassificationClient;
pub use schema::{ClassificationPayload, ClassificationResult, ConversationClassification, SKIP_LABEL};
pub use structured::{complete_structured, extract_json, StructuredRequest};

use thiserror::Error;

use crate::llm::LlmError;

/// One rejected model reply: unparseable JSON or a schema rule it breaks.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct SchemaValidationError(pub String);

#[derive(Debug, Error)]
pub enum StructuredOutputError {
    /// The model call itself failed; no repair attempt is made.
    #[error(transparent)]
    Upstream(#[from] LlmError),

    #[error("model output still invalid after {attempts} attempt(s): {last_error}")]
    SchemaExhausted { attempts: u32, last_error: String },
}
