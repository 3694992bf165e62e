//! Transcript model and the source that serves raw conversations.
//!
//! Messages come from the helpdesk exactly as it stores them; the segmenter
//! turns them into discussions.

pub mod crisp_client;

pub use crisp_client::CrispClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Namespace carried by the event that marks a conversation as resolved.
pub const RESOLVED_NAMESPACE: &str = "state:resolved";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Actor {
    User,
    Operator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Text,
    Event,
    File,
    Audio,
    Animation,
    Picker,
    Note,
    Carousel,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventContent {
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Event(EventContent),
    /// Files, pickers, carousels and anything else the helpdesk attaches.
    Other(serde_json::Value),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub from: Actor,
    pub content: MessageContent,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<serde_json::Value>,
}

impl Message {
    /// Text body, if this message carries non-blank text.
    pub fn text(&self) -> Option<&str> {
        match &self.content {
            MessageContent::Text(text) if !text.trim().is_empty() => Some(text.as_str()),
            _ => None,
        }
    }

    pub fn is_resolution_event(&self) -> bool {
        self.kind == MessageType::Event
            && matches!(&self.content, MessageContent::Event(event) if event.namespace == RESOLVED_NAMESPACE)
    }
}

#[derive(Debug, Error)]
pub enum TranscriptError {
    #[error("conversation {0} not found")]
    NotFound(String),
    #[error("transcript source unavailable: {0}")]
    Unavailable(String),
    #[error("transcript source rejected the request: {0}")]
    Rejected(String),
    #[error("invalid transcript response: {0}")]
    InvalidResponse(String),
}

/// Anything that can return the ordered message stream of one external conversation.
#[async_trait]
pub trait TranscriptSource: Send + Sync {
    async fn fetch_messages(&self, conversation_id: &str) -> Result<Vec<Message>, TranscriptError>;
}
