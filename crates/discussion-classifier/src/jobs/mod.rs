//! Job contract between the HTTP surface, the queue and the pipeline.

pub mod processor;
pub mod queue;

pub use processor::ConversationProcessor;
pub use queue::{JobQueue, JobRecord, JobState, QueueConfig, QueueError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::PipelineResult;
use crate::pipeline::DiscussionOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    ProcessNewConversation,
    /// Same pipeline, triggered by the helpdesk webhook.
    ProcessCrispConversation,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProcessNewConversation => "process_new_conversation",
            Self::ProcessCrispConversation => "process_crisp_conversation",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationJob {
    pub kind: JobKind,
    pub conversation_id: String,
}

impl ConversationJob {
    pub fn new(kind: JobKind, conversation_id: impl Into<String>) -> Self {
        Self { kind, conversation_id: conversation_id.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Ok,
    Skipped,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Skipped => "skipped",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub discussions: usize,
    pub outcomes: Vec<DiscussionOutcome>,
}

impl JobReport {
    pub fn skipped(reason: impl Into<String>, session_id: Option<String>) -> Self {
        Self {
            status: JobStatus::Skipped,
            reason: Some(reason.into()),
            session_id,
            discussions: 0,
            outcomes: Vec::new(),
        }
    }

    pub fn error(reason: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Error,
            reason: Some(reason.into()),
            session_id: None,
            discussions: 0,
            outcomes: Vec::new(),
        }
    }
}

/// Runs one job. Errors are returned so the queue can apply its retry policy.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &ConversationJob) -> PipelineResult<JobReport>;
}
