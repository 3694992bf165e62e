//! Error taxonomy shared by the classification pipeline and its job processor.

use thiserror::Error;

use crate::classification::StructuredOutputError;
use crate::embedding::EmbeddingError;
use crate::llm::LlmError;
use crate::pipeline::segmenter::SegmentError;
use crate::store::StoreError;
use crate::transcript::TranscriptError;

/// Names the remote collaborator behind an [`PipelineError::UpstreamService`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamService {
    Transcript,
    LanguageModel,
    EmbeddingModel,
}

impl std::fmt::Display for UpstreamService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Transcript => "transcript source",
            Self::LanguageModel => "language model",
            Self::EmbeddingModel => "embedding model",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Malformed job input or unusable transcript. Never retried.
    #[error("validation error: {0}")]
    Validation(String),

    #[error("{service} unavailable: {message}")]
    UpstreamService {
        service: UpstreamService,
        message: String,
    },

    #[error("classification failed after {attempts} attempt(s): {reason}")]
    ClassificationFailure { attempts: u32, reason: String },

    #[error("embedding service error: {0}")]
    EmbeddingService(String),

    /// The topic agent named a thematic that is not in the catalog. Never retried.
    #[error("unknown thematic '{name}' (known: {})", known.join(", "))]
    UnknownThematic { name: String, known: Vec<String> },

    #[error("persistence error: {0}")]
    Persistence(#[from] StoreError),
}

impl PipelineError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Validation(_) | Self::UnknownThematic { .. })
    }

    /// Short machine-readable name, used for metrics labels and job reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::UpstreamService { .. } => "upstream_service",
            Self::ClassificationFailure { .. } => "classification_failure",
            Self::EmbeddingService(_) => "embedding_service",
            Self::UnknownThematic { .. } => "unknown_thematic",
            Self::Persistence(_) => "persistence",
        }
    }
}

impl From<SegmentError> for PipelineError {
    fn from(err: SegmentError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<TranscriptError> for PipelineError {
    fn from(err: TranscriptError) -> Self {
        match err {
            TranscriptError::NotFound(id) => {
                Self::Validation(format!("conversation {} not found at transcript source", id))
            }
            other => Self::UpstreamService {
                service: UpstreamService::Transcript,
                message: other.to_string(),
            },
        }
    }
}

impl From<EmbeddingError> for PipelineError {
    fn from(err: EmbeddingError) -> Self {
        Self::EmbeddingService(err.to_string())
    }
}

impl PipelineError {
    /// Maps a structured-output failure from the chat model, `attempts` being the
    /// budget that was spent.
    pub fn from_structured(err: StructuredOutputError) -> Self {
        match err {
            StructuredOutputError::Upstream(LlmError::Unavailable(message)) => Self::UpstreamService {
                service: UpstreamService::LanguageModel,
                message,
            },
            StructuredOutputError::Upstream(other) => Self::ClassificationFailure {
                attempts: 1,
                reason: other.to_string(),
            },
            StructuredOutputError::SchemaExhausted { attempts, last_error } => {
                Self::ClassificationFailure {
                    attempts,
                    reason: last_error,
                }
            }
        }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
