//! Embedding client: fixed-dimension vectors for already-normalized texts.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error};

use crate::classification::SKIP_LABEL;
use crate::llm::{EmbeddingModel, LlmError};

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error(transparent)]
    Upstream(#[from] LlmError),

    #[error("expected {expected} embedding(s), got {actual}")]
    CountMismatch { expected: usize, actual: usize },

    #[error("expected {expected} dimensions, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("the SKIP sentinel is never embedded")]
    SentinelText,
}

#[derive(Clone)]
pub struct EmbeddingClient {
    model: Arc<dyn EmbeddingModel>,
    dimensions: usize,
}

impl EmbeddingClient {
    pub fn new(model: Arc<dyn EmbeddingModel>, dimensions: usize) -> Self {
        Self { model, dimensions }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// One vector per text, in order. Texts are sent as given.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if texts.iter().any(|t| t.trim().eq_ignore_ascii_case(SKIP_LABEL)) {
            return Err(EmbeddingError::SentinelText);
        }

        let vectors = self.model.embed(texts).await.map_err(|e| {
            error!("Embedding request for {} text(s) failed: {}", texts.len(), e);
            EmbeddingError::from(e)
        })?;
        if vectors.len() != texts.len() {
            return Err(EmbeddingError::CountMismatch {
                expected: texts.len(),
                actual: vectors.len(),
            });
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dimensions) {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.dimensions,
                actual: bad.len(),
            });
        }
        debug!("Embedded {} text(s)", texts.len());
        Ok(vectors)
    }

    pub async fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vectors = self.embed(&[text.to_string()]).await?;
        vectors.pop().ok_or(EmbeddingError::CountMismatch { expected: 1, actual: 0 })
    }
}
