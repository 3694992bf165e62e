//! Handler for conversation jobs: fetch, dedup, segment, classify.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info};

use super::{ConversationJob, JobHandler, JobReport, JobStatus};
use crate::error::{PipelineError, PipelineResult};
use crate::metrics;
use crate::pipeline::{segment, session_hash, ClassificationOrchestrator, SegmenterOptions};
use crate::store::ClassificationDatabase;
use crate::transcript::TranscriptSource;

pub const DUPLICATE_SESSION_REASON: &str = "duplicate_session_hash";

pub struct ConversationProcessor {
    db: Arc<ClassificationDatabase>,
    transcripts: Arc<dyn TranscriptSource>,
    orchestrator: Arc<ClassificationOrchestrator>,
    segmenter: SegmenterOptions,
}

impl ConversationProcessor {
    pub fn new(
        db: Arc<ClassificationDatabase>,
        transcripts: Arc<dyn TranscriptSource>,
        orchestrator: Arc<ClassificationOrchestrator>,
        segmenter: SegmenterOptions,
    ) -> Self {
        Self { db, transcripts, orchestrator, segmenter }
    }

    pub async fn process_conversation(&self, conversation_id: &str) -> PipelineResult<JobReport> {
        let conversation_id = conversation_id.trim();
        if conversation_id.is_empty() {
            return Err(PipelineError::Validation(
                "conversation_id must be a non-empty string".to_string(),
            ));
        }

        let messages = self.transcripts.fetch_messages(conversation_id).await.map_err(|e| {
            error!("Fetching transcript of {} failed: {}", conversation_id, e);
            PipelineError::from(e)
        })?;
        let hash = session_hash(&messages)
            .map_err(|e| PipelineError::Validation(format!("unhashable transcript: {}", e)))?;

        if let Some(existing) = self.db.sessions.find_by_hash(&hash)? {
            info!("Conversation {} unchanged since last run, skipping", conversation_id);
            return Ok(JobReport::skipped(DUPLICATE_SESSION_REASON, Some(existing.id)));
        }

        let segmented = segment(&messages, self.segmenter)?;
        let session = self.db.sessions.find_or_create(conversation_id)?;
        info!(
            "Conversation {}: {} message(s), {} discussion(s)",
            conversation_id,
            messages.len(),
            segmented.discussions.len()
        );

        let mut outcomes = Vec::with_capacity(segmented.discussions.len());
        for discussion in &segmented.discussions {
            let outcome = self
                .orchestrator
                .process_discussion(&session, discussion)
                .await
                .map_err(|e| {
                    error!(
                        "Discussion at {} of conversation {} failed: {}",
                        discussion.timestamp, conversation_id, e
                    );
                    e
                })?;
            metrics::inc_discussion(outcome.metric_label());
            outcomes.push(outcome);
        }

        self.db.sessions.mark_processed(&session.id, &hash)?;
        Ok(JobReport {
            status: JobStatus::Ok,
            reason: None,
            session_id: Some(session.id),
            discussions: outcomes.len(),
            outcomes,
        })
    }
}

#[async_trait]
impl JobHandler for ConversationProcessor {
    async fn handle(&self, job: &ConversationJob) -> PipelineResult<JobReport> {
        info!("Processing {} for {}", job.kind.as_str(), job.conversation_id);
        self.process_conversation(&job.conversation_id).await
    }
}
