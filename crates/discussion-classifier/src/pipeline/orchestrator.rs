//! Per-discussion state machine: hash check, classify, embed, match, persist.
//!
//! The orchestrator keeps no state between discussions. Everything it reads
//! comes from the store, so a discussion can be re-run from the top at any
//! point; the discussion hash makes a completed run a no-op.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::decision::{ClassificationAction, MatchDecision, SimilarityBands};
use super::hasher::discussion_hash;
use super::segmenter::Discussion;
use super::topic_assignment::{LabelContext, TopicAssignmentAgent};
use crate::classification::{ClassificationClient, ClassificationPayload, ConversationClassification};
use crate::embedding::EmbeddingClient;
use crate::error::{PipelineError, PipelineResult};
use crate::metrics;
use crate::store::vector::cosine_similarity;
use crate::store::{
    ClassificationDatabase, NewClassification, PersistOutcome, RecordKind, RecordStore, SessionRecord, StoreError,
};

pub const CLASSIFICATION_METHOD: &str = "ai_agent";
pub const DEFAULT_SKIP_CONFIDENCE: f64 = 0.1;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub kind: RecordKind,
    pub bands: SimilarityBands,
    pub search_limit: usize,
    /// Re-match rounds after a uniqueness conflict before falling back to a name lookup.
    pub max_conflict_retries: u32,
}

impl OrchestratorConfig {
    pub fn for_kind(kind: RecordKind) -> Self {
        Self {
            kind,
            bands: SimilarityBands::defaults_for(kind),
            search_limit: 5,
            max_conflict_retries: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscussionState {
    Segmented,
    HashChecked,
    Classified,
    Embedded,
    Matched,
    Persisted,
    SkippedDuplicate,
    PersistedAsSkip,
}

impl DiscussionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Persisted | Self::SkippedDuplicate | Self::PersistedAsSkip)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DiscussionOutcome {
    pub discussion_hash: String,
    pub timestamp: i64,
    pub state: DiscussionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    pub topics_linked: usize,
}

impl DiscussionOutcome {
    fn skipped_duplicate(hash: String, timestamp: i64) -> Self {
        Self {
            discussion_hash: hash,
            timestamp,
            state: DiscussionState::SkippedDuplicate,
            action: None,
            record_id: None,
            record_name: None,
            confidence: None,
            topics_linked: 0,
        }
    }

    /// Label used for the `discussions_total` metric.
    pub fn metric_label(&self) -> &str {
        match self.state {
            DiscussionState::SkippedDuplicate => "skipped_duplicate",
            _ => self.action.as_deref().unwrap_or("unknown"),
        }
    }
}

/// Record chosen for a classified label.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ResolvedRecord {
    pub id: String,
    pub name: String,
    pub action: ClassificationAction,
    pub confidence: f64,
}

pub struct ClassificationOrchestrator {
    db: Arc<ClassificationDatabase>,
    classifier: Arc<ClassificationClient>,
    embedder: EmbeddingClient,
    topic_agent: Option<Arc<TopicAssignmentAgent>>,
    config: OrchestratorConfig,
}

impl ClassificationOrchestrator {
    pub fn new(
        db: Arc<ClassificationDatabase>,
        classifier: Arc<ClassificationClient>,
        embedder: EmbeddingClient,
        topic_agent: Option<Arc<TopicAssignmentAgent>>,
        config: OrchestratorConfig,
    ) -> Self {
        if topic_agent.is_some() && config.kind == RecordKind::Subject {
            warn!("Topic assignment is ignored for subject hierarchies");
        }
        Self { db, classifier, embedder, topic_agent, config }
    }

    pub fn kind(&self) -> RecordKind {
        self.config.kind
    }

    fn records(&self) -> &RecordStore {
        self.db.records(self.config.kind)
    }

    fn transition(&self, hash: &str, from: DiscussionState, to: DiscussionState) {
        debug!("discussion {}: {:?} -> {:?}", &hash[..hash.len().min(12)], from, to);
    }

    pub async fn process_discussion(
        &self,
        session: &SessionRecord,
        discussion: &Discussion,
    ) -> PipelineResult<DiscussionOutcome> {
        let hash = discussion_hash(discussion)
            .map_err(|e| PipelineError::Validation(format!("unhashable discussion: {}", e)))?;
        self.transition(&hash, DiscussionState::Segmented, DiscussionState::HashChecked);

        if self.db.classifications.discussion_exists(&hash)? {
            info!(
                "Discussion {} of session {} already processed",
                hash, session.external_conversation_id
            );
            self.transition(&hash, DiscussionState::HashChecked, DiscussionState::SkippedDuplicate);
            return Ok(DiscussionOutcome::skipped_duplicate(hash, discussion.timestamp));
        }

        let payload = ClassificationPayload {
            session_id: &session.external_conversation_id,
            conversation: discussion,
        };
        let result = self.classifier.classify(&payload).await?;
        let classification = result.conversation;
        self.transition(&hash, DiscussionState::HashChecked, DiscussionState::Classified);

        if classification.is_skip() {
            return self.persist_skip(session, discussion, hash, &classification);
        }

        let name = classification.normalized_label();
        let embedding = self.embedder.embed_one(&name).await.map_err(|e| {
            error!(
                "Embedding failed for session {} discussion {}: {}",
                session.external_conversation_id, hash, e
            );
            PipelineError::from(e)
        })?;
        self.transition(&hash, DiscussionState::Classified, DiscussionState::Embedded);

        let resolved = self.resolve_record(&name, &embedding)?;
        self.transition(&hash, DiscussionState::Embedded, DiscussionState::Matched);

        let topics_linked = self.assign_topics(&resolved, &embedding, &classification).await?;

        let new = NewClassification {
            kind: self.config.kind,
            session_id: &session.id,
            discussion_timestamp: discussion.timestamp,
            discussion_hash: &hash,
            record_id: &resolved.id,
            confidence: resolved.confidence,
            classification_method: CLASSIFICATION_METHOD,
            detected_entity: classification.detected_entity,
        };
        let state = match self.persist(&new, session)? {
            PersistOutcome::Persisted { .. } => DiscussionState::Persisted,
            PersistOutcome::AlreadyPersisted => DiscussionState::SkippedDuplicate,
        };
        self.transition(&hash, DiscussionState::Matched, state);
        if state == DiscussionState::SkippedDuplicate {
            return Ok(DiscussionOutcome::skipped_duplicate(hash, discussion.timestamp));
        }

        info!(
            "Discussion {} -> {} '{}' ({}, confidence {:.2})",
            hash,
            self.config.kind.as_str(),
            resolved.name,
            resolved.action.name(self.config.kind),
            resolved.confidence
        );
        Ok(DiscussionOutcome {
            discussion_hash: hash,
            timestamp: discussion.timestamp,
            state,
            action: Some(resolved.action.name(self.config.kind)),
            record_id: Some(resolved.id),
            record_name: Some(resolved.name),
            confidence: Some(resolved.confidence),
            topics_linked,
        })
    }

    fn persist_skip(
        &self,
        session: &SessionRecord,
        discussion: &Discussion,
        hash: String,
        classification: &ConversationClassification,
    ) -> PipelineResult<DiscussionOutcome> {
        let skip = self.records().get_or_create_skip()?;
        let confidence = classification.confidence.unwrap_or(DEFAULT_SKIP_CONFIDENCE);
        let new = NewClassification {
            kind: self.config.kind,
            session_id: &session.id,
            discussion_timestamp: discussion.timestamp,
            discussion_hash: &hash,
            record_id: &skip.id,
            confidence,
            classification_method: CLASSIFICATION_METHOD,
            detected_entity: classification.detected_entity,
        };
        if let PersistOutcome::AlreadyPersisted = self.persist(&new, session)? {
            self.transition(&hash, DiscussionState::Classified, DiscussionState::SkippedDuplicate);
            return Ok(DiscussionOutcome::skipped_duplicate(hash, discussion.timestamp));
        }
        self.transition(&hash, DiscussionState::Classified, DiscussionState::PersistedAsSkip);
        info!("Discussion {} classified as SKIP", hash);

        Ok(DiscussionOutcome {
            discussion_hash: hash,
            timestamp: discussion.timestamp,
            state: DiscussionState::PersistedAsSkip,
            action: Some(ClassificationAction::Skip.name(self.config.kind)),
            record_id: Some(skip.id),
            record_name: Some(skip.name),
            confidence: Some(confidence),
            topics_linked: 0,
        })
    }

    fn persist(&self, new: &NewClassification<'_>, session: &SessionRecord) -> PipelineResult<PersistOutcome> {
        self.db.classifications.persist(new).map_err(|e| {
            error!(
                "Persisting discussion {} of session {} failed: {}",
                new.discussion_hash, session.external_conversation_id, e
            );
            PipelineError::from(e)
        })
    }

    /// Similarity search and decision, re-run when a concurrent writer wins
    /// the race for the same name.
    pub(crate) fn resolve_record(&self, name: &str, embedding: &[f32]) -> PipelineResult<ResolvedRecord> {
        let decision = self.match_existing(embedding)?;
        self.resolve_from(name, embedding, decision)
    }

    fn match_existing(&self, embedding: &[f32]) -> PipelineResult<MatchDecision> {
        let bands = self.config.bands;
        let candidates = self
            .records()
            .find_similar(embedding, bands.search_floor(), self.config.search_limit)?;
        let decision = bands.decide(&candidates);
        if let Some(best) = candidates.first() {
            debug!(
                "Best {} match '{}' at {:.3} -> {:?}",
                self.config.kind.as_str(),
                best.name,
                best.similarity,
                decision.band()
            );
        }
        Ok(decision)
    }

    fn resolve_from(
        &self,
        name: &str,
        embedding: &[f32],
        mut decision: MatchDecision,
    ) -> PipelineResult<ResolvedRecord> {
        let mut conflicts = 0;
        loop {
            match self.apply_decision(name, embedding, &decision) {
                Ok(resolved) => return Ok(resolved),
                Err(StoreError::UniquenessConflict { entity, key }) => {
                    metrics::inc_dedup_conflict();
                    conflicts += 1;
                    if conflicts > self.config.max_conflict_retries {
                        warn!("{} '{}' still conflicting, resolving by name", entity, key);
                        return self.resolve_by_name(name, embedding);
                    }
                    warn!("{} '{}' was created concurrently, re-matching", entity, key);
                    decision = self.match_existing(embedding)?;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn apply_decision(
        &self,
        name: &str,
        embedding: &[f32],
        decision: &MatchDecision,
    ) -> Result<ResolvedRecord, StoreError> {
        let records = self.records();
        match decision {
            MatchDecision::CreateNew => {
                let record = records.create(name, Some(embedding), None)?;
                Ok(ResolvedRecord {
                    id: record.id,
                    name: record.name,
                    action: ClassificationAction::CreatedNew,
                    confidence: 1.0,
                })
            }
            MatchDecision::Alias { matched_id, similarity } => {
                let canonical = records.canonical_root(matched_id)?;
                let record = records.create(name, Some(embedding), Some(&canonical))?;
                Ok(ResolvedRecord {
                    id: record.id,
                    name: record.name,
                    action: ClassificationAction::CreatedAlias,
                    confidence: *similarity,
                })
            }
            MatchDecision::Reuse { record_id, similarity } => {
                let record = records.get_by_id(record_id)?.ok_or_else(|| StoreError::NotFound {
                    entity: self.config.kind.as_str(),
                    key: record_id.clone(),
                })?;
                Ok(ResolvedRecord {
                    id: record.id,
                    name: record.name,
                    action: ClassificationAction::ReusedExisting,
                    confidence: *similarity,
                })
            }
        }
    }

    fn resolve_by_name(&self, name: &str, embedding: &[f32]) -> PipelineResult<ResolvedRecord> {
        let record = self.records().get_by_name(name)?.ok_or_else(|| StoreError::UniquenessConflict {
            entity: self.config.kind.as_str(),
            key: name.to_string(),
        })?;
        let confidence = record
            .embedding
            .as_deref()
            .map(|existing| cosine_similarity(embedding, existing))
            .unwrap_or(1.0);
        Ok(ResolvedRecord {
            id: record.id,
            name: record.name,
            action: ClassificationAction::ReusedExisting,
            confidence,
        })
    }

    /// Labels only. A reused label that already has topics keeps them.
    async fn assign_topics(
        &self,
        resolved: &ResolvedRecord,
        embedding: &[f32],
        classification: &ConversationClassification,
    ) -> PipelineResult<usize> {
        let agent = match (&self.topic_agent, self.config.kind) {
            (Some(agent), RecordKind::Label) => agent,
            _ => return Ok(0),
        };
        if resolved.action == ClassificationAction::ReusedExisting
            && !self.db.taxonomy.topics_for_label(&resolved.id)?.is_empty()
        {
            return Ok(0);
        }
        let context = LabelContext {
            label_id: &resolved.id,
            label_name: &resolved.name,
            embedding,
            semantic_context: &classification.semantic_context,
            detected_entity: classification.detected_entity,
        };
        let links = agent.assign(&context).await?;
        Ok(links.len())
    }
}
