//! Second model pass: attach a deduplicated label to thematic/topic taxonomy nodes.
//!
//! Candidates come from a permissive vector search over topics; the model
//! also sees the whole catalog and may ask for a new topic under an existing
//! thematic. Links are upserted, so re-running for the same label is safe.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::classification::{complete_structured, SchemaValidationError, StructuredRequest};
use crate::error::{PipelineError, PipelineResult};
use crate::llm::{ChatMessage, ChatModel, ChatOptions};
use crate::memory::ConversationMemory;
use crate::prompts::PromptTemplate;
use crate::store::{
    ClassificationDatabase, DetectedEntity, LabelTopic, LabelTopicLink, NewTopic, SimilarTopic, StoreError,
    Thematic, ThematicCatalogEntry,
};
use crate::utils::TextUtils;

pub const ASSIGNMENT_METHOD: &str = "rag_agent";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentAction {
    AssignExisting,
    CreateNew,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicAssignment {
    pub action: AssignmentAction,
    #[serde(default)]
    pub topic_id: Option<String>,
    pub topic_name: String,
    #[serde(default)]
    pub topic_slug: Option<String>,
    #[serde(default)]
    pub thematic_id: Option<String>,
    pub thematic_name: String,
    #[serde(default)]
    pub is_primary: bool,
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicAssignmentResponse {
    pub assignments: Vec<TopicAssignment>,
}

impl TopicAssignmentResponse {
    /// Caps the list at `max_topics` and leaves exactly one primary: the
    /// first flagged one, or the most confident when none is flagged.
    pub fn normalize(mut self, max_topics: usize) -> Result<Self, SchemaValidationError> {
        if self.assignments.is_empty() {
            return Err(SchemaValidationError("au moins une assignation est requise".into()));
        }
        for assignment in &self.assignments {
            if assignment.topic_name.trim().is_empty() {
                return Err(SchemaValidationError("topic_name ne peut pas être vide".into()));
            }
            if !(0.0..=1.0).contains(&assignment.confidence) {
                return Err(SchemaValidationError(format!(
                    "confidence doit être comprise entre 0 et 1 (reçu {})",
                    assignment.confidence
                )));
            }
        }
        self.assignments.truncate(max_topics.max(1));

        let primary = match self.assignments.iter().position(|a| a.is_primary) {
            Some(index) => index,
            None => self
                .assignments
                .iter()
                .enumerate()
                .fold(0, |best, (i, a)| {
                    if a.confidence > self.assignments[best].confidence { i } else { best }
                }),
        };
        for (i, assignment) in self.assignments.iter_mut().enumerate() {
            assignment.is_primary = i == primary;
        }
        Ok(self)
    }
}

#[derive(Debug, Clone)]
pub struct TopicAgentConfig {
    pub candidate_threshold: f64,
    pub candidate_limit: usize,
    pub example_labels: usize,
    pub max_topics: usize,
    pub max_attempts: u32,
    pub temperature: f32,
}

impl Default for TopicAgentConfig {
    fn default() -> Self {
        Self {
            candidate_threshold: 0.6,
            candidate_limit: 5,
            example_labels: 5,
            max_topics: 3,
            max_attempts: 3,
            temperature: 0.0,
        }
    }
}

/// The label being placed in the taxonomy.
#[derive(Debug, Clone)]
pub struct LabelContext<'a> {
    pub label_id: &'a str,
    pub label_name: &'a str,
    pub embedding: &'a [f32],
    pub semantic_context: &'a str,
    pub detected_entity: DetectedEntity,
}

pub struct TopicAssignmentAgent {
    model: Arc<dyn ChatModel>,
    db: Arc<ClassificationDatabase>,
    memory: ConversationMemory,
    prompt: PromptTemplate,
    config: TopicAgentConfig,
}

impl TopicAssignmentAgent {
    pub fn new(
        model: Arc<dyn ChatModel>,
        db: Arc<ClassificationDatabase>,
        memory: ConversationMemory,
        prompt: PromptTemplate,
        config: TopicAgentConfig,
    ) -> Self {
        Self { model, db, memory, prompt, config }
    }

    pub async fn assign(&self, label: &LabelContext<'_>) -> PipelineResult<Vec<LabelTopic>> {
        let candidates = self.db.taxonomy.find_similar_topics(
            label.embedding,
            self.config.candidate_threshold,
            self.config.candidate_limit,
            self.config.example_labels,
        )?;
        let catalog = self.db.taxonomy.catalog()?;
        debug!(
            "Topic assignment for '{}': {} candidate(s), {} thematic(s)",
            label.label_name,
            candidates.len(),
            catalog.len()
        );

        let candidate_text = format_candidates(&candidates);
        let catalog_text = format_catalog(&catalog);
        let system = self.prompt.render(&[
            ("LABEL_NAME", label.label_name),
            ("SEMANTIC_CONTEXT", label.semantic_context),
            ("DETECTED_ENTITY", label.detected_entity.as_str()),
            ("CANDIDATE_TOPICS", &candidate_text),
            ("ALL_TOPICS_BY_THEMATIC", &catalog_text),
        ]);
        let messages = [
            ChatMessage::system(system),
            ChatMessage::user(format!("Assigne le label \"{}\" aux topics appropriés.", label.label_name)),
        ];

        let options = ChatOptions {
            temperature: Some(self.config.temperature),
            model: None,
            json_mode: true,
        };
        let memory_key = format!("topics:{}", label.label_id);
        let max_topics = self.config.max_topics;
        let request = StructuredRequest {
            model: self.model.as_ref(),
            options: &options,
            max_attempts: self.config.max_attempts,
            memory: &self.memory,
            memory_key: &memory_key,
        };
        let response = complete_structured(request, &messages, move |r: TopicAssignmentResponse| {
            r.normalize(max_topics)
        })
        .await
        .map_err(PipelineError::from_structured)?;

        let thematics: Vec<Thematic> = catalog.iter().map(|entry| entry.thematic.clone()).collect();
        let mut links: Vec<LabelTopicLink> = Vec::with_capacity(response.assignments.len());
        for assignment in &response.assignments {
            let topic_id = self.resolve_topic(assignment, label, &thematics)?;
            debug!(
                "Label '{}' -> topic {} ({:?}, primary={}): {}",
                label.label_name,
                topic_id,
                assignment.action,
                assignment.is_primary,
                TextUtils::truncate_chars(&assignment.reasoning, 160)
            );
            match links.iter_mut().find(|link| link.topic_id == topic_id) {
                Some(existing) => {
                    existing.is_primary |= assignment.is_primary;
                    existing.confidence = existing.confidence.max(assignment.confidence);
                }
                None => links.push(LabelTopicLink {
                    topic_id,
                    confidence: assignment.confidence,
                    is_primary: assignment.is_primary,
                }),
            }
        }

        let stored = self
            .db
            .taxonomy
            .upsert_label_topics(label.label_id, &links, ASSIGNMENT_METHOD)?;
        info!("Label '{}' linked to {} topic(s)", label.label_name, links.len());
        Ok(stored)
    }

    fn resolve_topic(
        &self,
        assignment: &TopicAssignment,
        label: &LabelContext<'_>,
        thematics: &[Thematic],
    ) -> PipelineResult<String> {
        let taxonomy = &self.db.taxonomy;
        if assignment.action == AssignmentAction::AssignExisting {
            if let Some(id) = assignment.topic_id.as_deref() {
                if let Some(topic) = taxonomy.get_topic(id)? {
                    return Ok(topic.id);
                }
            }
            warn!(
                "Topic id {:?} for '{}' not found, falling back to slug lookup",
                assignment.topic_id, assignment.topic_name
            );
            if let Some(thematic) = thematics.iter().find(|t| t.name == assignment.thematic_name) {
                if let Some(topic) = taxonomy.find_topic_by_slug(&thematic.id, &topic_slug(assignment))? {
                    return Ok(topic.id);
                }
            }
        }

        let thematic = thematics
            .iter()
            .find(|t| t.name == assignment.thematic_name)
            .ok_or_else(|| PipelineError::UnknownThematic {
                name: assignment.thematic_name.clone(),
                known: thematics.iter().map(|t| t.name.clone()).collect(),
            })?;
        let slug = topic_slug(assignment);
        if let Some(existing) = taxonomy.find_topic_by_slug(&thematic.id, &slug)? {
            debug!("Topic '{}' already exists under '{}'", slug, thematic.name);
            return Ok(existing.id);
        }
        let description = format!("Créé automatiquement pour: {}", label.label_name);
        let created = taxonomy.create_topic(&NewTopic {
            thematic_id: &thematic.id,
            name: &assignment.topic_name,
            slug: &slug,
            embedding: Some(label.embedding),
            description: Some(&description),
        });
        match created {
            Ok(topic) => Ok(topic.id),
            Err(StoreError::UniquenessConflict { .. }) => {
                debug!("Topic '{}' created concurrently, re-reading", slug);
                taxonomy
                    .find_topic_by_slug(&thematic.id, &slug)?
                    .map(|topic| topic.id)
                    .ok_or_else(|| {
                        StoreError::NotFound {
                            entity: "topic",
                            key: slug.clone(),
                        }
                        .into()
                    })
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn topic_slug(assignment: &TopicAssignment) -> String {
    let from_model = assignment
        .topic_slug
        .as_deref()
        .map(TextUtils::slugify)
        .filter(|slug| !slug.is_empty());
    from_model.unwrap_or_else(|| TextUtils::slugify(&assignment.topic_name))
}

pub fn format_candidates(candidates: &[SimilarTopic]) -> String {
    if candidates.is_empty() {
        return "Aucun topic candidat trouvé par similarité vectorielle.".to_string();
    }
    candidates
        .iter()
        .map(|topic| {
            let examples = if topic.example_labels.is_empty() {
                "aucun".to_string()
            } else {
                topic.example_labels.join(", ")
            };
            format!(
                "\n- {} (similarité: {:.2})\n  Thématique: {}\n  ID: {}\n  Exemples de labels: {}\n",
                topic.name, topic.similarity, topic.thematic_name, topic.id, examples
            )
        })
        .collect()
}

pub fn format_catalog(catalog: &[ThematicCatalogEntry]) -> String {
    let mut out = String::new();
    for entry in catalog {
        out.push_str(&format!("\n{}:\n", entry.thematic.name));
        if entry.topics.is_empty() {
            out.push_str("  (aucun topic)\n");
        }
        for topic in &entry.topics {
            out.push_str(&format!("  - {} (id: {})\n", topic.name, topic.id));
        }
    }
    out
}
