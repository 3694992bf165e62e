//! Shared component graph.
//!
//! Everything a worker or a request handler needs is built once here and
//! handed out behind `Arc`s.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::info;

use crate::classification::ClassificationClient;
use crate::config::Config;
use crate::embedding::EmbeddingClient;
use crate::jobs::ConversationProcessor;
use crate::llm::{ChatModel, EmbeddingModel, OpenAiCompatibleClient};
use crate::memory::ConversationMemory;
use crate::pipeline::{ClassificationOrchestrator, TopicAssignmentAgent};
use crate::prompts::{PromptTemplate, ASSIGN_TOPIC_PROMPT, CLASSIFY_DISCUSSION_PROMPT};
use crate::store::{ClassificationDatabase, RecordKind};
use crate::transcript::{CrispClient, TranscriptSource};

const MEMORY_IDLE_TTL: Duration = Duration::from_secs(30 * 60);

pub struct SharedState {
    /// Read-only after initialization.
    pub config: Arc<Config>,
    pub database: Arc<ClassificationDatabase>,
    pub memory: ConversationMemory,
    pub orchestrator: Arc<ClassificationOrchestrator>,
    pub processor: Arc<ConversationProcessor>,
}

impl SharedState {
    /// Production wiring: SQLite file, OpenAI-compatible model backend and Crisp transcripts.
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        if let Some(parent) = config.database_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }
        let database = Arc::new(
            ClassificationDatabase::new(&config.database_path, config.database_pool_size)
                .context("failed to open classification database")?,
        );

        let model = Arc::new(OpenAiCompatibleClient::new(
            config.llm_base_url.clone(),
            config.llm_api_key.clone(),
            config.llm_chat_model.clone(),
            config.llm_embedding_model.clone(),
            config.embedding_dimensions,
            config.llm_timeout(),
        ));
        let transcripts = Arc::new(CrispClient::new(
            config.crisp_base_url(),
            config.crisp_api_key.clone(),
            config.llm_timeout(),
        ));

        Self::new(config, database, model.clone(), model, transcripts)
    }

    /// Wires the pipeline around already-built backends.
    pub fn new(
        config: Config,
        database: Arc<ClassificationDatabase>,
        chat: Arc<dyn ChatModel>,
        embeddings: Arc<dyn EmbeddingModel>,
        transcripts: Arc<dyn TranscriptSource>,
    ) -> anyhow::Result<Self> {
        info!("Initializing shared state");

        if config.seed_thematics {
            let seeded = database.taxonomy.seed_default_thematics()?;
            if seeded > 0 {
                info!("Seeded {} default thematics", seeded);
            }
        }

        let memory = ConversationMemory::new(
            config.conversation_memory_capacity,
            config.conversation_memory_max_sessions,
            MEMORY_IDLE_TTL,
        );

        let classify_prompt = PromptTemplate::load(
            "classify_discussion",
            config.classify_prompt_path.as_deref(),
            CLASSIFY_DISCUSSION_PROMPT,
        )?;
        let classifier = Arc::new(ClassificationClient::new(
            chat.clone(),
            memory.clone(),
            classify_prompt,
            config.llm_temperature,
            config.classification_max_attempts,
        ));
        let embedder = EmbeddingClient::new(embeddings, config.embedding_dimensions);

        let topic_agent = if config.topic_assignment_enabled && config.record_kind() == RecordKind::Label {
            let prompt = PromptTemplate::load(
                "assign_topic",
                config.assign_topic_prompt_path.as_deref(),
                ASSIGN_TOPIC_PROMPT,
            )?;
            Some(Arc::new(TopicAssignmentAgent::new(
                chat,
                database.clone(),
                memory.clone(),
                prompt,
                config.topic_agent_config(),
            )))
        } else {
            None
        };

        let orchestrator = Arc::new(ClassificationOrchestrator::new(
            database.clone(),
            classifier,
            embedder,
            topic_agent,
            config.orchestrator_config()?,
        ));
        let processor = Arc::new(ConversationProcessor::new(
            database.clone(),
            transcripts,
            orchestrator.clone(),
            config.segmenter_options(),
        ));

        Ok(Self {
            config: Arc::new(config),
            database,
            memory,
            orchestrator,
            processor,
        })
    }
}
