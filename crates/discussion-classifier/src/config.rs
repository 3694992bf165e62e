// discussion-classifier/src/config.rs

use anyhow::{anyhow, Context, Result};
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

use crate::jobs::QueueConfig;
use crate::pipeline::{OrchestratorConfig, SegmenterOptions, SimilarityBands, TopicAgentConfig};
use crate::store::RecordKind;

/// Which hierarchy a deployment deduplicates into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HierarchyMode {
    /// Labels with a thematic/topic taxonomy on top.
    Labels,
    /// Flat subjects linked by `alias_of`.
    Subjects,
}

impl HierarchyMode {
    pub fn record_kind(&self) -> RecordKind {
        match self {
            Self::Labels => RecordKind::Label,
            Self::Subjects => RecordKind::Subject,
        }
    }
}

impl FromStr for HierarchyMode {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "labels" | "label" => Ok(Self::Labels),
            "subjects" | "subject" => Ok(Self::Subjects),
            other => Err(anyhow!("unknown HIERARCHY_MODE '{}' (expected labels or subjects)", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: PathBuf,
    pub database_pool_size: u32,
    pub llm_base_url: String,
    pub llm_api_key: Option<String>,
    pub llm_chat_model: String,
    pub llm_embedding_model: String,
    pub embedding_dimensions: usize,
    pub llm_timeout_seconds: u64,
    pub llm_temperature: f32,
    pub crisp_url: String,
    pub crisp_website_id: String,
    pub crisp_api_key: String,
    /// When set, webhook calls must carry `?secret=<value>`.
    pub crisp_webhook_secret: Option<String>,
    pub hierarchy_mode: HierarchyMode,
    pub similarity_reuse: f64,
    pub similarity_suggest: f64,
    pub similarity_search_limit: usize,
    pub max_conflict_retries: u32,
    pub topic_assignment_enabled: bool,
    pub topic_candidate_threshold: f64,
    pub rag_retrieve_topics_limit: usize,
    pub topic_assignment_max_topics: usize,
    pub topic_example_labels: usize,
    pub classification_max_attempts: u32,
    pub flush_trailing_open_discussion: bool,
    pub conversation_memory_capacity: usize,
    pub conversation_memory_max_sessions: u64,
    pub classify_prompt_path: Option<PathBuf>,
    pub assign_topic_prompt_path: Option<PathBuf>,
    pub queue_concurrency: usize,
    pub queue_attempts: u32,
    pub queue_backoff_ms: u64,
    pub queue_size: usize,
    pub queue_retention_secs: u64,
    pub queue_max_finished_jobs: usize,
    pub api_host: String,
    pub api_port: u16,
    pub seed_thematics: bool,
    pub log_level: String,
}

fn parse_var<T, F>(lookup: &F, key: &str, default: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .unwrap_or_else(|| default.into())
        .trim()
        .parse()
        .with_context(|| format!("invalid value for {}", key))
}

fn optional_var<F: Fn(&str) -> Option<String>>(lookup: &F, key: &str) -> Option<String> {
    lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

impl Config {
    pub fn from_env() -> Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            warn!("Failed to load .env file: {}. Using system environment variables.", e);
        } else {
            info!("Loaded environment variables from .env file");
        }
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from any key lookup; `from_env` uses the process environment.
    pub fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Result<Self> {
        let hierarchy_mode: HierarchyMode = lookup("HIERARCHY_MODE")
            .unwrap_or_else(|| "labels".into())
            .parse()?;
        let default_bands = SimilarityBands::defaults_for(hierarchy_mode.record_kind());
        let default_concurrency = (num_cpus::get() / 2).clamp(2, 8).to_string();

        let config = Self {
            database_path: PathBuf::from(
                lookup("DATABASE_PATH").unwrap_or_else(|| "./data/classifier.db".into()),
            ),
            database_pool_size: parse_var(&lookup, "DATABASE_POOL_SIZE", "10")?,
            llm_base_url: lookup("LLM_BASE_URL")
                .unwrap_or_else(|| "https://albert.api.etalab.gouv.fr/v1".into()),
            llm_api_key: optional_var(&lookup, "LLM_API_KEY"),
            llm_chat_model: lookup("LLM_CHAT_MODEL").unwrap_or_else(|| "albert-small".into()),
            llm_embedding_model: lookup("LLM_EMBEDDING_MODEL")
                .unwrap_or_else(|| "embeddings-small".into()),
            embedding_dimensions: parse_var(&lookup, "EMBEDDING_DIMENSIONS", "1024")?,
            llm_timeout_seconds: parse_var(&lookup, "LLM_TIMEOUT_SECONDS", "120")?,
            llm_temperature: parse_var(&lookup, "LLM_TEMPERATURE", "0.0")?,
            crisp_url: lookup("CRISP_URL").unwrap_or_else(|| "https://api.crisp.chat/v1/website".into()),
            crisp_website_id: lookup("CRISP_WEBSITE_ID").unwrap_or_default(),
            crisp_api_key: lookup("CRISP_API_KEY").unwrap_or_default(),
            crisp_webhook_secret: optional_var(&lookup, "CRISP_WEBHOOK_SECRET"),
            hierarchy_mode,
            similarity_reuse: parse_var(&lookup, "SIMILARITY_REUSE", &default_bands.reuse.to_string())?,
            similarity_suggest: parse_var(&lookup, "SIMILARITY_SUGGEST", &default_bands.suggest.to_string())?,
            similarity_search_limit: parse_var(&lookup, "SIMILARITY_SEARCH_LIMIT", "5")?,
            max_conflict_retries: parse_var(&lookup, "MAX_CONFLICT_RETRIES", "2")?,
            topic_assignment_enabled: parse_var(
                &lookup,
                "TOPIC_ASSIGNMENT_ENABLED",
                if hierarchy_mode == HierarchyMode::Labels { "true" } else { "false" },
            )?,
            topic_candidate_threshold: parse_var(&lookup, "TOPIC_CANDIDATE_THRESHOLD", "0.6")?,
            rag_retrieve_topics_limit: parse_var(&lookup, "RAG_RETRIEVE_TOPICS_LIMIT", "5")?,
            topic_assignment_max_topics: parse_var(&lookup, "TOPIC_ASSIGNMENT_MAX_TOPICS", "3")?,
            topic_example_labels: parse_var(&lookup, "TOPIC_EXAMPLE_LABELS", "5")?,
            classification_max_attempts: parse_var(&lookup, "CLASSIFICATION_MAX_ATTEMPTS", "3")?,
            flush_trailing_open_discussion: parse_var(&lookup, "FLUSH_TRAILING_OPEN_DISCUSSION", "false")?,
            conversation_memory_capacity: parse_var(&lookup, "CONVERSATION_MEMORY_CAPACITY", "20")?,
            conversation_memory_max_sessions: parse_var(&lookup, "CONVERSATION_MEMORY_MAX_SESSIONS", "1000")?,
            classify_prompt_path: optional_var(&lookup, "CLASSIFY_PROMPT_PATH").map(PathBuf::from),
            assign_topic_prompt_path: optional_var(&lookup, "ASSIGN_TOPIC_PROMPT_PATH").map(PathBuf::from),
            queue_concurrency: parse_var(&lookup, "QUEUE_CONCURRENCY", &default_concurrency)?,
            queue_attempts: parse_var(&lookup, "QUEUE_ATTEMPTS", "3")?,
            queue_backoff_ms: parse_var(&lookup, "QUEUE_BACKOFF_MS", "1000")?,
            queue_size: parse_var(&lookup, "QUEUE_SIZE", "1000")?,
            queue_retention_secs: parse_var(&lookup, "QUEUE_JOB_RETENTION_SECS", "3600")?,
            queue_max_finished_jobs: parse_var(&lookup, "QUEUE_MAX_FINISHED_JOBS", "10000")?,
            api_host: lookup("API_HOST").unwrap_or_else(|| "127.0.0.1".into()),
            api_port: parse_var(&lookup, "API_PORT", "8000")?,
            seed_thematics: parse_var(&lookup, "SEED_THEMATICS", "true")?,
            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".into()),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.bands().map_err(|e| anyhow!("invalid similarity thresholds: {}", e))?;
        if !(0.0..=1.0).contains(&self.topic_candidate_threshold) {
            return Err(anyhow!(
                "TOPIC_CANDIDATE_THRESHOLD must lie in [0, 1], got {}",
                self.topic_candidate_threshold
            ));
        }
        if self.embedding_dimensions == 0 {
            return Err(anyhow!("EMBEDDING_DIMENSIONS must be positive"));
        }
        if self.topic_assignment_max_topics == 0 {
            return Err(anyhow!("TOPIC_ASSIGNMENT_MAX_TOPICS must be at least 1"));
        }
        if self.topic_assignment_enabled && self.hierarchy_mode == HierarchyMode::Subjects {
            warn!("TOPIC_ASSIGNMENT_ENABLED has no effect with HIERARCHY_MODE=subjects");
        }
        Ok(())
    }

    pub fn record_kind(&self) -> RecordKind {
        self.hierarchy_mode.record_kind()
    }

    pub fn bands(&self) -> Result<SimilarityBands, String> {
        SimilarityBands::new(self.similarity_suggest, self.similarity_reuse)
    }

    pub fn orchestrator_config(&self) -> Result<OrchestratorConfig> {
        Ok(OrchestratorConfig {
            kind: self.record_kind(),
            bands: self.bands().map_err(|e| anyhow!(e))?,
            search_limit: self.similarity_search_limit.max(1),
            max_conflict_retries: self.max_conflict_retries,
        })
    }

    pub fn topic_agent_config(&self) -> TopicAgentConfig {
        TopicAgentConfig {
            candidate_threshold: self.topic_candidate_threshold,
            candidate_limit: self.rag_retrieve_topics_limit,
            example_labels: self.topic_example_labels,
            max_topics: self.topic_assignment_max_topics,
            max_attempts: self.classification_max_attempts,
            temperature: self.llm_temperature,
        }
    }

    pub fn segmenter_options(&self) -> SegmenterOptions {
        SegmenterOptions {
            flush_trailing_open_discussion: self.flush_trailing_open_discussion,
        }
    }

    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            concurrency: self.queue_concurrency.max(1),
            max_attempts: self.queue_attempts.max(1),
            backoff: Duration::from_millis(self.queue_backoff_ms),
            capacity: self.queue_size.max(1),
            retention: Duration::from_secs(self.queue_retention_secs),
            max_finished: self.queue_max_finished_jobs,
        }
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm_timeout_seconds)
    }

    /// `{CRISP_URL}/{CRISP_WEBSITE_ID}`
    pub fn crisp_base_url(&self) -> String {
        format!("{}/{}", self.crisp_url.trim_end_matches('/'), self.crisp_website_id)
    }

    pub fn print_config(&self) {
        info!("Current Configuration:");
        info!("- Database: {} (pool {})", self.database_path.display(), self.database_pool_size);
        info!("- LLM: {} chat={} embeddings={} ({} dims)", self.llm_base_url, self.llm_chat_model, self.llm_embedding_model, self.embedding_dimensions);
        info!("- LLM API key: {}", mask(self.llm_api_key.as_deref().unwrap_or("")));
        info!("- Crisp: {} key={} webhook secret={}", self.crisp_base_url(), mask(&self.crisp_api_key), mask(self.crisp_webhook_secret.as_deref().unwrap_or("")));
        info!("- Hierarchy: {:?}, reuse >= {}, suggest >= {}", self.hierarchy_mode, self.similarity_reuse, self.similarity_suggest);
        info!("- Topic assignment: {} (candidates >= {}, max {})", self.topic_assignment_enabled, self.topic_candidate_threshold, self.topic_assignment_max_topics);
        info!("- Classification attempts: {}", self.classification_max_attempts);
        info!("- Flush trailing discussion: {}", self.flush_trailing_open_discussion);
        info!("- Queue: {} worker(s), {} attempt(s), backoff {}ms, size {}, keep {} finished for {}s", self.queue_concurrency, self.queue_attempts, self.queue_backoff_ms, self.queue_size, self.queue_max_finished_jobs, self.queue_retention_secs);
        info!("- API: {}:{}", self.api_host, self.api_port);
    }

    pub fn api_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.api_host, self.api_port)
            .parse()
            .with_context(|| format!("invalid API address {}:{}", self.api_host, self.api_port))
    }
}

fn mask(secret: &str) -> String {
    match secret.chars().count() {
        0 => "<unset>".to_string(),
        n if n <= 4 => "****".to_string(),
        _ => format!("{}****", secret.chars().take(4).collect::<String>()),
    }
}
