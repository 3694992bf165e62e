//! End-to-end runs of the conversation processor against scripted model
//! backends and a real SQLite store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Barrier;
use tokio_test::{assert_err, assert_ok};

use discussion_classifier::jobs::processor::DUPLICATE_SESSION_REASON;
use discussion_classifier::llm::{ChatMessage, ChatModel, ChatOptions, EmbeddingModel, LlmError};
use discussion_classifier::store::ClassificationDatabase;
use discussion_classifier::transcript::{
    Actor, EventContent, Message, MessageContent, MessageType, TranscriptError, TranscriptSource,
};
use discussion_classifier::{
    Config, DiscussionState, JobStatus, PipelineError, RecordKind, SharedState,
};

// ===== Fakes =====

/// Labels each discussion by the first needle found in the request payload.
struct ScriptedChat {
    labels: Vec<(&'static str, &'static str)>,
    topic_reply: Option<String>,
    requests: Mutex<Vec<String>>,
}

#[async_trait]
impl ChatModel for ScriptedChat {
    async fn chat(&self, messages: &[ChatMessage], _: &ChatOptions) -> Result<String, LlmError> {
        let request = messages.last().map(|m| m.content.clone()).unwrap_or_default();
        self.requests.lock().unwrap().push(request.clone());

        if request.starts_with("Assigne le label") {
            return self
                .topic_reply
                .clone()
                .ok_or_else(|| LlmError::Unavailable("no topic reply scripted".into()));
        }
        let label = self
            .labels
            .iter()
            .find(|(needle, _)| request.contains(needle))
            .map(|(_, label)| *label)
            .ok_or_else(|| LlmError::InvalidResponse(format!("unscripted request: {request}")))?;
        Ok(json!({
            "session_id": "ignored",
            "conversation": {
                "timestamp": 0,
                "label": label,
                "confidence": 0.9,
                "semantic_context": "Contexte de test.",
                "detected_entity": "candidat"
            }
        })
        .to_string())
    }
}

struct TableEmbedder {
    vectors: HashMap<&'static str, [f32; 3]>,
    calls: AtomicUsize,
    /// Holds every caller until this many embeddings are in flight.
    rendezvous: Option<Barrier>,
}

#[async_trait]
impl EmbeddingModel for TableEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(barrier) = &self.rendezvous {
            barrier.wait().await;
        }
        Ok(texts
            .iter()
            .map(|t| self.vectors.get(t.as_str()).copied().unwrap_or([0.0, 0.0, 1.0]).to_vec())
            .collect())
    }
}

#[derive(Default)]
struct Transcripts(Mutex<HashMap<String, Vec<Message>>>);

impl Transcripts {
    fn set(&self, conversation_id: &str, messages: Vec<Message>) {
        self.0.lock().unwrap().insert(conversation_id.to_string(), messages);
    }
}

#[async_trait]
impl TranscriptSource for Transcripts {
    async fn fetch_messages(&self, conversation_id: &str) -> Result<Vec<Message>, TranscriptError> {
        self.0
            .lock()
            .unwrap()
            .get(conversation_id)
            .cloned()
            .ok_or_else(|| TranscriptError::NotFound(conversation_id.to_string()))
    }
}

// ===== Builders =====

fn text(session: &str, from: Actor, content: &str, timestamp: i64) -> Message {
    Message {
        session_id: session.to_string(),
        website_id: None,
        kind: MessageType::Text,
        from,
        content: MessageContent::Text(content.to_string()),
        timestamp,
        user: None,
    }
}

fn resolved(session: &str, timestamp: i64) -> Message {
    Message {
        session_id: session.to_string(),
        website_id: None,
        kind: MessageType::Event,
        from: Actor::Operator,
        content: MessageContent::Event(EventContent {
            namespace: "state:resolved".to_string(),
            text: None,
        }),
        timestamp,
        user: None,
    }
}

/// One discussion per question: user asks, operator answers, conversation resolved.
fn transcript(session: &str, questions: &[&str]) -> Vec<Message> {
    let mut messages = Vec::new();
    for (i, question) in questions.iter().enumerate() {
        let base = (i as i64 + 1) * 1_000;
        messages.push(text(session, Actor::User, question, base));
        messages.push(text(session, Actor::Operator, "Nous regardons cela.", base + 10));
        messages.push(resolved(session, base + 20));
    }
    messages
}

struct Harness {
    state: SharedState,
    transcripts: Arc<Transcripts>,
    embedder: Arc<TableEmbedder>,
    chat: Arc<ScriptedChat>,
}

struct Setup {
    vars: Vec<(&'static str, &'static str)>,
    labels: Vec<(&'static str, &'static str)>,
    vectors: Vec<(&'static str, [f32; 3])>,
    topic_reply: Option<String>,
    database: Option<Arc<ClassificationDatabase>>,
    rendezvous: Option<usize>,
}

impl Setup {
    fn new(mode: &'static str) -> Self {
        Self {
            vars: vec![
                ("HIERARCHY_MODE", mode),
                ("EMBEDDING_DIMENSIONS", "3"),
                ("TOPIC_ASSIGNMENT_ENABLED", "false"),
            ],
            labels: Vec::new(),
            vectors: Vec::new(),
            topic_reply: None,
            database: None,
            rendezvous: None,
        }
    }

    fn build(self) -> Harness {
        let vars: HashMap<&str, &str> = self.vars.into_iter().collect();
        let config = Config::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        let database = self
            .database
            .unwrap_or_else(|| Arc::new(ClassificationDatabase::new_in_memory().unwrap()));
        let chat = Arc::new(ScriptedChat {
            labels: self.labels,
            topic_reply: self.topic_reply,
            requests: Mutex::new(Vec::new()),
        });
        let embedder = Arc::new(TableEmbedder {
            vectors: self.vectors.into_iter().collect(),
            calls: AtomicUsize::new(0),
            rendezvous: self.rendezvous.map(Barrier::new),
        });
        let transcripts = Arc::new(Transcripts::default());
        let state = SharedState::new(config, database, chat.clone(), embedder.clone(), transcripts.clone())
            .unwrap();
        Harness { state, transcripts, embedder, chat }
    }
}

const ACCOUNT_LABEL: &str = "accès compte et mot de passe oublié";

fn subject_setup() -> Setup {
    let mut setup = Setup::new("subjects");
    setup.labels = vec![
        ("connecter", ACCOUNT_LABEL),
        ("oublié mon code", "mot de passe perdu"),
        ("réinitialiser", "réinitialisation du mot de passe"),
    ];
    setup.vectors = vec![
        (ACCOUNT_LABEL, [1.0, 0.0, 0.0]),
        ("mot de passe perdu", [0.95, 0.312_25, 0.0]),
        ("réinitialisation du mot de passe", [0.78, 0.625_78, 0.0]),
    ];
    setup
}

// ===== Dedup Decisions =====

#[tokio::test]
async fn test_unmatched_label_creates_a_new_subject() {
    let h = subject_setup().build();
    h.transcripts.set("conv-a", transcript("conv-a", &["Je n'arrive plus à me connecter"]));

    let report = assert_ok!(h.state.processor.process_conversation("conv-a").await);
    assert_eq!(report.status, JobStatus::Ok);
    assert_eq!(report.discussions, 1);

    let outcome = &report.outcomes[0];
    assert_eq!(outcome.state, DiscussionState::Persisted);
    assert_eq!(outcome.action.as_deref(), Some("created_new_subject"));
    assert_eq!(outcome.confidence, Some(1.0));
    assert_eq!(outcome.record_name.as_deref(), Some(ACCOUNT_LABEL));
    assert_eq!(h.state.database.subjects.count().unwrap(), 1);
}

#[tokio::test]
async fn test_close_label_reuses_the_existing_subject() {
    let h = subject_setup().build();
    h.transcripts.set(
        "conv-b",
        transcript("conv-b", &["Je n'arrive plus à me connecter", "J'ai oublié mon code"]),
    );

    let report = h.state.processor.process_conversation("conv-b").await.unwrap();
    let (first, second) = (&report.outcomes[0], &report.outcomes[1]);
    assert_eq!(second.action.as_deref(), Some("reused_existing_subject"));
    assert_eq!(second.record_id, first.record_id);
    assert!((second.confidence.unwrap() - 0.95).abs() < 1e-3);
    assert_eq!(h.state.database.subjects.count().unwrap(), 1);
}

#[tokio::test]
async fn test_moderate_similarity_creates_an_alias() {
    let h = subject_setup().build();
    h.transcripts.set(
        "conv-c",
        transcript("conv-c", &["Je n'arrive plus à me connecter", "Comment réinitialiser ?"]),
    );

    let report = h.state.processor.process_conversation("conv-c").await.unwrap();
    let canonical_id = report.outcomes[0].record_id.clone().unwrap();
    let alias = &report.outcomes[1];
    assert_eq!(alias.action.as_deref(), Some("created_alias_subject"));
    assert!((alias.confidence.unwrap() - 0.78).abs() < 1e-3);

    let row = h.state.database.subjects.get_by_id(alias.record_id.as_deref().unwrap()).unwrap().unwrap();
    assert_eq!(row.alias_of.as_deref(), Some(canonical_id.as_str()));
    assert_eq!(h.state.database.subjects.count().unwrap(), 2);
}

#[tokio::test]
async fn test_skip_label_links_to_the_sentinel_without_embedding() {
    let mut setup = Setup::new("labels");
    setup.labels = vec![("Bonjour", "SKIP")];
    let h = setup.build();
    h.transcripts.set("conv-d", transcript("conv-d", &["Bonjour"]));

    let report = h.state.processor.process_conversation("conv-d").await.unwrap();
    let outcome = &report.outcomes[0];
    assert_eq!(outcome.state, DiscussionState::PersistedAsSkip);
    assert_eq!(outcome.action.as_deref(), Some("skip_classification"));
    assert_eq!(outcome.confidence, Some(0.9));
    assert_eq!(h.embedder.calls.load(Ordering::SeqCst), 0);

    let db = &h.state.database;
    let skip = db.labels.get_by_name("skip").unwrap().unwrap();
    assert!(skip.embedding.is_none());
    assert_eq!(db.classifications.count_for_record(RecordKind::Label, &skip.id).unwrap(), 1);
    assert_eq!(db.get_stats().unwrap().discussions, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_pipelines_converge_on_one_label() {
    let dir = tempfile::tempdir().unwrap();
    let database = Arc::new(ClassificationDatabase::new(&dir.path().join("classifier.db"), 4).unwrap());

    let mut setup = Setup::new("labels");
    setup.labels = vec![("premier", "foo"), ("second", "foo")];
    setup.vectors = vec![("foo", [1.0, 0.0, 0.0])];
    setup.database = Some(database.clone());
    setup.rendezvous = Some(2);
    let h = setup.build();
    h.transcripts.set("conv-1", transcript("conv-1", &["premier problème"]));
    h.transcripts.set("conv-2", transcript("conv-2", &["second problème"]));

    let processor = h.state.processor.clone();
    let (a, b) = tokio::join!(
        processor.process_conversation("conv-1"),
        processor.process_conversation("conv-2"),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(database.labels.count().unwrap(), 1);
    let foo = database.labels.get_by_name("foo").unwrap().unwrap();
    assert_eq!(a.outcomes[0].record_id.as_deref(), Some(foo.id.as_str()));
    assert_eq!(b.outcomes[0].record_id.as_deref(), Some(foo.id.as_str()));

    let mut actions = vec![a.outcomes[0].action.clone().unwrap(), b.outcomes[0].action.clone().unwrap()];
    actions.sort();
    assert_eq!(actions, vec!["created_new_label", "reused_existing_label"]);
    assert_eq!(database.classifications.count_for_record(RecordKind::Label, &foo.id).unwrap(), 2);
}

// ===== Topic Assignment =====

#[tokio::test]
async fn test_new_label_is_attached_to_a_created_topic() {
    let mut setup = Setup::new("labels");
    setup.vars.retain(|(k, _)| *k != "TOPIC_ASSIGNMENT_ENABLED");
    setup.labels = vec![("connecter", ACCOUNT_LABEL)];
    setup.vectors = vec![(ACCOUNT_LABEL, [1.0, 0.0, 0.0])];
    setup.topic_reply = Some(
        json!({
            "assignments": [{
                "action": "create_new",
                "topic_name": "Connexion au compte",
                "thematic_name": "Gestion de Compte",
                "is_primary": true,
                "confidence": 0.85,
                "reasoning": "Problème d'accès."
            }]
        })
        .to_string(),
    );
    let h = setup.build();
    h.transcripts.set("conv-t", transcript("conv-t", &["Je n'arrive plus à me connecter"]));

    let report = h.state.processor.process_conversation("conv-t").await.unwrap();
    let outcome = &report.outcomes[0];
    assert_eq!(outcome.topics_linked, 1);

    let links = h.state.database.taxonomy.topics_for_label(outcome.record_id.as_deref().unwrap()).unwrap();
    assert_eq!(links.len(), 1);
    assert!(links[0].is_primary);
    assert_eq!(links[0].assignment_method, "rag_agent");
    let topic = h.state.database.taxonomy.get_topic(&links[0].topic_id).unwrap().unwrap();
    assert_eq!(topic.slug, "connexion-au-compte");

    let requests = h.chat.requests.lock().unwrap();
    assert!(requests.iter().any(|r| r.starts_with(&format!("Assigne le label \"{ACCOUNT_LABEL}\""))));
}

#[tokio::test]
async fn test_unknown_thematic_persists_nothing() {
    let mut setup = Setup::new("labels");
    setup.vars.retain(|(k, _)| *k != "TOPIC_ASSIGNMENT_ENABLED");
    setup.labels = vec![("connecter", ACCOUNT_LABEL)];
    setup.topic_reply = Some(
        json!({
            "assignments": [{
                "action": "create_new",
                "topic_name": "Connexion",
                "thematic_name": "Thématique inventée",
                "is_primary": true,
                "confidence": 0.7
            }]
        })
        .to_string(),
    );
    let h = setup.build();
    h.transcripts.set("conv-u", transcript("conv-u", &["Je n'arrive plus à me connecter"]));

    let err = h.state.processor.process_conversation("conv-u").await.unwrap_err();
    assert!(matches!(err, PipelineError::UnknownThematic { .. }));
    assert!(!err.is_retryable());
    let stats = h.state.database.get_stats().unwrap();
    assert_eq!(stats.discussions, 0);
    assert_eq!(stats.label_topics, 0);
}

// ===== Idempotence =====

#[tokio::test]
async fn test_unchanged_transcript_is_skipped_on_rerun() {
    let h = subject_setup().build();
    h.transcripts.set("conv-i", transcript("conv-i", &["Je n'arrive plus à me connecter"]));

    let first = h.state.processor.process_conversation("conv-i").await.unwrap();
    let requests_after_first = h.chat.requests.lock().unwrap().len();

    let second = h.state.processor.process_conversation("conv-i").await.unwrap();
    assert_eq!(second.status, JobStatus::Skipped);
    assert_eq!(second.reason.as_deref(), Some(DUPLICATE_SESSION_REASON));
    assert_eq!(second.session_id, first.session_id);
    assert_eq!(h.chat.requests.lock().unwrap().len(), requests_after_first);

    let stats = h.state.database.get_stats().unwrap();
    assert_eq!(stats.sessions, 1);
    assert_eq!(stats.discussions, 1);
}

#[tokio::test]
async fn test_grown_transcript_only_classifies_new_discussions() {
    let h = subject_setup().build();
    h.transcripts.set("conv-g", transcript("conv-g", &["Je n'arrive plus à me connecter"]));
    let first = h.state.processor.process_conversation("conv-g").await.unwrap();

    h.transcripts.set(
        "conv-g",
        transcript("conv-g", &["Je n'arrive plus à me connecter", "Comment réinitialiser ?"]),
    );
    let second = h.state.processor.process_conversation("conv-g").await.unwrap();
    assert_eq!(second.status, JobStatus::Ok);
    assert_eq!(second.session_id, first.session_id);
    assert_eq!(second.outcomes[0].state, DiscussionState::SkippedDuplicate);
    assert_eq!(second.outcomes[1].action.as_deref(), Some("created_alias_subject"));

    let stats = h.state.database.get_stats().unwrap();
    assert_eq!(stats.sessions, 1);
    assert_eq!(stats.discussions, 2);
}

// ===== Failure Surfacing =====

#[tokio::test]
async fn test_invalid_job_input_is_not_retryable() {
    let h = subject_setup().build();

    let blank = assert_err!(h.state.processor.process_conversation("  ").await);
    assert!(matches!(blank, PipelineError::Validation(_)));

    let missing = assert_err!(h.state.processor.process_conversation("unknown").await);
    assert!(!missing.is_retryable());

    h.transcripts.set("conv-empty", Vec::new());
    let empty = assert_err!(h.state.processor.process_conversation("conv-empty").await);
    assert!(matches!(empty, PipelineError::Validation(_)));
    assert_eq!(h.state.database.get_stats().unwrap().sessions, 0);
}
