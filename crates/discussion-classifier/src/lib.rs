// discussion-classifier/src/lib.rs

pub mod classification;
pub mod config;
pub mod embedding;
pub mod error;
pub mod jobs;
pub mod llm;
pub mod memory;
pub mod metrics;
pub mod pipeline;
pub mod prompts;
pub mod shared_state;
pub mod store;
pub mod telemetry;
pub mod transcript;
pub mod utils;

#[cfg(feature = "cli")]
pub mod api;
#[cfg(feature = "cli")]
pub mod server;

// Public API exports
pub use config::{Config, HierarchyMode};
pub use error::{PipelineError, PipelineResult};
pub use jobs::{ConversationJob, ConversationProcessor, JobKind, JobQueue, JobReport, JobStatus};
pub use pipeline::{ClassificationOrchestrator, DiscussionOutcome, DiscussionState};
pub use shared_state::SharedState;
pub use store::{ClassificationDatabase, RecordKind};

#[cfg(feature = "cli")]
pub use server::run_server;
