//! The classification-and-dedup pipeline.
//!
//! `segmenter` and `hasher` are pure; `orchestrator` drives one discussion
//! through classification, embedding, matching and persistence;
//! `topic_assignment` is the optional second stage for label hierarchies.

pub mod decision;
pub mod hasher;
pub mod orchestrator;
pub mod segmenter;
pub mod topic_assignment;

pub use decision::{Band, ClassificationAction, MatchDecision, SimilarityBands};
pub use hasher::{discussion_hash, session_hash};
pub use orchestrator::{
    ClassificationOrchestrator, DiscussionOutcome, DiscussionState, OrchestratorConfig,
};
pub use segmenter::{segment, Discussion, DiscussionMessage, SegmentError, SegmentedConversation, SegmenterOptions};
pub use topic_assignment::{LabelContext, TopicAgentConfig, TopicAssignmentAgent};
