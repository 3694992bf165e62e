//! Row types for the classification database

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who the discussion was mainly about, as reported by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectedEntity {
    Certificateur,
    Aap,
    Candidat,
    #[default]
    NonIdentifie,
}

impl DetectedEntity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Certificateur => "certificateur",
            Self::Aap => "aap",
            Self::Candidat => "candidat",
            Self::NonIdentifie => "non_identifie",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "certificateur" => Some(Self::Certificateur),
            "aap" => Some(Self::Aap),
            "candidat" => Some(Self::Candidat),
            "non_identifie" => Some(Self::NonIdentifie),
            _ => None,
        }
    }
}

impl std::fmt::Display for DetectedEntity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub external_conversation_id: String,
    pub content_hash: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscussionRecord {
    pub id: String,
    pub session_id: String,
    pub timestamp: i64,
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
}

/// A label or a subject; both share this shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupRecord {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing)]
    pub embedding: Option<Vec<f32>>,
    pub is_canonical: bool,
    pub alias_of: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarRecord {
    pub id: String,
    pub name: String,
    pub alias_of: Option<String>,
    pub similarity: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationRecord {
    pub id: String,
    pub discussion_id: String,
    pub record_id: String,
    pub confidence: f64,
    pub discussion_timestamp: i64,
    pub discussion_hash: String,
    pub classification_method: String,
    pub detected_entity: DetectedEntity,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thematic {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub color: Option<String>,
    pub display_order: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topic {
    pub id: String,
    pub thematic_id: String,
    pub name: String,
    pub slug: String,
    #[serde(skip_serializing)]
    pub embedding: Option<Vec<f32>>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimilarTopic {
    pub id: String,
    pub name: String,
    pub thematic_id: String,
    pub thematic_name: String,
    pub similarity: f64,
    pub example_labels: Vec<String>,
}

/// One thematic with its topics, as shown to the topic assignment model.
#[derive(Debug, Clone, Serialize)]
pub struct ThematicCatalogEntry {
    pub thematic: Thematic,
    pub topics: Vec<Topic>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelTopic {
    pub id: String,
    pub label_id: String,
    pub topic_id: String,
    pub confidence: f64,
    pub is_primary: bool,
    pub assignment_method: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseStats {
    pub sessions: i64,
    pub discussions: i64,
    pub labels: i64,
    pub subjects: i64,
    pub thematics: i64,
    pub topics: i64,
    pub label_topics: i64,
    pub schema_version: i32,
}
