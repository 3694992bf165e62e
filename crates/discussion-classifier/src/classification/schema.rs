//! Request and reply shapes of the classification exchange.

use serde::{Deserialize, Serialize};

use super::SchemaValidationError;
use crate::pipeline::segmenter::Discussion;
use crate::store::DetectedEntity;
use crate::utils::TextUtils;

/// Label the model returns for discussions it cannot meaningfully classify.
pub const SKIP_LABEL: &str = "SKIP";

const MIN_LABEL_CHARS: usize = 3;
const MAX_LABEL_CHARS: usize = 100;

/// What the model receives for one discussion.
#[derive(Debug, Clone, Serialize)]
pub struct ClassificationPayload<'a> {
    pub session_id: &'a str,
    pub conversation: &'a Discussion,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub session_id: String,
    pub conversation: ConversationClassification,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationClassification {
    pub timestamp: i64,
    #[serde(alias = "description")]
    pub label: String,
    #[serde(default)]
    pub confidence: Option<f64>,
    pub semantic_context: String,
    #[serde(default)]
    pub detected_entity: DetectedEntity,
}

impl ConversationClassification {
    pub fn is_skip(&self) -> bool {
        self.label.trim().eq_ignore_ascii_case(SKIP_LABEL)
    }

    /// Label as it is embedded and stored.
    pub fn normalized_label(&self) -> String {
        TextUtils::normalize_label(&self.label)
    }
}

impl ClassificationResult {
    pub fn validate(self) -> Result<Self, SchemaValidationError> {
        let conversation = &self.conversation;
        if !conversation.is_skip() {
            let len = TextUtils::char_len(conversation.label.trim());
            if !(MIN_LABEL_CHARS..=MAX_LABEL_CHARS).contains(&len) {
                return Err(SchemaValidationError(format!(
                    "le label doit contenir entre {} et {} caractères (reçu {})",
                    MIN_LABEL_CHARS, MAX_LABEL_CHARS, len
                )));
            }
        }
        if let Some(confidence) = conversation.confidence {
            if !(0.0..=1.0).contains(&confidence) {
                return Err(SchemaValidationError(format!(
                    "confidence doit être comprise entre 0 et 1 (reçu {})",
                    confidence
                )));
            }
        }
        Ok(self)
    }
}
