//! Versioned instruction templates for the two model exchanges.
//!
//! Both templates ship with the crate; a deployment may point at a file
//! instead. Placeholders are written `{{NAME}}`.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

pub const CLASSIFY_DISCUSSION_PROMPT: &str = include_str!("../prompts/classify_discussion.md");
pub const ASSIGN_TOPIC_PROMPT: &str = include_str!("../prompts/assign_topic.md");

#[derive(Debug, Clone)]
pub struct PromptTemplate {
    name: &'static str,
    text: String,
}

impl PromptTemplate {
    pub fn new(name: &'static str, text: impl Into<String>) -> Self {
        Self { name, text: text.into() }
    }

    /// Reads `path` when given, otherwise uses the bundled `default`.
    pub fn load(name: &'static str, path: Option<&Path>, default: &str) -> Result<Self> {
        match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read {} prompt from {}", name, path.display()))?;
                info!("Loaded {} prompt from {}", name, path.display());
                Ok(Self::new(name, text))
            }
            None => Ok(Self::new(name, default)),
        }
    }

    pub fn classify_discussion() -> Self {
        Self::new("classify_discussion", CLASSIFY_DISCUSSION_PROMPT)
    }

    pub fn assign_topic() -> Self {
        Self::new("assign_topic", ASSIGN_TOPIC_PROMPT)
    }

    pub fn name(&self) -> &str {
        self.name
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn render(&self, vars: &[(&str, &str)]) -> String {
        vars.iter().fold(self.text.clone(), |acc, (key, value)| {
            acc.replace(&format!("{{{{{}}}}}", key), value)
        })
    }
}
