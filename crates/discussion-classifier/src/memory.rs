use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use moka::sync::Cache;

use crate::llm::ChatMessage;

pub const DEFAULT_MEMORY_CAPACITY: usize = 20;

/// Short-term chat history per conversation key.
///
/// Each key keeps at most `capacity` messages and drops the oldest on
/// overflow. The number of keys is bounded too, and idle keys expire.
/// Instances are passed explicitly to the components that need them.
#[derive(Clone)]
pub struct ConversationMemory {
    entries: Cache<String, Arc<Mutex<VecDeque<ChatMessage>>>>,
    capacity: usize,
}

impl ConversationMemory {
    pub fn new(capacity: usize, max_conversations: u64, idle_ttl: Duration) -> Self {
        Self {
            entries: Cache::builder()
                .max_capacity(max_conversations)
                .time_to_idle(idle_ttl)
                .build(),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn buffer(&self, key: &str) -> Arc<Mutex<VecDeque<ChatMessage>>> {
        self.entries
            .get_with(key.to_string(), || Arc::new(Mutex::new(VecDeque::new())))
    }

    pub fn append(&self, key: &str, message: ChatMessage) {
        self.append_many(key, std::iter::once(message));
    }

    pub fn append_many(&self, key: &str, messages: impl IntoIterator<Item = ChatMessage>) {
        let buffer = self.buffer(key);
        let mut guard = buffer.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        for message in messages {
            if guard.len() == self.capacity {
                guard.pop_front();
            }
            guard.push_back(message);
        }
    }

    /// Oldest first.
    pub fn history(&self, key: &str) -> Vec<ChatMessage> {
        match self.entries.get(key) {
            Some(buffer) => {
                let guard = buffer.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                guard.iter().cloned().collect()
            }
            None => Vec::new(),
        }
    }

    pub fn clear(&self, key: &str) {
        self.entries.invalidate(key);
    }
}

impl Default for ConversationMemory {
    fn default() -> Self {
        Self::new(DEFAULT_MEMORY_CAPACITY, 1_000, Duration::from_secs(30 * 60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keeps_only_the_most_recent_messages() {
        let memory = ConversationMemory::new(3, 10, Duration::from_secs(60));
        for i in 0..5 {
            memory.append("conv", ChatMessage::user(format!("m{i}")));
        }
        let contents: Vec<String> = memory.history("conv").into_iter().map(|m| m.content).collect();
        assert_eq!(contents, vec!["m2", "m3", "m4"]);
    }

    #[test]
    fn test_default_capacity_is_twenty() {
        let memory = ConversationMemory::default();
        assert_eq!(memory.capacity(), DEFAULT_MEMORY_CAPACITY);
        memory.append_many("conv", (0..25).map(|i| ChatMessage::assistant(i.to_string())));
        let history = memory.history("conv");
        assert_eq!(history.len(), 20);
        assert_eq!(history[0].content, "5");
    }

    #[test]
    fn test_keys_are_isolated_and_clearable() {
        let memory = ConversationMemory::default();
        memory.append("a", ChatMessage::user("for a"));
        memory.append("b", ChatMessage::user("for b"));
        assert_eq!(memory.history("a").len(), 1);

        memory.clear("a");
        assert!(memory.history("a").is_empty());
        assert_eq!(memory.history("b")[0].content, "for b");
        assert!(memory.history("never-seen").is_empty());
    }

    #[test]
    fn test_clones_share_state() {
        let memory = ConversationMemory::default();
        let handle = memory.clone();
        handle.append("k", ChatMessage::user("x"));
        assert_eq!(memory.history("k").len(), 1);
    }
}
