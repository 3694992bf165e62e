//! Splits a raw conversation transcript into resolved discussions.
//!
//! A discussion accumulates every non-blank text message until a
//! `state:resolved` event closes it. Resolution events with nothing
//! accumulated are ignored, so no discussion is ever empty.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::transcript::{Actor, Message};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscussionMessage {
    pub from: Actor,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discussion {
    /// Closing timestamp (milliseconds).
    pub timestamp: i64,
    pub messages: Vec<DiscussionMessage>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentedConversation {
    pub session_id: String,
    pub discussions: Vec<Discussion>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SegmenterOptions {
    /// Emit a still-open discussion at end of stream, closed at its last
    /// message's timestamp. When false it is dropped.
    pub flush_trailing_open_discussion: bool,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SegmentError {
    #[error("cannot segment an empty transcript")]
    EmptyInput,
}

struct OpenDiscussion {
    messages: Vec<DiscussionMessage>,
    last_timestamp: i64,
}

pub fn segment(
    messages: &[Message],
    options: SegmenterOptions,
) -> Result<SegmentedConversation, SegmentError> {
    let first = messages.first().ok_or(SegmentError::EmptyInput)?;
    let session_id = first.session_id.clone();

    let mut discussions = Vec::new();
    let mut current: Option<OpenDiscussion> = None;

    for message in messages {
        if let Some(text) = message.text() {
            let open = current.get_or_insert_with(|| OpenDiscussion {
                messages: Vec::new(),
                last_timestamp: message.timestamp,
            });
            open.messages.push(DiscussionMessage {
                from: message.from,
                content: text.to_string(),
            });
            open.last_timestamp = message.timestamp;
        } else if message.is_resolution_event() {
            if let Some(open) = current.take() {
                if !open.messages.is_empty() {
                    discussions.push(Discussion {
                        timestamp: message.timestamp,
                        messages: open.messages,
                    });
                }
            }
        }
    }

    if options.flush_trailing_open_discussion {
        if let Some(open) = current.take().filter(|open| !open.messages.is_empty()) {
            discussions.push(Discussion {
                timestamp: open.last_timestamp,
                messages: open.messages,
            });
        }
    }

    Ok(SegmentedConversation {
        session_id,
        discussions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcript::{EventContent, MessageContent, MessageType};
    use proptest::prelude::*;

    fn text(from: Actor, content: &str, ts: i64) -> Message {
        Message {
            session_id: "session_1".into(),
            website_id: None,
            kind: MessageType::Text,
            from,
            content: MessageContent::Text(content.into()),
            timestamp: ts,
            user: None,
        }
    }

    fn resolved(ts: i64) -> Message {
        Message {
            session_id: "session_1".into(),
            website_id: None,
            kind: MessageType::Event,
            from: Actor::Operator,
            content: MessageContent::Event(EventContent {
                namespace: "state:resolved".into(),
                text: None,
            }),
            timestamp: ts,
            user: None,
        }
    }

    fn file(ts: i64) -> Message {
        Message {
            session_id: "session_1".into(),
            website_id: None,
            kind: MessageType::File,
            from: Actor::User,
            content: MessageContent::Other(serde_json::json!({ "name": "a.pdf" })),
            timestamp: ts,
            user: None,
        }
    }

    #[test]
    fn test_empty_input_fails() {
        assert_eq!(
            segment(&[], SegmenterOptions::default()),
            Err(SegmentError::EmptyInput)
        );
    }

    #[test]
    fn test_resolution_closes_discussion_with_event_timestamp() {
        let stream = vec![
            text(Actor::User, "Je n'arrive pas à me connecter.", 1),
            text(Actor::Operator, "Voyons le message d'erreur.", 2),
            resolved(10),
            text(Actor::User, "Autre question", 11),
            resolved(20),
        ];
        let out = segment(&stream, SegmenterOptions::default()).unwrap();
        assert_eq!(out.session_id, "session_1");
        assert_eq!(out.discussions.len(), 2);
        assert_eq!(out.discussions[0].timestamp, 10);
        assert_eq!(out.discussions[0].messages.len(), 2);
        assert_eq!(out.discussions[0].messages[1].from, Actor::Operator);
        assert_eq!(out.discussions[1].timestamp, 20);
    }

    #[test]
    fn test_blank_text_and_attachments_are_ignored() {
        let stream = vec![
            resolved(1),
            text(Actor::User, "   ", 2),
            file(3),
            resolved(4),
            text(Actor::User, "Question", 5),
            file(6),
            resolved(7),
        ];
        let out = segment(&stream, SegmenterOptions::default()).unwrap();
        assert_eq!(out.discussions.len(), 1);
        assert_eq!(out.discussions[0].messages.len(), 1);
        assert_eq!(out.discussions[0].timestamp, 7);
    }

    #[test]
    fn test_trailing_open_discussion_follows_flush_policy() {
        let stream = vec![
            text(Actor::User, "Première", 1),
            resolved(2),
            text(Actor::User, "Encore ouverte", 3),
            text(Actor::Operator, "Je regarde", 4),
        ];

        let dropped = segment(&stream, SegmenterOptions::default()).unwrap();
        assert_eq!(dropped.discussions.len(), 1);

        let flushed = segment(
            &stream,
            SegmenterOptions {
                flush_trailing_open_discussion: true,
            },
        )
        .unwrap();
        assert_eq!(flushed.discussions.len(), 2);
        assert_eq!(flushed.discussions[1].timestamp, 4);
        assert_eq!(flushed.discussions[1].messages.len(), 2);
    }

    fn arb_stream() -> impl Strategy<Value = Vec<Message>> {
        prop::collection::vec((0u8..4, "[a-z ]{0,6}"), 1..40).prop_map(|items| {
            items
                .into_iter()
                .enumerate()
                .map(|(i, (kind, body))| {
                    let ts = i as i64;
                    match kind {
                        0 | 1 => text(Actor::User, &body, ts),
                        2 => resolved(ts),
                        _ => file(ts),
                    }
                })
                .collect()
        })
    }

    proptest! {
        #[test]
        fn prop_never_emits_empty_discussions(stream in arb_stream(), flush in any::<bool>()) {
            let out = segment(&stream, SegmenterOptions { flush_trailing_open_discussion: flush }).unwrap();
            for discussion in &out.discussions {
                prop_assert!(!discussion.messages.is_empty());
            }
        }

        #[test]
        fn prop_unresolved_tail_is_dropped_without_flush(stream in arb_stream()) {
            let out = segment(&stream, SegmenterOptions::default()).unwrap();
            let last_resolution = stream.iter().rposition(|m| m.is_resolution_event());
            let expected = match last_resolution {
                Some(idx) => stream[..idx].iter().filter(|m| m.text().is_some()).count(),
                None => 0,
            };
            let emitted: usize = out.discussions.iter().map(|d| d.messages.len()).sum();
            prop_assert_eq!(emitted, expected);
        }

        #[test]
        fn prop_flush_keeps_every_text_message(stream in arb_stream()) {
            let out = segment(&stream, SegmenterOptions { flush_trailing_open_discussion: true }).unwrap();
            let expected = stream.iter().filter(|m| m.text().is_some()).count();
            let emitted: usize = out.discussions.iter().map(|d| d.messages.len()).sum();
            prop_assert_eq!(emitted, expected);
        }
    }
}
