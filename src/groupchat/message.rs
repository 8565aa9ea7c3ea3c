//! Messages exchanged in a group chat.
//!
//! A [`ChatMessage`] is created exactly once, either by the caller (the seed task) or by the
//! orchestrator wrapping an agent's reply, and is never mutated after it has been appended to
//! a [`ChatHistory`](crate::groupchat::history::ChatHistory).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Author name used for the seed message supplied by the caller.
pub const SEED_AUTHOR: &str = "user";

/// Metadata key under which the orchestrator records the turn that produced a message.
pub const TURN_METADATA_KEY: &str = "turn";

/// Conversational role of a message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructions injected by the orchestration layer.
    System,
    /// Input supplied by a human or the calling application.
    User,
    /// Output produced by an agent.
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single entry in the shared conversation log.
///
/// Content is stored as `Arc<str>` so snapshots and subscribers can clone messages without
/// copying the text.
///
/// # Examples
///
/// ```
/// use groupchat::message::{ChatMessage, Role};
///
/// let msg = ChatMessage::from_agent(2, "Reviewer", "Looks good.")
///     .with_metadata("turn", "1");
///
/// assert_eq!(msg.sequence, 2);
/// assert_eq!(msg.role, Role::Assistant);
/// assert_eq!(msg.metadata.get("turn").map(String::as_str), Some("1"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Position in the history, starting at 1 for the seed.
    pub sequence: u64,
    /// Name of the agent (or [`SEED_AUTHOR`]) that produced the message.
    pub author: String,
    pub role: Role,
    pub content: Arc<str>,
    /// When the message was created.
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl ChatMessage {
    pub fn new(
        sequence: u64,
        author: impl Into<String>,
        role: Role,
        content: impl Into<Arc<str>>,
    ) -> Self {
        Self {
            sequence,
            author: author.into(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    /// The caller-supplied task that opens a conversation.
    pub fn seed(sequence: u64, content: impl Into<Arc<str>>) -> Self {
        Self::new(sequence, SEED_AUTHOR, Role::User, content)
    }

    /// A reply produced by the named agent.
    pub fn from_agent(sequence: u64, agent: impl Into<String>, content: impl Into<Arc<str>>) -> Self {
        Self::new(sequence, agent, Role::Assistant, content)
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn is_authored_by(&self, author: &str) -> bool {
        self.author == author
    }

    /// The turn that produced this message, if the orchestrator recorded one.
    pub fn turn(&self) -> Option<usize> {
        self.metadata
            .get(TURN_METADATA_KEY)
            .and_then(|t| t.parse().ok())
    }
}

/// Returns true when `text` contains at least one complete fenced code block.
pub fn has_fenced_code_block(text: &str) -> bool {
    text.matches("```").count() >= 2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_serialize_lowercase() {
        let msg = ChatMessage::seed(1, "Write a guide");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "user");
        assert_eq!(json["author"], SEED_AUTHOR);
        assert!(json.get("metadata").is_none());
    }

    #[test]
    fn fenced_code_block_needs_opening_and_closing_fence() {
        assert!(has_fenced_code_block("Here:\n```rust\nfn main() {}\n```"));
        assert!(!has_fenced_code_block("Unclosed ```rust fence"));
        assert!(!has_fenced_code_block("plain prose"));
    }

    #[test]
    fn turn_metadata_parses() {
        let msg = ChatMessage::from_agent(3, "A", "hi").with_metadata(TURN_METADATA_KEY, "2");
        assert_eq!(msg.turn(), Some(2));
        assert_eq!(ChatMessage::seed(1, "x").turn(), None);
    }
}
