//! # Conversation History
//!
//! Append-only log of one call's conversation. It is owned by the session actor,
//! so it is only ever mutated from the actor's single thread of control.
//!
//! ## Invariants:
//! - The first entry is always the system prompt.
//! - Entries are only appended, never edited or removed.
//! - Snapshots are owned copies: a request already handed to the generator cannot
//!   change when the live history grows.

use serde::{Deserialize, Serialize};

/// Author of a history entry.
///
/// ## Rust Concepts:
/// - **`Copy`**: a fieldless enum is copied like an integer, no `.clone()` needed
/// - **`rename_all = "lowercase"`**: serializes as `"user"`, `"assistant"`, ...
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One entry of the conversation. Serializes to the chat-completions message shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConversationHistory {
    entries: Vec<ChatMessage>,
}

impl ConversationHistory {
    /// Start a conversation with the given system prompt.
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            entries: vec![ChatMessage::new(Role::System, system_prompt)],
        }
    }

    pub fn append_user(&mut self, text: impl Into<String>) {
        self.entries.push(ChatMessage::new(Role::User, text));
    }

    /// Record a completed response. Interrupted responses never reach this.
    pub fn append_assistant(&mut self, text: impl Into<String>) {
        self.entries.push(ChatMessage::new(Role::Assistant, text));
    }

    /// Owned copy of every entry, in order.
    pub fn snapshot(&self) -> Vec<ChatMessage> {
        self.entries.clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_with_system_entry() {
        let history = ConversationHistory::new("You are a helpful assistant.");
        assert_eq!(
            history.snapshot(),
            vec![ChatMessage::new(Role::System, "You are a helpful assistant.")]
        );
    }

    #[test]
    fn test_appends_keep_order() {
        let mut history = ConversationHistory::new("sys");
        history.append_user("Hello");
        history.append_assistant("Hi there");
        history.append_user("Bye");

        let roles: Vec<Role> = history.snapshot().iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant, Role::User]);
        assert_eq!(
            history.snapshot().last().map(|m| m.content.clone()),
            Some("Bye".to_string())
        );
    }

    #[test]
    fn test_snapshot_is_detached() {
        let mut history = ConversationHistory::new("sys");
        history.append_user("Hello");
        let snapshot = history.snapshot();

        history.append_assistant("Hi");
        assert_eq!(snapshot.len(), 2);
        assert_eq!(history.len(), 3);
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let json = serde_json::to_string(&ChatMessage::new(Role::Assistant, "ok")).unwrap();
        assert_eq!(json, r#"{"role":"assistant","content":"ok"}"#);
    }
}
