//! # Call Sessions
//!
//! Everything that makes up one live call:
//!
//! - **history**: the append-only conversation log
//! - **cancel**: the per-turn cancellation latch
//! - **barge_in**: decides when caller audio interrupts a response
//! - **pipeline**: generator → synthesizer → transport for one turn
//! - **actor**: the session itself, an actix actor that owns all mutable session state
//! - **registry**: creates, routes to, and ends sessions
//!
//! ## Concurrency Model:
//! Each session's state lives inside its actor and is only touched from the actor's
//! mailbox. Recognizer events, caller audio, and turn results are all delivered as
//! messages, so they are handled one at a time and never race each other. A turn
//! runs as a separate tokio task and only reports back through a message.
//!
//! ## Rust Concepts Used:
//! - **Newtype pattern**: `SessionId(String)` is its own type, so a session id can't
//!   be mixed up with any other string
//! - **`#[serde(transparent)]`**: the newtype serializes as the bare string
//! - **`#[cfg(test)] pub mod testing`**: fake collaborators compiled only for tests

pub mod actor;
pub mod barge_in;
pub mod cancel;
pub mod history;
pub mod pipeline;
pub mod registry;

#[cfg(test)]
pub mod testing;

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub use registry::{SessionRegistry, SessionSettings};

/// Opaque, unique identifier of a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_ids_are_unique() {
        let a = SessionId::new();
        let b = SessionId::new();
        assert_ne!(a, b);
        assert!(Uuid::parse_str(a.as_str()).is_ok());
    }

    #[test]
    fn test_serializes_as_plain_string() {
        let id = SessionId::from("abc");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"abc\"");
        assert_eq!(id.to_string(), "abc");
    }
}
