//! Conversation session state
//!
//! The session is an owned value. Every transition consumes it and returns the
//! next state, so the orchestrator publishes whole snapshots and never exposes
//! a half-applied change.

use serde::{Deserialize, Serialize};

/// Who authored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The person using the client
    User,
    /// The remote assistant
    Assistant,
}

impl Role {
    /// Lowercase wire name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One message in the conversation history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationMessage {
    /// Author
    pub role: Role,
    /// Message text
    pub content: String,
}

impl ConversationMessage {
    /// Message authored by the user
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Message authored by the assistant
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A submitted user turn awaiting the query service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTurn {
    /// Trimmed user text
    pub query: String,
    /// History as it stood before the user message was appended
    pub history: Vec<ConversationMessage>,
}

/// Conversation history plus the busy flag
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationSession {
    history: Vec<ConversationMessage>,
    busy: bool,
}

impl ConversationSession {
    /// Empty, idle session
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages so far, oldest first
    #[must_use]
    pub fn history(&self) -> &[ConversationMessage] {
        &self.history
    }

    /// Whether a turn is in flight
    #[must_use]
    pub const fn is_busy(&self) -> bool {
        self.busy
    }

    /// Append the user's message and hand back the turn to dispatch
    ///
    /// Blank text is ignored and yields no turn.
    #[must_use]
    pub fn submit(mut self, text: &str) -> (Self, Option<PendingTurn>) {
        let query = text.trim();
        if query.is_empty() {
            return (self, None);
        }

        let turn = PendingTurn {
            query: query.to_string(),
            history: self.history.clone(),
        };
        self.history.push(ConversationMessage::user(query));
        (self, Some(turn))
    }

    /// Append the assistant's answer
    #[must_use]
    pub fn respond(mut self, text: impl Into<String>) -> Self {
        self.history.push(ConversationMessage::assistant(text));
        self
    }

    /// Set or clear the busy flag
    #[must_use]
    pub const fn set_busy(mut self, busy: bool) -> Self {
        self.busy = busy;
        self
    }

    /// Clear the history
    #[must_use]
    pub fn reset(mut self) -> Self {
        self.history.clear();
        self
    }
}
