//! Chat message types for the shared timeline.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::llm::{ChatTurn, Role};

/// One message in the transcript. System messages are hidden from display
/// but included in generator context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(id: impl Into<String>, role: Role, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(new_message_id("user"), Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(new_message_id("assistant"), Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(new_message_id("system"), Role::System, content)
    }

    pub fn is_visible(&self) -> bool {
        self.role != Role::System
    }

    pub fn to_turn(&self) -> ChatTurn {
        ChatTurn {
            role: self.role,
            content: self.content.clone(),
        }
    }
}

/// A visible timeline entry with its synthetic ordering index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimelineEntry {
    /// Monotonic insertion index (not wall-clock).
    pub index: u64,
    pub id: String,
    pub role: Role,
    pub content: String,
}

/// Generate a fresh message id with a role prefix.
pub fn new_message_id(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4())
}
