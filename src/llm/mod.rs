//! Generation transport for guided-chat.
//!
//! The engine talks to the generative-AI service through one narrow seam:
//! ordered `{role, content}` turns plus workflow metadata in, plain text
//! out. Failures are either quota-exceeded or generic; see
//! [`is_quota_exceeded`].

pub mod http;

pub use http::{HttpTransport, TransportConfig};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::TransportError;

/// Message role as seen by the generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

/// One turn of generator input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Metadata sent alongside every generation call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestMetadata {
    pub mode: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_definition_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_instance_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_step_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launch_context_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paywall_source: Option<String>,
}

/// A complete generation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub turns: Vec<ChatTurn>,
    pub metadata: RequestMetadata,
}

impl GenerationRequest {
    pub fn new(turns: Vec<ChatTurn>, metadata: RequestMetadata) -> Self {
        Self { turns, metadata }
    }
}

/// Transport to the generative-AI service.
#[async_trait]
pub trait GenerationTransport: Send + Sync {
    /// Short name used in logs and errors.
    fn name(&self) -> &str;

    /// Run one generation and return the raw reply text.
    async fn generate(&self, request: GenerationRequest) -> Result<String, TransportError>;
}

/// Message fragments that mark an upstream failure as quota exhaustion when
/// the service did not flag it explicitly.
const QUOTA_MESSAGE_MARKERS: &[&str] = &[
    "quota exceeded",
    "quota_exceeded",
    "generation limit reached",
    "out of credits",
    "insufficient credits",
];

/// Whether a transport failure means the user has run out of generations.
pub fn is_quota_exceeded(err: &TransportError) -> bool {
    if matches!(err, TransportError::QuotaExceeded { .. }) {
        return true;
    }
    let message = err.to_string().to_lowercase();
    QUOTA_MESSAGE_MARKERS
        .iter()
        .any(|marker| message.contains(marker))
}
