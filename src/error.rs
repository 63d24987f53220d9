//! Error types for guided-chat.

use std::time::Duration;

/// Top-level error type for the engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Draft error: {0}")]
    Draft(#[from] DraftError),

    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Errors from the generative-AI transport.
///
/// The orchestrator only distinguishes `QuotaExceeded` (explicitly flagged
/// upstream, or recognised by message) from everything else.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Generation quota exceeded: {message}")]
    QuotaExceeded { message: String },

    #[error("Transport {transport} request failed: {reason}")]
    RequestFailed { transport: String, reason: String },

    #[error("Invalid response from {transport}: {reason}")]
    InvalidResponse { transport: String, reason: String },

    #[error("Transport {transport} timed out after {timeout:?}")]
    Timeout { transport: String, timeout: Duration },

    #[error("HTTP error: {0}")]
    Http(String),
}

/// Draft storage errors.
#[derive(Debug, thiserror::Error)]
pub enum DraftError {
    #[error("Failed to open draft store: {0}")]
    Open(String),

    #[error("Draft query failed: {0}")]
    Query(String),

    #[error("Draft serialization error: {0}")]
    Serialization(String),
}

/// Host-facing workflow errors (session level only; transitions never fail).
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("Unknown workflow mode: {0}")]
    UnknownMode(String),

    #[error("No workflow is active")]
    NotActive,
}

/// Result type alias for the engine.
pub type Result<T> = std::result::Result<T, Error>;
