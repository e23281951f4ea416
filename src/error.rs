//! Error types for the study runner.

use std::time::Duration;

use serde::Serialize;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Record store error: {0}")]
    Record(#[from] RecordError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Retrieval error: {0}")]
    Retrieval(#[from] RetrievalError),

    #[error("Flow error: {0}")]
    Flow(#[from] FlowError),

    #[error("Chat error: {0}")]
    Chat(#[from] ChatError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Errors raised by a record store or the upsert recorder.
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("Record has no user_id; refusing to write")]
    MissingKey,

    #[error("Record store unavailable: {0}")]
    Unavailable(String),

    #[error("Record store rate limited")]
    RateLimited,

    #[error("Record store permission denied: {0}")]
    Permission(String),

    #[error("Record store query failed: {0}")]
    Query(String),

    #[error("Record store migration failed: {0}")]
    Migration(String),

    #[error("Row {row} out of range (sheet has {rows} rows)")]
    RowOutOfRange { row: usize, rows: usize },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl RecordError {
    /// Whether a retry has a reasonable chance of succeeding.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::RateLimited)
    }
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },
}

/// Document retrieval errors.
#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("Passage index not found at {path}; build the index before starting the study")]
    IndexMissing { path: String },

    #[error("Passage index is malformed: {0}")]
    Malformed(String),

    #[error("Search failed: {reason}")]
    SearchFailed { reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A single actionable validation problem, tied to one input field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldIssue {
    pub field: String,
    pub message: String,
}

impl FieldIssue {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Screen-flow errors. None of these mutate the session.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    #[error("Validation failed for {} field(s)", issues.len())]
    Validation { issues: Vec<FieldIssue> },

    #[error("Action {action} is not available on screen {screen}")]
    InvalidAction { screen: String, action: String },

    #[error("Conversation cannot end yet, {remaining:?} remaining")]
    ChatLocked { remaining: Duration },

    #[error("Session {0} not found")]
    SessionNotFound(uuid::Uuid),
}

impl FlowError {
    pub fn validation(issues: Vec<FieldIssue>) -> Self {
        Self::Validation { issues }
    }
}

/// Failure of a single chat turn (retrieval or generation).
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("Retrieval failed: {0}")]
    Retrieval(#[from] RetrievalError),

    #[error("Response generation failed: {0}")]
    Generation(#[from] LlmError),

    #[error("Response generation returned an empty reply")]
    EmptyReply,
}

/// Result type alias for the study runner.
pub type Result<T> = std::result::Result<T, Error>;
