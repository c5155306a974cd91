// src/error.rs
// Error types for the trigger engine

use thiserror::Error;

/// Broad failure classes. Every `TriggerError` maps onto exactly one of these,
/// which decides how the engine reacts to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Embedding provider, memory store or classifier host failed. A fallback is used.
    ExternalDependency,
    /// Malformed rule or option. Only raised while building the engine.
    Configuration,
    /// Input the engine refuses to evaluate (empty text, empty window).
    Validation,
    /// Retraining or threshold optimization failed. Current model/threshold stay.
    Learning,
}

/// Main error type for the trigger engine
#[derive(Error, Debug)]
pub enum TriggerError {
    #[error("embedding error: {0}")]
    Embedding(String),

    #[error("memory store error: {0}")]
    MemoryStore(String),

    #[error("classifier host error: {0}")]
    ClassifierHost(String),

    #[error("{service} timed out after {timeout_ms}ms")]
    Timeout {
        service: &'static str,
        timeout_ms: u64,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("learning error: {0}")]
    Learning(String),

    #[error("task cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid pattern: {0}")]
    Regex(#[from] regex::Error),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Convenience type alias for Result using TriggerError
pub type Result<T> = std::result::Result<T, TriggerError>;

impl TriggerError {
    /// Which failure class this error belongs to
    pub fn kind(&self) -> ErrorKind {
        match self {
            TriggerError::Embedding(_)
            | TriggerError::MemoryStore(_)
            | TriggerError::ClassifierHost(_)
            | TriggerError::Timeout { .. }
            | TriggerError::Http(_)
            | TriggerError::Cancelled
            | TriggerError::Anyhow(_) => ErrorKind::ExternalDependency,
            TriggerError::Config(_) | TriggerError::Toml(_) | TriggerError::Regex(_) => {
                ErrorKind::Configuration
            }
            TriggerError::InvalidInput(_) => ErrorKind::Validation,
            TriggerError::Learning(_) | TriggerError::Io(_) | TriggerError::Json(_) => {
                ErrorKind::Learning
            }
        }
    }

    /// True for failures that should be absorbed with a fallback value
    pub fn is_recoverable(&self) -> bool {
        !matches!(self.kind(), ErrorKind::Configuration)
    }
}

impl From<tokio::task::JoinError> for TriggerError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            TriggerError::Cancelled
        } else {
            TriggerError::Learning(err.to_string())
        }
    }
}

impl From<TriggerError> for String {
    fn from(err: TriggerError) -> Self {
        err.to_string()
    }
}
