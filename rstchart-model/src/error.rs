//! Model error types.

use thiserror::Error;

/// Errors raised while building a chart. All of them are fatal: a chart that
/// fails to build never produces a session.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("chart has no states")]
    EmptyChart,

    #[error("duplicate state id: {id}")]
    DuplicateStateId { id: String },

    #[error("unresolved transition target '{target}' in state '{state}'")]
    UnresolvedTarget { state: String, target: String },

    #[error("invalid initial for state '{state}': {reason}")]
    InvalidInitial { state: String, reason: String },

    #[error("invalid history state '{state}': {reason}")]
    InvalidHistory { state: String, reason: String },

    #[error("invalid state '{state}': {reason}")]
    InvalidState { state: String, reason: String },

    #[error("invalid executable content: {reason}")]
    InvalidAction { reason: String },

    #[error("invalid delay '{value}'")]
    InvalidDelay { value: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl ModelError {
    /// Returns an error code suitable for reporting.
    pub fn error_code(&self) -> &'static str {
        match self {
            ModelError::EmptyChart => "EMPTY_CHART",
            ModelError::DuplicateStateId { .. } => "DUPLICATE_STATE",
            ModelError::UnresolvedTarget { .. } => "UNRESOLVED_TARGET",
            ModelError::InvalidInitial { .. } => "INVALID_INITIAL",
            ModelError::InvalidHistory { .. } => "INVALID_HISTORY",
            ModelError::InvalidState { .. } => "INVALID_STATE",
            ModelError::InvalidAction { .. } => "INVALID_ACTION",
            ModelError::InvalidDelay { .. } => "INVALID_DELAY",
            ModelError::Json(_) | ModelError::Yaml(_) => "BAD_REQUEST",
        }
    }
}
