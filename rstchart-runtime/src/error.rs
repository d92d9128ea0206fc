//! Runtime error types.

use crate::config::ConfigError;
use crate::loader::LoadError;
use thiserror::Error;

/// Runtime errors.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("core error: {0}")]
    Core(#[from] rstchart_core::CoreError),

    #[error("invalid chart: {0}")]
    Model(#[from] rstchart_core::model::ModelError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("storage error: {0}")]
    Storage(#[from] rstchart_storage::StorageError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("unknown chart: {0}")]
    UnknownChart(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("session already exists: {0}")]
    SessionExists(String),

    #[error("session queue closed: {0}")]
    QueueClosed(String),

    #[error("session queue full: {0}")]
    QueueFull(String),

    #[error("session task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("runtime shutting down")]
    ShuttingDown,
}

impl RuntimeError {
    /// Returns an error code suitable for reporting.
    pub fn error_code(&self) -> &'static str {
        match self {
            RuntimeError::Core(e) => e.error_code(),
            RuntimeError::Model(e) => e.error_code(),
            RuntimeError::Load(e) => e.error_code(),
            RuntimeError::Storage(e) => e.error_code(),
            RuntimeError::Config(_) => "CONFIG_ERROR",
            RuntimeError::UnknownChart(_) => "CHART_NOT_FOUND",
            RuntimeError::SessionNotFound(_) => "SESSION_NOT_FOUND",
            RuntimeError::SessionExists(_) => "SESSION_EXISTS",
            RuntimeError::QueueClosed(_) => "QUEUE_CLOSED",
            RuntimeError::QueueFull(_) => "QUEUE_FULL",
            RuntimeError::Join(_) => "INTERNAL_ERROR",
            RuntimeError::ShuttingDown => "SHUTTING_DOWN",
        }
    }

    /// Returns whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            RuntimeError::QueueFull(_) => true,
            RuntimeError::Storage(e) => e.is_retryable(),
            _ => false,
        }
    }
}
