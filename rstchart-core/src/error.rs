//! Core error types.

use rstchart_model::ModelError;
use thiserror::Error;

/// Errors returned by the interpreter's public entry points.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid chart: {0}")]
    Model(#[from] ModelError),

    #[error("unknown data model: {kind}")]
    UnknownDataModel { kind: String },

    #[error("interpreter not initialized")]
    NotInitialized,

    #[error("interpreter already started")]
    AlreadyStarted,

    #[error("interpreter terminated")]
    Terminated,

    #[error("checkpoint belongs to chart '{chart}' with checksum {actual}, expected {expected}")]
    ChecksumMismatch {
        chart: String,
        expected: String,
        actual: String,
    },

    #[error("invalid checkpoint: {reason}")]
    InvalidCursor { reason: String },

    #[error("data model error: {0}")]
    Eval(#[from] EvalError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    /// Returns whether this error indicates the operation can be retried.
    pub fn is_retryable(&self) -> bool {
        false
    }

    /// Returns an error code suitable for reporting.
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::Model(e) => e.error_code(),
            CoreError::UnknownDataModel { .. } => "UNKNOWN_DATAMODEL",
            CoreError::NotInitialized => "NOT_INITIALIZED",
            CoreError::AlreadyStarted => "ALREADY_STARTED",
            CoreError::Terminated => "TERMINATED",
            CoreError::ChecksumMismatch { .. } => "CHECKSUM_MISMATCH",
            CoreError::InvalidCursor { .. } => "INVALID_CHECKPOINT",
            CoreError::Eval(_) => "EXECUTION_ERROR",
            CoreError::Json(_) => "BAD_REQUEST",
        }
    }
}

/// Failure of a data model call. Raised to the chart as `error.execution`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("syntax error in '{expr}': {reason}")]
    Syntax { expr: String, reason: String },

    #[error("'{name}' is not defined")]
    Undefined { name: String },

    #[error("type error: {reason}")]
    Type { reason: String },

    #[error("'{name}' is read-only")]
    ReadOnly { name: String },

    #[error("not supported by the {datamodel} data model: {what}")]
    Unsupported { datamodel: String, what: String },

    #[error("{reason}")]
    Invalid { reason: String },
}

impl EvalError {
    /// Short classification placed in the `error.execution` payload.
    pub fn kind(&self) -> &'static str {
        match self {
            EvalError::Syntax { .. } => "syntax",
            EvalError::Undefined { .. } => "undefined",
            EvalError::Type { .. } => "type",
            EvalError::ReadOnly { .. } => "read_only",
            EvalError::Unsupported { .. } => "unsupported",
            EvalError::Invalid { .. } => "invalid",
        }
    }

    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        EvalError::Invalid {
            reason: reason.into(),
        }
    }

    pub(crate) fn type_error(reason: impl Into<String>) -> Self {
        EvalError::Type {
            reason: reason.into(),
        }
    }
}

/// Failure to deliver an event. Raised to the chart as `error.communication`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DispatchError {
    #[error("target unreachable: {target}")]
    Unreachable { target: String },

    #[error("unsupported event processor type: {send_type}")]
    UnsupportedType { send_type: String },

    #[error("target queue closed: {target}")]
    Closed { target: String },

    #[error("target queue full: {target}")]
    QueueFull { target: String },

    #[error("timer service unavailable: {reason}")]
    Timer { reason: String },
}

impl DispatchError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DispatchError::Timer { .. } | DispatchError::QueueFull { .. }
        )
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            DispatchError::Unreachable { .. } => "TARGET_UNREACHABLE",
            DispatchError::UnsupportedType { .. } => "UNSUPPORTED_TYPE",
            DispatchError::Closed { .. } => "TARGET_CLOSED",
            DispatchError::QueueFull { .. } => "QUEUE_FULL",
            DispatchError::Timer { .. } => "TIMER_UNAVAILABLE",
        }
    }
}

/// Failure reported by an invoke activator or an invoked service.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvokeError {
    #[error("unsupported invoke type: {invoke_type}")]
    UnsupportedType { invoke_type: String },

    #[error("invoke source not found: {src}")]
    SourceNotFound { src: String },

    #[error("failed to start invoked service: {reason}")]
    Start { reason: String },

    #[error("invoked service is gone: {invoke_id}")]
    Gone { invoke_id: String },
}

impl InvokeError {
    pub fn error_code(&self) -> &'static str {
        match self {
            InvokeError::UnsupportedType { .. } => "UNSUPPORTED_TYPE",
            InvokeError::SourceNotFound { .. } => "SOURCE_NOT_FOUND",
            InvokeError::Start { .. } => "INVOKE_FAILED",
            InvokeError::Gone { .. } => "INVOKE_GONE",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(CoreError::NotInitialized.error_code(), "NOT_INITIALIZED");
        assert_eq!(
            CoreError::Model(ModelError::EmptyChart).error_code(),
            "EMPTY_CHART"
        );
        assert_eq!(
            DispatchError::Unreachable {
                target: "#_scxml_x".into()
            }
            .error_code(),
            "TARGET_UNREACHABLE"
        );
    }

    #[test]
    fn test_eval_error_kind() {
        let err = EvalError::Undefined { name: "x".into() };
        assert_eq!(err.kind(), "undefined");
        assert_eq!(err.to_string(), "'x' is not defined");
    }
}
