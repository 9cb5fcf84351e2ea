//! Error types for Harbor
//!
//! Every component fails with [`Error`]; only the command dispatcher turns an
//! error into a `success: false` result record.

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Harbor error type
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Request validation
    // ========================================================================
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Resource already exists: {0}")]
    AlreadyExists(String),

    #[error("Resource registry at capacity ({0} resources)")]
    CapacityExceeded(usize),

    // ========================================================================
    // Security
    // ========================================================================
    #[error("Security violation: {}", .0.join("; "))]
    SecurityViolation(Vec<String>),

    // ========================================================================
    // Resource lifecycle
    // ========================================================================
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("Cannot {operation} '{name}': resource is {state}")]
    StateConflict {
        name: String,
        state: String,
        operation: String,
    },

    // ========================================================================
    // External process invocation
    // ========================================================================
    #[error("{program} exited with code {exit_code}: {stderr}")]
    ExternalRuntime {
        program: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("{program} timed out after {timeout_ms}ms")]
    Timeout { program: String, timeout_ms: u64 },

    // ========================================================================
    // Checkpoint broker
    // ========================================================================
    #[error("Checkpoint task not found: {0}")]
    CheckpointNotFound(String),

    // ========================================================================
    // Configuration
    // ========================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    // ========================================================================
    // External error conversions
    // ========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable tag reported as `errorKind` in result records
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Validation(_) | Error::AlreadyExists(_) | Error::CapacityExceeded(_) => {
                "validation_error"
            }
            Error::SecurityViolation(_) => "security_violation",
            Error::ResourceNotFound(_) => "resource_not_found",
            Error::StateConflict { .. } => "state_conflict",
            Error::ExternalRuntime { .. } => "external_runtime_error",
            Error::Transport(_) | Error::Timeout { .. } => "transport_error",
            Error::CheckpointNotFound(_) => "checkpoint_not_found",
            Error::Config(_) => "config_error",
            Error::Io(_) | Error::Json(_) | Error::Internal(_) => "internal_error",
        }
    }

    /// Whether retrying the same operation may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Timeout { .. } | Error::Transport(_))
    }

    /// Whether the message is meaningful to the caller as-is
    pub fn is_user_facing(&self) -> bool {
        !matches!(self, Error::Io(_) | Error::Json(_) | Error::Internal(_))
    }

    /// True for a deadline expiry of an external invocation
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }

    pub fn state_conflict(
        name: impl Into<String>,
        state: impl std::fmt::Display,
        operation: impl Into<String>,
    ) -> Self {
        Error::StateConflict {
            name: name.into(),
            state: state.to_string(),
            operation: operation.into(),
        }
    }

    pub fn external(program: impl Into<String>, exit_code: i32, stderr: impl Into<String>) -> Self {
        Error::ExternalRuntime {
            program: program.into(),
            exit_code,
            stderr: stderr.into(),
        }
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Internal(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Internal(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(Error::Validation("x".into()).kind(), "validation_error");
        assert_eq!(
            Error::state_conflict("a", "running", "start").kind(),
            "state_conflict"
        );
        assert_eq!(
            Error::Timeout {
                program: "docker".into(),
                timeout_ms: 10
            }
            .kind(),
            "transport_error"
        );
        assert_eq!(Error::external("docker", 1, "boom").kind(), "external_runtime_error");
    }

    #[test]
    fn test_messages() {
        let err = Error::state_conflict("web", "running", "start");
        assert_eq!(err.to_string(), "Cannot start 'web': resource is running");

        let err = Error::SecurityViolation(vec!["a".into(), "b".into()]);
        assert_eq!(err.to_string(), "Security violation: a; b");
    }

    #[test]
    fn test_retryable() {
        assert!(Error::Transport("spawn".into()).is_retryable());
        assert!(!Error::ResourceNotFound("x".into()).is_retryable());
        assert!(!Error::Internal("x".into()).is_user_facing());
    }
}
