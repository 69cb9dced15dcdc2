//! Error types for matchops

use std::time::Duration;

use thiserror::Error;

use crate::deploy::fsm::DeploymentStage;
use crate::models::deployment::Environment;
use crate::security::pipeline::ValidationReport;

/// Main error type for the service
#[derive(Error, Debug)]
pub enum OpsError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Deploy(#[from] DeployError),

    #[error(transparent)]
    Security(#[from] SecurityError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for OpsError {
    fn from(err: anyhow::Error) -> Self {
        OpsError::Internal(err.to_string())
    }
}

/// Tagged failure of a `deploy()` call
///
/// Callers match on the variant instead of parsing messages.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeployError {
    /// Preconditions did not hold; nothing was mutated
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    /// A stage after validation failed
    #[error("{stage} stage failed: {detail}")]
    StageFailed {
        stage: DeploymentStage,
        detail: String,
    },

    /// Verification failed and the rollback did not restore a healthy state
    #[error("Rollback failed: {detail} (original failure: {cause})")]
    RollbackFailed { cause: String, detail: String },

    /// Another deployment holds the environment lock
    #[error("Deployment already in progress for {0}")]
    InProgress(Environment),

    /// The audit trail could not be written
    #[error("Deployment log error: {0}")]
    LogStore(String),
}

/// Aggregated failure of the request security pipeline
#[derive(Error, Debug)]
pub enum SecurityError {
    #[error("Security validation failed: {}", .reasons.join("; "))]
    ValidationFailed {
        reasons: Vec<String>,
        report: ValidationReport,
    },

    #[error("Security store error: {0}")]
    Store(String),
}

/// Failure of a child process
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("failed to start `{program}`: {reason}")]
    Spawn { program: String, reason: String },

    #[error("`{program}` timed out after {timeout:?}")]
    Timeout { program: String, timeout: Duration },

    #[error("`{program}` exited with code {code:?}: {stderr}")]
    NonZeroExit {
        program: String,
        code: Option<i32>,
        stderr: String,
    },
}
