//! Error types for the planner agent.

use std::time::Duration;

use uuid::Uuid;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Language-model service errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} timed out after {timeout:?}")]
    Timeout { provider: String, timeout: Duration },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },
}

/// Failures reported by a worker while executing a job.
///
/// Only `Transient` failures are retried by the processor.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkerError {
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("permanent failure: {0}")]
    Permanent(String),
}

impl WorkerError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<DatabaseError> for WorkerError {
    fn from(e: DatabaseError) -> Self {
        match e {
            DatabaseError::Constraint(_) | DatabaseError::Serialization(_) => {
                Self::Permanent(e.to_string())
            }
            other => Self::Transient(other.to_string()),
        }
    }
}

impl From<LlmError> for WorkerError {
    fn from(e: LlmError) -> Self {
        Self::Transient(e.to_string())
    }
}

/// Request validation errors surfaced by the orchestrator (HTTP 400).
#[derive(Debug, thiserror::Error)]
pub enum InteractError {
    #[error("Input must not be empty")]
    EmptyInput,

    #[error("Input too long: {length} > {max} characters")]
    InputTooLong { length: usize, max: usize },

    #[error("Invalid thread id: {0}")]
    InvalidThreadId(String),

    #[error("Thread {0} not found")]
    ThreadNotFound(Uuid),
}
