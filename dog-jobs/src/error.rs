use std::time::Duration;
use thiserror::Error;

/// Result type for orchestration operations
pub type JobsResult<T> = Result<T, JobsError>;

/// Errors raised by the orchestration layer and its collaborators
#[derive(Error, Debug, Clone)]
pub enum JobsError {
    #[error("Job system is not configured")]
    NotConfigured,

    #[error("Job processing has already been started")]
    AlreadyProcessing,

    #[error("Unknown job: {0}")]
    UnknownJob(String),

    #[error("Failed to load job definitions: {0}")]
    DefinitionLoad(String),

    #[error("Invalid input for job {job}: {reason}")]
    InvalidInput { job: String, reason: String },

    #[error("No handler registered for job: {0}")]
    MissingHandler(String),

    #[error("Handler already registered for job: {0}")]
    DuplicateHandler(String),

    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    #[error("Lock is already held: {resource}")]
    LockContention { resource: String },

    #[error("Lock service error: {0}")]
    LockService(String),

    /// Never reported as an item outcome, only logged.
    #[error("Failed to release lock {resource}: {reason}")]
    LockRelease { resource: String, reason: String },

    #[error("Job handler failed: {0}")]
    Handler(#[from] JobError),

    #[error("Item exceeded its processing time of {0:?}")]
    ItemTimedOut(Duration),

    #[error("Failed to persist item: {0}")]
    Persistence(String),

    #[error("Worker shutdown")]
    WorkerShutdown,
}

impl JobsError {
    /// Whether the queue may schedule another attempt after this failure.
    ///
    /// Only handlers can veto a retry, by returning [`JobError::Permanent`].
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Handler(err) => err.is_retryable(),
            Self::UnknownJob(_) | Self::MissingHandler(_) => false,
            _ => true,
        }
    }
}

/// Error returned by job handlers
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    /// Retryable error - the queue may try again if attempts remain
    #[error("Retryable error: {0}")]
    Retryable(String),

    /// Permanent error - fail immediately, no retry
    #[error("Permanent error: {0}")]
    Permanent(String),
}

impl JobError {
    /// Create a retryable error
    pub fn retryable(msg: impl Into<String>) -> Self {
        Self::Retryable(msg.into())
    }

    /// Create a permanent error
    pub fn permanent(msg: impl Into<String>) -> Self {
        Self::Permanent(msg.into())
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }

    /// Get the error message
    pub fn message(&self) -> &str {
        match self {
            Self::Retryable(msg) | Self::Permanent(msg) => msg,
        }
    }
}

impl From<serde_json::Error> for JobsError {
    fn from(err: serde_json::Error) -> Self {
        Self::DefinitionLoad(err.to_string())
    }
}

impl From<std::io::Error> for JobsError {
    fn from(err: std::io::Error) -> Self {
        Self::DefinitionLoad(err.to_string())
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for JobsError {
    fn from(err: redis::RedisError) -> Self {
        Self::LockService(err.to_string())
    }
}
