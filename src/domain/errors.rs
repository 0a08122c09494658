//! Domain error types for the fleet coordinator core.
//!
//! Each error enum groups errors from one subsystem. All
//! operations across the core's public interfaces return `Result`; no
//! exceptions are used for control flow.

use thiserror::Error;

/// Errors raised by the persistence contract and its backends.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("row not found")]
    NotFound,

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("query failed: {0}")]
    QueryFailed(String),

    #[error("migration failed: {0}")]
    MigrationFailed(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
}

impl StorageError {
    /// Transient storage errors are retried with bounded backoff at the call site.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::ConnectionFailed(_) | Self::QueryFailed(_))
    }
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound,
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                Self::ConstraintViolation(db_err.to_string())
            }
            other => Self::QueryFailed(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Errors raised by the worker supervisor.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("worker not found: {0}")]
    NotFound(String),

    #[error("handle already in use: {0}")]
    HandleInUse(String),

    #[error("worker population at capacity ({0})")]
    AtCapacity(usize),

    #[error("depth level {0} exceeds configured maximum {1}")]
    DepthExceeded(u32, u32),

    #[error("failed to spawn subprocess: {0}")]
    SpawnFailed(String),

    #[error("subprocess stdin closed")]
    StdinClosed,

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Errors raised by the spawn controller.
#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("hard limit reached ({0} active workers)")]
    HardLimitReached(usize),

    #[error("depth level {0} exceeds maximum {1}")]
    DepthExceeded(u32, u32),

    #[error("dependency {0} was rejected")]
    DependencyRejected(uuid::Uuid),

    #[error("request {0} is not pending")]
    NotPending(uuid::Uuid),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("worker supervisor error: {0}")]
    Worker(#[from] WorkerError),
}

/// Errors raised by the workflow engine.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("workflow definition not found: {0}")]
    DefinitionNotFound(uuid::Uuid),

    #[error("execution not found: {0}")]
    ExecutionNotFound(uuid::Uuid),

    #[error("step not found: {0}")]
    StepNotFound(String),

    #[error("definition is not a DAG: cycle detected at step {0}")]
    CyclicDependency(String),

    #[error("unknown step key referenced: {0}")]
    UnknownStepKey(String),

    #[error("missing required input: {0}")]
    MissingInput(String),

    #[error("invalid execution state for this operation: {0}")]
    InvalidState(String),

    #[error("guard expression error: {0}")]
    GuardExpression(String),

    #[error("timeout")]
    Timeout,

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Errors raised by mail/handoff/blackboard/checkpoint stores — thin
/// wrappers, since those stores have no extra domain invariants beyond
/// what storage already enforces.
#[derive(Debug, Error)]
pub enum MessagingError {
    #[error("not found")]
    NotFound,

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}
