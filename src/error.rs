//! Error types for the orchestration core.

use thiserror::Error;
use uuid::Uuid;

/// Unified error taxonomy for the orchestration core.
///
/// Validation and structural errors (`Validation`, `DependencyCycle`,
/// `QueueFull`) are returned synchronously to callers. Operational failures
/// (task timeout, worker loss) never appear here directly: they are routed
/// through the retry handler and only escalate outward as lifecycle events
/// once terminal. `WorkerCapacity` is internal to the assigner, which
/// resolves it by trying the next worker.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OrchestratorError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Dependency cycle: {task_id} cannot depend on {depends_on}")]
    DependencyCycle { task_id: Uuid, depends_on: Uuid },
    #[error("Task queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },
    #[error("Worker {node_id} is at capacity")]
    WorkerCapacity { node_id: String },
    #[error("Unknown worker: {node_id}")]
    UnknownWorker { node_id: String },
    #[error("Task not found: {task_id}")]
    TaskNotFound { task_id: Uuid },
    #[error("Invalid status transition for task {task_id}: {from} -> {to}")]
    InvalidTransition {
        task_id: Uuid,
        from: String,
        to: String,
    },
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(error: serde_json::Error) -> Self {
        OrchestratorError::Validation(format!("JSON serialization error: {error}"))
    }
}

pub type Result<T> = anyhow::Result<T, OrchestratorError>;
