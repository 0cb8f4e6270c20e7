//! Event payload types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{TaskPriority, TaskType};

/// Lifecycle events emitted by the orchestrator.
///
/// Serialized with a snake_case `event` tag so consumers can route without
/// parsing the payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OrchestratorEvent {
    TaskCreated {
        task_id: Uuid,
        task_type: TaskType,
        priority: TaskPriority,
    },
    TaskAssigned {
        task_id: Uuid,
        node_id: String,
    },
    TaskCompleted {
        task_id: Uuid,
    },
    TaskRetried {
        task_id: Uuid,
        retry_count: u32,
        max_retries: u32,
        delay_seconds: u64,
    },
    /// Terminal failure: the retry budget is spent.
    TaskFailed {
        task_id: Uuid,
        error: String,
        retry_count: u32,
    },
    TaskCancelled {
        task_id: Uuid,
        reason: String,
    },
    ResultRecorded {
        result_id: Uuid,
        task_id: Uuid,
        result_type: String,
        quality_score: f64,
        confidence_score: f64,
    },
    WorkerRegistered {
        node_id: String,
        capabilities: Vec<TaskType>,
    },
    WorkerLost {
        node_id: String,
    },
    QueueFullRejected {
        task_type: TaskType,
        capacity: usize,
    },
}

impl OrchestratorEvent {
    /// Dotted routing name, stable across payload changes.
    pub fn name(&self) -> &'static str {
        match self {
            Self::TaskCreated { .. } => "task.created",
            Self::TaskAssigned { .. } => "task.assigned",
            Self::TaskCompleted { .. } => "task.completed",
            Self::TaskRetried { .. } => "task.retry",
            Self::TaskFailed { .. } => "task.failed",
            Self::TaskCancelled { .. } => "task.cancelled",
            Self::ResultRecorded { .. } => "task.result",
            Self::WorkerRegistered { .. } => "worker.registered",
            Self::WorkerLost { .. } => "worker.lost",
            Self::QueueFullRejected { .. } => "queue.full",
        }
    }
}

/// Envelope handed to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublishedEvent {
    pub event: OrchestratorEvent,
    pub published_at: DateTime<Utc>,
}

impl PublishedEvent {
    pub fn now(event: OrchestratorEvent) -> Self {
        Self {
            event,
            published_at: Utc::now(),
        }
    }
}
