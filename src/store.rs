//! # TaskRecord Store
//!
//! In-memory owner of task lifecycle state. All status mutations go through
//! compare-and-swap style operations executed under the per-entry lock, so
//! concurrent request handlers and background passes never lose updates to
//! each other. A CAS miss (`applied == false`) means "someone else moved
//! the task" and is not a fault.
//!
//! The store never deletes history on its own; tasks leave the map only
//! through explicit removal (submission rollback or external retention
//! policy).

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashSet;
use tracing::debug;
use uuid::Uuid;

use crate::error::{OrchestratorError, Result};
use crate::models::{Task, TaskFilter, TaskResult, TaskStatus, TaskType};

/// Result of a compare-and-swap transition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionOutcome {
    /// Whether the expected status matched and the move was applied.
    pub applied: bool,
    /// Worker whose reservation the move released, if the task left an
    /// active state. The caller settles this with the registry.
    pub released_worker: Option<String>,
}

impl TransitionOutcome {
    fn miss() -> Self {
        Self {
            applied: false,
            released_worker: None,
        }
    }
}

/// Outcome of routing a failure into the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureRecord {
    /// Task moved to `Failed`; carries the worker it was taken from.
    Failed { released_worker: Option<String> },
    /// Task was already in a terminal state; nothing to do.
    AlreadyTerminal,
}

/// Outcome of a cancellation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled { released_worker: Option<String> },
    AlreadyTerminal,
}

/// Aggregated task counters and timing, computed on demand.
#[derive(Debug, Clone, Serialize)]
pub struct TaskStats {
    pub total_tasks: usize,
    pub pending_tasks: usize,
    pub assigned_tasks: usize,
    pub in_progress_tasks: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    pub cancelled_tasks: usize,
    /// Mean wall-clock seconds from `started_at` to `completed_at` over
    /// completed tasks.
    pub average_completion_seconds: f64,
    /// Tasks completed per hour over the trailing 24 hours.
    pub queue_throughput: f64,
}

/// Concurrent in-memory task store with an append-only result log.
#[derive(Debug, Default)]
pub struct TaskStore {
    tasks: DashMap<Uuid, Task>,
    results: DashMap<Uuid, Vec<TaskResult>>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a freshly submitted task. Duplicate ids are an internal fault
    /// since ids are generated by the submission path.
    pub fn insert(&self, task: Task) -> Result<()> {
        if self.tasks.contains_key(&task.id) {
            return Err(OrchestratorError::Internal(format!(
                "duplicate task id: {}",
                task.id
            )));
        }
        self.tasks.insert(task.id, task);
        Ok(())
    }

    /// Remove a task record entirely. Only the submission rollback path and
    /// external retention policies call this.
    pub fn remove(&self, task_id: Uuid) {
        self.tasks.remove(&task_id);
        self.results.remove(&task_id);
    }

    pub fn get(&self, task_id: Uuid) -> Option<Task> {
        self.tasks.get(&task_id).map(|entry| entry.clone())
    }

    pub fn contains(&self, task_id: Uuid) -> bool {
        self.tasks.contains_key(&task_id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// List tasks matching the filter, oldest first.
    pub fn list(&self, filter: &TaskFilter) -> Vec<Task> {
        let mut tasks: Vec<Task> = self
            .tasks
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .map(|entry| entry.clone())
            .collect();
        tasks.sort_by_key(|t| t.created_at);
        tasks
    }

    /// Atomic compare-and-swap status transition.
    ///
    /// Returns `applied == false` when the current status does not match
    /// `expected` (a concurrent actor moved the task first). An `expected`
    /// status that matches but cannot legally reach `new` is a caller bug
    /// and returns `InvalidTransition`.
    pub fn transition(
        &self,
        task_id: Uuid,
        expected: TaskStatus,
        new: TaskStatus,
    ) -> Result<TransitionOutcome> {
        let mut entry = self
            .tasks
            .get_mut(&task_id)
            .ok_or(OrchestratorError::TaskNotFound { task_id })?;

        if entry.status != expected {
            return Ok(TransitionOutcome::miss());
        }
        if !expected.can_transition_to(new) {
            return Err(OrchestratorError::InvalidTransition {
                task_id,
                from: expected.to_string(),
                to: new.to_string(),
            });
        }

        let now = Utc::now();
        let released_worker = if new.is_active() {
            None
        } else {
            entry.assigned_to.take()
        };

        entry.status = new;
        entry.updated_at = now;
        match new {
            TaskStatus::InProgress => entry.started_at = Some(now),
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled => {
                entry.completed_at = Some(now);
            }
            TaskStatus::Pending => {
                entry.started_at = None;
                entry.completed_at = None;
            }
            TaskStatus::Assigned => {}
        }

        debug!(task_id = %task_id, from = %expected, to = %new, "task transitioned");
        Ok(TransitionOutcome {
            applied: true,
            released_worker,
        })
    }

    /// Atomically bind a pending task to a worker. This is the assignment
    /// half of the scheduler's reserve-then-assign unit; returns false when
    /// the task is no longer pending.
    pub fn assign(&self, task_id: Uuid, node_id: &str) -> Result<bool> {
        let mut entry = self
            .tasks
            .get_mut(&task_id)
            .ok_or(OrchestratorError::TaskNotFound { task_id })?;

        if entry.status != TaskStatus::Pending {
            return Ok(false);
        }
        entry.status = TaskStatus::Assigned;
        entry.assigned_to = Some(node_id.to_string());
        entry.updated_at = Utc::now();
        Ok(true)
    }

    /// Route a failure into the store: any non-terminal task moves to
    /// `Failed` with the given reason, releasing its worker binding.
    pub fn record_failure(&self, task_id: Uuid, reason: &str) -> Result<FailureRecord> {
        let mut entry = self
            .tasks
            .get_mut(&task_id)
            .ok_or(OrchestratorError::TaskNotFound { task_id })?;

        if entry.status.is_terminal() {
            return Ok(FailureRecord::AlreadyTerminal);
        }

        let released_worker = entry.assigned_to.take();
        entry.status = TaskStatus::Failed;
        entry.error_message = Some(reason.to_string());
        entry.completed_at = Some(Utc::now());
        entry.updated_at = Utc::now();
        Ok(FailureRecord::Failed { released_worker })
    }

    /// Consume one unit of retry budget and move a failed task back to
    /// `Pending`. Returns false when the task is not failed or the budget
    /// is exhausted, leaving the record untouched.
    pub fn reset_for_retry(&self, task_id: Uuid) -> Result<bool> {
        let mut entry = self
            .tasks
            .get_mut(&task_id)
            .ok_or(OrchestratorError::TaskNotFound { task_id })?;

        if entry.status != TaskStatus::Failed || entry.retry_count >= entry.max_retries {
            return Ok(false);
        }
        entry.retry_count += 1;
        entry.status = TaskStatus::Pending;
        entry.assigned_to = None;
        entry.error_message = None;
        entry.started_at = None;
        entry.completed_at = None;
        entry.updated_at = Utc::now();
        Ok(true)
    }

    /// Cancel a non-terminal task, recording the root cause.
    pub fn cancel(&self, task_id: Uuid, reason: &str) -> Result<CancelOutcome> {
        let mut entry = self
            .tasks
            .get_mut(&task_id)
            .ok_or(OrchestratorError::TaskNotFound { task_id })?;

        if entry.status.is_terminal() {
            return Ok(CancelOutcome::AlreadyTerminal);
        }

        let released_worker = entry.assigned_to.take();
        entry.status = TaskStatus::Cancelled;
        entry.error_message = Some(reason.to_string());
        entry.completed_at = Some(Utc::now());
        entry.updated_at = Utc::now();
        Ok(CancelOutcome::Cancelled { released_worker })
    }

    /// Change a task's priority, returning the updated snapshot so callers
    /// can reprioritize the queue when the task is still pending.
    pub fn set_priority(&self, task_id: Uuid, priority: crate::models::TaskPriority) -> Result<Task> {
        let mut entry = self
            .tasks
            .get_mut(&task_id)
            .ok_or(OrchestratorError::TaskNotFound { task_id })?;
        entry.priority = priority;
        entry.updated_at = Utc::now();
        Ok(entry.clone())
    }

    /// Merge caller metadata into the task's open key-value map.
    pub fn update_metadata(
        &self,
        task_id: Uuid,
        metadata: std::collections::HashMap<String, serde_json::Value>,
    ) -> Result<()> {
        let mut entry = self
            .tasks
            .get_mut(&task_id)
            .ok_or(OrchestratorError::TaskNotFound { task_id })?;
        entry.metadata.extend(metadata);
        entry.updated_at = Utc::now();
        Ok(())
    }

    pub fn set_error(&self, task_id: Uuid, message: &str) -> Result<()> {
        let mut entry = self
            .tasks
            .get_mut(&task_id)
            .ok_or(OrchestratorError::TaskNotFound { task_id })?;
        entry.error_message = Some(message.to_string());
        entry.updated_at = Utc::now();
        Ok(())
    }

    /// Tasks currently bound to a worker (assigned or in progress).
    pub fn active_on_worker(&self, node_id: &str) -> Vec<Task> {
        self.tasks
            .iter()
            .filter(|entry| {
                entry.status.is_active() && entry.assigned_to.as_deref() == Some(node_id)
            })
            .map(|entry| entry.clone())
            .collect()
    }

    /// Tasks handed to a worker that it has not picked up yet.
    pub fn assigned_to_worker(&self, node_id: &str) -> Vec<Task> {
        self.tasks
            .iter()
            .filter(|entry| {
                entry.status == TaskStatus::Assigned
                    && entry.assigned_to.as_deref() == Some(node_id)
            })
            .map(|entry| entry.clone())
            .collect()
    }

    /// Distinct workers currently executing a task type. The scheduler uses
    /// this for the per-type worker cap.
    pub fn workers_executing(&self, task_type: TaskType) -> HashSet<String> {
        self.tasks
            .iter()
            .filter(|entry| entry.status.is_active() && entry.task_type == task_type)
            .filter_map(|entry| entry.assigned_to.clone())
            .collect()
    }

    /// In-progress tasks that have exceeded their execution budget.
    pub fn timed_out_tasks(&self, now: DateTime<Utc>) -> Vec<Task> {
        self.tasks
            .iter()
            .filter(|entry| entry.timed_out(now))
            .map(|entry| entry.clone())
            .collect()
    }

    /// Append a worker-reported result. Results never change task status.
    pub fn append_result(&self, result: TaskResult) {
        self.results
            .entry(result.task_id)
            .or_default()
            .push(result);
    }

    pub fn results_for(&self, task_id: Uuid) -> Vec<TaskResult> {
        self.results
            .get(&task_id)
            .map(|entry| entry.clone())
            .unwrap_or_default()
    }

    /// Aggregate counters and timing over the whole store.
    pub fn stats(&self) -> TaskStats {
        let mut stats = TaskStats {
            total_tasks: 0,
            pending_tasks: 0,
            assigned_tasks: 0,
            in_progress_tasks: 0,
            completed_tasks: 0,
            failed_tasks: 0,
            cancelled_tasks: 0,
            average_completion_seconds: 0.0,
            queue_throughput: 0.0,
        };

        let day_ago = Utc::now() - chrono::Duration::hours(24);
        let mut completion_total = 0.0;
        let mut timed_completions = 0usize;
        let mut recent_completions = 0usize;

        for entry in self.tasks.iter() {
            stats.total_tasks += 1;
            match entry.status {
                TaskStatus::Pending => stats.pending_tasks += 1,
                TaskStatus::Assigned => stats.assigned_tasks += 1,
                TaskStatus::InProgress => stats.in_progress_tasks += 1,
                TaskStatus::Completed => stats.completed_tasks += 1,
                TaskStatus::Failed => stats.failed_tasks += 1,
                TaskStatus::Cancelled => stats.cancelled_tasks += 1,
            }
            if entry.status == TaskStatus::Completed {
                if let (Some(started), Some(completed)) = (entry.started_at, entry.completed_at) {
                    completion_total += (completed - started).num_milliseconds() as f64 / 1000.0;
                    timed_completions += 1;
                    if completed >= day_ago {
                        recent_completions += 1;
                    }
                }
            }
        }

        if timed_completions > 0 {
            stats.average_completion_seconds = completion_total / timed_completions as f64;
        }
        stats.queue_throughput = recent_completions as f64 / 24.0;
        stats
    }
}
