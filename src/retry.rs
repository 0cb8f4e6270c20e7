//! # Retry / Failure Handling
//!
//! Single entry point for every failure source: worker error reports, the
//! execution timeout scan, and worker-loss reclamation all route through
//! `handle_failure`. A failed task with remaining budget goes back to the
//! queue behind a backoff delay; an exhausted one becomes terminally
//! `Failed` and drags its dependents down with it.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::OrchestratorConfig;
use crate::error::Result;
use crate::events::{EventPublisher, OrchestratorEvent};
use crate::graph::DependencyGraph;
use crate::queue::TaskQueue;
use crate::registry::WorkerRegistry;
use crate::store::{FailureRecord, TaskStore};

/// Delay shape between a failure and retry eligibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffPolicy {
    /// Same base delay for every attempt.
    Fixed,
    /// base * 2^(attempt - 1), capped at the configured maximum.
    Exponential,
}

impl fmt::Display for BackoffPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed => write!(f, "fixed"),
            Self::Exponential => write!(f, "exponential"),
        }
    }
}

impl FromStr for BackoffPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fixed" => Ok(Self::Fixed),
            "exponential" => Ok(Self::Exponential),
            other => Err(format!("unknown backoff policy: {other}")),
        }
    }
}

/// Applies retry budget and backoff on failures, and cascade-cancels
/// dependents when a task fails for good.
pub struct RetryHandler {
    store: Arc<TaskStore>,
    graph: Arc<DependencyGraph>,
    queue: Arc<TaskQueue>,
    registry: Arc<WorkerRegistry>,
    publisher: Arc<EventPublisher>,
    policy: BackoffPolicy,
    base_seconds: u64,
    max_seconds: u64,
}

impl RetryHandler {
    pub fn new(
        config: &OrchestratorConfig,
        store: Arc<TaskStore>,
        graph: Arc<DependencyGraph>,
        queue: Arc<TaskQueue>,
        registry: Arc<WorkerRegistry>,
        publisher: Arc<EventPublisher>,
    ) -> Self {
        Self {
            store,
            graph,
            queue,
            registry,
            publisher,
            policy: config.backoff_policy,
            base_seconds: config.backoff_base_seconds,
            max_seconds: config.backoff_max_seconds,
        }
    }

    /// Delay before attempt number `retry_count` becomes runnable again.
    pub fn backoff_delay_seconds(&self, retry_count: u32) -> u64 {
        match self.policy {
            BackoffPolicy::Fixed => self.base_seconds,
            BackoffPolicy::Exponential => {
                let exponent = retry_count.saturating_sub(1).min(63);
                let multiplier = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
                self.base_seconds
                    .saturating_mul(multiplier)
                    .min(self.max_seconds)
            }
        }
    }

    /// Route a failure for `task_id`. Idempotent against terminal tasks, so
    /// overlapping failure sources (timeout scan racing a worker report)
    /// resolve to a single outcome.
    pub fn handle_failure(&self, task_id: Uuid, reason: &str) -> Result<()> {
        let record = self.store.record_failure(task_id, reason)?;
        let released_worker = match record {
            FailureRecord::AlreadyTerminal => {
                self.queue.remove(task_id);
                return Ok(());
            }
            FailureRecord::Failed { released_worker } => released_worker,
        };
        if let Some(node_id) = released_worker {
            self.registry.release(&node_id);
        }
        self.queue.remove(task_id);

        if self.store.reset_for_retry(task_id)? {
            let task = self
                .store
                .get(task_id)
                .ok_or(crate::error::OrchestratorError::TaskNotFound { task_id })?;
            let delay = self.backoff_delay_seconds(task.retry_count);
            let eligible_at = Utc::now() + chrono::Duration::seconds(delay as i64);
            self.queue.enqueue_unbounded(&task, eligible_at);
            info!(
                task_id = %task_id,
                retry_count = task.retry_count,
                max_retries = task.max_retries,
                delay_seconds = delay,
                reason,
                "task scheduled for retry"
            );
            self.publisher.emit(OrchestratorEvent::TaskRetried {
                task_id,
                retry_count: task.retry_count,
                max_retries: task.max_retries,
                delay_seconds: delay,
            });
            return Ok(());
        }

        // Budget exhausted; the failure is final and dependents can never
        // become runnable.
        let task = self
            .store
            .get(task_id)
            .ok_or(crate::error::OrchestratorError::TaskNotFound { task_id })?;
        warn!(
            task_id = %task_id,
            retry_count = task.retry_count,
            reason,
            "task failed permanently"
        );
        self.publisher.emit(OrchestratorEvent::TaskFailed {
            task_id,
            error: reason.to_string(),
            retry_count: task.retry_count,
        });

        let cascade_reason = format!("dependency {task_id} failed: {reason}");
        let cancelled = self
            .graph
            .cascade_cancel(task_id, &self.store, &cascade_reason)?;
        for (cancelled_id, released) in cancelled {
            if let Some(node_id) = released {
                self.registry.release(&node_id);
            }
            self.queue.remove(cancelled_id);
            self.publisher.emit(OrchestratorEvent::TaskCancelled {
                task_id: cancelled_id,
                reason: cascade_reason.clone(),
            });
        }
        Ok(())
    }
}
