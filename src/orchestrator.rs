//! # Orchestrator Context
//!
//! Wires the store, dependency graph, priority queue, worker registry,
//! scheduler, retry handler, and event publisher into one explicitly owned
//! context. Transport layers (HTTP handlers, message consumers) hold an
//! `Arc<TaskOrchestrator>` and call the operations below; there is no
//! global state.
//!
//! ## Background Passes
//!
//! `spawn_background_tasks` starts three interval loops: priority
//! recalculation (queue aging), the scheduling pass, and the liveness +
//! timeout scans. The returned guard aborts them on drop.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};
use uuid::Uuid;

use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, Result};
use crate::events::{EventPublisher, OrchestratorEvent, PublishedEvent};
use crate::graph::DependencyGraph;
use crate::models::{
    NewTask, Task, TaskFilter, TaskPriority, TaskResult, TaskStatus, WorkerNode,
    WorkerRegistration,
};
use crate::monitor::LivenessMonitor;
use crate::queue::TaskQueue;
use crate::registry::WorkerRegistry;
use crate::retry::RetryHandler;
use crate::scheduler::Scheduler;
use crate::store::{CancelOutcome, TaskStats, TaskStore};

/// Partial update a worker (or operator) applies to a task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskUpdate {
    pub status: Option<TaskStatus>,
    /// Node claiming the update. Must match the task's current assignment
    /// when present.
    pub assigned_to: Option<String>,
    pub priority: Option<TaskPriority>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    pub error_message: Option<String>,
}

/// Read-only queue and fleet aggregation.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    #[serde(flatten)]
    pub tasks: TaskStats,
    pub queued_tasks: usize,
    pub active_workers: usize,
}

/// Guard over the background interval loops. Dropping it stops them.
pub struct BackgroundTasks {
    handles: Vec<JoinHandle<()>>,
}

impl Drop for BackgroundTasks {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

pub struct TaskOrchestrator {
    config: OrchestratorConfig,
    store: Arc<TaskStore>,
    graph: Arc<DependencyGraph>,
    queue: Arc<TaskQueue>,
    registry: Arc<WorkerRegistry>,
    scheduler: Arc<Scheduler>,
    retry: Arc<RetryHandler>,
    monitor: Arc<LivenessMonitor>,
    publisher: Arc<EventPublisher>,
}

impl TaskOrchestrator {
    pub fn new(config: OrchestratorConfig) -> Self {
        let store = Arc::new(TaskStore::new());
        let graph = Arc::new(DependencyGraph::new());
        let queue = Arc::new(TaskQueue::new(&config));
        let registry = Arc::new(WorkerRegistry::new());
        let publisher = Arc::new(EventPublisher::new(config.event_channel_capacity));
        let retry = Arc::new(RetryHandler::new(
            &config,
            store.clone(),
            graph.clone(),
            queue.clone(),
            registry.clone(),
            publisher.clone(),
        ));
        let scheduler = Arc::new(Scheduler::new(
            &config,
            store.clone(),
            graph.clone(),
            queue.clone(),
            registry.clone(),
            publisher.clone(),
        ));
        let monitor = Arc::new(LivenessMonitor::new(
            &config,
            store.clone(),
            registry.clone(),
            retry.clone(),
            publisher.clone(),
        ));
        Self {
            config,
            store,
            graph,
            queue,
            registry,
            scheduler,
            retry,
            monitor,
            publisher,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Validate and admit a new task. On success the task is pending (and
    /// queued unless blocked by dependencies), a `task.created` event is
    /// out, and a scheduling pass has run. Any rejection leaves no trace of
    /// the submission.
    pub async fn submit_task(&self, request: NewTask) -> Result<Task> {
        if request.timeout_seconds == Some(0) {
            return Err(OrchestratorError::Validation(
                "timeout_seconds must be positive".to_string(),
            ));
        }
        for dependency in &request.dependencies {
            if !self.store.contains(*dependency) {
                return Err(OrchestratorError::Validation(format!(
                    "unknown dependency task: {dependency}"
                )));
            }
        }

        let task = Task::from_submission(request, &self.config);
        let task_id = task.id;
        self.store.insert(task.clone())?;

        for dependency in &task.dependencies {
            if let Err(error) = self.graph.add_edge(task_id, *dependency) {
                self.rollback_submission(task_id);
                return Err(error);
            }
        }

        if self.graph.is_unblocked(task_id, &self.store) {
            if let Err(error) = self.queue.enqueue(&task) {
                self.rollback_submission(task_id);
                if let OrchestratorError::QueueFull { capacity } = &error {
                    self.publisher.emit(OrchestratorEvent::QueueFullRejected {
                        task_type: task.task_type,
                        capacity: *capacity,
                    });
                }
                return Err(error);
            }
        }

        info!(
            task_id = %task_id,
            task_type = %task.task_type,
            priority = %task.priority,
            dependencies = task.dependencies.len(),
            "task submitted"
        );
        self.publisher.emit(OrchestratorEvent::TaskCreated {
            task_id,
            task_type: task.task_type,
            priority: task.priority,
        });

        self.scheduler.run_scheduling_pass().await?;
        Ok(task)
    }

    fn rollback_submission(&self, task_id: Uuid) {
        self.graph.remove_task(task_id);
        self.queue.remove(task_id);
        self.store.remove(task_id);
    }

    /// Apply a worker- or operator-issued partial update.
    pub async fn update_task(&self, task_id: Uuid, update: TaskUpdate) -> Result<Task> {
        let task = self
            .store
            .get(task_id)
            .ok_or(OrchestratorError::TaskNotFound { task_id })?;

        if let Some(node_id) = &update.assigned_to {
            if task.assigned_to.as_deref() != Some(node_id.as_str()) {
                return Err(OrchestratorError::Validation(format!(
                    "task {task_id} is not assigned to {node_id}"
                )));
            }
        }

        if !update.metadata.is_empty() {
            self.store.update_metadata(task_id, update.metadata)?;
        }
        if let Some(priority) = update.priority {
            let updated = self.store.set_priority(task_id, priority)?;
            if updated.status == TaskStatus::Pending {
                self.queue.reprioritize(&updated);
            }
        }
        if let Some(message) = &update.error_message {
            if update.status != Some(TaskStatus::Failed) {
                self.store.set_error(task_id, message)?;
            }
        }

        if let Some(status) = update.status {
            match status {
                TaskStatus::InProgress => {
                    let outcome =
                        self.store
                            .transition(task_id, TaskStatus::Assigned, TaskStatus::InProgress)?;
                    if !outcome.applied {
                        return Err(OrchestratorError::InvalidTransition {
                            task_id,
                            from: self.current_status(task_id)?.to_string(),
                            to: TaskStatus::InProgress.to_string(),
                        });
                    }
                }
                TaskStatus::Completed => self.complete_task(task_id).await?,
                TaskStatus::Failed => {
                    let reason = update
                        .error_message
                        .clone()
                        .unwrap_or_else(|| "worker reported failure".to_string());
                    self.retry.handle_failure(task_id, &reason)?;
                    self.scheduler.run_scheduling_pass().await?;
                }
                TaskStatus::Cancelled => {
                    let reason = update
                        .error_message
                        .clone()
                        .unwrap_or_else(|| "cancelled by request".to_string());
                    self.cancel_task(task_id, &reason).await?;
                }
                TaskStatus::Pending | TaskStatus::Assigned => {
                    return Err(OrchestratorError::Validation(format!(
                        "status {status} cannot be set directly"
                    )));
                }
            }
        }

        self.store
            .get(task_id)
            .ok_or(OrchestratorError::TaskNotFound { task_id })
    }

    fn current_status(&self, task_id: Uuid) -> Result<TaskStatus> {
        self.store
            .get(task_id)
            .map(|task| task.status)
            .ok_or(OrchestratorError::TaskNotFound { task_id })
    }

    /// Finish a task: settle the reservation, notify, and promote any
    /// dependents that just became runnable.
    async fn complete_task(&self, task_id: Uuid) -> Result<()> {
        let outcome =
            self.store
                .transition(task_id, TaskStatus::InProgress, TaskStatus::Completed)?;
        if !outcome.applied {
            return Err(OrchestratorError::InvalidTransition {
                task_id,
                from: self.current_status(task_id)?.to_string(),
                to: TaskStatus::Completed.to_string(),
            });
        }
        if let Some(node_id) = outcome.released_worker {
            self.registry.release(&node_id);
        }
        info!(task_id = %task_id, "task completed");
        self.publisher
            .emit(OrchestratorEvent::TaskCompleted { task_id });

        let unblocked = self.graph.on_task_completed(task_id, &self.store);
        if !unblocked.is_empty() {
            let now = chrono::Utc::now();
            for task in &unblocked {
                self.queue.enqueue_unbounded(task, now);
            }
            info!(
                completed = %task_id,
                unblocked = unblocked.len(),
                "dependents released"
            );
        }
        self.scheduler.run_scheduling_pass().await?;
        Ok(())
    }

    /// Cancel a task and cascade to its transitive dependents.
    pub async fn cancel_task(&self, task_id: Uuid, reason: &str) -> Result<()> {
        let outcome = self.store.cancel(task_id, reason)?;
        let released = match outcome {
            CancelOutcome::AlreadyTerminal => {
                return Err(OrchestratorError::InvalidTransition {
                    task_id,
                    from: self.current_status(task_id)?.to_string(),
                    to: TaskStatus::Cancelled.to_string(),
                });
            }
            CancelOutcome::Cancelled { released_worker } => released_worker,
        };
        if let Some(node_id) = released {
            self.registry.release(&node_id);
        }
        self.queue.remove(task_id);
        info!(task_id = %task_id, reason, "task cancelled");
        self.publisher.emit(OrchestratorEvent::TaskCancelled {
            task_id,
            reason: reason.to_string(),
        });

        let cascade_reason = format!("cancelled because dependency {task_id} was cancelled");
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

    /// Record a worker-reported result. Results accumulate; they never move
    /// the task's status.
    pub fn submit_result(&self, result: TaskResult) -> Result<TaskResult> {
        if !self.store.contains(result.task_id) {
            return Err(OrchestratorError::TaskNotFound {
                task_id: result.task_id,
            });
        }
        for (label, score) in [
            ("quality_score", result.quality_score),
            ("confidence_score", result.confidence_score),
        ] {
            if !(0.0..=1.0).contains(&score) {
                return Err(OrchestratorError::Validation(format!(
                    "{label} must be within [0.0, 1.0], got {score}"
                )));
            }
        }

        self.store.append_result(result.clone());
        self.publisher.emit(OrchestratorEvent::ResultRecorded {
            result_id: result.id,
            task_id: result.task_id,
            result_type: result.result_type.clone(),
            quality_score: result.quality_score,
            confidence_score: result.confidence_score,
        });
        Ok(result)
    }

    pub fn get_task(&self, task_id: Uuid) -> Result<Task> {
        self.store
            .get(task_id)
            .ok_or(OrchestratorError::TaskNotFound { task_id })
    }

    pub fn list_tasks(&self, filter: &TaskFilter) -> Vec<Task> {
        self.store.list(filter)
    }

    pub fn results_for(&self, task_id: Uuid) -> Result<Vec<TaskResult>> {
        if !self.store.contains(task_id) {
            return Err(OrchestratorError::TaskNotFound { task_id });
        }
        Ok(self.store.results_for(task_id))
    }

    /// Register (or re-register) a worker and immediately try to put it to
    /// work.
    pub async fn register_worker(&self, registration: WorkerRegistration) -> Result<WorkerNode> {
        if registration.max_concurrent_tasks == 0 {
            return Err(OrchestratorError::Validation(
                "max_concurrent_tasks must be positive".to_string(),
            ));
        }
        if registration.capabilities.is_empty() {
            return Err(OrchestratorError::Validation(
                "worker must advertise at least one capability".to_string(),
            ));
        }
        let node = self.registry.register(registration)?;
        self.publisher.emit(OrchestratorEvent::WorkerRegistered {
            node_id: node.node_id.clone(),
            capabilities: node.capabilities.iter().copied().collect(),
        });
        self.scheduler.run_scheduling_pass().await?;
        Ok(node)
    }

    /// Liveness refresh only; load accounting stays with the registry.
    pub fn worker_heartbeat(&self, node_id: &str) -> Result<()> {
        self.registry.heartbeat(node_id)
    }

    pub fn list_workers(&self) -> Vec<WorkerNode> {
        self.registry.list()
    }

    /// Tasks waiting for the node to pick them up.
    pub fn assignments_for(&self, node_id: &str) -> Result<Vec<Task>> {
        if !self.registry.contains(node_id) {
            return Err(OrchestratorError::UnknownWorker {
                node_id: node_id.to_string(),
            });
        }
        Ok(self.store.assigned_to_worker(node_id))
    }

    pub fn queue_stats(&self) -> QueueStats {
        QueueStats {
            tasks: self.store.stats(),
            queued_tasks: self.queue.len(),
            active_workers: self.registry.active_count(),
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<PublishedEvent> {
        self.publisher.subscribe()
    }

    /// Manual pass entry points. The interval loops call these; tests call
    /// them directly for deterministic control.
    pub async fn run_scheduling_pass(&self) -> Result<usize> {
        self.scheduler.run_scheduling_pass().await
    }

    pub fn recalculate_priorities(&self) {
        self.queue.recalculate(&self.store);
    }

    pub fn scan_workers(&self) -> Vec<String> {
        self.monitor.scan_workers()
    }

    pub fn scan_timeouts(&self) -> usize {
        self.monitor.scan_timeouts()
    }

    /// Start the interval loops. The guard aborts them when dropped.
    pub fn spawn_background_tasks(self: &Arc<Self>) -> BackgroundTasks {
        let mut handles = Vec::new();

        let orchestrator = self.clone();
        handles.push(tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(Duration::from_secs(orchestrator.config.priority_recalc_interval));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                orchestrator.recalculate_priorities();
            }
        }));

        let orchestrator = self.clone();
        handles.push(tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(Duration::from_secs(orchestrator.config.scheduler_interval));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(error) = orchestrator.run_scheduling_pass().await {
                    error!(%error, "scheduling pass failed");
                }
            }
        }));

        let orchestrator = self.clone();
        handles.push(tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(Duration::from_secs(orchestrator.config.liveness_scan_interval));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                orchestrator.scan_workers();
                orchestrator.scan_timeouts();
            }
        }));

        BackgroundTasks { handles }
    }
}
