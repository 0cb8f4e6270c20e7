//! # Scheduler
//!
//! Push-mode assignment: a scheduling pass drains the ready queue and binds
//! each task to the best eligible worker. Passes are serialized by an async
//! mutex so pop-and-assign is a critical section; workers observe their
//! assignments through `assignments_for` on the orchestrator.
//!
//! ## Worker Selection
//!
//! Candidates are active workers advertising the task's type with spare
//! capacity. A global per-type cap bounds how many distinct workers may
//! execute one task type at once; when the cap is reached only workers
//! already running that type stay eligible. Among candidates the least
//! loaded wins, tie-broken by the most recent heartbeat.

use std::cmp::Reverse;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::OrchestratorConfig;
use crate::error::Result;
use crate::events::{EventPublisher, OrchestratorEvent};
use crate::graph::DependencyGraph;
use crate::models::{Task, TaskStatus, WorkerNode};
use crate::queue::TaskQueue;
use crate::registry::WorkerRegistry;
use crate::store::TaskStore;

pub struct Scheduler {
    store: Arc<TaskStore>,
    graph: Arc<DependencyGraph>,
    queue: Arc<TaskQueue>,
    registry: Arc<WorkerRegistry>,
    publisher: Arc<EventPublisher>,
    max_workers_per_task_type: usize,
    /// Serializes scheduling passes. Holding it across the pass makes
    /// dequeue-reserve-assign a critical section.
    assign_lock: Mutex<()>,
}

impl Scheduler {
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
            max_workers_per_task_type: config.max_workers_per_task_type,
            assign_lock: Mutex::new(()),
        }
    }

    /// Drain the queue once, assigning every task an eligible worker exists
    /// for. Tasks without a worker go back to the queue unchanged so one
    /// unservable task never blocks the rest. Returns the number of
    /// assignments made.
    pub async fn run_scheduling_pass(&self) -> Result<usize> {
        let _guard = self.assign_lock.lock().await;

        let mut assigned = 0usize;
        let mut skipped = Vec::new();

        while let Some(entry) = self.queue.dequeue_highest(&self.store) {
            let Some(task) = self.store.get(entry.task_id) else {
                continue;
            };
            if task.status != TaskStatus::Pending {
                continue;
            }
            // Dependency state may have regressed since enqueue (a retried
            // dependency, for instance); blocked tasks wait off-queue until
            // a completion re-enqueues them.
            if !self.graph.is_unblocked(task.id, &self.store) {
                continue;
            }

            let Some(worker) = self.select_worker(&task) else {
                skipped.push(entry);
                continue;
            };

            if self.registry.reserve(&worker.node_id).is_err() {
                // Capacity raced away between selection and reservation.
                skipped.push(entry);
                continue;
            }
            if !self.store.assign(task.id, &worker.node_id)? {
                // Someone else moved the task; undo the reservation.
                self.registry.release(&worker.node_id);
                continue;
            }

            assigned += 1;
            info!(
                task_id = %task.id,
                task_type = %task.task_type,
                node_id = %worker.node_id,
                "task assigned"
            );
            self.publisher.emit(OrchestratorEvent::TaskAssigned {
                task_id: task.id,
                node_id: worker.node_id,
            });
        }

        for entry in skipped {
            self.queue.restore(entry);
        }
        if assigned > 0 {
            debug!(assigned, "scheduling pass complete");
        }
        Ok(assigned)
    }

    /// Best worker for the task right now, or `None` when nobody is
    /// eligible.
    fn select_worker(&self, task: &Task) -> Option<WorkerNode> {
        let mut candidates: Vec<WorkerNode> = self
            .registry
            .list()
            .into_iter()
            .filter(|worker| worker.is_schedulable(task.task_type))
            .collect();

        let executing = self.store.workers_executing(task.task_type);
        if executing.len() >= self.max_workers_per_task_type {
            candidates.retain(|worker| executing.contains(&worker.node_id));
        }

        candidates
            .into_iter()
            .min_by_key(|worker| (worker.current_load, Reverse(worker.last_heartbeat)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewTask, TaskPriority, TaskType, WorkerRegistration};
    use uuid::Uuid;

    struct Fixture {
        scheduler: Scheduler,
        store: Arc<TaskStore>,
        graph: Arc<DependencyGraph>,
        queue: Arc<TaskQueue>,
        registry: Arc<WorkerRegistry>,
    }

    fn fixture(config: OrchestratorConfig) -> Fixture {
        let store = Arc::new(TaskStore::new());
        let graph = Arc::new(DependencyGraph::new());
        let queue = Arc::new(TaskQueue::new(&config));
        let registry = Arc::new(WorkerRegistry::new());
        let publisher = Arc::new(EventPublisher::new(config.event_channel_capacity));
        let scheduler = Scheduler::new(
            &config,
            store.clone(),
            graph.clone(),
            queue.clone(),
            registry.clone(),
            publisher,
        );
        Fixture {
            scheduler,
            store,
            graph,
            queue,
            registry,
        }
    }

    fn submit(fixture: &Fixture, new_task: NewTask) -> Uuid {
        let task = Task::from_submission(new_task, &OrchestratorConfig::default());
        let id = task.id;
        fixture.store.insert(task.clone()).unwrap();
        fixture.queue.enqueue(&task).unwrap();
        id
    }

    #[tokio::test]
    async fn test_assignment_binds_task_and_load() {
        let fixture = fixture(OrchestratorConfig::default());
        fixture.registry.register(WorkerRegistration::new(
            "w1",
            "collector",
            [TaskType::ContentCollection],
            2,
        )).unwrap();
        let id = submit(&fixture, NewTask::new(TaskType::ContentCollection));

        assert_eq!(fixture.scheduler.run_scheduling_pass().await.unwrap(), 1);
        let task = fixture.store.get(id).unwrap();
        assert_eq!(task.status, TaskStatus::Assigned);
        assert_eq!(task.assigned_to.as_deref(), Some("w1"));
        assert_eq!(fixture.registry.get("w1").unwrap().current_load, 1);
    }

    #[tokio::test]
    async fn test_no_capable_worker_leaves_task_queued() {
        let fixture = fixture(OrchestratorConfig::default());
        fixture.registry.register(WorkerRegistration::new(
            "w1",
            "collector",
            [TaskType::SentimentAnalysis],
            2,
        )).unwrap();
        let id = submit(&fixture, NewTask::new(TaskType::ContentCollection));

        assert_eq!(fixture.scheduler.run_scheduling_pass().await.unwrap(), 0);
        assert_eq!(fixture.store.get(id).unwrap().status, TaskStatus::Pending);
        assert!(fixture.queue.contains(id));
    }

    #[tokio::test]
    async fn test_unservable_task_does_not_block_queue() {
        let fixture = fixture(OrchestratorConfig::default());
        fixture.registry.register(WorkerRegistration::new(
            "w1",
            "collector",
            [TaskType::SentimentAnalysis],
            2,
        )).unwrap();
        // Higher priority but no capable worker.
        let stuck = submit(
            &fixture,
            NewTask::new(TaskType::ContentCollection).with_priority(TaskPriority::Critical),
        );
        let runnable = submit(&fixture, NewTask::new(TaskType::SentimentAnalysis));

        assert_eq!(fixture.scheduler.run_scheduling_pass().await.unwrap(), 1);
        assert_eq!(fixture.store.get(runnable).unwrap().status, TaskStatus::Assigned);
        assert!(fixture.queue.contains(stuck));
    }

    #[tokio::test]
    async fn test_least_loaded_worker_wins() {
        let fixture = fixture(OrchestratorConfig::default());
        fixture.registry.register(WorkerRegistration::new(
            "busy",
            "collector",
            [TaskType::ContentCollection],
            4,
        )).unwrap();
        fixture.registry.register(WorkerRegistration::new(
            "idle",
            "collector",
            [TaskType::ContentCollection],
            4,
        )).unwrap();
        fixture.registry.reserve("busy").unwrap();

        let id = submit(&fixture, NewTask::new(TaskType::ContentCollection));
        fixture.scheduler.run_scheduling_pass().await.unwrap();
        assert_eq!(
            fixture.store.get(id).unwrap().assigned_to.as_deref(),
            Some("idle")
        );
    }

    #[tokio::test]
    async fn test_blocked_task_never_assigned() {
        let fixture = fixture(OrchestratorConfig::default());
        fixture.registry.register(WorkerRegistration::new(
            "w1",
            "collector",
            [TaskType::ContentCollection, TaskType::SentimentAnalysis],
            4,
        )).unwrap();
        let dep = submit(&fixture, NewTask::new(TaskType::ContentCollection));
        let blocked_task = Task::from_submission(
            NewTask::new(TaskType::SentimentAnalysis).with_dependencies(vec![dep]),
            &OrchestratorConfig::default(),
        );
        let blocked = blocked_task.id;
        fixture.store.insert(blocked_task.clone()).unwrap();
        fixture.graph.add_edge(blocked, dep).unwrap();
        // Even if the blocked task leaks into the queue, the pass must not
        // hand it out.
        fixture.queue.enqueue(&blocked_task).unwrap();

        assert_eq!(fixture.scheduler.run_scheduling_pass().await.unwrap(), 1);
        assert_eq!(fixture.store.get(blocked).unwrap().status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn test_per_type_worker_cap() {
        let mut config = OrchestratorConfig::default();
        config.max_workers_per_task_type = 1;
        let fixture = fixture(config);
        for node in ["w1", "w2"] {
            fixture.registry.register(WorkerRegistration::new(
                node,
                "collector",
                [TaskType::ContentCollection],
                4,
            )).unwrap();
        }

        let first = submit(&fixture, NewTask::new(TaskType::ContentCollection));
        fixture.scheduler.run_scheduling_pass().await.unwrap();
        let chosen = fixture.store.get(first).unwrap().assigned_to.unwrap();

        // Second task of the same type must stick to the same worker.
        let second = submit(&fixture, NewTask::new(TaskType::ContentCollection));
        fixture.scheduler.run_scheduling_pass().await.unwrap();
        assert_eq!(
            fixture.store.get(second).unwrap().assigned_to.as_deref(),
            Some(chosen.as_str())
        );
    }

    #[tokio::test]
    async fn test_full_worker_not_selected() {
        let fixture = fixture(OrchestratorConfig::default());
        fixture.registry.register(WorkerRegistration::new(
            "w1",
            "collector",
            [TaskType::ContentCollection],
            1,
        )).unwrap();
        let first = submit(&fixture, NewTask::new(TaskType::ContentCollection));
        let second = submit(&fixture, NewTask::new(TaskType::ContentCollection));

        assert_eq!(fixture.scheduler.run_scheduling_pass().await.unwrap(), 1);
        let statuses = [
            fixture.store.get(first).unwrap().status,
            fixture.store.get(second).unwrap().status,
        ];
        assert!(statuses.contains(&TaskStatus::Assigned));
        assert!(statuses.contains(&TaskStatus::Pending));
        assert_eq!(fixture.registry.get("w1").unwrap().current_load, 1);
    }
}
