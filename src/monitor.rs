//! # Liveness Monitor
//!
//! Periodic scans for two failure modes the request path cannot observe:
//! workers that stopped heartbeating, and tasks that ran past their
//! execution budget. Both route into the retry handler, so recovery follows
//! the same budget and backoff rules as any other failure.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, warn};

use crate::config::OrchestratorConfig;
use crate::events::{EventPublisher, OrchestratorEvent};
use crate::models::WorkerStatus;
use crate::registry::WorkerRegistry;
use crate::retry::RetryHandler;
use crate::store::TaskStore;

pub struct LivenessMonitor {
    store: Arc<TaskStore>,
    registry: Arc<WorkerRegistry>,
    retry: Arc<RetryHandler>,
    publisher: Arc<EventPublisher>,
    heartbeat_timeout_seconds: u64,
}

impl LivenessMonitor {
    pub fn new(
        config: &OrchestratorConfig,
        store: Arc<TaskStore>,
        registry: Arc<WorkerRegistry>,
        retry: Arc<RetryHandler>,
        publisher: Arc<EventPublisher>,
    ) -> Self {
        Self {
            store,
            registry,
            retry,
            publisher,
            heartbeat_timeout_seconds: config.worker_heartbeat_timeout,
        }
    }

    /// Mark workers silent beyond the heartbeat timeout as lost and reclaim
    /// every task they held. Returns the node ids marked lost this scan.
    ///
    /// Per-task recovery errors are logged and do not stop the scan; a
    /// half-reclaimed worker is finished by the next pass.
    pub fn scan_workers(&self) -> Vec<String> {
        let now = Utc::now();
        let cutoff = chrono::Duration::seconds(self.heartbeat_timeout_seconds as i64);
        let mut lost = Vec::new();

        for worker in self.registry.list() {
            if worker.status != WorkerStatus::Active {
                continue;
            }
            if now - worker.last_heartbeat <= cutoff {
                continue;
            }

            if let Err(error) = self.registry.mark_lost(&worker.node_id) {
                error!(node_id = %worker.node_id, %error, "failed to mark worker lost");
                continue;
            }
            warn!(
                node_id = %worker.node_id,
                last_heartbeat = %worker.last_heartbeat,
                "worker lost"
            );
            self.publisher.emit(OrchestratorEvent::WorkerLost {
                node_id: worker.node_id.clone(),
            });

            let reason = format!("worker lost: {}", worker.node_id);
            for task in self.store.active_on_worker(&worker.node_id) {
                if let Err(error) = self.retry.handle_failure(task.id, &reason) {
                    error!(task_id = %task.id, %error, "failed to reclaim task from lost worker");
                }
            }
            lost.push(worker.node_id);
        }
        lost
    }

    /// Fail every in-progress task that has exceeded its execution budget.
    /// Returns how many tasks were routed to the retry handler.
    pub fn scan_timeouts(&self) -> usize {
        let now = Utc::now();
        let mut timed_out = 0usize;
        for task in self.store.timed_out_tasks(now) {
            let reason = format!(
                "execution timed out after {} seconds",
                task.timeout_seconds
            );
            warn!(task_id = %task.id, timeout_seconds = task.timeout_seconds, "task timed out");
            match self.retry.handle_failure(task.id, &reason) {
                Ok(()) => timed_out += 1,
                Err(error) => {
                    error!(task_id = %task.id, %error, "failed to route task timeout")
                }
            }
        }
        timed_out
    }
}
