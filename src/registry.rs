//! # Worker Registry
//!
//! Membership and capacity accounting for collector nodes. `current_load`
//! here is the reservation count maintained by the scheduler and release
//! paths; workers do not report their own load. Reservation and release run
//! under the per-entry lock so capacity checks and the increment are one
//! atomic step.

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::error::{OrchestratorError, Result};
use crate::models::{WorkerNode, WorkerRegistration, WorkerStatus};

#[derive(Debug, Default)]
pub struct WorkerRegistry {
    workers: DashMap<String, WorkerNode>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent upsert keyed by `node_id`. Re-registration revives a lost
    /// worker and resets its load, since any tasks it held were reclaimed
    /// when it was marked lost. A live worker cannot shrink
    /// `max_concurrent_tasks` below its current reservations; it must drain
    /// first, so `current_load <= max_concurrent_tasks` always holds.
    pub fn register(&self, registration: WorkerRegistration) -> Result<WorkerNode> {
        let now = Utc::now();
        let node = match self.workers.entry(registration.node_id.clone()) {
            Entry::Occupied(mut occupied) => {
                let worker = occupied.get_mut();
                if worker.status == WorkerStatus::Lost {
                    info!(node_id = %worker.node_id, "lost worker re-registered");
                    worker.current_load = 0;
                }
                if registration.max_concurrent_tasks < worker.current_load {
                    return Err(OrchestratorError::Validation(format!(
                        "worker {} holds {} reservations; cannot re-register with max_concurrent_tasks {}",
                        worker.node_id, worker.current_load, registration.max_concurrent_tasks
                    )));
                }
                worker.node_type = registration.node_type;
                worker.capabilities = registration.capabilities;
                worker.max_concurrent_tasks = registration.max_concurrent_tasks;
                worker.metadata = registration.metadata;
                worker.status = WorkerStatus::Active;
                worker.last_heartbeat = now;
                worker.updated_at = now;
                worker.clone()
            }
            Entry::Vacant(vacant) => vacant
                .insert(WorkerNode {
                    node_id: registration.node_id.clone(),
                    node_type: registration.node_type,
                    capabilities: registration.capabilities,
                    max_concurrent_tasks: registration.max_concurrent_tasks,
                    current_load: 0,
                    status: WorkerStatus::Active,
                    last_heartbeat: now,
                    registered_at: now,
                    updated_at: now,
                    metadata: registration.metadata,
                })
                .clone(),
        };
        debug!(node_id = %node.node_id, capabilities = node.capabilities.len(), "worker registered");
        Ok(node)
    }

    /// Refresh liveness. A heartbeat from a `Lost` worker revives it; its
    /// load stays as the registry's reservation count says.
    pub fn heartbeat(&self, node_id: &str) -> Result<()> {
        let mut worker = self
            .workers
            .get_mut(node_id)
            .ok_or_else(|| OrchestratorError::UnknownWorker {
                node_id: node_id.to_string(),
            })?;
        if worker.status == WorkerStatus::Lost {
            info!(node_id, "worker revived by heartbeat");
            worker.status = WorkerStatus::Active;
        }
        worker.last_heartbeat = Utc::now();
        worker.updated_at = worker.last_heartbeat;
        Ok(())
    }

    /// Take one unit of capacity on the worker. Fails when the worker is
    /// unknown, not schedulable, or already full.
    pub fn reserve(&self, node_id: &str) -> Result<()> {
        let mut worker = self
            .workers
            .get_mut(node_id)
            .ok_or_else(|| OrchestratorError::UnknownWorker {
                node_id: node_id.to_string(),
            })?;
        if worker.status != WorkerStatus::Active || !worker.has_capacity() {
            return Err(OrchestratorError::WorkerCapacity {
                node_id: node_id.to_string(),
            });
        }
        worker.current_load += 1;
        worker.updated_at = Utc::now();
        Ok(())
    }

    /// Return one unit of capacity. Saturates at zero; an unknown worker is
    /// logged and ignored since releases arrive from cleanup paths that may
    /// outlive the worker record.
    pub fn release(&self, node_id: &str) {
        match self.workers.get_mut(node_id) {
            Some(mut worker) => {
                if worker.current_load == 0 {
                    warn!(node_id, "release on idle worker ignored");
                } else {
                    worker.current_load -= 1;
                }
                worker.updated_at = Utc::now();
            }
            None => warn!(node_id, "release for unknown worker ignored"),
        }
    }

    /// Mark a worker lost. Its reservations are settled by the caller as it
    /// reclaims the worker's tasks, so the load is left alone here.
    pub fn mark_lost(&self, node_id: &str) -> Result<()> {
        let mut worker = self
            .workers
            .get_mut(node_id)
            .ok_or_else(|| OrchestratorError::UnknownWorker {
                node_id: node_id.to_string(),
            })?;
        worker.status = WorkerStatus::Lost;
        worker.updated_at = Utc::now();
        Ok(())
    }

    pub fn get(&self, node_id: &str) -> Option<WorkerNode> {
        self.workers.get(node_id).map(|entry| entry.clone())
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.workers.contains_key(node_id)
    }

    pub fn list(&self) -> Vec<WorkerNode> {
        let mut workers: Vec<WorkerNode> =
            self.workers.iter().map(|entry| entry.clone()).collect();
        workers.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        workers
    }

    pub fn active_count(&self) -> usize {
        self.workers
            .iter()
            .filter(|entry| entry.status == WorkerStatus::Active)
            .count()
    }
}
