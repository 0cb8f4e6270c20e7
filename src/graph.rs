//! # Dependency Graph
//!
//! Tracks which tasks block which. Edges point from a task to the tasks it
//! depends on (`forward`), with a mirror index from a task to its dependents
//! (`inverse`) so completion and cascade-cancel walks are cheap in both
//! directions.
//!
//! Cycle prevention happens at edge insertion: an edge is rejected when the
//! dependency can already reach the new task, so the graph stays acyclic by
//! construction.

use dashmap::DashMap;
use std::collections::{HashSet, VecDeque};
use uuid::Uuid;

use crate::error::{OrchestratorError, Result};
use crate::models::{Task, TaskStatus};
use crate::store::{CancelOutcome, TaskStore};

#[derive(Debug, Default)]
pub struct DependencyGraph {
    /// task -> tasks it depends on
    forward: DashMap<Uuid, Vec<Uuid>>,
    /// task -> tasks that depend on it
    inverse: DashMap<Uuid, Vec<Uuid>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `task_id` depends on `depends_on`.
    ///
    /// Rejects self-edges and any edge that would close a cycle.
    pub fn add_edge(&self, task_id: Uuid, depends_on: Uuid) -> Result<()> {
        if task_id == depends_on {
            return Err(OrchestratorError::DependencyCycle {
                task_id,
                depends_on,
            });
        }
        if self.reaches(depends_on, task_id) {
            return Err(OrchestratorError::DependencyCycle {
                task_id,
                depends_on,
            });
        }
        self.forward.entry(task_id).or_default().push(depends_on);
        self.inverse.entry(depends_on).or_default().push(task_id);
        Ok(())
    }

    /// Whether `from` can reach `target` following dependency edges.
    fn reaches(&self, from: Uuid, target: Uuid) -> bool {
        let mut seen = HashSet::new();
        let mut stack = vec![from];
        while let Some(node) = stack.pop() {
            if node == target {
                return true;
            }
            if !seen.insert(node) {
                continue;
            }
            if let Some(deps) = self.forward.get(&node) {
                stack.extend(deps.iter().copied());
            }
        }
        false
    }

    pub fn dependencies_of(&self, task_id: Uuid) -> Vec<Uuid> {
        self.forward
            .get(&task_id)
            .map(|deps| deps.clone())
            .unwrap_or_default()
    }

    pub fn dependents_of(&self, task_id: Uuid) -> Vec<Uuid> {
        self.inverse
            .get(&task_id)
            .map(|deps| deps.clone())
            .unwrap_or_default()
    }

    /// A task is unblocked when every dependency has completed. Missing
    /// dependency records count as blocking since their outcome is unknown.
    pub fn is_unblocked(&self, task_id: Uuid, store: &TaskStore) -> bool {
        self.dependencies_of(task_id).iter().all(|dep| {
            store
                .get(*dep)
                .map(|task| task.status == TaskStatus::Completed)
                .unwrap_or(false)
        })
    }

    /// Dependents of `completed` that just became eligible: still pending
    /// and with no other unfinished dependency.
    pub fn on_task_completed(&self, completed: Uuid, store: &TaskStore) -> Vec<Task> {
        self.dependents_of(completed)
            .into_iter()
            .filter_map(|id| store.get(id))
            .filter(|task| task.status == TaskStatus::Pending && self.is_unblocked(task.id, store))
            .collect()
    }

    /// Cancel every transitive dependent of `root`, recording `reason` on
    /// each. Returns the ids actually cancelled with the worker each one
    /// released, so the caller can settle registry reservations. `root`
    /// itself is not touched.
    pub fn cascade_cancel(
        &self,
        root: Uuid,
        store: &TaskStore,
        reason: &str,
    ) -> Result<Vec<(Uuid, Option<String>)>> {
        let mut cancelled = Vec::new();
        let mut seen = HashSet::new();
        seen.insert(root);
        let mut frontier: VecDeque<Uuid> = self.dependents_of(root).into();

        while let Some(id) = frontier.pop_front() {
            if !seen.insert(id) {
                continue;
            }
            if store.contains(id) {
                if let CancelOutcome::Cancelled { released_worker } = store.cancel(id, reason)? {
                    cancelled.push((id, released_worker));
                }
            }
            frontier.extend(self.dependents_of(id));
        }
        Ok(cancelled)
    }

    /// Drop every edge touching `task_id`. Used by submission rollback.
    pub fn remove_task(&self, task_id: Uuid) {
        if let Some((_, deps)) = self.forward.remove(&task_id) {
            for dep in deps {
                if let Some(mut dependents) = self.inverse.get_mut(&dep) {
                    dependents.retain(|id| *id != task_id);
                }
            }
        }
        if let Some((_, dependents)) = self.inverse.remove(&task_id) {
            for dependent in dependents {
                if let Some(mut deps) = self.forward.get_mut(&dependent) {
                    deps.retain(|id| *id != task_id);
                }
            }
        }
    }
}
