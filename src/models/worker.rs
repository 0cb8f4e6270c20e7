use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::models::task::TaskType;

/// Worker lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    /// Accepting new assignments.
    Active,
    /// Finishing current work, no new assignments.
    Draining,
    /// Heartbeat silence exceeded the timeout; tasks were reclaimed.
    Lost,
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Draining => write!(f, "draining"),
            Self::Lost => write!(f, "lost"),
        }
    }
}

impl std::str::FromStr for WorkerStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "draining" => Ok(Self::Draining),
            "lost" => Ok(Self::Lost),
            _ => Err(format!("Invalid worker status: {s}")),
        }
    }
}

/// A registered worker process with bounded concurrent capacity.
///
/// `node_id` is a stable identity supplied by the worker on registration;
/// re-registration with the same id is an upsert. Invariant:
/// `0 <= current_load <= max_concurrent_tasks`, maintained exclusively by
/// the registry's reserve/release accounting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerNode {
    pub node_id: String,
    pub node_type: String,
    /// Task types this worker can execute.
    pub capabilities: HashSet<TaskType>,
    pub max_concurrent_tasks: u32,
    /// Count of tasks currently reserved on this worker.
    pub current_load: u32,
    pub status: WorkerStatus,
    pub last_heartbeat: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub metadata: HashMap<String, Value>,
}

impl WorkerNode {
    pub fn has_capacity(&self) -> bool {
        self.current_load < self.max_concurrent_tasks
    }

    pub fn can_execute(&self, task_type: TaskType) -> bool {
        self.capabilities.contains(&task_type)
    }

    /// Eligible to receive an assignment right now.
    pub fn is_schedulable(&self, task_type: TaskType) -> bool {
        self.status == WorkerStatus::Active && self.can_execute(task_type) && self.has_capacity()
    }
}

/// Worker registration payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRegistration {
    pub node_id: String,
    pub node_type: String,
    pub capabilities: HashSet<TaskType>,
    pub max_concurrent_tasks: u32,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl WorkerRegistration {
    pub fn new(
        node_id: impl Into<String>,
        node_type: impl Into<String>,
        capabilities: impl IntoIterator<Item = TaskType>,
        max_concurrent_tasks: u32,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            node_type: node_type.into(),
            capabilities: capabilities.into_iter().collect(),
            max_concurrent_tasks,
            metadata: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worker(load: u32, max: u32) -> WorkerNode {
        let now = Utc::now();
        WorkerNode {
            node_id: "collector-1".to_string(),
            node_type: "collector".to_string(),
            capabilities: [TaskType::ContentCollection].into_iter().collect(),
            max_concurrent_tasks: max,
            current_load: load,
            status: WorkerStatus::Active,
            last_heartbeat: now,
            registered_at: now,
            updated_at: now,
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn test_schedulability() {
        let w = worker(0, 2);
        assert!(w.is_schedulable(TaskType::ContentCollection));
        assert!(!w.is_schedulable(TaskType::SentimentAnalysis));

        let full = worker(2, 2);
        assert!(!full.is_schedulable(TaskType::ContentCollection));

        let mut lost = worker(0, 2);
        lost.status = WorkerStatus::Lost;
        assert!(!lost.is_schedulable(TaskType::ContentCollection));
    }

    #[test]
    fn test_worker_status_round_trip() {
        assert_eq!("lost".parse::<WorkerStatus>().unwrap(), WorkerStatus::Lost);
        assert_eq!(WorkerStatus::Draining.to_string(), "draining");
        assert!("retired".parse::<WorkerStatus>().is_err());
    }
}
