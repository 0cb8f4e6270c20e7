use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

use crate::config::OrchestratorConfig;

/// The kinds of OSINT work a task can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    KeywordExpansion,
    SourceDiscovery,
    ContentCollection,
    SentimentAnalysis,
    AlertGeneration,
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KeywordExpansion => write!(f, "keyword_expansion"),
            Self::SourceDiscovery => write!(f, "source_discovery"),
            Self::ContentCollection => write!(f, "content_collection"),
            Self::SentimentAnalysis => write!(f, "sentiment_analysis"),
            Self::AlertGeneration => write!(f, "alert_generation"),
        }
    }
}

impl std::str::FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "keyword_expansion" => Ok(Self::KeywordExpansion),
            "source_discovery" => Ok(Self::SourceDiscovery),
            "content_collection" => Ok(Self::ContentCollection),
            "sentiment_analysis" => Ok(Self::SentimentAnalysis),
            "alert_generation" => Ok(Self::AlertGeneration),
            _ => Err(format!("Invalid task type: {s}")),
        }
    }
}

impl Default for TaskType {
    fn default() -> Self {
        Self::ContentCollection
    }
}

/// Submission priority, mapped to a numeric base score by the queue manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    Medium,
    High,
    Critical,
}

impl Default for TaskPriority {
    fn default() -> Self {
        Self::Medium
    }
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

impl std::str::FromStr for TaskPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            _ => Err(format!("Invalid task priority: {s}")),
        }
    }
}

/// Task lifecycle states.
///
/// `Pending` is the only initial state. Legal transitions:
/// `Pending -> Assigned -> InProgress -> Completed`;
/// `Pending`/`Assigned`/`InProgress -> Failed`; `Failed -> Pending`
/// (retry re-queue); any non-terminal state `-> Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Assigned,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Check if this is a terminal state. `Failed` counts as terminal here;
    /// only the retry handler may revive a failed task, and only while the
    /// retry budget lasts.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Check if a worker currently holds this task.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Assigned | Self::InProgress)
    }

    /// Legality table for status transitions. The store's compare-and-swap
    /// consults this before applying a move.
    pub fn can_transition_to(&self, target: TaskStatus) -> bool {
        matches!(
            (self, target),
            (Self::Pending, TaskStatus::Assigned)
                | (Self::Pending, TaskStatus::Failed)
                | (Self::Pending, TaskStatus::Cancelled)
                | (Self::Assigned, TaskStatus::InProgress)
                | (Self::Assigned, TaskStatus::Failed)
                | (Self::Assigned, TaskStatus::Cancelled)
                | (Self::InProgress, TaskStatus::Completed)
                | (Self::InProgress, TaskStatus::Failed)
                | (Self::InProgress, TaskStatus::Cancelled)
                | (Self::Failed, TaskStatus::Pending)
        )
    }
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Assigned => write!(f, "assigned"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "assigned" => Ok(Self::Assigned),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid task status: {s}")),
        }
    }
}

/// A unit of OSINT work with a type, priority, and lifecycle status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub task_type: TaskType,
    /// Semantic payload: keywords this task targets.
    pub keywords: Vec<String>,
    /// Semantic payload: sources this task reads.
    pub sources: Vec<String>,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    /// Worker node currently holding the task. Set iff `status` is
    /// `Assigned` or `InProgress`.
    pub assigned_to: Option<String>,
    /// Task ids that must reach `Completed` before this task is schedulable.
    pub dependencies: Vec<Uuid>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub timeout_seconds: u64,
    /// Hint for completeness checking by downstream consumers.
    pub expected_results: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    /// Opaque caller payload; the scheduler never interprets it.
    pub metadata: HashMap<String, Value>,
}

impl Task {
    /// Build a task record from a submission, filling defaults from config.
    pub fn from_submission(request: NewTask, config: &OrchestratorConfig) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            task_type: request.task_type,
            keywords: request.keywords,
            sources: request.sources,
            priority: request.priority,
            status: TaskStatus::Pending,
            assigned_to: None,
            dependencies: request.dependencies,
            retry_count: 0,
            max_retries: request.max_retries.unwrap_or(config.max_retries_default),
            timeout_seconds: request
                .timeout_seconds
                .unwrap_or(config.task_timeout_default),
            expected_results: request.expected_results,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            error_message: None,
            metadata: request.metadata,
        }
    }

    /// Whether an in-progress task has exceeded its execution budget.
    /// Compared at millisecond precision so detection is not deferred by
    /// truncation to whole seconds.
    pub fn timed_out(&self, now: DateTime<Utc>) -> bool {
        match (self.status, self.started_at) {
            (TaskStatus::InProgress, Some(started)) => {
                let budget_ms = i64::try_from(self.timeout_seconds.saturating_mul(1000))
                    .unwrap_or(i64::MAX);
                (now - started).num_milliseconds() > budget_ms
            }
            _ => false,
        }
    }
}

/// Task submission payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewTask {
    pub task_type: TaskType,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub priority: TaskPriority,
    #[serde(default)]
    pub dependencies: Vec<Uuid>,
    /// Defaults to `task_timeout_default` from config when absent.
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    /// Defaults to `max_retries_default` from config when absent.
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub expected_results: u32,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl NewTask {
    pub fn new(task_type: TaskType) -> Self {
        Self {
            task_type,
            ..Default::default()
        }
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_keywords(mut self, keywords: Vec<String>) -> Self {
        self.keywords = keywords;
        self
    }

    pub fn with_dependencies(mut self, dependencies: Vec<Uuid>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_timeout_seconds(mut self, timeout_seconds: u64) -> Self {
        self.timeout_seconds = Some(timeout_seconds);
        self
    }
}

/// A (possibly partial) result a worker reported for a task. Many results
/// may attach to one task; results never change task status by themselves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub id: Uuid,
    pub task_id: Uuid,
    pub result_type: String,
    pub data: Value,
    pub quality_score: f64,
    pub confidence_score: f64,
    pub created_at: DateTime<Utc>,
}

/// Filter for task listings. All fields are conjunctive.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub assigned_to: Option<String>,
}

impl TaskFilter {
    pub fn matches(&self, task: &Task) -> bool {
        self.status.map_or(true, |s| task.status == s)
            && self.priority.map_or(true, |p| task.priority == p)
            && self
                .assigned_to
                .as_ref()
                .map_or(true, |w| task.assigned_to.as_deref() == Some(w.as_str()))
    }
}
