//! Data model for the orchestration core.
//!
//! Tasks, task results, and worker nodes are plain structs with tagged
//! enums for `status`/`priority`/`task_type`; `metadata` stays an open
//! key-value map since it is genuinely schema-less payload from callers.

pub mod task;
pub mod worker;

pub use task::{NewTask, Task, TaskFilter, TaskPriority, TaskResult, TaskStatus, TaskType};
pub use worker::{WorkerNode, WorkerRegistration, WorkerStatus};
