//! # OSINT Orchestrator
//!
//! Distributed task orchestration core for OSINT collection pipelines:
//! priority queueing with aging, dependency-aware scheduling, capability
//! matched worker assignment, heartbeat liveness tracking, and retry with
//! backoff.
//!
//! ## Architecture
//!
//! The crate is organized around an explicit [`TaskOrchestrator`] context
//! that owns the moving parts:
//!
//! - **Store** ([`store`]): concurrent task lifecycle state with
//!   compare-and-swap transitions.
//! - **Graph** ([`graph`]): dependency edges, cycle rejection, unblocking
//!   and cascade cancellation.
//! - **Queue** ([`queue`]): score-ordered ready queue with starvation
//!   avoiding aging.
//! - **Registry** ([`registry`]): worker membership and reservation-based
//!   load accounting.
//! - **Scheduler** ([`scheduler`]): serialized pop-and-assign passes with
//!   capability matching and load balancing.
//! - **Retry** ([`retry`]): budgeted retries with backoff, terminal failure
//!   cascade.
//! - **Monitor** ([`monitor`]): heartbeat and execution-timeout scans.
//! - **Events** ([`events`]): broadcast lifecycle notifications.
//!
//! ## Example
//!
//! ```no_run
//! use osint_orchestrator::{
//!     NewTask, OrchestratorConfig, TaskOrchestrator, TaskType, WorkerRegistration,
//! };
//! use std::sync::Arc;
//!
//! # async fn run() -> osint_orchestrator::Result<()> {
//! let orchestrator = Arc::new(TaskOrchestrator::new(OrchestratorConfig::default()));
//! let _background = orchestrator.spawn_background_tasks();
//!
//! orchestrator
//!     .register_worker(WorkerRegistration::new(
//!         "collector-1",
//!         "collector",
//!         [TaskType::ContentCollection],
//!         4,
//!     ))
//!     .await?;
//!
//! let task = orchestrator
//!     .submit_task(NewTask::new(TaskType::ContentCollection))
//!     .await?;
//! println!("submitted {}", task.id);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod graph;
pub mod logging;
pub mod models;
pub mod monitor;
pub mod orchestrator;
pub mod queue;
pub mod registry;
pub mod retry;
pub mod scheduler;
pub mod store;

pub use config::OrchestratorConfig;
pub use error::{OrchestratorError, Result};
pub use events::{EventPublisher, EventSink, OrchestratorEvent, PublishedEvent};
pub use models::{
    NewTask, Task, TaskFilter, TaskPriority, TaskResult, TaskStatus, TaskType, WorkerNode,
    WorkerRegistration, WorkerStatus,
};
pub use orchestrator::{BackgroundTasks, QueueStats, TaskOrchestrator, TaskUpdate};
pub use retry::BackoffPolicy;
pub use store::TaskStats;
