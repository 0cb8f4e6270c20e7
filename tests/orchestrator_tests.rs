//! End-to-end orchestration scenarios driving the full context object:
//! submission, dependency gating, assignment, retry, cascade cancellation,
//! worker loss, and backpressure.

use std::sync::Arc;

use osint_orchestrator::{
    BackoffPolicy, NewTask, OrchestratorConfig, OrchestratorError, TaskOrchestrator,
    TaskPriority, TaskStatus, TaskType, TaskUpdate, WorkerRegistration, WorkerStatus,
};
use uuid::Uuid;

fn test_config() -> OrchestratorConfig {
    let mut config = OrchestratorConfig::default();
    // Retries become runnable immediately so tests stay deterministic.
    config.backoff_policy = BackoffPolicy::Fixed;
    config.backoff_base_seconds = 0;
    config
}

fn orchestrator() -> Arc<TaskOrchestrator> {
    Arc::new(TaskOrchestrator::new(test_config()))
}

async fn register_collector(
    orchestrator: &TaskOrchestrator,
    node_id: &str,
    slots: u32,
) {
    orchestrator
        .register_worker(WorkerRegistration::new(
            node_id,
            "collector",
            [
                TaskType::ContentCollection,
                TaskType::SentimentAnalysis,
                TaskType::SourceDiscovery,
            ],
            slots,
        ))
        .await
        .unwrap();
}

/// Drive an assigned task through in-progress to completion, as the worker
/// would over the wire.
async fn run_to_completion(orchestrator: &TaskOrchestrator, task_id: Uuid, node_id: &str) {
    orchestrator
        .update_task(
            task_id,
            TaskUpdate {
                status: Some(TaskStatus::InProgress),
                assigned_to: Some(node_id.to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    orchestrator
        .update_task(
            task_id,
            TaskUpdate {
                status: Some(TaskStatus::Completed),
                assigned_to: Some(node_id.to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn higher_priority_tasks_assigned_first() {
    let orchestrator = orchestrator();

    // Submit with no workers so nothing is assigned yet.
    let low = orchestrator
        .submit_task(NewTask::new(TaskType::ContentCollection).with_priority(TaskPriority::Low))
        .await
        .unwrap();
    let critical = orchestrator
        .submit_task(
            NewTask::new(TaskType::ContentCollection).with_priority(TaskPriority::Critical),
        )
        .await
        .unwrap();

    // One slot: only the critical task fits.
    register_collector(&orchestrator, "w1", 1).await;

    assert_eq!(
        orchestrator.get_task(critical.id).unwrap().status,
        TaskStatus::Assigned
    );
    assert_eq!(
        orchestrator.get_task(low.id).unwrap().status,
        TaskStatus::Pending
    );
}

#[tokio::test]
async fn equal_priority_is_fifo() {
    let orchestrator = orchestrator();
    let first = orchestrator
        .submit_task(NewTask::new(TaskType::ContentCollection))
        .await
        .unwrap();
    // Equal scores fall back to submission order.
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    let second = orchestrator
        .submit_task(NewTask::new(TaskType::ContentCollection))
        .await
        .unwrap();

    register_collector(&orchestrator, "w1", 1).await;
    assert_eq!(
        orchestrator.get_task(first.id).unwrap().status,
        TaskStatus::Assigned
    );
    assert_eq!(
        orchestrator.get_task(second.id).unwrap().status,
        TaskStatus::Pending
    );
}

#[tokio::test]
async fn blocked_task_waits_for_dependency() {
    let orchestrator = orchestrator();
    register_collector(&orchestrator, "w1", 4).await;

    let dep = orchestrator
        .submit_task(
            NewTask::new(TaskType::ContentCollection).with_priority(TaskPriority::Critical),
        )
        .await
        .unwrap();
    let blocked = orchestrator
        .submit_task(
            NewTask::new(TaskType::SentimentAnalysis)
                .with_priority(TaskPriority::Low)
                .with_dependencies(vec![dep.id]),
        )
        .await
        .unwrap();

    // Plenty of capacity, but the dependent must not be scheduled.
    assert_eq!(
        orchestrator.get_task(dep.id).unwrap().status,
        TaskStatus::Assigned
    );
    assert_eq!(
        orchestrator.get_task(blocked.id).unwrap().status,
        TaskStatus::Pending
    );

    run_to_completion(&orchestrator, dep.id, "w1").await;

    // Completion promoted and assigned the dependent in the same call.
    assert_eq!(
        orchestrator.get_task(blocked.id).unwrap().status,
        TaskStatus::Assigned
    );
}

#[tokio::test]
async fn critical_task_gated_behind_low_priority_dependency() {
    let orchestrator = orchestrator();
    register_collector(&orchestrator, "w1", 1).await;

    let low_dep = orchestrator
        .submit_task(NewTask::new(TaskType::ContentCollection).with_priority(TaskPriority::Low))
        .await
        .unwrap();
    let critical = orchestrator
        .submit_task(
            NewTask::new(TaskType::SentimentAnalysis)
                .with_priority(TaskPriority::Critical)
                .with_dependencies(vec![low_dep.id]),
        )
        .await
        .unwrap();

    // The low-priority dependency runs first despite the score gap.
    assert_eq!(
        orchestrator.get_task(low_dep.id).unwrap().status,
        TaskStatus::Assigned
    );
    run_to_completion(&orchestrator, low_dep.id, "w1").await;
    assert_eq!(
        orchestrator.get_task(critical.id).unwrap().status,
        TaskStatus::Assigned
    );
}

#[tokio::test]
async fn unknown_dependency_rejected_without_trace() {
    let orchestrator = orchestrator();
    let ghost = Uuid::new_v4();
    let result = orchestrator
        .submit_task(NewTask::new(TaskType::ContentCollection).with_dependencies(vec![ghost]))
        .await;
    assert!(matches!(result, Err(OrchestratorError::Validation(_))));
    assert_eq!(orchestrator.queue_stats().tasks.total_tasks, 0);
}

#[tokio::test]
async fn queue_backpressure_at_capacity() {
    let mut config = test_config();
    config.max_queue_size = 2;
    let orchestrator = Arc::new(TaskOrchestrator::new(config));

    orchestrator
        .submit_task(NewTask::new(TaskType::ContentCollection))
        .await
        .unwrap();
    orchestrator
        .submit_task(NewTask::new(TaskType::ContentCollection))
        .await
        .unwrap();

    let rejected = orchestrator
        .submit_task(NewTask::new(TaskType::ContentCollection))
        .await;
    assert!(matches!(
        rejected,
        Err(OrchestratorError::QueueFull { capacity: 2 })
    ));
    // The rejected submission left nothing behind.
    assert_eq!(orchestrator.queue_stats().tasks.total_tasks, 2);
    assert_eq!(orchestrator.queue_stats().queued_tasks, 2);
}

#[tokio::test]
async fn single_slot_worker_serializes_execution() {
    let orchestrator = orchestrator();
    register_collector(&orchestrator, "w1", 1).await;

    let first = orchestrator
        .submit_task(NewTask::new(TaskType::ContentCollection))
        .await
        .unwrap();
    let second = orchestrator
        .submit_task(NewTask::new(TaskType::ContentCollection))
        .await
        .unwrap();

    let worker = orchestrator
        .list_workers()
        .into_iter()
        .find(|w| w.node_id == "w1")
        .unwrap();
    assert_eq!(worker.current_load, 1);
    assert_eq!(
        orchestrator.get_task(second.id).unwrap().status,
        TaskStatus::Pending
    );

    run_to_completion(&orchestrator, first.id, "w1").await;

    // The slot freed by completion went straight to the waiting task.
    assert_eq!(
        orchestrator.get_task(second.id).unwrap().status,
        TaskStatus::Assigned
    );
    let worker = orchestrator
        .list_workers()
        .into_iter()
        .find(|w| w.node_id == "w1")
        .unwrap();
    assert_eq!(worker.current_load, 1);
}

#[tokio::test]
async fn load_never_exceeds_max_concurrent_tasks() {
    let orchestrator = orchestrator();
    register_collector(&orchestrator, "w1", 3).await;

    for _ in 0..10 {
        orchestrator
            .submit_task(NewTask::new(TaskType::ContentCollection))
            .await
            .unwrap();
    }
    // Extra passes must not over-assign.
    orchestrator.run_scheduling_pass().await.unwrap();
    orchestrator.run_scheduling_pass().await.unwrap();

    let worker = orchestrator
        .list_workers()
        .into_iter()
        .find(|w| w.node_id == "w1")
        .unwrap();
    assert_eq!(worker.current_load, 3);
    assert_eq!(orchestrator.assignments_for("w1").unwrap().len(), 3);
}

#[tokio::test]
async fn concurrent_passes_never_double_assign() {
    let orchestrator = orchestrator();
    register_collector(&orchestrator, "w1", 5).await;
    register_collector(&orchestrator, "w2", 5).await;

    let mut task_ids = Vec::new();
    for _ in 0..10 {
        let task = orchestrator
            .submit_task(NewTask::new(TaskType::ContentCollection))
            .await
            .unwrap();
        task_ids.push(task.id);
    }

    // Hammer the pass from several tasks at once.
    let mut joins = Vec::new();
    for _ in 0..8 {
        let orchestrator = orchestrator.clone();
        joins.push(tokio::spawn(async move {
            orchestrator.run_scheduling_pass().await.unwrap();
        }));
    }
    for join in joins {
        join.await.unwrap();
    }

    let mut total_load = 0;
    for worker in orchestrator.list_workers() {
        assert!(worker.current_load <= worker.max_concurrent_tasks);
        total_load += worker.current_load as usize;
    }
    let assigned = task_ids
        .iter()
        .filter(|id| orchestrator.get_task(**id).unwrap().status == TaskStatus::Assigned)
        .count();
    assert_eq!(assigned, 10);
    assert_eq!(total_load, 10);
    // Every task is on exactly one worker.
    let w1 = orchestrator.assignments_for("w1").unwrap();
    let w2 = orchestrator.assignments_for("w2").unwrap();
    assert_eq!(w1.len() + w2.len(), 10);
    for task in w1.iter().chain(w2.iter()) {
        assert!(task_ids.contains(&task.id));
    }
}

#[tokio::test]
async fn failure_retries_until_budget_exhausted_then_stays_failed() {
    let orchestrator = orchestrator();
    register_collector(&orchestrator, "w1", 2).await;

    let task = orchestrator
        .submit_task(NewTask::new(TaskType::ContentCollection).with_max_retries(1))
        .await
        .unwrap();
    assert_eq!(
        orchestrator.get_task(task.id).unwrap().status,
        TaskStatus::Assigned
    );

    // First failure: one retry left, so the task comes back and (zero
    // backoff) is reassigned by the pass inside update_task.
    orchestrator
        .update_task(
            task.id,
            TaskUpdate {
                status: Some(TaskStatus::Failed),
                assigned_to: Some("w1".to_string()),
                error_message: Some("source blocked us".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let state = orchestrator.get_task(task.id).unwrap();
    assert_eq!(state.retry_count, 1);
    assert_eq!(state.status, TaskStatus::Assigned);

    // Second failure exhausts the budget.
    orchestrator
        .update_task(
            task.id,
            TaskUpdate {
                status: Some(TaskStatus::Failed),
                assigned_to: Some("w1".to_string()),
                error_message: Some("source blocked us again".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let state = orchestrator.get_task(task.id).unwrap();
    assert_eq!(state.status, TaskStatus::Failed);
    assert_eq!(state.retry_count, 1);
    assert_eq!(state.error_message.as_deref(), Some("source blocked us again"));

    // Terminal failure is final: further passes never resurrect it.
    orchestrator.run_scheduling_pass().await.unwrap();
    assert_eq!(
        orchestrator.get_task(task.id).unwrap().status,
        TaskStatus::Failed
    );
    assert_eq!(orchestrator.queue_stats().queued_tasks, 0);
}

#[tokio::test]
async fn terminal_failure_cascades_to_transitive_dependents_only() {
    let orchestrator = orchestrator();

    let root = orchestrator
        .submit_task(NewTask::new(TaskType::ContentCollection).with_max_retries(0))
        .await
        .unwrap();
    let child = orchestrator
        .submit_task(NewTask::new(TaskType::SentimentAnalysis).with_dependencies(vec![root.id]))
        .await
        .unwrap();
    let grandchild = orchestrator
        .submit_task(
            NewTask::new(TaskType::AlertGeneration).with_dependencies(vec![child.id]),
        )
        .await
        .unwrap();
    let unrelated = orchestrator
        .submit_task(NewTask::new(TaskType::SourceDiscovery))
        .await
        .unwrap();

    register_collector(&orchestrator, "w1", 1).await;
    // Root got the only slot; fail it for good.
    orchestrator
        .update_task(
            root.id,
            TaskUpdate {
                status: Some(TaskStatus::Failed),
                assigned_to: Some("w1".to_string()),
                error_message: Some("account banned".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(
        orchestrator.get_task(root.id).unwrap().status,
        TaskStatus::Failed
    );
    assert_eq!(
        orchestrator.get_task(child.id).unwrap().status,
        TaskStatus::Cancelled
    );
    assert_eq!(
        orchestrator.get_task(grandchild.id).unwrap().status,
        TaskStatus::Cancelled
    );
    // Independent work is untouched (and picked up the freed slot).
    assert_ne!(
        orchestrator.get_task(unrelated.id).unwrap().status,
        TaskStatus::Cancelled
    );
}

#[tokio::test]
async fn cancel_task_cascades_and_frees_capacity() {
    let orchestrator = orchestrator();
    register_collector(&orchestrator, "w1", 4).await;

    let root = orchestrator
        .submit_task(NewTask::new(TaskType::ContentCollection))
        .await
        .unwrap();
    let child = orchestrator
        .submit_task(NewTask::new(TaskType::SentimentAnalysis).with_dependencies(vec![root.id]))
        .await
        .unwrap();

    orchestrator.cancel_task(root.id, "operator abort").await.unwrap();

    let root_state = orchestrator.get_task(root.id).unwrap();
    assert_eq!(root_state.status, TaskStatus::Cancelled);
    assert_eq!(root_state.error_message.as_deref(), Some("operator abort"));
    assert_eq!(
        orchestrator.get_task(child.id).unwrap().status,
        TaskStatus::Cancelled
    );
    let worker = orchestrator
        .list_workers()
        .into_iter()
        .find(|w| w.node_id == "w1")
        .unwrap();
    assert_eq!(worker.current_load, 0);

    // Cancelling again is an invalid transition.
    assert!(matches!(
        orchestrator.cancel_task(root.id, "twice").await,
        Err(OrchestratorError::InvalidTransition { .. })
    ));
}

#[tokio::test]
async fn lost_worker_tasks_reclaimed_in_one_scan() {
    let mut config = test_config();
    config.worker_heartbeat_timeout = 0;
    let orchestrator = Arc::new(TaskOrchestrator::new(config));
    register_collector(&orchestrator, "w1", 2).await;

    let task = orchestrator
        .submit_task(NewTask::new(TaskType::ContentCollection))
        .await
        .unwrap();
    assert_eq!(
        orchestrator.get_task(task.id).unwrap().status,
        TaskStatus::Assigned
    );

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let lost = orchestrator.scan_workers();
    assert_eq!(lost, vec!["w1".to_string()]);

    let state = orchestrator.get_task(task.id).unwrap();
    assert_eq!(state.status, TaskStatus::Pending);
    assert_eq!(state.retry_count, 1);
    assert!(state.assigned_to.is_none());

    // A fresh worker picks the reclaimed task up.
    register_collector(&orchestrator, "w2", 2).await;
    assert_eq!(
        orchestrator.get_task(task.id).unwrap().assigned_to.as_deref(),
        Some("w2")
    );
}

#[tokio::test]
async fn heartbeat_keeps_worker_alive_and_revives_lost() {
    let mut config = test_config();
    config.worker_heartbeat_timeout = 0;
    let orchestrator = Arc::new(TaskOrchestrator::new(config));
    register_collector(&orchestrator, "w1", 2).await;

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    orchestrator.scan_workers();
    assert_eq!(
        orchestrator.list_workers()[0].status,
        WorkerStatus::Lost
    );

    orchestrator.worker_heartbeat("w1").unwrap();
    assert_eq!(
        orchestrator.list_workers()[0].status,
        WorkerStatus::Active
    );

    assert!(matches!(
        orchestrator.worker_heartbeat("ghost"),
        Err(OrchestratorError::UnknownWorker { .. })
    ));
}

#[tokio::test]
async fn timed_out_task_recovered_by_scan() {
    let orchestrator = orchestrator();
    register_collector(&orchestrator, "w1", 2).await;

    let task = orchestrator
        .submit_task(NewTask::new(TaskType::ContentCollection).with_timeout_seconds(1))
        .await
        .unwrap();
    orchestrator
        .update_task(
            task.id,
            TaskUpdate {
                status: Some(TaskStatus::InProgress),
                assigned_to: Some("w1".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(1_100)).await;
    assert_eq!(orchestrator.scan_timeouts(), 1);

    let state = orchestrator.get_task(task.id).unwrap();
    assert_eq!(state.retry_count, 1);
    assert!(state.status == TaskStatus::Pending || state.status == TaskStatus::Assigned);
}

#[tokio::test]
async fn results_accumulate_without_touching_status() {
    let orchestrator = orchestrator();
    register_collector(&orchestrator, "w1", 2).await;
    let task = orchestrator
        .submit_task(NewTask::new(TaskType::ContentCollection))
        .await
        .unwrap();

    let result = osint_orchestrator::TaskResult {
        id: Uuid::new_v4(),
        task_id: task.id,
        result_type: "article".to_string(),
        data: serde_json::json!({"url": "https://example.com/post/1"}),
        quality_score: 0.7,
        confidence_score: 0.9,
        created_at: chrono::Utc::now(),
    };
    orchestrator.submit_result(result.clone()).unwrap();
    orchestrator.submit_result(osint_orchestrator::TaskResult {
        id: Uuid::new_v4(),
        ..result.clone()
    }).unwrap();

    assert_eq!(orchestrator.results_for(task.id).unwrap().len(), 2);
    assert_eq!(
        orchestrator.get_task(task.id).unwrap().status,
        TaskStatus::Assigned
    );

    // Score range validation.
    let bad = osint_orchestrator::TaskResult {
        id: Uuid::new_v4(),
        quality_score: 1.5,
        ..result
    };
    assert!(matches!(
        orchestrator.submit_result(bad),
        Err(OrchestratorError::Validation(_))
    ));
}

#[tokio::test]
async fn update_from_wrong_worker_rejected() {
    let orchestrator = orchestrator();
    register_collector(&orchestrator, "w1", 2).await;
    let task = orchestrator
        .submit_task(NewTask::new(TaskType::ContentCollection))
        .await
        .unwrap();

    let result = orchestrator
        .update_task(
            task.id,
            TaskUpdate {
                status: Some(TaskStatus::InProgress),
                assigned_to: Some("intruder".to_string()),
                ..Default::default()
            },
        )
        .await;
    assert!(matches!(result, Err(OrchestratorError::Validation(_))));
    assert_eq!(
        orchestrator.get_task(task.id).unwrap().status,
        TaskStatus::Assigned
    );
}

#[tokio::test]
async fn lifecycle_events_emitted_in_order() {
    let orchestrator = orchestrator();
    let mut events = orchestrator.subscribe_events();

    register_collector(&orchestrator, "w1", 2).await;
    let task = orchestrator
        .submit_task(NewTask::new(TaskType::ContentCollection))
        .await
        .unwrap();
    run_to_completion(&orchestrator, task.id, "w1").await;

    let mut names = Vec::new();
    while let Ok(published) = events.try_recv() {
        names.push(published.event.name().to_string());
    }
    assert_eq!(
        names,
        vec![
            "worker.registered",
            "task.created",
            "task.assigned",
            "task.completed"
        ]
    );
}

#[tokio::test]
async fn queue_stats_reflect_store() {
    let orchestrator = orchestrator();
    let pending = orchestrator
        .submit_task(NewTask::new(TaskType::ContentCollection))
        .await
        .unwrap();
    register_collector(&orchestrator, "w1", 1).await;
    let waiting = orchestrator
        .submit_task(NewTask::new(TaskType::ContentCollection))
        .await
        .unwrap();
    run_to_completion(&orchestrator, pending.id, "w1").await;

    let stats = orchestrator.queue_stats();
    assert_eq!(stats.tasks.total_tasks, 2);
    assert_eq!(stats.tasks.completed_tasks, 1);
    assert_eq!(stats.tasks.assigned_tasks, 1);
    assert_eq!(stats.active_workers, 1);
    assert!(stats.tasks.queue_throughput > 0.0);
    let _ = waiting;
}

#[tokio::test]
async fn background_pass_picks_up_deferred_retry() {
    let mut config = test_config();
    config.scheduler_interval = 1;
    config.priority_recalc_interval = 1;
    config.liveness_scan_interval = 1;
    config.backoff_base_seconds = 1;
    let orchestrator = Arc::new(TaskOrchestrator::new(config));
    let background = orchestrator.spawn_background_tasks();

    register_collector(&orchestrator, "w1", 1).await;
    let task = orchestrator
        .submit_task(NewTask::new(TaskType::ContentCollection))
        .await
        .unwrap();
    orchestrator
        .update_task(
            task.id,
            TaskUpdate {
                status: Some(TaskStatus::Failed),
                assigned_to: Some("w1".to_string()),
                error_message: Some("transient".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    // The retry sits behind a one second backoff, so only a later interval
    // pass can assign it.
    assert_eq!(
        orchestrator.get_task(task.id).unwrap().status,
        TaskStatus::Pending
    );

    let mut assigned = false;
    for _ in 0..50 {
        if orchestrator.get_task(task.id).unwrap().status == TaskStatus::Assigned {
            assigned = true;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
    assert!(assigned);
    drop(background);
}
