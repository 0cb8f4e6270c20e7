//! # Priority Queue
//!
//! Max-heap of ready work keyed by a computed urgency score. The heap and
//! its membership index live under one mutex so enqueue, dequeue, and
//! rescoring stay consistent with each other.
//!
//! ## Stale Entry Handling
//!
//! Rescoring and removal never dig entries out of the heap; they update the
//! membership index and let `dequeue_highest` discard heap entries whose
//! score or presence no longer matches the index. Dequeue also drops
//! entries whose task is no longer pending in the store, so the heap can
//! lag behind lifecycle changes without handing out dead work.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, Result};
use crate::models::{Task, TaskPriority, TaskStatus};
use crate::store::TaskStore;

/// Keywords that mark investigation-critical work. Tasks mentioning any of
/// these get their priority score boosted.
const URGENT_KEYWORDS: [&str; 5] = ["pension", "retire", "annuity", "투자", "연금"];

/// Computes a task's urgency score from its priority class, queue age,
/// keyword content, and fan-in.
#[derive(Debug, Clone)]
pub struct PriorityScorer {
    high_threshold: f64,
    critical_threshold: f64,
    aging_factor: f64,
}

impl PriorityScorer {
    pub fn new(config: &OrchestratorConfig) -> Self {
        Self {
            high_threshold: config.high_priority_threshold,
            critical_threshold: config.critical_priority_threshold,
            aging_factor: config.aging_factor,
        }
    }

    fn base_score(priority: TaskPriority) -> f64 {
        match priority {
            TaskPriority::Low => 1.0,
            TaskPriority::Medium => 10.0,
            TaskPriority::High => 100.0,
            TaskPriority::Critical => 1000.0,
        }
    }

    /// Score a task as of `now`. Monotone in queue age, so a waiting task
    /// never loses score between recalculations.
    pub fn score(&self, task: &Task, now: DateTime<Utc>) -> f64 {
        let mut score = Self::base_score(task.priority);

        // Whole-second granularity keeps scores of near-simultaneous
        // submissions identical, so the created_at tie-break decides.
        let age_hours = (now - task.created_at).num_seconds().max(0) as f64 / 3_600.0;
        score += age_hours * self.aging_factor;

        let urgent = task.keywords.iter().any(|keyword| {
            let lowered = keyword.to_lowercase();
            URGENT_KEYWORDS.iter().any(|marker| lowered.contains(marker))
        });
        if urgent {
            score *= 5.0;
        }

        score += task.dependencies.len() as f64 * 2.0;
        score
    }

    /// Bucket a score against the configured thresholds, for logging and
    /// queue introspection.
    pub fn classify(&self, score: f64) -> &'static str {
        if score >= self.critical_threshold {
            "critical"
        } else if score >= self.high_threshold {
            "high"
        } else {
            "normal"
        }
    }
}

/// Heap entry. Ordering is score-descending with created-at (older first)
/// and task id as tie-breakers so the ordering is total.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub task_id: Uuid,
    pub score: f64,
    pub created_at: DateTime<Utc>,
    /// Entries are invisible to dequeue until this instant. Retry backoff
    /// sets it in the future.
    pub eligible_at: DateTime<Utc>,
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.created_at.cmp(&self.created_at))
            .then_with(|| self.task_id.cmp(&other.task_id))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueueEntry {}

#[derive(Debug, Clone, Copy)]
struct MemberState {
    score: f64,
    eligible_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct QueueInner {
    heap: BinaryHeap<QueueEntry>,
    /// Authoritative membership and current score per queued task. Heap
    /// entries disagreeing with this map are stale and get dropped.
    members: HashMap<Uuid, MemberState>,
}

/// Concurrent priority queue over pending task ids.
#[derive(Debug)]
pub struct TaskQueue {
    inner: Mutex<QueueInner>,
    scorer: PriorityScorer,
    max_size: usize,
}

impl TaskQueue {
    pub fn new(config: &OrchestratorConfig) -> Self {
        Self {
            inner: Mutex::new(QueueInner::default()),
            scorer: PriorityScorer::new(config),
            max_size: config.max_queue_size,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().members.is_empty()
    }

    pub fn contains(&self, task_id: Uuid) -> bool {
        self.inner.lock().members.contains_key(&task_id)
    }

    pub fn scorer(&self) -> &PriorityScorer {
        &self.scorer
    }

    /// Enqueue a newly submitted task, enforcing the capacity bound.
    /// Idempotent for tasks already queued.
    pub fn enqueue(&self, task: &Task) -> Result<()> {
        let now = Utc::now();
        let mut inner = self.inner.lock();
        if inner.members.contains_key(&task.id) {
            return Ok(());
        }
        if inner.members.len() >= self.max_size {
            return Err(OrchestratorError::QueueFull {
                capacity: self.max_size,
            });
        }
        let score = self.scorer.score(task, now);
        Self::push(&mut inner, task, score, now);
        debug!(
            task_id = %task.id,
            score,
            class = self.scorer.classify(score),
            "task enqueued"
        );
        Ok(())
    }

    /// Enqueue bypassing the capacity bound, with an explicit eligibility
    /// instant. Retry backoff and dependency unblocking use this so work
    /// already admitted to the system is never dropped by backpressure.
    pub(crate) fn enqueue_unbounded(&self, task: &Task, eligible_at: DateTime<Utc>) {
        let now = Utc::now();
        let score = self.scorer.score(task, now);
        let mut inner = self.inner.lock();
        Self::push_at(&mut inner, task.id, score, task.created_at, eligible_at);
        debug!(task_id = %task.id, score, %eligible_at, "task re-enqueued");
    }

    fn push(inner: &mut QueueInner, task: &Task, score: f64, eligible_at: DateTime<Utc>) {
        Self::push_at(inner, task.id, score, task.created_at, eligible_at);
    }

    fn push_at(
        inner: &mut QueueInner,
        task_id: Uuid,
        score: f64,
        created_at: DateTime<Utc>,
        eligible_at: DateTime<Utc>,
    ) {
        inner.members.insert(task_id, MemberState { score, eligible_at });
        inner.heap.push(QueueEntry {
            task_id,
            score,
            created_at,
            eligible_at,
        });
    }

    /// Pop the highest-scored entry whose task is still pending and whose
    /// eligibility instant has passed. Deferred entries are put back intact.
    pub fn dequeue_highest(&self, store: &TaskStore) -> Option<QueueEntry> {
        let now = Utc::now();
        let mut inner = self.inner.lock();
        let mut deferred = Vec::new();
        let mut picked = None;

        while let Some(entry) = inner.heap.pop() {
            let current = match inner.members.get(&entry.task_id) {
                Some(state) => *state,
                // Removed or already dequeued; stale heap copy.
                None => continue,
            };
            if current.score.total_cmp(&entry.score) != Ordering::Equal
                || current.eligible_at != entry.eligible_at
            {
                trace!(task_id = %entry.task_id, "dropping stale queue entry");
                continue;
            }
            if entry.eligible_at > now {
                deferred.push(entry);
                continue;
            }
            let still_pending = store
                .get(entry.task_id)
                .map(|task| task.status == TaskStatus::Pending)
                .unwrap_or(false);
            if !still_pending {
                inner.members.remove(&entry.task_id);
                continue;
            }
            inner.members.remove(&entry.task_id);
            picked = Some(entry);
            break;
        }

        for entry in deferred {
            inner.heap.push(entry);
        }
        picked
    }

    /// Put a dequeued entry back, keeping its original score and timing.
    /// Used when no worker could take the task this pass.
    pub fn restore(&self, entry: QueueEntry) {
        let mut inner = self.inner.lock();
        inner.members.insert(
            entry.task_id,
            MemberState {
                score: entry.score,
                eligible_at: entry.eligible_at,
            },
        );
        inner.heap.push(entry);
    }

    /// Drop a task from the queue if present. The heap copy becomes stale
    /// and is discarded on a later dequeue.
    pub fn remove(&self, task_id: Uuid) -> bool {
        self.inner.lock().members.remove(&task_id).is_some()
    }

    /// Rescore one queued task, typically after a priority change.
    pub fn reprioritize(&self, task: &Task) {
        let now = Utc::now();
        let mut inner = self.inner.lock();
        let Some(state) = inner.members.get(&task.id).copied() else {
            return;
        };
        let score = self.scorer.score(task, now);
        Self::push_at(&mut inner, task.id, score, task.created_at, state.eligible_at);
    }

    /// Rebuild the queue with fresh scores, dropping tasks no longer
    /// pending. The periodic aging pass calls this.
    pub fn recalculate(&self, store: &TaskStore) {
        let now = Utc::now();
        let mut inner = self.inner.lock();
        let previous: Vec<(Uuid, MemberState)> =
            inner.members.iter().map(|(id, state)| (*id, *state)).collect();
        inner.heap.clear();
        inner.members.clear();

        for (task_id, state) in previous {
            let Some(task) = store.get(task_id) else {
                continue;
            };
            if task.status != TaskStatus::Pending {
                continue;
            }
            let score = self.scorer.score(&task, now);
            Self::push_at(&mut inner, task_id, score, task.created_at, state.eligible_at);
        }
        debug!(queued = inner.members.len(), "queue priorities recalculated");
    }
}
