// /////////////////////////////////////////////////////////////////////////////
// Research Flow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Task Scheduler
//!
//! Generic bounded-concurrency work pool with priority and dependency-aware
//! scheduling. One research flow runs as one task, but any async job can be
//! registered.
//!
//! ## Scheduling policy
//!
//! - Executed tasks wait in a ready queue ordered by `(priority desc,
//!   created_at asc)`; at most `max_workers` tasks are RUNNING at any time
//!   (enforced by a semaphore whose permit lives inside the worker)
//! - A task with unfinished dependencies parks in WAITING; when a task
//!   completes, every WAITING task is re-evaluated - fully satisfied ones
//!   return to PENDING (emitting `TASK_READY`) and rejoin the queue, while
//!   tasks whose dependency finished in FAILED/CANCELLED/TIMEOUT fail with a
//!   dependency error, cascading transitively
//! - A task is marked RUNNING only when every dependency is COMPLETED and a
//!   worker slot is held
//!
//! ## Timeouts and cancellation
//!
//! A task registered with a timeout is raced against the deadline; on expiry
//! it transitions to TIMEOUT and its work future is dropped.
//! [`TaskScheduler::cancel`] aborts in-flight work and transitions the task
//! to CANCELLED; cancelling a terminal task returns false and changes
//! nothing.
//!
//! ## Events
//!
//! Lifecycle events (`TASK_REGISTERED`, `TASK_READY`, `TASK_STARTED`,
//! `TASK_COMPLETED`, `TASK_FAILED`, `TASK_CANCELLED`, `TASK_TIMEOUT`) are
//! published on the event bus strictly outside the scheduler lock.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use research_flow_domain::{
    Event, EventKind, FlowError, Task, TaskFn, TaskId, TaskPriority, TaskStatus,
};

use super::event_bus::EventBus;

/// Ready-queue ordering key: priority desc, then registration time, then id.
type SchedKey = (std::cmp::Reverse<TaskPriority>, DateTime<Utc>, TaskId);

/// Options accepted at task registration.
#[derive(Default)]
pub struct TaskOptions {
    /// Caller-supplied id; generated when absent.
    pub task_id: Option<TaskId>,
    pub priority: TaskPriority,
    pub dependencies: BTreeSet<TaskId>,
    pub timeout: Option<Duration>,
    pub tags: Vec<String>,
    pub metadata: BTreeMap<String, Value>,
}

/// Point-in-time scheduler statistics.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SchedulerMetrics {
    pub total: usize,
    pub pending: usize,
    pub waiting: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub timed_out: usize,
    pub max_workers: usize,
}

enum WorkOutcome {
    Finished(Result<Value, FlowError>),
    TimedOut,
}

struct SchedulerState {
    tasks: HashMap<TaskId, Task>,
    ready: BTreeSet<SchedKey>,
    handles: HashMap<TaskId, JoinHandle<()>>,
}

/// Bounded-concurrency, dependency-aware work pool.
pub struct TaskScheduler {
    state: Mutex<SchedulerState>,
    semaphore: Arc<Semaphore>,
    bus: Arc<EventBus>,
    max_workers: usize,
    /// Bumped on every terminal transition; waiters poll through it.
    terminal_tx: watch::Sender<u64>,
}

impl TaskScheduler {
    /// Creates a scheduler with an explicit worker cap.
    pub fn new(max_workers: usize, bus: Arc<EventBus>) -> Arc<Self> {
        let workers = max_workers.max(1);
        let (terminal_tx, _) = watch::channel(0);
        Arc::new(Self {
            state: Mutex::new(SchedulerState {
                tasks: HashMap::new(),
                ready: BTreeSet::new(),
                handles: HashMap::new(),
            }),
            semaphore: Arc::new(Semaphore::new(workers)),
            bus,
            max_workers: workers,
            terminal_tx,
        })
    }

    /// Creates a scheduler sized to twice the available cores.
    pub fn with_default_workers(bus: Arc<EventBus>) -> Arc<Self> {
        let cores = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4);
        Self::new(cores * 2, bus)
    }

    /// Worker cap.
    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Event bus tasks publish lifecycle events on.
    pub fn bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.bus)
    }

    /// Registers a task in PENDING.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::Validation`] when a caller-supplied id is already
    /// registered.
    pub fn register(
        &self,
        name: impl Into<String>,
        function: TaskFn,
        options: TaskOptions,
    ) -> Result<TaskId, FlowError> {
        let name = name.into();
        let task_id = options.task_id.unwrap_or_default();

        {
            let mut st = self.state.lock();
            if st.tasks.contains_key(&task_id) {
                return Err(FlowError::validation(format!(
                    "Task id {} is already registered",
                    task_id
                )));
            }
            let task = Task::new(
                task_id,
                name.clone(),
                function,
                options.priority,
                options.dependencies,
                options.timeout,
                options.tags,
                options.metadata,
            );
            st.tasks.insert(task_id, task);
        }

        debug!(task_id = %task_id, name = %name, "task registered");
        self.bus
            .publish(&Event::task(EventKind::TaskRegistered, task_id, &name));
        Ok(task_id)
    }

    /// Schedules a registered task for execution.
    ///
    /// Returns an execution id when the task joined the ready queue, or
    /// `None` when it parked in WAITING on unfinished dependencies.
    ///
    /// # Errors
    ///
    /// - [`FlowError::NotFound`] for an unknown task id
    /// - [`FlowError::State`] when the task is already RUNNING or terminal
    /// - [`FlowError::Dependency`] when a dependency is missing or already
    ///   finished without completing (the task transitions to FAILED)
    pub fn execute(self: &Arc<Self>, task_id: TaskId) -> Result<Option<Uuid>, FlowError> {
        enum Admission {
            Ready,
            Waiting,
            DepError(FlowError),
        }

        let mut events: Vec<Event> = Vec::new();
        let admission = {
            let mut st = self.state.lock();
            let task = st
                .tasks
                .get(&task_id)
                .ok_or_else(|| FlowError::not_found(format!("Task {} not found", task_id)))?;

            if task.status().is_terminal() {
                return Err(FlowError::state(format!(
                    "Task {} is already {}",
                    task_id,
                    task.status()
                )));
            }
            if task.status() == TaskStatus::Running {
                return Err(FlowError::state(format!("Task {} is already running", task_id)));
            }

            let deps: Vec<TaskId> = task.dependencies().iter().copied().collect();
            let mut unfinished = false;
            let mut dep_error: Option<FlowError> = None;
            for dep in &deps {
                match st.tasks.get(dep) {
                    None => {
                        dep_error = Some(FlowError::dependency(format!(
                            "Dependency {} not found for task {}",
                            dep, task_id
                        )));
                        break;
                    }
                    Some(d) if d.status() == TaskStatus::Completed => {}
                    Some(d) if d.status().is_terminal() => {
                        dep_error = Some(FlowError::dependency(format!(
                            "Dependency {} of task {} finished as {}",
                            dep,
                            task_id,
                            d.status()
                        )));
                        break;
                    }
                    Some(_) => unfinished = true,
                }
            }

            if let Some(err) = dep_error {
                if let Some(task) = st.tasks.get_mut(&task_id) {
                    let name = task.name().to_string();
                    let _ = task.mark_failed(err.to_string());
                    events.push(
                        Event::task(EventKind::TaskFailed, task_id, &name)
                            .with_field("error", err.to_string()),
                    );
                }
                Admission::DepError(err)
            } else if unfinished {
                if let Some(task) = st.tasks.get_mut(&task_id) {
                    let _ = task.mark_waiting();
                }
                Admission::Waiting
            } else {
                if let Some(task) = st.tasks.get(&task_id) {
                    let key = task.scheduling_key();
                    st.ready.insert(key);
                }
                Admission::Ready
            }
        };

        for event in &events {
            self.bus.publish(event);
        }

        match admission {
            Admission::Ready => {
                self.pump();
                Ok(Some(Uuid::new_v4()))
            }
            Admission::Waiting => {
                debug!(task_id = %task_id, "task parked waiting on dependencies");
                Ok(None)
            }
            Admission::DepError(err) => {
                self.terminal_tx.send_modify(|v| *v += 1);
                Err(err)
            }
        }
    }

    /// Schedules a task and waits for its terminal snapshot.
    pub async fn execute_and_wait(self: &Arc<Self>, task_id: TaskId) -> Result<Task, FlowError> {
        self.execute(task_id)?;
        self.wait_for(task_id).await
    }

    /// Waits until the task reaches a terminal status and returns its
    /// snapshot.
    pub async fn wait_for(&self, task_id: TaskId) -> Result<Task, FlowError> {
        let mut rx = self.terminal_tx.subscribe();
        loop {
            {
                let st = self.state.lock();
                match st.tasks.get(&task_id) {
                    None => {
                        return Err(FlowError::not_found(format!("Task {} not found", task_id)))
                    }
                    Some(task) if task.status().is_terminal() => return Ok(task.clone()),
                    Some(_) => {}
                }
            }
            if rx.changed().await.is_err() {
                return Err(FlowError::internal("scheduler terminal channel closed"));
            }
        }
    }

    /// Cancels a task. Returns true when a PENDING, WAITING or RUNNING task
    /// transitioned to CANCELLED; false otherwise (including terminal
    /// tasks - cancellation is idempotent and never alters a settled
    /// record).
    pub fn cancel(self: &Arc<Self>, task_id: TaskId) -> bool {
        let mut events: Vec<Event> = Vec::new();
        let cancelled = {
            let mut st = self.state.lock();
            let Some(task) = st.tasks.get_mut(&task_id) else {
                return false;
            };

            match task.status() {
                TaskStatus::Pending | TaskStatus::Waiting | TaskStatus::Running => {
                    let name = task.name().to_string();
                    let key = task.scheduling_key();
                    let _ = task.mark_cancelled();
                    st.ready.remove(&key);
                    if let Some(handle) = st.handles.remove(&task_id) {
                        handle.abort();
                        // The worker's permit releases only once the aborted
                        // future is dropped; pump again at that point so
                        // queued tasks cannot strand.
                        let scheduler = Arc::clone(self);
                        tokio::spawn(async move {
                            let _ = handle.await;
                            scheduler.pump();
                        });
                    }
                    events.push(Event::task(EventKind::TaskCancelled, task_id, &name));
                    events.extend(Self::reevaluate_waiting_locked(&mut st));
                    true
                }
                _ => false,
            }
        };

        for event in &events {
            self.bus.publish(event);
        }
        if cancelled {
            self.terminal_tx.send_modify(|v| *v += 1);
            self.pump();
        }
        cancelled
    }

    /// Cancels every PENDING, WAITING and RUNNING task (drain path).
    pub fn cancel_all_active(self: &Arc<Self>) -> usize {
        let active: Vec<TaskId> = {
            let st = self.state.lock();
            st.tasks
                .values()
                .filter(|t| !t.status().is_terminal())
                .map(|t| t.task_id())
                .collect()
        };
        active.into_iter().filter(|id| self.cancel(*id)).count()
    }

    /// Snapshot of one task.
    pub fn get_task(&self, task_id: TaskId) -> Option<Task> {
        self.state.lock().tasks.get(&task_id).cloned()
    }

    /// Snapshots of every task in `status`.
    pub fn by_status(&self, status: TaskStatus) -> Vec<Task> {
        let st = self.state.lock();
        st.tasks.values().filter(|t| t.status() == status).cloned().collect()
    }

    /// Snapshots of every task carrying `tag`.
    pub fn by_tag(&self, tag: &str) -> Vec<Task> {
        let st = self.state.lock();
        st.tasks
            .values()
            .filter(|t| t.tags().iter().any(|candidate| candidate.as_str() == tag))
            .cloned()
            .collect()
    }

    /// Point-in-time statistics.
    pub fn metrics(&self) -> SchedulerMetrics {
        let st = self.state.lock();
        let mut metrics = SchedulerMetrics {
            total: st.tasks.len(),
            pending: 0,
            waiting: 0,
            running: 0,
            completed: 0,
            failed: 0,
            cancelled: 0,
            timed_out: 0,
            max_workers: self.max_workers,
        };
        for task in st.tasks.values() {
            match task.status() {
                TaskStatus::Pending => metrics.pending += 1,
                TaskStatus::Waiting => metrics.waiting += 1,
                TaskStatus::Running => metrics.running += 1,
                TaskStatus::Completed => metrics.completed += 1,
                TaskStatus::Failed => metrics.failed += 1,
                TaskStatus::Cancelled => metrics.cancelled += 1,
                TaskStatus::Timeout => metrics.timed_out += 1,
            }
        }
        metrics
    }

    /// Dispatches ready tasks while worker slots are free.
    fn pump(self: &Arc<Self>) {
        let mut started: Vec<Event> = Vec::new();

        loop {
            let permit = match Arc::clone(&self.semaphore).try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => break,
            };

            let mut st = self.state.lock();
            let Some(key) = st.ready.iter().next().copied() else {
                break; // permit drops, slot stays free
            };
            st.ready.remove(&key);
            let task_id = key.2;

            let Some(task) = st.tasks.get_mut(&task_id) else {
                continue;
            };
            // A task cancelled while queued is skipped silently.
            if task.mark_running().is_err() {
                continue;
            }

            let name = task.name().to_string();
            let function = task.function();
            let timeout = task.timeout();

            let scheduler = Arc::clone(self);
            let worker_name = name.clone();
            let handle = tokio::spawn(async move {
                let outcome = match timeout {
                    Some(limit) => match tokio::time::timeout(limit, function()).await {
                        Ok(result) => WorkOutcome::Finished(result),
                        Err(_) => WorkOutcome::TimedOut,
                    },
                    None => WorkOutcome::Finished(function().await),
                };
                scheduler.settle(task_id, &worker_name, outcome);
                drop(permit);
                scheduler.pump();
            });
            st.handles.insert(task_id, handle);
            started.push(Event::task(EventKind::TaskStarted, task_id, &name));
        }

        for event in &started {
            self.bus.publish(event);
        }
    }

    /// Records a worker outcome and promotes or fails dependent tasks.
    fn settle(&self, task_id: TaskId, name: &str, outcome: WorkOutcome) {
        let mut events: Vec<Event> = Vec::new();
        {
            let mut st = self.state.lock();
            st.handles.remove(&task_id);
            let Some(task) = st.tasks.get_mut(&task_id) else {
                return;
            };
            // A concurrent cancel already settled the task; the late result
            // is discarded.
            if task.status() != TaskStatus::Running {
                return;
            }

            match outcome {
                WorkOutcome::Finished(Ok(result)) => {
                    let _ = task.mark_completed(result);
                    events.push(Event::task(EventKind::TaskCompleted, task_id, name));
                }
                WorkOutcome::Finished(Err(err)) if err.is_cancelled() => {
                    let _ = task.mark_cancelled();
                    events.push(Event::task(EventKind::TaskCancelled, task_id, name));
                }
                WorkOutcome::Finished(Err(err)) => {
                    warn!(task_id = %task_id, error = %err, "task failed");
                    let _ = task.mark_failed(err.to_string());
                    events.push(
                        Event::task(EventKind::TaskFailed, task_id, name)
                            .with_field("error", err.to_string()),
                    );
                }
                WorkOutcome::TimedOut => {
                    warn!(task_id = %task_id, "task timed out");
                    let _ = task.mark_timed_out();
                    events.push(Event::task(EventKind::TaskTimeout, task_id, name));
                }
            }

            events.extend(Self::reevaluate_waiting_locked(&mut st));
        }

        for event in &events {
            self.bus.publish(event);
        }
        self.terminal_tx.send_modify(|v| *v += 1);
    }

    /// Re-evaluates WAITING tasks to a fixpoint: satisfied ones rejoin the
    /// ready queue, tasks with a dead dependency fail (cascading). Returns
    /// the events to publish once the lock is dropped.
    fn reevaluate_waiting_locked(st: &mut SchedulerState) -> Vec<Event> {
        let mut events = Vec::new();

        loop {
            let mut changed = false;
            let waiting: Vec<TaskId> = st
                .tasks
                .values()
                .filter(|t| t.status() == TaskStatus::Waiting)
                .map(|t| t.task_id())
                .collect();

            for task_id in waiting {
                let deps: Vec<TaskId> = match st.tasks.get(&task_id) {
                    Some(t) => t.dependencies().iter().copied().collect(),
                    None => continue,
                };

                let mut all_completed = true;
                let mut dead_dep: Option<(TaskId, String)> = None;
                for dep in &deps {
                    match st.tasks.get(dep) {
                        None => {
                            dead_dep = Some((*dep, "missing".to_string()));
                            break;
                        }
                        Some(d) if d.status() == TaskStatus::Completed => {}
                        Some(d) if d.status().is_terminal() => {
                            dead_dep = Some((*dep, d.status().to_string()));
                            break;
                        }
                        Some(_) => all_completed = false,
                    }
                }

                if let Some((dep, dep_status)) = dead_dep {
                    if let Some(task) = st.tasks.get_mut(&task_id) {
                        let name = task.name().to_string();
                        let err = FlowError::dependency(format!(
                            "Dependency {} of task {} finished as {}",
                            dep, task_id, dep_status
                        ));
                        let _ = task.mark_failed(err.to_string());
                        events.push(
                            Event::task(EventKind::TaskFailed, task_id, &name)
                                .with_field("error", err.to_string()),
                        );
                        changed = true;
                    }
                } else if all_completed {
                    if let Some(task) = st.tasks.get_mut(&task_id) {
                        let name = task.name().to_string();
                        let _ = task.mark_ready();
                        let key = task.scheduling_key();
                        st.ready.insert(key);
                        events.push(Event::task(EventKind::TaskReady, task_id, &name));
                        changed = true;
                    }
                }
            }

            if !changed {
                break;
            }
        }

        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::Notify;

    fn scheduler(max_workers: usize) -> (Arc<TaskScheduler>, Arc<EventBus>) {
        let bus = Arc::new(EventBus::new());
        (TaskScheduler::new(max_workers, Arc::clone(&bus)), bus)
    }

    fn immediate(value: i64) -> TaskFn {
        Arc::new(move || Box::pin(async move { Ok(Value::from(value)) }))
    }

    fn gated(release: Arc<Notify>) -> TaskFn {
        Arc::new(move || {
            let release = Arc::clone(&release);
            Box::pin(async move {
                release.notified().await;
                Ok(Value::Null)
            })
        })
    }

    /// Scenario: dependency chain T1 <- T2 <- T3 executed in reverse order.
    /// T3 and T2 park WAITING; completing T1 ripples readiness through the
    /// chain and TASK_COMPLETED events arrive in dependency order.
    #[tokio::test]
    async fn test_dependency_chain_completion_order() {
        let (scheduler, bus) = scheduler(4);
        let completed: Arc<PlMutex<Vec<TaskId>>> = Arc::new(PlMutex::new(Vec::new()));
        {
            let completed = Arc::clone(&completed);
            bus.subscribe(
                EventKind::TaskCompleted,
                Arc::new(move |event| {
                    let id = event.payload["task_id"].as_str().unwrap().to_string();
                    completed.lock().push(TaskId::parse(&id).unwrap());
                }),
            );
        }

        let t1 = scheduler.register("t1", immediate(1), TaskOptions::default()).unwrap();
        let t2 = scheduler
            .register(
                "t2",
                immediate(2),
                TaskOptions {
                    dependencies: [t1].into_iter().collect(),
                    ..Default::default()
                },
            )
            .unwrap();
        let t3 = scheduler
            .register(
                "t3",
                immediate(3),
                TaskOptions {
                    dependencies: [t2].into_iter().collect(),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(scheduler.execute(t3).unwrap(), None);
        assert_eq!(scheduler.get_task(t3).unwrap().status(), TaskStatus::Waiting);
        assert_eq!(scheduler.execute(t2).unwrap(), None);

        assert!(scheduler.execute(t1).unwrap().is_some());
        let t3_final = scheduler.wait_for(t3).await.unwrap();
        assert_eq!(t3_final.status(), TaskStatus::Completed);
        assert_eq!(t3_final.result(), Some(&Value::from(3)));

        assert_eq!(*completed.lock(), vec![t1, t2, t3]);
    }

    /// Invariant 2: the RUNNING population never exceeds max_workers.
    #[tokio::test]
    async fn test_bounded_concurrency() {
        let (scheduler, _) = scheduler(2);
        let release = Arc::new(Notify::new());

        let mut ids = Vec::new();
        for i in 0..4 {
            let id = scheduler
                .register(format!("gated-{i}"), gated(Arc::clone(&release)), TaskOptions::default())
                .unwrap();
            scheduler.execute(id).unwrap();
            ids.push(id);
        }

        tokio::task::yield_now().await;
        let metrics = scheduler.metrics();
        assert_eq!(metrics.running, 2);
        assert_eq!(metrics.pending, 2);

        // Release everyone; the pool drains in waves of two.
        for _ in 0..8 {
            release.notify_waiters();
            tokio::task::yield_now().await;
        }
        for id in ids {
            let task = scheduler.wait_for(id).await.unwrap();
            assert_eq!(task.status(), TaskStatus::Completed);
        }
    }

    /// Higher-priority tasks leave the ready queue first.
    #[tokio::test]
    async fn test_priority_ordering() {
        let (scheduler, _) = scheduler(1);
        let release = Arc::new(Notify::new());
        let order: Arc<PlMutex<Vec<&'static str>>> = Arc::new(PlMutex::new(Vec::new()));

        let blocker = scheduler
            .register("blocker", gated(Arc::clone(&release)), TaskOptions::default())
            .unwrap();
        scheduler.execute(blocker).unwrap();
        tokio::task::yield_now().await;

        let tracking = |label: &'static str, order: &Arc<PlMutex<Vec<&'static str>>>| -> TaskFn {
            let order = Arc::clone(order);
            Arc::new(move || {
                let order = Arc::clone(&order);
                Box::pin(async move {
                    order.lock().push(label);
                    Ok(Value::Null)
                })
            })
        };

        let low = scheduler
            .register(
                "low",
                tracking("low", &order),
                TaskOptions {
                    priority: TaskPriority::Low,
                    ..Default::default()
                },
            )
            .unwrap();
        let critical = scheduler
            .register(
                "critical",
                tracking("critical", &order),
                TaskOptions {
                    priority: TaskPriority::Critical,
                    ..Default::default()
                },
            )
            .unwrap();

        // Low is queued before critical, but critical must run first.
        scheduler.execute(low).unwrap();
        scheduler.execute(critical).unwrap();

        release.notify_waiters();
        scheduler.wait_for(low).await.unwrap();
        scheduler.wait_for(critical).await.unwrap();

        assert_eq!(*order.lock(), vec!["critical", "low"]);
    }

    /// Cancelling a RUNNING task aborts its work; cancelling again returns
    /// false and leaves the record untouched.
    #[tokio::test]
    async fn test_cancel_running_task() {
        let (scheduler, _) = scheduler(1);
        let release = Arc::new(Notify::new());
        let id = scheduler
            .register("gated", gated(release), TaskOptions::default())
            .unwrap();
        scheduler.execute(id).unwrap();
        tokio::task::yield_now().await;
        assert_eq!(scheduler.get_task(id).unwrap().status(), TaskStatus::Running);

        assert!(scheduler.cancel(id));
        let task = scheduler.wait_for(id).await.unwrap();
        assert_eq!(task.status(), TaskStatus::Cancelled);
        let completed_at = task.completed_at();

        // Cancellation is idempotent on terminal tasks.
        assert!(!scheduler.cancel(id));
        assert_eq!(scheduler.get_task(id).unwrap().completed_at(), completed_at);
    }

    /// A task with a timeout transitions to TIMEOUT and its work is dropped.
    #[tokio::test(start_paused = true)]
    async fn test_timeout_transitions_task() {
        let (scheduler, _) = scheduler(1);
        let id = scheduler
            .register(
                "slow",
                Arc::new(|| {
                    Box::pin(async {
                        tokio::time::sleep(Duration::from_secs(3600)).await;
                        Ok(Value::Null)
                    })
                }),
                TaskOptions {
                    timeout: Some(Duration::from_millis(50)),
                    ..Default::default()
                },
            )
            .unwrap();

        scheduler.execute(id).unwrap();
        let task = scheduler.wait_for(id).await.unwrap();
        assert_eq!(task.status(), TaskStatus::Timeout);
        assert!(task.error().unwrap().contains("timed out"));
    }

    /// A dependency finishing in FAILED cascades a dependency error through
    /// WAITING dependents, transitively.
    #[tokio::test]
    async fn test_dependency_failure_cascades() {
        let (scheduler, _) = scheduler(2);
        let failing: TaskFn = Arc::new(|| Box::pin(async { Err(FlowError::internal("boom")) }));

        let t1 = scheduler.register("t1", failing, TaskOptions::default()).unwrap();
        let t2 = scheduler
            .register(
                "t2",
                immediate(2),
                TaskOptions {
                    dependencies: [t1].into_iter().collect(),
                    ..Default::default()
                },
            )
            .unwrap();
        let t3 = scheduler
            .register(
                "t3",
                immediate(3),
                TaskOptions {
                    dependencies: [t2].into_iter().collect(),
                    ..Default::default()
                },
            )
            .unwrap();

        scheduler.execute(t3).unwrap();
        scheduler.execute(t2).unwrap();
        scheduler.execute(t1).unwrap();

        let t2_final = scheduler.wait_for(t2).await.unwrap();
        let t3_final = scheduler.wait_for(t3).await.unwrap();
        assert_eq!(t2_final.status(), TaskStatus::Failed);
        assert!(t2_final.error().unwrap().contains("Dependency"));
        assert_eq!(t3_final.status(), TaskStatus::Failed);
    }

    /// Executing a task whose dependency was never registered fails it with
    /// a dependency error.
    #[tokio::test]
    async fn test_missing_dependency_fails_task() {
        let (scheduler, _) = scheduler(1);
        let ghost = TaskId::new();
        let id = scheduler
            .register(
                "orphan",
                immediate(0),
                TaskOptions {
                    dependencies: [ghost].into_iter().collect(),
                    ..Default::default()
                },
            )
            .unwrap();

        let err = scheduler.execute(id).unwrap_err();
        assert!(matches!(err, FlowError::Dependency(_)));
        assert_eq!(scheduler.get_task(id).unwrap().status(), TaskStatus::Failed);
    }

    /// Retry law: a task that succeeds internally after retries still
    /// produces exactly one TASK_COMPLETED event.
    #[tokio::test(start_paused = true)]
    async fn test_single_completion_event_with_internal_retries() {
        let (scheduler, bus) = scheduler(1);
        let completions = Arc::new(AtomicU32::new(0));
        {
            let completions = Arc::clone(&completions);
            bus.subscribe(
                EventKind::TaskCompleted,
                Arc::new(move |_| {
                    completions.fetch_add(1, Ordering::SeqCst);
                }),
            );
        }

        let attempts = Arc::new(AtomicU32::new(0));
        let retried: TaskFn = {
            let attempts = Arc::clone(&attempts);
            Arc::new(move || {
                let attempts = Arc::clone(&attempts);
                Box::pin(async move {
                    let policy = crate::infrastructure::resilience::RetryPolicy {
                        max_attempts: 3,
                        base_delay: Duration::from_millis(1),
                        jitter: crate::infrastructure::resilience::Jitter::None,
                        ..Default::default()
                    };
                    policy
                        .execute(|| {
                            let n = attempts.fetch_add(1, Ordering::SeqCst);
                            futures::future::ready(if n < 2 {
                                Err(FlowError::timeout("flaky"))
                            } else {
                                Ok(Value::from("ok"))
                            })
                        })
                        .await
                })
            })
        };

        let id = scheduler.register("flaky", retried, TaskOptions::default()).unwrap();
        let task = scheduler.execute_and_wait(id).await.unwrap();

        assert_eq!(task.status(), TaskStatus::Completed);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(completions.load(Ordering::SeqCst), 1);
    }
}
