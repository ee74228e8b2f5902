//! Background task scheduling.
//!
//! The pipeline never spawns work directly; it asks an injected [`Scheduler`]
//! to run tasks once after a delay or periodically. [`TokioScheduler`] is the
//! production implementation, [`ManualScheduler`] a deterministic one driven by
//! explicit calls to [`ManualScheduler::advance`].

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::AbortHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::error::PipelineError;

pub type TaskFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// A unit of background work. Periodic tasks are invoked once per tick.
pub type Task = Arc<dyn Fn() -> TaskFuture + Send + Sync>;

/// Wrap an async closure as a [`Task`].
pub fn task<F, Fut>(f: F) -> Task
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move || Box::pin(f()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

pub trait Scheduler: Send + Sync {
    /// Run `task` once after `delay`.
    fn schedule_once(
        &self,
        name: &'static str,
        delay: Duration,
        task: Task,
    ) -> Result<TaskId, PipelineError>;

    /// Run `task` after `initial_delay` and then every `period`.
    fn schedule_periodic(
        &self,
        name: &'static str,
        initial_delay: Duration,
        period: Duration,
        task: Task,
    ) -> Result<TaskId, PipelineError>;

    /// Cancel one task. Returns false if it already finished or was unknown.
    fn cancel(&self, id: TaskId) -> bool;

    /// Cancel every task as a unit and refuse any further scheduling.
    fn cancel_all(&self);

    fn is_closed(&self) -> bool;
}

/// Scheduler backed by the tokio runtime.
#[derive(Default)]
pub struct TokioScheduler {
    tasks: Arc<scc::HashMap<TaskId, AbortHandle>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl TokioScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tasks currently scheduled or running.
    pub fn active(&self) -> usize {
        self.tasks.len()
    }

    fn spawn(
        &self,
        name: &'static str,
        fut: impl Future<Output = ()> + Send + 'static,
    ) -> Result<TaskId, PipelineError> {
        if self.is_closed() {
            debug!(task = name, "refusing to schedule task after shutdown");
            return Err(PipelineError::ShuttingDown);
        }
        let id = TaskId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let tasks = Arc::clone(&self.tasks);
        let handle = tokio::spawn(async move {
            fut.await;
            tasks.remove_sync(&id);
        });
        let _ = self.tasks.insert_sync(id, handle.abort_handle());
        if handle.is_finished() {
            self.tasks.remove_sync(&id);
        }
        // cancel_all may have swept the map before the insert landed
        if self.is_closed() {
            if let Some((_, handle)) = self.tasks.remove_sync(&id) {
                handle.abort();
            }
            return Err(PipelineError::ShuttingDown);
        }
        debug!(task = name, ?id, "scheduled task");
        Ok(id)
    }
}

impl Scheduler for TokioScheduler {
    fn schedule_once(
        &self,
        name: &'static str,
        delay: Duration,
        task: Task,
    ) -> Result<TaskId, PipelineError> {
        self.spawn(name, async move {
            tokio::time::sleep(delay).await;
            task().await;
        })
    }

    fn schedule_periodic(
        &self,
        name: &'static str,
        initial_delay: Duration,
        period: Duration,
        task: Task,
    ) -> Result<TaskId, PipelineError> {
        self.spawn(name, async move {
            let Some(start) = tokio::time::Instant::now().checked_add(initial_delay) else {
                debug!(task = name, "initial delay out of range, task never fires");
                return;
            };
            // interval_at panics on a zero period
            let mut interval = tokio::time::interval_at(start, period.max(Duration::from_millis(1)));
            // A slow run pushes the next tick back instead of bursting.
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                task().await;
            }
        })
    }

    fn cancel(&self, id: TaskId) -> bool {
        match self.tasks.remove_sync(&id) {
            Some((_, handle)) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    fn cancel_all(&self) {
        self.closed.store(true, Ordering::Release);
        self.tasks.retain_sync(|_, handle| {
            handle.abort();
            false
        });
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

struct ManualEntry {
    id: TaskId,
    name: &'static str,
    due: Duration,
    period: Option<Duration>,
    task: Task,
}

/// Deterministic scheduler: time only moves when [`ManualScheduler::advance`] is called,
/// and due tasks run inline, in due order, on the caller's task.
#[derive(Default)]
pub struct ManualScheduler {
    elapsed: Mutex<Duration>,
    entries: Mutex<Vec<ManualEntry>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Names of the tasks still scheduled, in scheduling order.
    pub fn scheduled(&self) -> Vec<&'static str> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|entry| entry.name)
            .collect()
    }

    /// Move time forward by `by`, running every task that falls due.
    /// Returns the number of task runs.
    pub async fn advance(&self, by: Duration) -> usize {
        let target = self.elapsed() + by;
        let mut runs = 0;
        loop {
            let next = {
                let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
                let due = entries
                    .iter()
                    .enumerate()
                    .filter(|(_, entry)| entry.due <= target)
                    .min_by_key(|(_, entry)| (entry.due, entry.id))
                    .map(|(idx, _)| idx);
                due.map(|idx| {
                    let (due, period, task) = {
                        let entry = &entries[idx];
                        (entry.due, entry.period, Arc::clone(&entry.task))
                    };
                    match period {
                        Some(period) => entries[idx].due += period,
                        None => {
                            entries.remove(idx);
                        }
                    }
                    (due, task)
                })
            };

            let Some((due, task)) = next else { break };
            *self.elapsed.lock().unwrap_or_else(PoisonError::into_inner) = due;
            task().await;
            runs += 1;
        }
        *self.elapsed.lock().unwrap_or_else(PoisonError::into_inner) = target;
        runs
    }

    fn push(
        &self,
        name: &'static str,
        delay: Duration,
        period: Option<Duration>,
        task: Task,
    ) -> Result<TaskId, PipelineError> {
        if self.is_closed() {
            return Err(PipelineError::ShuttingDown);
        }
        let id = TaskId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let due = self.elapsed() + delay;
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ManualEntry {
                id,
                name,
                due,
                // A zero period would never let time advance.
                period: period.filter(|period| !period.is_zero()),
                task,
            });
        Ok(id)
    }
}

impl Scheduler for ManualScheduler {
    fn schedule_once(
        &self,
        name: &'static str,
        delay: Duration,
        task: Task,
    ) -> Result<TaskId, PipelineError> {
        self.push(name, delay, None, task)
    }

    fn schedule_periodic(
        &self,
        name: &'static str,
        initial_delay: Duration,
        period: Duration,
        task: Task,
    ) -> Result<TaskId, PipelineError> {
        self.push(name, initial_delay, Some(period), task)
    }

    fn cancel(&self, id: TaskId) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        entries.len() != before
    }

    fn cancel_all(&self) {
        self.closed.store(true, Ordering::Release);
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
