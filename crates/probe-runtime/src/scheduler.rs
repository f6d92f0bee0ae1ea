//! Cooperative run-to-completion task scheduler.
//!
//! Tasks are plain function pointers taking the scheduler context by
//! mutable reference. They are queued per [`TaskPriority`] class and run
//! one at a time, most urgent class first, FIFO within a class. A running
//! task is never preempted by another task, so state owned by the context
//! needs no locking.
//!
//! # Threading Model
//!
//! - **Interrupt context** (any thread): holds a [`SchedulerHandle`] and
//!   calls [`SchedulerHandle::push_task`] then [`SchedulerHandle::wakeup`].
//!   Pushing only takes a short queue lock and never runs task code.
//! - **Scheduler thread**: owns the [`Scheduler`] and the context, calls
//!   [`Scheduler::run_until_idle`] and parks in [`Scheduler::wait_for_work`].
//!
//! The queue is bounded: once `queue_depth` tasks are pending, further
//! pushes fail with [`ProbeError::QueueFull`] and are counted as dropped.

use crossbeam_utils::sync::{Parker, Unparker};
use crossbeam_utils::CachePadded;
use probe_common::{LatencyMetrics, MetricsConfig, ProbeError, ProbeResult, SchedulerConfig};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

pub use probe_common::TaskPriority;

/// A schedulable unit of work.
pub type TaskCallback<C> = fn(&mut C);

struct Entry<C> {
    task: TaskCallback<C>,
    priority: TaskPriority,
    enqueued_at: Instant,
}

struct Classes<C> {
    queues: [VecDeque<Entry<C>>; TaskPriority::COUNT],
    len: usize,
}

impl<C> Classes<C> {
    fn pop(&mut self) -> Option<Entry<C>> {
        let entry = self.queues.iter_mut().find_map(VecDeque::pop_front)?;
        self.len -= 1;
        Some(entry)
    }
}

/// Queue shared between the scheduler and its handles.
struct TaskQueue<C> {
    classes: Mutex<Classes<C>>,
    depth: usize,
    pushed: CachePadded<AtomicU64>,
    dropped_full: CachePadded<AtomicU64>,
    high_water: AtomicUsize,
}

impl<C> TaskQueue<C> {
    fn new(depth: usize) -> Self {
        Self {
            classes: Mutex::new(Classes {
                queues: std::array::from_fn(|_| VecDeque::new()),
                len: 0,
            }),
            depth,
            pushed: CachePadded::new(AtomicU64::new(0)),
            dropped_full: CachePadded::new(AtomicU64::new(0)),
            high_water: AtomicUsize::new(0),
        }
    }

    // Tasks run outside the lock, so a poisoned queue is still consistent.
    fn lock(&self) -> MutexGuard<'_, Classes<C>> {
        self.classes.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn push(&self, task: TaskCallback<C>, priority: TaskPriority) -> ProbeResult<()> {
        let mut classes = self.lock();
        if classes.len >= self.depth {
            drop(classes);
            self.dropped_full.fetch_add(1, Ordering::Relaxed);
            return Err(ProbeError::QueueFull { depth: self.depth });
        }
        classes.queues[priority.index()].push_back(Entry {
            task,
            priority,
            enqueued_at: Instant::now(),
        });
        classes.len += 1;
        let len = classes.len;
        drop(classes);

        self.pushed.fetch_add(1, Ordering::Relaxed);
        self.high_water.fetch_max(len, Ordering::Relaxed);
        Ok(())
    }

    fn pop(&self) -> Option<Entry<C>> {
        self.lock().pop()
    }

    fn len(&self) -> usize {
        self.lock().len
    }
}

/// Scheduler counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    /// Tasks accepted into the queue.
    pub pushed: u64,
    /// Tasks refused because the queue was full.
    pub dropped_full: u64,
    /// Tasks run to completion.
    pub executed: u64,
    /// Tasks currently queued.
    pub pending: usize,
    /// Highest number of tasks queued at once.
    pub high_water: usize,
}

/// Cloneable, thread-safe handle for posting tasks.
pub struct SchedulerHandle<C> {
    queue: Arc<TaskQueue<C>>,
    unparker: Unparker,
}

impl<C> Clone for SchedulerHandle<C> {
    fn clone(&self) -> Self {
        Self {
            queue: Arc::clone(&self.queue),
            unparker: self.unparker.clone(),
        }
    }
}

impl<C> std::fmt::Debug for SchedulerHandle<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerHandle")
            .field("depth", &self.queue.depth)
            .finish_non_exhaustive()
    }
}

impl<C> SchedulerHandle<C> {
    /// Queue `task` in its priority class.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::QueueFull`] if `queue_depth` tasks are pending.
    pub fn push_task(&self, task: TaskCallback<C>, priority: TaskPriority) -> ProbeResult<()> {
        self.queue.push(task, priority)
    }

    /// Wake the scheduler thread if it is parked.
    pub fn wakeup(&self) {
        self.unparker.unpark();
    }

    /// Number of queued tasks.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.len()
    }
}

/// Priority task scheduler.
pub struct Scheduler<C> {
    queue: Arc<TaskQueue<C>>,
    parker: Parker,
    idle_park: Duration,
    /// Time from push to the start of the task.
    dispatch: LatencyMetrics,
    executed: u64,
}

impl<C> std::fmt::Debug for Scheduler<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("stats", &self.stats())
            .field("idle_park", &self.idle_park)
            .finish_non_exhaustive()
    }
}

impl<C> Scheduler<C> {
    /// Create a scheduler with an empty queue.
    #[must_use]
    pub fn new(config: &SchedulerConfig, metrics: &MetricsConfig) -> Self {
        debug!(
            queue_depth = config.queue_depth,
            idle_park_ms = config.idle_park.as_millis(),
            "scheduler created"
        );
        Self {
            queue: Arc::new(TaskQueue::new(config.queue_depth)),
            parker: Parker::new(),
            idle_park: config.idle_park,
            dispatch: LatencyMetrics::new(metrics.histogram_size, metrics.latency_budget),
            executed: 0,
        }
    }

    /// Create a scheduler with default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(&SchedulerConfig::default(), &MetricsConfig::default())
    }

    /// Handle for posting tasks from other threads.
    #[must_use]
    pub fn handle(&self) -> SchedulerHandle<C> {
        SchedulerHandle {
            queue: Arc::clone(&self.queue),
            unparker: self.parker.unparker().clone(),
        }
    }

    /// Queue a task from the scheduler thread itself.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::QueueFull`] if `queue_depth` tasks are pending.
    pub fn push_task(&self, task: TaskCallback<C>, priority: TaskPriority) -> ProbeResult<()> {
        self.queue.push(task, priority)
    }

    /// Run the most urgent pending task. Returns `false` if none was pending.
    pub fn run_next(&mut self, ctx: &mut C) -> bool {
        let Some(entry) = self.queue.pop() else {
            return false;
        };
        let waited = entry.enqueued_at.elapsed();
        self.dispatch.record(waited);
        trace!(
            priority = %entry.priority,
            waited_us = waited.as_micros(),
            "dispatching task"
        );

        (entry.task)(ctx);
        self.executed += 1;
        true
    }

    /// Run tasks until the queue is empty, including tasks they post.
    ///
    /// Returns the number of tasks run.
    pub fn run_until_idle(&mut self, ctx: &mut C) -> usize {
        let mut ran = 0;
        while self.run_next(ctx) {
            ran += 1;
        }
        ran
    }

    /// Park until woken or until the idle period elapses.
    ///
    /// Returns immediately if tasks are already queued.
    pub fn wait_for_work(&self) {
        self.wait_for_work_timeout(self.idle_park);
    }

    /// Park until woken or until `timeout` elapses.
    pub fn wait_for_work_timeout(&self, timeout: Duration) {
        if self.queue.len() == 0 {
            self.parker.park_timeout(timeout);
        }
    }

    /// Drive the scheduler until `running` is cleared.
    ///
    /// `idle` runs on the scheduler thread every time the queue drains,
    /// before parking, and returns `true` if it queued more work.
    pub fn run(
        &mut self,
        ctx: &mut C,
        running: &AtomicBool,
        mut idle: impl FnMut(&mut Self, &mut C) -> bool,
    ) {
        info!("scheduler loop started");
        while running.load(Ordering::Acquire) {
            self.run_until_idle(ctx);
            if !idle(self, ctx) {
                self.wait_for_work();
            }
        }
        let left = self.queue.len();
        if left > 0 {
            warn!(pending = left, "scheduler stopped with tasks still queued");
        }
        info!(executed = self.executed, "scheduler loop stopped");
    }

    /// Counters.
    #[must_use]
    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            pushed: self.queue.pushed.load(Ordering::Relaxed),
            dropped_full: self.queue.dropped_full.load(Ordering::Relaxed),
            executed: self.executed,
            pending: self.queue.len(),
            high_water: self.queue.high_water.load(Ordering::Relaxed),
        }
    }

    /// Push-to-dispatch latency of executed tasks.
    #[must_use]
    pub fn dispatch_latency(&self) -> &LatencyMetrics {
        &self.dispatch
    }
}
