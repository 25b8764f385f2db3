//! Priority scheduler for background resolution work.
//!
//! A fixed pool of workers drains a bounded priority queue. Submission never
//! blocks: when the queue is full, or the scheduler has been shut down, the
//! task is rejected with [`Error::SchedulerUnavailable`].
//!
//! ```rust,ignore
//! let scheduler = PriorityScheduler::new(4, 1000);
//! scheduler.start();
//! scheduler.submit(Priority::Background, "dQw4w9WgXcQ", async move {
//!     coordinator.resolve("dQw4w9WgXcQ").await?;
//!     Ok(())
//! })?;
//! ```

mod task;

pub use task::{Priority, PriorityTask, TaskFuture};

use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::SchedulerConfig;
use crate::error::{Error, Result};

/// Snapshot of scheduler counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    /// Tasks accepted per tier since startup.
    pub submitted: BTreeMap<Priority, u64>,
    pub completed: u64,
    pub failed: u64,
    pub rejected: u64,
    pub queued: usize,
    pub workers: usize,
    pub running: bool,
}

struct Shared {
    queue: Mutex<BinaryHeap<Reverse<PriorityTask>>>,
    notify: Notify,
    shutdown: CancellationToken,
    max_queued: usize,
    seq: AtomicU64,
    submitted: [AtomicU64; 4],
    completed: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
}

/// Bounded worker pool draining a priority queue.
pub struct PriorityScheduler {
    shared: Arc<Shared>,
    workers: usize,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl PriorityScheduler {
    pub fn new(workers: usize, max_queued: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                queue: Mutex::new(BinaryHeap::new()),
                notify: Notify::new(),
                shutdown: CancellationToken::new(),
                max_queued,
                seq: AtomicU64::new(0),
                submitted: Default::default(),
                completed: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                rejected: AtomicU64::new(0),
            }),
            workers: workers.max(1),
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self::new(config.workers, config.max_queued)
    }

    /// Enqueue `work` for `id` at `priority`.
    ///
    /// Tasks submitted before [`start`](Self::start) wait in the queue.
    pub fn submit<F>(&self, priority: Priority, id: impl Into<String>, work: F) -> Result<()>
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let id = id.into();

        if self.shared.shutdown.is_cancelled() {
            self.shared.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(Error::SchedulerUnavailable("scheduler is stopped".into()));
        }

        {
            let mut queue = self.shared.queue.lock();
            if queue.len() >= self.shared.max_queued {
                drop(queue);
                self.shared.rejected.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(id = %id, priority = %priority, "Scheduler queue full; rejecting task");
                return Err(Error::SchedulerUnavailable(format!(
                    "queue is full ({} tasks)",
                    self.shared.max_queued
                )));
            }

            let seq = self.shared.seq.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(id = %id, priority = %priority, seq, "Task queued");
            queue.push(Reverse(PriorityTask::new(priority, id, seq, work.boxed())));
        }

        self.shared.submitted[priority.index()].fetch_add(1, Ordering::Relaxed);
        self.shared.notify.notify_one();
        Ok(())
    }

    /// Spawn the worker pool. Calling this more than once has no effect.
    pub fn start(&self) {
        let mut handles = self.handles.lock();
        if !handles.is_empty() || self.shared.shutdown.is_cancelled() {
            return;
        }

        for worker in 0..self.workers {
            handles.push(tokio::spawn(run_worker(worker, Arc::clone(&self.shared))));
        }
        tracing::info!(workers = self.workers, "Scheduler started");
    }

    /// Stop the workers, drop queued tasks, and wait for in-flight tasks to finish.
    pub async fn shutdown(&self) {
        self.shared.shutdown.cancel();
        self.shared.notify.notify_waiters();

        let dropped = {
            let mut queue = self.shared.queue.lock();
            let len = queue.len();
            queue.clear();
            len
        };

        let handles: Vec<_> = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Scheduler worker ended abnormally");
            }
        }

        tracing::info!(dropped, "Scheduler stopped");
    }

    pub fn is_running(&self) -> bool {
        !self.shared.shutdown.is_cancelled() && !self.handles.lock().is_empty()
    }

    pub fn queued(&self) -> usize {
        self.shared.queue.lock().len()
    }

    pub fn stats(&self) -> SchedulerStats {
        let submitted = Priority::ALL
            .iter()
            .map(|p| (*p, self.shared.submitted[p.index()].load(Ordering::Relaxed)))
            .collect();

        SchedulerStats {
            submitted,
            completed: self.shared.completed.load(Ordering::Relaxed),
            failed: self.shared.failed.load(Ordering::Relaxed),
            rejected: self.shared.rejected.load(Ordering::Relaxed),
            queued: self.queued(),
            workers: self.workers,
            running: self.is_running(),
        }
    }
}

async fn run_worker(worker: usize, shared: Arc<Shared>) {
    tracing::debug!(worker, "Scheduler worker started");

    loop {
        if shared.shutdown.is_cancelled() {
            break;
        }

        let next = shared.queue.lock().pop();
        let task = match next {
            Some(Reverse(task)) => task,
            None => {
                tokio::select! {
                    _ = shared.notify.notified() => {}
                    _ = shared.shutdown.cancelled() => {}
                }
                continue;
            }
        };

        let PriorityTask {
            priority, id, work, ..
        } = task;

        // Run on its own task so a panic is contained to this unit of work.
        match tokio::spawn(work).await {
            Ok(Ok(())) => {
                shared.completed.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(worker, id = %id, priority = %priority, "Task completed");
            }
            Ok(Err(e)) => {
                shared.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(worker, id = %id, priority = %priority, error = %e, "Task failed");
            }
            Err(e) => {
                shared.failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!(worker, id = %id, priority = %priority, error = %e, "Task panicked");
            }
        }
    }

    tracing::debug!(worker, "Scheduler worker stopped");
}
