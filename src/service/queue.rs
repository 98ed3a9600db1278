//! Thread-safe, unbounded FIFO job queue with instrumentation.
//!
//! `push` and `pop` never block on anything but the short list mutex. A
//! separate wake signal lets one waiter sleep until work arrives; waiting is
//! the caller's job (see `wait_for_work`), `pop` itself returns immediately.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use prometheus::Histogram;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use super::metrics::{BoundQueueMetrics, QueueMetrics};

struct QueueItem<T> {
    job: T,
    enqueued_at: Instant,
}

/// A job taken off the queue, with the timer closing out its processing.
pub struct Popped<T> {
    pub job: T,
    pub timer: ProcessingTimer,
}

/// Records processing time when `done` is called. Consuming `self` makes
/// double-reporting impossible.
#[must_use = "call done() once the job has been processed"]
pub struct ProcessingTimer {
    started: Instant,
    histogram: Histogram,
}

impl ProcessingTimer {
    pub fn done(self) -> Duration {
        let elapsed = self.started.elapsed();
        self.histogram.observe(elapsed.as_secs_f64());
        elapsed
    }
}

pub struct Queue<T> {
    name: String,
    items: Mutex<VecDeque<QueueItem<T>>>,
    wake: Notify,
    metrics: BoundQueueMetrics,
}

impl<T> Queue<T> {
    pub fn new(name: impl Into<String>, metrics: &QueueMetrics) -> Self {
        let name = name.into();
        let metrics = metrics.bind(&name);
        Self {
            name,
            items: Mutex::new(VecDeque::new()),
            wake: Notify::new(),
            metrics,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append a job to the tail and wake the waiter, if any.
    pub fn push(&self, job: T) {
        self.lock().push_back(QueueItem {
            job,
            enqueued_at: Instant::now(),
        });
        // The gauge is shared by every queue with this name.
        self.metrics.depth.inc();
        self.metrics.enqueued.inc();
        self.wake.notify_one();
    }

    /// Remove the head of the queue, `None` when empty.
    pub fn pop(&self) -> Option<Popped<T>> {
        let item = self.lock().pop_front()?;
        self.metrics.depth.dec();

        self.metrics
            .wait_seconds
            .observe(item.enqueued_at.elapsed().as_secs_f64());

        Some(Popped {
            job: item.job,
            timer: ProcessingTimer {
                started: Instant::now(),
                histogram: self.metrics.processing_seconds.clone(),
            },
        })
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Sleep until the queue holds at least one job.
    ///
    /// Returns `false` if `cancel` fired first. The emptiness check is
    /// repeated after every wake-up, so stale or spurious signals just put
    /// the caller back to sleep. A push that races with the check leaves a
    /// stored permit behind and is never missed.
    pub async fn wait_for_work(&self, cancel: &CancellationToken) -> bool {
        while self.is_empty() {
            tokio::select! {
                _ = cancel.cancelled() => return false,
                _ = self.wake.notified() => {}
            }
        }
        !cancel.is_cancelled()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<QueueItem<T>>> {
        // A panic while holding the lock cannot leave the deque half-updated.
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
