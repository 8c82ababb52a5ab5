//! Two-tier priority queue: a bounded fast lane and a bounded slow lane,
//! with fast always preferred at dequeue time.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tee_protocol::Job;
use tokio::sync::{mpsc, Notify};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EnqueueError {
    #[error("queue is full")]
    Full,
    #[error("queue is closed")]
    Closed,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct QueueStats {
    pub fast_depth: usize,
    pub slow_depth: usize,
    pub fast_processed: u64,
    pub slow_processed: u64,
}

struct Counters {
    fast_processed: AtomicU64,
    slow_processed: AtomicU64,
    closed: AtomicBool,
}

pub struct PriorityQueue {
    fast_tx: mpsc::Sender<Job>,
    fast_rx: tokio::sync::Mutex<mpsc::Receiver<Job>>,
    slow_tx: mpsc::Sender<Job>,
    slow_rx: tokio::sync::Mutex<mpsc::Receiver<Job>>,
    counters: Arc<Counters>,
    /// Signaled on `close()` so a fiber parked in `dequeue_blocking` wakes
    /// in bounded time instead of waiting indefinitely on channels whose
    /// senders are never dropped.
    close_notify: Notify,
}

pub enum Lane {
    Fast,
    Slow,
}

impl PriorityQueue {
    pub fn new(fast_capacity: usize, slow_capacity: usize) -> Self {
        let (fast_tx, fast_rx) = mpsc::channel(fast_capacity.max(1));
        let (slow_tx, slow_rx) = mpsc::channel(slow_capacity.max(1));
        PriorityQueue {
            fast_tx,
            fast_rx: tokio::sync::Mutex::new(fast_rx),
            slow_tx,
            slow_rx: tokio::sync::Mutex::new(slow_rx),
            counters: Arc::new(Counters {
                fast_processed: AtomicU64::new(0),
                slow_processed: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
            close_notify: Notify::new(),
        }
    }

    pub fn enqueue(&self, lane: Lane, job: Job) -> Result<(), EnqueueError> {
        if self.counters.closed.load(Ordering::Acquire) {
            return Err(EnqueueError::Closed);
        }
        let tx = match lane {
            Lane::Fast => &self.fast_tx,
            Lane::Slow => &self.slow_tx,
        };
        tx.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => EnqueueError::Full,
            mpsc::error::TrySendError::Closed(_) => EnqueueError::Closed,
        })
    }

    /// Blocks until a job is available, always preferring the fast lane
    /// over the slow one even while waiting on both. Wakes in bounded
    /// time on `close()` even if nothing is ever enqueued again, draining
    /// whatever is already buffered before reporting `Closed`.
    pub async fn dequeue_blocking(&self) -> Option<(Job, Lane)> {
        let mut fast_rx = self.fast_rx.lock().await;
        let mut slow_rx = self.slow_rx.lock().await;
        loop {
            // Checked first on every iteration (not just inside the select
            // below) so a close that landed before we ever waited, or
            // while we were busy elsewhere, isn't missed: `Notify` only
            // wakes tasks parked in `notified()` at the time it fires.
            if let Ok(j) = fast_rx.try_recv() {
                self.counters.fast_processed.fetch_add(1, Ordering::Relaxed);
                return Some((j, Lane::Fast));
            }
            if let Ok(j) = slow_rx.try_recv() {
                self.counters.slow_processed.fetch_add(1, Ordering::Relaxed);
                return Some((j, Lane::Slow));
            }
            if self.counters.closed.load(Ordering::Acquire) {
                return None;
            }

            tokio::select! {
                biased;

                job = fast_rx.recv() => {
                    return job.map(|j| {
                        self.counters.fast_processed.fetch_add(1, Ordering::Relaxed);
                        (j, Lane::Fast)
                    });
                }
                job = slow_rx.recv() => {
                    return job.map(|j| {
                        self.counters.slow_processed.fetch_add(1, Ordering::Relaxed);
                        (j, Lane::Slow)
                    });
                }
                _ = self.close_notify.notified() => {
                    continue;
                }
            }
        }
    }

    /// Idempotent. Draining already-buffered jobs via non-blocking
    /// `recv` is still possible after close; new enqueues fail. Wakes
    /// any fiber parked in `dequeue_blocking`.
    pub fn close(&self) {
        self.counters.closed.store(true, Ordering::Release);
        self.close_notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.counters.closed.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            fast_depth: self.fast_tx.max_capacity().saturating_sub(self.fast_tx.capacity()),
            slow_depth: self.slow_tx.max_capacity().saturating_sub(self.slow_tx.capacity()),
            fast_processed: self.counters.fast_processed.load(Ordering::Relaxed),
            slow_processed: self.counters.slow_processed.load(Ordering::Relaxed),
        }
    }

    pub fn last_update(&self) -> SystemTime {
        SystemTime::now()
    }
}
