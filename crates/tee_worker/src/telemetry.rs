//! Bounded event channel feeding process-wide counters. Never applies
//! backpressure to the job path: a full channel drops the event.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub enum StatsEvent {
    JobAdmitted,
    JobCompleted { success: bool },
    CapabilityTransition { tag: String, healthy: bool },
    KeyRotated,
}

#[derive(Default)]
pub struct Counters {
    pub admitted: AtomicU64,
    pub completed_ok: AtomicU64,
    pub completed_err: AtomicU64,
    pub key_rotations: AtomicU64,
}

#[derive(Clone)]
pub struct StatsSink {
    tx: mpsc::Sender<StatsEvent>,
    counters: Arc<Counters>,
}

impl StatsSink {
    pub fn record(&self, event: StatsEvent) {
        if self.tx.try_send(event).is_err() {
            tracing::warn!("stats channel full, dropping event");
        }
    }

    /// Process-wide counters, folded in by the background drain task.
    /// Read by the `/capabilities` route and the periodic log summary.
    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    /// Logs a one-line counters summary on `interval`. Runs for the life
    /// of the process, same shape as the cache sweeper and health
    /// reconciler loops.
    pub async fn run_summary_log(&self, interval: std::time::Duration) {
        let mut tick = tokio::time::interval(interval);
        loop {
            tick.tick().await;
            tracing::info!(
                admitted = self.counters.admitted.load(Ordering::Relaxed),
                completed_ok = self.counters.completed_ok.load(Ordering::Relaxed),
                completed_err = self.counters.completed_err.load(Ordering::Relaxed),
                key_rotations = self.counters.key_rotations.load(Ordering::Relaxed),
                "stats summary"
            );
        }
    }
}

/// Builds a sink/drain pair. `drain` should be spawned once and run for
/// the life of the process.
pub fn channel(buf_size: usize) -> (StatsSink, impl std::future::Future<Output = ()>) {
    let (tx, mut rx) = mpsc::channel(buf_size.max(1));
    let counters = Arc::new(Counters::default());
    let sink = StatsSink {
        tx,
        counters: counters.clone(),
    };

    let drain = async move {
        while let Some(event) = rx.recv().await {
            match event {
                StatsEvent::JobAdmitted => {
                    counters.admitted.fetch_add(1, Ordering::Relaxed);
                }
                StatsEvent::JobCompleted { success: true } => {
                    counters.completed_ok.fetch_add(1, Ordering::Relaxed);
                }
                StatsEvent::JobCompleted { success: false } => {
                    counters.completed_err.fetch_add(1, Ordering::Relaxed);
                }
                StatsEvent::CapabilityTransition { tag, healthy } => {
                    tracing::info!(tag, healthy, "capability health transition");
                }
                StatsEvent::KeyRotated => {
                    counters.key_rotations.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    };

    (sink, drain)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn drain_folds_events_into_counters() {
        let (sink, drain) = channel(8);
        let drain_handle = tokio::spawn(drain);

        sink.record(StatsEvent::JobAdmitted);
        sink.record(StatsEvent::JobCompleted { success: true });
        sink.record(StatsEvent::JobCompleted { success: false });
        sink.record(StatsEvent::KeyRotated);

        // give the drain task a chance to process before we read through
        // the same `Arc` the events were folded into.
        for _ in 0..50 {
            if sink.counters().admitted.load(Ordering::Relaxed) == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        assert_eq!(sink.counters().admitted.load(Ordering::Relaxed), 1);
        assert_eq!(sink.counters().completed_ok.load(Ordering::Relaxed), 1);
        assert_eq!(sink.counters().completed_err.load(Ordering::Relaxed), 1);
        assert_eq!(sink.counters().key_rotations.load(Ordering::Relaxed), 1);

        drain_handle.abort();
    }
}
