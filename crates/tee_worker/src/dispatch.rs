//! The job server: admission, routing, and the worker-fiber dispatch loop.

use crate::cache::ResultCache;
use crate::health::HealthTracker;
use crate::priority::PriorityClassifier;
use crate::queue::{EnqueueError, Lane, PriorityQueue};
use crate::telemetry::{StatsEvent, StatsSink};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tee_protocol::{AdmissionError, Job, JobResult, DEFAULT_JOB_TIMEOUT_SECS};
use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Contract a concrete job implementation (web scraper, transcription,
/// ...) fulfills. The job server never inspects a handler beyond this.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn execute(&self, job: &Job) -> anyhow::Result<JobResult>;

    /// The job-type tag this handler answers to.
    fn tag(&self) -> &str;
}

struct Registration {
    handler: Arc<dyn Handler>,
    lock: AsyncMutex<()>,
}

/// Deterministic namespace for deriving a job's cache key from
/// `(identity, nonce)`, so a duplicate submission collides with itself
/// before a second random id is ever allocated.
const DEDUP_NAMESPACE: Uuid = Uuid::from_bytes([
    0x6a, 0xee, 0x4a, 0x64, 0x6f, 0xd6, 0x4d, 0x59, 0x93, 0x27, 0x2e, 0x42, 0xf1, 0xe8, 0x0b, 0x11,
]);

fn dedup_key(identity: &str, nonce: &str) -> Uuid {
    let mut material = Vec::with_capacity(identity.len() + nonce.len() + 1);
    material.extend_from_slice(identity.as_bytes());
    material.push(0);
    material.extend_from_slice(nonce.as_bytes());
    Uuid::new_v5(&DEDUP_NAMESPACE, &material)
}

pub struct JobServerConfig {
    pub worker_count: usize,
    pub default_job_timeout: Duration,
    pub requester_whitelist: Option<HashSet<String>>,
}

impl Default for JobServerConfig {
    fn default() -> Self {
        JobServerConfig {
            worker_count: 1,
            default_job_timeout: Duration::from_secs(DEFAULT_JOB_TIMEOUT_SECS),
            requester_whitelist: None,
        }
    }
}

pub struct JobServer {
    config: JobServerConfig,
    handlers: HashMap<String, Registration>,
    queue: Arc<PriorityQueue>,
    cache: Arc<ResultCache>,
    classifier: Arc<PriorityClassifier>,
    health: Arc<HealthTracker>,
    stats: StatsSink,
    /// Keys admitted but not yet (or not ever) resolved into a cached
    /// result. Checked independently of the result cache so that a
    /// duplicate submitted before the first has finished executing is
    /// still rejected -- see testable invariant 6.
    admitted: RwLock<HashSet<Uuid>>,
}

impl JobServer {
    pub fn new(
        config: JobServerConfig,
        handlers: Vec<Arc<dyn Handler>>,
        queue: Arc<PriorityQueue>,
        cache: Arc<ResultCache>,
        classifier: Arc<PriorityClassifier>,
        health: Arc<HealthTracker>,
        stats: StatsSink,
    ) -> Self {
        let handlers = handlers
            .into_iter()
            .map(|h| {
                let tag = h.tag().to_string();
                (
                    tag,
                    Registration {
                        handler: h,
                        lock: AsyncMutex::new(()),
                    },
                )
            })
            .collect();
        JobServer {
            config,
            handlers,
            queue,
            cache,
            classifier,
            health,
            stats,
            admitted: RwLock::new(HashSet::new()),
        }
    }

    pub fn advertised_capabilities(&self) -> Vec<String> {
        self.health.reported_capabilities()
    }

    /// Admits `job`, returning the id the client should poll. Mirrors
    /// ยง4.6: whitelist, dedup, capability health, then enqueue with a
    /// same-priority-lane-first, other-lane-as-fallback policy.
    pub async fn add_job(&self, mut job: Job) -> Result<Uuid, AdmissionError> {
        let identity = job.identity.clone().unwrap_or_default();

        if let Some(whitelist) = &self.config.requester_whitelist {
            if !whitelist.is_empty() && !whitelist.contains(&identity) {
                return Err(AdmissionError::NotWhitelisted);
            }
        }

        let uid = dedup_key(&identity, &job.nonce);

        // Checked and recorded atomically under one write lock so two
        // concurrent `add_job` calls for the same (identity, nonce) can't
        // both observe "not seen yet" before either has a chance to
        // record it. Independent of the result cache, which only knows
        // about jobs that have already finished executing.
        {
            let mut admitted = self.admitted.write().await;
            if admitted.contains(&uid) || self.cache.contains_fresh(&uid).await {
                return Err(AdmissionError::DuplicateNonce);
            }
            admitted.insert(uid);
        }

        if self.handlers.contains_key(&job.job_type) && !self.health.is_healthy(&job.job_type) {
            self.admitted.write().await.remove(&uid);
            return Err(AdmissionError::CapabilityUnhealthy(job.job_type.clone()));
        }

        job.uid = Some(uid);

        let preferred = if self.classifier.is_priority(&identity) {
            Lane::Fast
        } else {
            Lane::Slow
        };
        let fallback = match preferred {
            Lane::Fast => Lane::Slow,
            Lane::Slow => Lane::Fast,
        };

        match self.queue.enqueue(preferred, job.clone()) {
            Ok(()) => {
                self.stats.record(StatsEvent::JobAdmitted);
                return Ok(uid);
            }
            Err(EnqueueError::Closed) => {
                self.admitted.write().await.remove(&uid);
                return Err(AdmissionError::QueueClosed);
            }
            Err(EnqueueError::Full) => {}
        }
        match self.queue.enqueue(fallback, job) {
            Ok(()) => {
                self.stats.record(StatsEvent::JobAdmitted);
                Ok(uid)
            }
            Err(EnqueueError::Closed) => {
                self.admitted.write().await.remove(&uid);
                Err(AdmissionError::QueueClosed)
            }
            Err(EnqueueError::Full) => {
                self.admitted.write().await.remove(&uid);
                Err(AdmissionError::QueueFull)
            }
        }
    }

    pub async fn poll_result(&self, uid: &Uuid) -> Option<JobResult> {
        self.cache.get(uid).await
    }

    /// Runs `config.worker_count` dispatch fibers until the queue is
    /// closed. Each fiber blocks on the queue, runs the matched handler
    /// under its per-type lock, and writes the outcome to the cache.
    pub async fn run(self: Arc<Self>) {
        let mut fibers = Vec::new();
        for id in 0..self.config.worker_count.max(1) {
            let server = self.clone();
            fibers.push(tokio::spawn(async move { server.dispatch_loop(id).await }));
        }
        for fiber in fibers {
            let _ = fiber.await;
        }
    }

    async fn dispatch_loop(&self, worker_id: usize) {
        loop {
            let Some((job, _lane)) = self.queue.dequeue_blocking().await else {
                tracing::debug!(worker_id, "dispatch fiber exiting, queue closed");
                return;
            };
            self.run_one(job).await;
        }
    }

    #[tracing::instrument(skip(self, job), fields(job_type = %job.job_type, uid = ?job.uid))]
    async fn run_one(&self, job: Job) {
        let uid = job.uid.expect("jobs are only enqueued after id assignment");

        let Some(registration) = self.handlers.get(&job.job_type) else {
            let result = JobResult::failed(job.clone(), format!("unknown job type: {}", job.job_type));
            self.stats.record(StatsEvent::JobCompleted { success: false });
            self.cache.set(uid, result).await;
            return;
        };

        let _permit = registration.lock.lock().await;

        let timeout = job
            .deadline_secs
            .map(Duration::from_secs)
            .unwrap_or(self.config.default_job_timeout);

        let handler = registration.handler.clone();
        let job_for_handler = job.clone();
        let outcome = tokio::time::timeout(timeout, async move {
            handler.execute(&job_for_handler).await
        })
        .await;

        let result = match outcome {
            Ok(Ok(result)) => {
                if result.is_success() {
                    self.health.mark_healthy(&job.job_type);
                    self.stats.record(StatsEvent::CapabilityTransition {
                        tag: job.job_type.clone(),
                        healthy: true,
                    });
                } else {
                    self.health.mark_unhealthy(&job.job_type, result.error.clone());
                    self.stats.record(StatsEvent::CapabilityTransition {
                        tag: job.job_type.clone(),
                        healthy: false,
                    });
                }
                result
            }
            Ok(Err(err)) => {
                self.health.mark_unhealthy(&job.job_type, err.to_string());
                self.stats.record(StatsEvent::CapabilityTransition {
                    tag: job.job_type.clone(),
                    healthy: false,
                });
                JobResult::failed(job.clone(), format!("{err:#}"))
            }
            Err(_) => {
                self.health.mark_unhealthy(&job.job_type, "timeout");
                self.stats.record(StatsEvent::CapabilityTransition {
                    tag: job.job_type.clone(),
                    healthy: false,
                });
                JobResult::failed(job.clone(), "handler exceeded its deadline")
            }
        };

        self.stats.record(StatsEvent::JobCompleted {
            success: result.is_success(),
        });
        self.cache.set(uid, result).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingEcho {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Handler for CountingEcho {
        async fn execute(&self, job: &Job) -> anyhow::Result<JobResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(JobResult::ok(job.clone(), b"ok".to_vec()))
        }

        fn tag(&self) -> &str {
            "echo"
        }
    }

    fn job(identity: &str, nonce: &str, job_type: &str) -> Job {
        Job {
            job_type: job_type.into(),
            arguments: Map::new(),
            nonce: nonce.into(),
            identity: Some(identity.into()),
            uid: None,
            deadline_secs: None,
        }
    }

    async fn make_server(handler: Arc<dyn Handler>) -> Arc<JobServer> {
        let queue = Arc::new(PriorityQueue::new(16, 16));
        let cache = Arc::new(ResultCache::new(100, Duration::from_secs(60)));
        let classifier = Arc::new(PriorityClassifier::new(None));
        let health = Arc::new(HealthTracker::new(Map::new()));
        let (stats, _drain) = crate::telemetry::channel(64);
        Arc::new(JobServer::new(
            JobServerConfig {
                worker_count: 1,
                ..Default::default()
            },
            vec![handler],
            queue,
            cache,
            classifier,
            health,
            stats,
        ))
    }

    #[tokio::test]
    async fn unknown_job_type_produces_an_error_result() {
        let server = make_server(Arc::new(CountingEcho {
            calls: AtomicUsize::new(0),
        }))
        .await;
        let uid = server.add_job(job("a", "n1", "does-not-exist")).await.unwrap();
        let handle = server.clone();
        tokio::spawn(async move { handle.run().await });

        let result = poll_until_ready(&server, &uid).await;
        assert!(result.error.contains("unknown job type"));
    }

    #[tokio::test]
    async fn duplicate_nonce_is_rejected() {
        let server = make_server(Arc::new(CountingEcho {
            calls: AtomicUsize::new(0),
        }))
        .await;
        server.add_job(job("a", "n1", "echo")).await.unwrap();
        let second = server.add_job(job("a", "n1", "echo")).await;
        assert!(matches!(second, Err(AdmissionError::DuplicateNonce)));
    }

    async fn poll_until_ready(server: &JobServer, uid: &Uuid) -> JobResult {
        for _ in 0..200 {
            if let Some(r) = server.poll_result(uid).await {
                return r;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("result never became ready");
    }
}
