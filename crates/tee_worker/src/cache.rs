//! Bounded, TTL-indexed store for sealed job results.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use tee_protocol::JobResult;
use tokio::sync::Mutex;
use uuid::Uuid;

struct Entry {
    result: JobResult,
    inserted_at: Instant,
}

struct Inner {
    entries: HashMap<Uuid, Entry>,
    /// MRU at the back, LRU at the front.
    order: Vec<Uuid>,
    max_size: usize,
    ttl: Duration,
}

impl Inner {
    fn touch(&mut self, id: Uuid) {
        self.order.retain(|x| *x != id);
        self.order.push(id);
    }

    fn evict_lru(&mut self) {
        while self.entries.len() > self.max_size {
            if self.order.is_empty() {
                break;
            }
            let oldest = self.order.remove(0);
            self.entries.remove(&oldest);
        }
    }

    fn is_expired(&self, entry: &Entry, now: Instant) -> bool {
        now.saturating_duration_since(entry.inserted_at) > self.ttl
    }
}

/// A bounded LRU with per-entry TTL. Every operation takes a single lock;
/// contention is negligible since the cache is touched at most twice per
/// job (once on completion, once per poll).
pub struct ResultCache {
    inner: Mutex<Inner>,
}

impl ResultCache {
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        ResultCache {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                order: Vec::new(),
                max_size: max_size.max(1),
                ttl,
            }),
        }
    }

    pub async fn set(&self, id: Uuid, result: JobResult) {
        let mut inner = self.inner.lock().await;
        inner.entries.insert(
            id,
            Entry {
                result,
                inserted_at: Instant::now(),
            },
        );
        inner.touch(id);
        inner.evict_lru();
    }

    /// Returns `None` if absent or expired. Expired entries are evicted
    /// as a side effect of this call.
    pub async fn get(&self, id: &Uuid) -> Option<JobResult> {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        let expired = match inner.entries.get(id) {
            Some(entry) => inner.is_expired(entry, now),
            None => return None,
        };
        if expired {
            inner.entries.remove(id);
            inner.order.retain(|x| x != id);
            return None;
        }
        inner.touch(*id);
        inner.entries.get(id).map(|e| e.result.clone())
    }

    pub async fn contains_fresh(&self, id: &Uuid) -> bool {
        self.get(id).await.is_some()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    /// Evicts every entry past its TTL. Intended to be driven by a
    /// periodic background task at roughly `ttl / 2`.
    pub async fn sweep_expired(&self) -> usize {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        let expired: Vec<Uuid> = inner
            .entries
            .iter()
            .filter(|(_, e)| inner.is_expired(e, now))
            .map(|(id, _)| *id)
            .collect();
        for id in &expired {
            inner.entries.remove(id);
            inner.order.retain(|x| x != id);
        }
        expired.len()
    }

    pub async fn run_sweeper(&self, interval: Duration) {
        let mut tick = tokio::time::interval(interval);
        loop {
            tick.tick().await;
            let evicted = self.sweep_expired().await;
            if evicted > 0 {
                tracing::debug!(evicted, "result cache sweep");
            }
        }
    }
}
