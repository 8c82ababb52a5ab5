//! Per-capability health state, with background re-verification on
//! exponential backoff.

use async_trait::async_trait;
use exponential_backoff::Backoff;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

const VERIFY_TIMEOUT: Duration = Duration::from_secs(30);
const BACKOFF_CAP: Duration = Duration::from_secs(15 * 60);
const MAX_BACKOFF_RETRIES: u32 = 32;

#[async_trait]
pub trait Verifier: Send + Sync {
    /// Performs the minimum realistic round-trip for a capability.
    async fn verify(&self) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    Healthy,
    Unhealthy,
    Unknown,
}

struct CapabilityState {
    health: Health,
    last_error: Option<String>,
    last_checked: Option<Instant>,
    next_retry: Option<Instant>,
    attempt: u32,
}

impl Default for CapabilityState {
    fn default() -> Self {
        CapabilityState {
            health: Health::Unknown,
            last_error: None,
            last_checked: None,
            next_retry: None,
            attempt: 0,
        }
    }
}

pub struct HealthTracker {
    states: RwLock<HashMap<String, CapabilityState>>,
    verifiers: HashMap<String, Box<dyn Verifier>>,
    backoff: Backoff,
}

impl HealthTracker {
    pub fn new(verifiers: HashMap<String, Box<dyn Verifier>>) -> Self {
        let mut states = HashMap::new();
        for tag in verifiers.keys() {
            states.insert(tag.clone(), CapabilityState::default());
        }
        HealthTracker {
            states: RwLock::new(states),
            verifiers,
            backoff: Backoff::new(MAX_BACKOFF_RETRIES, Duration::from_secs(1), BACKOFF_CAP),
        }
    }

    /// A capability with no registered verifier is "unknown," not
    /// "unhealthy" -- it may still be dispatched directly, it's simply
    /// never gated or advertised by this tracker.
    pub fn is_healthy(&self, tag: &str) -> bool {
        if !self.verifiers.contains_key(tag) {
            return true;
        }
        matches!(
            self.states.read().expect("health lock poisoned").get(tag),
            Some(CapabilityState {
                health: Health::Healthy,
                ..
            })
        )
    }

    pub fn mark_healthy(&self, tag: &str) {
        let mut states = self.states.write().expect("health lock poisoned");
        let state = states.entry(tag.to_string()).or_default();
        state.health = Health::Healthy;
        state.last_error = None;
        state.last_checked = Some(Instant::now());
        state.next_retry = None;
        state.attempt = 0;
    }

    pub fn mark_unhealthy(&self, tag: &str, err: impl Into<String>) {
        let mut states = self.states.write().expect("health lock poisoned");
        let state = states.entry(tag.to_string()).or_default();
        state.health = Health::Unhealthy;
        state.last_error = Some(err.into());
        state.last_checked = Some(Instant::now());
        let delay = self
            .backoff
            .iter()
            .nth(state.attempt as usize)
            .flatten()
            .unwrap_or(BACKOFF_CAP);
        state.next_retry = Some(Instant::now() + delay.min(BACKOFF_CAP));
        state.attempt = state.attempt.saturating_add(1);
    }

    /// Capabilities that are both configured and currently healthy; the
    /// set advertised externally.
    pub fn reported_capabilities(&self) -> Vec<String> {
        self.verifiers
            .keys()
            .filter(|tag| self.is_healthy(tag))
            .cloned()
            .collect()
    }

    async fn verify_one(&self, tag: &str, verifier: &dyn Verifier) {
        match tokio::time::timeout(VERIFY_TIMEOUT, verifier.verify()).await {
            Ok(Ok(())) => self.mark_healthy(tag),
            Ok(Err(err)) => self.mark_unhealthy(tag, err.to_string()),
            Err(_) => self.mark_unhealthy(tag, "verifier timed out"),
        }
    }

    /// Runs until cancelled, re-verifying any unhealthy capability whose
    /// backoff has elapsed.
    pub async fn reconcile(&self, poll_interval: Duration) {
        let mut tick = tokio::time::interval(poll_interval);
        loop {
            tick.tick().await;
            let due: Vec<String> = {
                let states = self.states.read().expect("health lock poisoned");
                let now = Instant::now();
                states
                    .iter()
                    .filter(|(_, s)| {
                        s.health != Health::Healthy && s.next_retry.map_or(true, |t| now >= t)
                    })
                    .map(|(tag, _)| tag.clone())
                    .collect()
            };
            for tag in due {
                if let Some(verifier) = self.verifiers.get(&tag) {
                    self.verify_one(&tag, verifier.as_ref()).await;
                }
            }
        }
    }

    /// Verifies every registered capability once; intended to be awaited
    /// at startup before the server begins accepting connections.
    pub async fn verify_all_at_startup(&self) {
        for (tag, verifier) in &self.verifiers {
            self.verify_one(tag, verifier.as_ref()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysOk;
    #[async_trait]
    impl Verifier for AlwaysOk {
        async fn verify(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct AlwaysFails;
    #[async_trait]
    impl Verifier for AlwaysFails {
        async fn verify(&self) -> anyhow::Result<()> {
            anyhow::bail!("nope")
        }
    }

    #[tokio::test]
    async fn unknown_capability_without_verifier_is_healthy_for_gating() {
        let tracker = HealthTracker::new(HashMap::new());
        assert!(tracker.is_healthy("anything"));
    }

    #[tokio::test]
    async fn startup_verification_sets_initial_state() {
        let mut verifiers: HashMap<String, Box<dyn Verifier>> = HashMap::new();
        verifiers.insert("good".into(), Box::new(AlwaysOk));
        verifiers.insert("bad".into(), Box::new(AlwaysFails));
        let tracker = HealthTracker::new(verifiers);

        tracker.verify_all_at_startup().await;
        assert!(tracker.is_healthy("good"));
        assert!(!tracker.is_healthy("bad"));
        assert_eq!(tracker.reported_capabilities(), vec!["good".to_string()]);
    }

    #[tokio::test]
    async fn mark_unhealthy_schedules_a_future_retry() {
        let mut verifiers: HashMap<String, Box<dyn Verifier>> = HashMap::new();
        verifiers.insert("bad".into(), Box::new(AlwaysFails));
        let tracker = HealthTracker::new(verifiers);
        tracker.mark_unhealthy("bad", "boom");
        let retry_at = tracker
            .states
            .read()
            .unwrap()
            .get("bad")
            .unwrap()
            .next_retry
            .unwrap();
        assert!(retry_at > Instant::now());
    }
}
