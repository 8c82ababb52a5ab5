//! Tracks which requester identities receive fast-lane treatment.

use serde::Deserialize;
use std::collections::HashSet;
use std::sync::RwLock;
use std::time::Duration;

#[derive(Deserialize)]
struct WorkersResponse {
    workers: Vec<String>,
}

pub struct PriorityClassifier {
    identities: RwLock<HashSet<String>>,
    endpoint: Option<String>,
    client: reqwest::Client,
}

impl PriorityClassifier {
    pub fn new(endpoint: Option<String>) -> Self {
        PriorityClassifier {
            identities: RwLock::new(HashSet::new()),
            endpoint,
            client: reqwest::Client::new(),
        }
    }

    pub fn is_priority(&self, identity: &str) -> bool {
        self.identities
            .read()
            .expect("priority set lock poisoned")
            .contains(identity)
    }

    pub fn replace_all(&self, identities: impl IntoIterator<Item = String>) {
        let mut set = self.identities.write().expect("priority set lock poisoned");
        *set = identities.into_iter().collect();
    }

    async fn refresh_once(&self) -> anyhow::Result<()> {
        let Some(endpoint) = &self.endpoint else {
            return Ok(());
        };
        let resp = self
            .client
            .get(endpoint)
            .send()
            .await?
            .error_for_status()?
            .json::<WorkersResponse>()
            .await?;
        self.replace_all(resp.workers);
        Ok(())
    }

    /// Runs until cancelled. Fetches immediately, then refreshes on
    /// `interval`. A failed fetch logs a warning and leaves the current
    /// set untouched; it is retried on the next tick, not immediately.
    pub async fn run(&self, interval: Duration) {
        if self.endpoint.is_none() {
            return;
        }
        if let Err(err) = self.refresh_once().await {
            tracing::warn!(%err, "initial priority worker list fetch failed");
        }
        let mut tick = tokio::time::interval(interval);
        tick.tick().await; // first tick fires immediately; skip it, we just fetched
        loop {
            tick.tick().await;
            if let Err(err) = self.refresh_once().await {
                tracing::warn!(%err, "priority worker list refresh failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_identity_is_not_priority() {
        let c = PriorityClassifier::new(None);
        assert!(!c.is_priority("nobody"));
    }

    #[test]
    fn replace_all_swaps_atomically() {
        let c = PriorityClassifier::new(None);
        c.replace_all(vec!["alice".to_string()]);
        assert!(c.is_priority("alice"));
        c.replace_all(vec!["bob".to_string()]);
        assert!(!c.is_priority("alice"));
        assert!(c.is_priority("bob"));
    }
}
