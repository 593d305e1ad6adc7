//! Which clients currently have a pipeline running.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunInfo {
    pub client_id: String,
    pub started_at: DateTime<Utc>,
}

/// Running pipelines keyed by client id. Cheap to clone; clones share state.
#[derive(Debug, Clone, Default)]
pub struct PipelineRegistry {
    runs: Arc<Mutex<HashMap<String, RunInfo>>>,
}

impl PipelineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `client_id`. Returns `None` when a run is already registered;
    /// otherwise the returned guard removes the entry when dropped.
    pub fn start(&self, client_id: &str) -> Option<RunGuard> {
        let mut runs = self.lock();
        if runs.contains_key(client_id) {
            return None;
        }
        runs.insert(
            client_id.to_string(),
            RunInfo {
                client_id: client_id.to_string(),
                started_at: Utc::now(),
            },
        );
        debug!(client_id, "Pipeline registered");
        Some(RunGuard {
            registry: self.clone(),
            client_id: client_id.to_string(),
        })
    }

    pub fn get(&self, client_id: &str) -> Option<RunInfo> {
        self.lock().get(client_id).cloned()
    }

    pub fn contains(&self, client_id: &str) -> bool {
        self.lock().contains_key(client_id)
    }

    /// Running client ids, sorted.
    pub fn running(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    fn remove(&self, client_id: &str) {
        if self.lock().remove(client_id).is_some() {
            debug!(client_id, "Pipeline unregistered");
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, RunInfo>> {
        self.runs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Keeps a client registered for as long as it lives.
#[derive(Debug)]
pub struct RunGuard {
    registry: PipelineRegistry,
    client_id: String,
}

impl RunGuard {
    pub fn client_id(&self) -> &str {
        &self.client_id
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.registry.remove(&self.client_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_start_is_refused_until_guard_drops() {
        let registry = PipelineRegistry::new();
        let guard = registry.start("acme").unwrap();
        assert!(registry.contains("acme"));
        assert!(registry.start("acme").is_none());
        assert_eq!(guard.client_id(), "acme");

        drop(guard);
        assert!(!registry.contains("acme"));
        assert!(registry.start("acme").is_some());
    }

    #[test]
    fn clones_share_runs() {
        let registry = PipelineRegistry::new();
        let other = registry.clone();
        let _b = registry.start("beta").unwrap();
        let _a = other.start("alpha").unwrap();
        assert_eq!(registry.running(), ["alpha", "beta"]);
        assert_eq!(other.get("beta").map(|r| r.client_id), Some("beta".to_string()));
    }

    #[tokio::test]
    async fn guard_released_when_task_fails() {
        let registry = PipelineRegistry::new();
        let guard = registry.start("acme").unwrap();
        let handle = tokio::spawn(async move {
            let _guard = guard;
            panic!("pipeline blew up");
        });
        assert!(handle.await.is_err());
        assert!(!registry.contains("acme"));
    }
}
