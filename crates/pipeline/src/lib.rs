//! The lorekeep phase orchestrator.
//!
//! A run walks the four phases in order:
//!
//! 1. **Explore**: one explorer agent per data source, concurrently
//! 2. **Structure**: a knowledge tree, then batched structurer agents
//! 3. **Verify**: a questionnaire over open contradictions, polled for answers
//! 4. **Use**: a knowledge writer fills the tree
//!
//! Agents never touch [`PipelineState`](lorekeep_core::PipelineState); the
//! [`Orchestrator`] merges what they return once each run has finished.

pub mod orchestrator;
pub mod prompts;
pub mod registry;
pub mod tree;

pub use orchestrator::{Orchestrator, PipelineOutcome, partition};
pub use registry::{PipelineRegistry, RunGuard, RunInfo};

use std::sync::Arc;

use lorekeep_config::{AppConfig, ExternalToolsConfig};
use lorekeep_core::backend::Backend;
use lorekeep_core::event::EventBus;
use lorekeep_core::pipeline::DataSource;
use lorekeep_core::provider::{Extractor, Provider};
use lorekeep_core::tool::ExternalToolProvider;
use lorekeep_tools::ComposioToolProvider;
use tracing::info;

/// Everything a run needs besides its client id, shared across runs.
#[derive(Clone)]
pub struct Services {
    pub config: AppConfig,
    pub provider: Arc<dyn Provider>,
    pub extractor: Arc<dyn Extractor>,
    pub backend: Arc<dyn Backend>,
    pub external: Option<Arc<dyn ExternalToolProvider>>,
    pub event_bus: Arc<EventBus>,
}

impl Services {
    pub fn new(
        config: AppConfig,
        provider: Arc<dyn Provider>,
        extractor: Arc<dyn Extractor>,
        backend: Arc<dyn Backend>,
    ) -> Self {
        let external = external_provider(&config.external_tools);
        Self {
            config,
            provider,
            extractor,
            backend,
            external,
            event_bus: Arc::new(EventBus::default()),
        }
    }

    pub fn orchestrator(&self, client_id: &str) -> Orchestrator {
        let orchestrator = Orchestrator::new(
            client_id,
            self.config.clone(),
            self.provider.clone(),
            self.extractor.clone(),
            self.backend.clone(),
        )
        .with_event_bus(self.event_bus.clone());
        match &self.external {
            Some(external) => orchestrator.with_external(external.clone()),
            None => orchestrator,
        }
    }

    /// Sources registered for `client_id` in the backend, or the configured
    /// defaults when it has none.
    pub async fn resolve_sources(&self, client_id: &str) -> Vec<DataSource> {
        let sources = self.backend.data_sources(client_id).await;
        if !sources.is_empty() {
            return sources;
        }
        info!(client_id, "No data sources registered; using configured defaults");
        self.config
            .pipeline
            .default_sources
            .iter()
            .map(|d| DataSource::new(format!("default-{}", d.source_type), &d.source_type, &d.label))
            .collect()
    }
}

/// The configured external tool integration, if it has a key.
pub fn external_provider(config: &ExternalToolsConfig) -> Option<Arc<dyn ExternalToolProvider>> {
    let key = config.api_key.as_deref().filter(|k| !k.is_empty())?;
    Some(Arc::new(ComposioToolProvider::new(key).with_base_url(&config.api_url)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use lorekeep_core::testing::{RecordingBackend, ScriptedProvider, StaticExtractor};

    fn services(backend: RecordingBackend) -> Services {
        Services::new(
            AppConfig::default(),
            Arc::new(ScriptedProvider::new()),
            Arc::new(StaticExtractor::returning("")),
            Arc::new(backend),
        )
    }

    #[tokio::test]
    async fn registered_sources_win() {
        let services = services(RecordingBackend::with_sources(vec![DataSource::new("ds9", "sheets", "Budget")]));
        let sources = services.resolve_sources("acme").await;
        assert_eq!(sources, vec![DataSource::new("ds9", "sheets", "Budget")]);
    }

    #[tokio::test]
    async fn falls_back_to_default_sources() {
        let sources = services(RecordingBackend::default()).resolve_sources("acme").await;
        let kinds: Vec<(&str, &str)> = sources.iter().map(|s| (s.id.as_str(), s.source_type.as_str())).collect();
        assert_eq!(kinds, [("default-gmail", "gmail"), ("default-drive", "drive")]);
    }

    #[test]
    fn external_provider_needs_a_key() {
        let mut config = ExternalToolsConfig::default();
        assert!(external_provider(&config).is_none());
        config.api_key = Some(String::new());
        assert!(external_provider(&config).is_none());
        config.api_key = Some("ck_live".into());
        assert_eq!(external_provider(&config).map(|p| p.name().to_string()).as_deref(), Some("composio"));
    }
}
