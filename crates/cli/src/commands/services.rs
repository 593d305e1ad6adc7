//! Wiring the configured collaborators together.

use std::sync::Arc;

use anyhow::Context;
use lorekeep_backend::HttpBackend;
use lorekeep_config::AppConfig;
use lorekeep_pipeline::Services;

pub fn backend(config: &AppConfig) -> anyhow::Result<HttpBackend> {
    HttpBackend::from_config(&config.backend).context("backend is not configured (set BACKEND_URL)")
}

pub fn build(config: &AppConfig) -> anyhow::Result<Services> {
    let providers = lorekeep_providers::build_from_config(config).context("model provider is not configured")?;
    let backend = backend(config)?;
    let services = Services::new(config.clone(), providers.provider, providers.extractor, Arc::new(backend));
    if services.external.is_none() {
        tracing::warn!("No external tools API key; agents only get local tools");
    }
    Ok(services)
}
