//! Builds the language-model collaborators from configuration.

use std::sync::Arc;

use lorekeep_config::AppConfig;
use lorekeep_core::error::ProviderError;
use lorekeep_core::provider::{Extractor, Provider};
use tracing::{info, warn};

use crate::anthropic::AnthropicProvider;
use crate::gemini::{GeminiExtractor, UnconfiguredExtractor};

/// The tool-calling model plus the multimodal extractor.
#[derive(Clone)]
pub struct ProviderSet {
    pub provider: Arc<dyn Provider>,
    pub extractor: Arc<dyn Extractor>,
}

/// Build providers from configuration.
///
/// The tool-calling model is required. A missing extractor key only
/// disables `extract_content`.
pub fn build_from_config(config: &AppConfig) -> Result<ProviderSet, ProviderError> {
    let provider: Arc<dyn Provider> = match config.model.provider.as_str() {
        "anthropic" => {
            let api_key = config
                .model
                .api_key
                .clone()
                .filter(|k| !k.is_empty())
                .ok_or_else(|| ProviderError::NotConfigured("ANTHROPIC_API_KEY is not set".into()))?;
            let mut provider = AnthropicProvider::new(api_key);
            if let Some(url) = &config.model.api_url {
                provider = provider.with_base_url(url);
            }
            Arc::new(provider)
        }
        other => return Err(ProviderError::NotConfigured(format!("unknown provider '{other}'"))),
    };

    let extractor: Arc<dyn Extractor> = match config.extractor.api_key.as_deref().filter(|k| !k.is_empty()) {
        Some(key) => {
            let mut extractor = GeminiExtractor::new(key, &config.extractor.model);
            if let Some(url) = &config.extractor.api_url {
                extractor = extractor.with_base_url(url);
            }
            Arc::new(extractor)
        }
        None => {
            warn!("No extractor API key configured; extract_content will fail");
            Arc::new(UnconfiguredExtractor)
        }
    };

    info!(provider = provider.name(), model = %config.model.model, extractor = extractor.name(), "Providers ready");
    Ok(ProviderSet { provider, extractor })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requires_model_key() {
        let config = AppConfig::default();
        assert!(matches!(build_from_config(&config), Err(ProviderError::NotConfigured(_))));
    }

    #[test]
    fn builds_with_keys() {
        let mut config = AppConfig::default();
        config.model.api_key = Some("sk-ant".into());
        config.extractor.api_key = Some("gm".into());
        let set = build_from_config(&config).unwrap();
        assert_eq!(set.provider.name(), "anthropic");
        assert_eq!(set.extractor.name(), "gemini");
    }

    #[test]
    fn missing_extractor_key_degrades() {
        let mut config = AppConfig::default();
        config.model.api_key = Some("sk-ant".into());
        assert_eq!(build_from_config(&config).unwrap().extractor.name(), "unconfigured");
    }

    #[test]
    fn unknown_provider_rejected() {
        let mut config = AppConfig::default();
        config.model.provider = "mystery".into();
        config.model.api_key = Some("k".into());
        let Err(ProviderError::NotConfigured(msg)) = build_from_config(&config) else {
            panic!("expected NotConfigured");
        };
        assert!(msg.contains("mystery"));
    }
}
