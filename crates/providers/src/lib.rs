//! Language-model providers for lorekeep.
//!
//! The tool-calling model implements `lorekeep_core::Provider`; the
//! multimodal extractor implements `lorekeep_core::Extractor`.
//! [`build_from_config`] picks both from configuration.

pub mod anthropic;
pub mod gemini;
pub mod router;

pub use anthropic::AnthropicProvider;
pub use gemini::{GeminiExtractor, UnconfiguredExtractor};
pub use router::{ProviderSet, build_from_config};
