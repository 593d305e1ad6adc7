//! Provider traits — the abstraction over language-model backends.
//!
//! A [`Provider`] takes a conversation, system instructions and a tool surface
//! and returns optional text plus zero or more tool calls. An [`Extractor`] is
//! the multimodal variant: raw bytes in, extracted text out.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::message::Turn;
use crate::tool::ToolCall;

/// A request to a tool-capable model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// The model to use (e.g., "claude-sonnet-4-20250514")
    pub model: String,

    /// System instructions
    #[serde(default)]
    pub system: String,

    /// The full conversation so far
    pub turns: Vec<Turn>,

    /// The tool surface offered this turn
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,

    /// Temperature (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

fn default_temperature() -> f32 {
    0.2
}

impl ProviderRequest {
    /// A single-prompt request with no tools.
    pub fn text(model: impl Into<String>, system: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system: system.into(),
            turns: vec![Turn::User {
                content: prompt.into(),
            }],
            tools: Vec::new(),
            temperature: default_temperature(),
            max_tokens: None,
        }
    }
}

/// A tool definition sent to the model so it knows what it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name, unique within a tool surface
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// A complete response from a provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// Text the model produced alongside (or instead of) tool calls
    #[serde(default)]
    pub text: String,

    /// Tool calls, in the order the model emitted them
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,

    /// Which model actually responded
    #[serde(default)]
    pub model: String,

    /// Token usage statistics
    #[serde(default)]
    pub usage: Option<Usage>,
}

/// Token usage information.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// The core Provider trait.
///
/// The loop engine calls `complete()` without knowing which vendor is behind
/// it.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "anthropic").
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn complete(&self, request: ProviderRequest) -> std::result::Result<ProviderResponse, ProviderError>;
}

/// Multimodal content extraction.
#[async_trait]
pub trait Extractor: Send + Sync {
    fn name(&self) -> &str;

    /// Extract text from `bytes` of the given MIME type following `instruction`.
    async fn extract(
        &self,
        bytes: &[u8],
        mime_type: &str,
        instruction: &str,
    ) -> std::result::Result<String, ProviderError>;
}
