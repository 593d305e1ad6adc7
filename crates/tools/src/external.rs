//! HTTP client for the external tool integration (Composio v3 REST API).
//!
//! Source tools for Gmail, Google Drive and Google Sheets are executed on the
//! integration's side under a per-client user identity. This client only
//! lists their schemas and forwards calls.

use async_trait::async_trait;
use lorekeep_core::error::ToolError;
use lorekeep_core::provider::ToolDefinition;
use lorekeep_core::tool::{ExternalExecution, ExternalToolProvider};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_BASE_URL: &str = "https://backend.composio.dev/api/v3";

/// Source category → toolkit slug.
pub fn toolkit_for(category: &str) -> Option<&'static str> {
    match category {
        "gmail" => Some("gmail"),
        "drive" => Some("googledrive"),
        "sheets" => Some("googlesheets"),
        _ => None,
    }
}

pub struct ComposioToolProvider {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl ComposioToolProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            client,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

#[derive(Debug, Deserialize)]
struct ToolList {
    #[serde(default)]
    items: Vec<ToolSchema>,
}

#[derive(Debug, Deserialize)]
struct ToolSchema {
    slug: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    input_parameters: Value,
}

impl From<ToolSchema> for ToolDefinition {
    fn from(schema: ToolSchema) -> Self {
        let parameters = if schema.input_parameters.is_object() {
            schema.input_parameters
        } else {
            json!({"type": "object", "properties": {}})
        };
        ToolDefinition {
            name: schema.slug,
            description: schema.description,
            parameters,
        }
    }
}

#[async_trait]
impl ExternalToolProvider for ComposioToolProvider {
    fn name(&self) -> &str {
        "composio"
    }

    async fn tools(&self, user_id: &str, category: &str) -> Result<Vec<ToolDefinition>, ToolError> {
        let Some(toolkit) = toolkit_for(category) else {
            debug!(category, "No external toolkit for category");
            return Ok(Vec::new());
        };
        let url = format!("{}/tools", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("x-api-key", &self.api_key)
            .query(&[("toolkit_slug", toolkit), ("user_id", user_id), ("limit", "100")])
            .send()
            .await
            .map_err(|e| ToolError::failed("composio", format!("tool listing failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), toolkit, "External tool listing rejected");
            return Err(ToolError::failed("composio", format!("tool listing returned {status}: {body}")));
        }
        let list: ToolList = response
            .json()
            .await
            .map_err(|e| ToolError::failed("composio", format!("invalid tool listing: {e}")))?;
        debug!(toolkit, count = list.items.len(), "Fetched external tools");
        Ok(list.items.into_iter().map(ToolDefinition::from).collect())
    }

    async fn execute(&self, user_id: &str, tool_name: &str, arguments: Value) -> Result<ExternalExecution, ToolError> {
        let url = format!("{}/tools/execute/{}", self.base_url, tool_name);
        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .json(&json!({ "user_id": user_id, "arguments": arguments }))
            .send()
            .await
            .map_err(|e| ToolError::failed(tool_name, format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Ok(ExternalExecution {
                successful: false,
                data: Value::Null,
                error: Some(format!("HTTP {status}: {body}")),
            });
        }
        response
            .json::<ExternalExecution>()
            .await
            .map_err(|e| ToolError::failed(tool_name, format!("invalid execution response: {e}")))
    }
}
