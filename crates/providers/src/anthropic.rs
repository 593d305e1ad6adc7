//! Anthropic native provider implementation.
//!
//! Uses Anthropic's Messages API directly.
//!
//! Features:
//! - `x-api-key` header authentication (not Bearer)
//! - `anthropic-version` header
//! - System prompt as top-level field
//! - Native tool use with `tool_use` / `tool_result` content blocks

use async_trait::async_trait;
use lorekeep_core::error::ProviderError;
use lorekeep_core::message::Turn;
use lorekeep_core::provider::*;
use lorekeep_core::tool::ToolCall;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const ANTHROPIC_VERSION: &str = "2023-06-01";
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Anthropic native Messages API provider.
pub struct AnthropicProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider.
    pub fn new(api_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            name: "anthropic".into(),
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            client,
        }
    }

    /// Create with a custom base URL (e.g., for testing or proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Convert conversation turns to Anthropic API messages.
    ///
    /// Model turns become assistant messages with `tool_use` blocks; tool
    /// results become a single user message of `tool_result` blocks.
    fn to_api_messages(turns: &[Turn]) -> Vec<AnthropicMessage> {
        turns
            .iter()
            .map(|turn| match turn {
                Turn::User { content } => AnthropicMessage {
                    role: "user".into(),
                    content: AnthropicContent::Text(content.clone()),
                },
                Turn::Model { text, tool_calls } if tool_calls.is_empty() => AnthropicMessage {
                    role: "assistant".into(),
                    content: AnthropicContent::Text(text.clone()),
                },
                Turn::Model { text, tool_calls } => {
                    let mut blocks: Vec<ContentBlock> = Vec::new();
                    if !text.is_empty() {
                        blocks.push(ContentBlock::Text { text: text.clone() });
                    }
                    for tc in tool_calls {
                        blocks.push(ContentBlock::ToolUse {
                            id: tc.id.clone(),
                            name: tc.name.clone(),
                            input: tc.input.clone(),
                        });
                    }
                    AnthropicMessage {
                        role: "assistant".into(),
                        content: AnthropicContent::Blocks(blocks),
                    }
                }
                Turn::ToolResults { results } => AnthropicMessage {
                    role: "user".into(),
                    content: AnthropicContent::Blocks(
                        results
                            .iter()
                            .map(|r| ContentBlock::ToolResult {
                                tool_use_id: r.call_id.clone(),
                                content: r.content.clone(),
                                is_error: r.is_error,
                            })
                            .collect(),
                    ),
                },
            })
            .collect()
    }

    /// Convert tool definitions to Anthropic format.
    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<AnthropicTool> {
        tools
            .iter()
            .map(|t| AnthropicTool {
                name: t.name.clone(),
                description: t.description.clone(),
                input_schema: t.parameters.clone(),
            })
            .collect()
    }

    /// Convert Anthropic API response to our ProviderResponse.
    fn response_to_provider_response(resp: AnthropicResponse) -> ProviderResponse {
        let mut text = String::new();
        let mut tool_calls = Vec::new();

        for block in resp.content {
            match block {
                ResponseContentBlock::Text { text: part } => {
                    if !text.is_empty() {
                        text.push('\n');
                    }
                    text.push_str(&part);
                }
                ResponseContentBlock::ToolUse { id, name, input } => {
                    tool_calls.push(ToolCall { id, name, input });
                }
                ResponseContentBlock::Other => {}
            }
        }

        ProviderResponse {
            text,
            tool_calls,
            model: resp.model,
            usage: Some(Usage {
                input_tokens: resp.usage.input_tokens,
                output_tokens: resp.usage.output_tokens,
            }),
        }
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: ProviderRequest) -> std::result::Result<ProviderResponse, ProviderError> {
        let url = format!("{}/v1/messages", self.base_url);
        let api_messages = Self::to_api_messages(&request.turns);
        let max_tokens = request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS);

        let mut body = serde_json::json!({
            "model": request.model,
            "messages": api_messages,
            "max_tokens": max_tokens,
            "temperature": request.temperature,
        });

        if !request.system.is_empty() {
            body["system"] = serde_json::json!(request.system);
        }

        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
        }

        debug!(provider = "anthropic", model = %request.model, turns = request.turns.len(), "Sending completion request");

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(e.to_string())
                } else {
                    ProviderError::Network(e.to_string())
                }
            })?;

        let status = response.status().as_u16();

        if status == 429 {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(5);
            return Err(ProviderError::RateLimited { retry_after_secs });
        }
        if status == 401 || status == 403 {
            return Err(ProviderError::AuthenticationFailed("Invalid Anthropic API key".into()));
        }
        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Anthropic API error");
            return Err(ProviderError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        let api_resp: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("Failed to parse Anthropic response: {e}")))?;

        debug!(
            stop_reason = api_resp.stop_reason.as_deref().unwrap_or("unknown"),
            "Anthropic response received"
        );
        Ok(Self::response_to_provider_response(api_resp))
    }
}

// --- Anthropic API types ---

#[derive(Debug, Serialize, Deserialize)]
struct AnthropicMessage {
    role: String,
    content: AnthropicContent,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum AnthropicContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    model: String,
    content: Vec<ResponseContentBlock>,
    usage: AnthropicUsage,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ResponseContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::post;
    use axum::{Json, Router};
    use lorekeep_core::tool::ToolResult;
    use serde_json::{Value, json};

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
        format!("http://{addr}")
    }

    #[test]
    fn constructor_with_base_url() {
        let provider = AnthropicProvider::new("sk-ant-test").with_base_url("http://localhost:8080/");
        assert_eq!(provider.name(), "anthropic");
        assert_eq!(provider.base_url, "http://localhost:8080");
    }

    #[test]
    fn turns_map_to_tool_blocks() {
        let turns = vec![
            Turn::User { content: "Explore gmail".into() },
            Turn::Model {
                text: "Looking.".into(),
                tool_calls: vec![ToolCall::new("toolu_1", "list_workspace", json!({}))],
            },
            Turn::ToolResults {
                results: vec![ToolResult::error("toolu_1", "Unknown tool: list_workspace")],
            },
        ];
        let api = serde_json::to_value(AnthropicProvider::to_api_messages(&turns)).unwrap();
        assert_eq!(api[0], json!({"role": "user", "content": "Explore gmail"}));
        assert_eq!(api[1]["role"], "assistant");
        assert_eq!(api[1]["content"][0], json!({"type": "text", "text": "Looking."}));
        assert_eq!(api[1]["content"][1]["type"], "tool_use");
        assert_eq!(api[1]["content"][1]["id"], "toolu_1");
        assert_eq!(api[2]["role"], "user");
        assert_eq!(api[2]["content"][0]["type"], "tool_result");
        assert_eq!(api[2]["content"][0]["tool_use_id"], "toolu_1");
        assert_eq!(api[2]["content"][0]["is_error"], true);
    }

    #[test]
    fn successful_results_omit_error_flag() {
        let turns = vec![Turn::ToolResults {
            results: vec![ToolResult::success("t", "ok")],
        }];
        let api = serde_json::to_value(AnthropicProvider::to_api_messages(&turns)).unwrap();
        assert!(api[0]["content"][0].get("is_error").is_none());
    }

    #[test]
    fn response_parsing_keeps_tool_order_and_skips_unknown_blocks() {
        let resp: AnthropicResponse = serde_json::from_value(json!({
            "model": "claude-sonnet-4-20250514",
            "content": [
                {"type": "thinking", "thinking": "hmm"},
                {"type": "text", "text": "Two calls."},
                {"type": "tool_use", "id": "a", "name": "check_forum", "input": {"query": "q"}},
                {"type": "tool_use", "id": "b", "name": "list_workspace", "input": {}}
            ],
            "usage": {"input_tokens": 12, "output_tokens": 7},
            "stop_reason": "tool_use"
        }))
        .unwrap();
        let out = AnthropicProvider::response_to_provider_response(resp);
        assert_eq!(out.text, "Two calls.");
        assert_eq!(out.tool_calls.len(), 2);
        assert_eq!(out.tool_calls[0].input["query"], "q");
        assert_eq!(out.tool_calls[1].name, "list_workspace");
        assert_eq!(out.usage.unwrap().output_tokens, 7);
    }

    #[tokio::test]
    async fn complete_round_trip_against_local_server() {
        let router = Router::new().route(
            "/v1/messages",
            post(|headers: axum::http::HeaderMap, Json(body): Json<Value>| async move {
                assert_eq!(headers["x-api-key"], "sk-test");
                assert_eq!(body["system"], "You are an explorer.");
                assert_eq!(body["tools"][0]["name"], "report_metrics");
                Json(json!({
                    "model": body["model"],
                    "content": [{"type": "text", "text": "Done exploring."}],
                    "usage": {"input_tokens": 1, "output_tokens": 2},
                    "stop_reason": "end_turn"
                }))
            }),
        );
        let provider = AnthropicProvider::new("sk-test").with_base_url(serve(router).await);
        let mut request = ProviderRequest::text("claude-test", "You are an explorer.", "go");
        request.tools = vec![ToolDefinition {
            name: "report_metrics".into(),
            description: "Report".into(),
            parameters: json!({"type": "object"}),
        }];
        let response = provider.complete(request).await.unwrap();
        assert_eq!(response.text, "Done exploring.");
        assert_eq!(response.model, "claude-test");
        assert!(response.tool_calls.is_empty());
    }

    #[tokio::test]
    async fn status_codes_map_to_errors() {
        let router = Router::new()
            .route(
                "/limited/v1/messages",
                post(|| async { (axum::http::StatusCode::TOO_MANY_REQUESTS, [("retry-after", "9")], "slow down") }),
            )
            .route(
                "/denied/v1/messages",
                post(|| async { (axum::http::StatusCode::UNAUTHORIZED, "nope") }),
            )
            .route(
                "/broken/v1/messages",
                post(|| async { (axum::http::StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
            );
        let base = serve(router).await;
        let request = || ProviderRequest::text("m", "", "hi");

        let limited = AnthropicProvider::new("k").with_base_url(format!("{base}/limited"));
        assert!(matches!(
            limited.complete(request()).await,
            Err(ProviderError::RateLimited { retry_after_secs: 9 })
        ));
        let denied = AnthropicProvider::new("k").with_base_url(format!("{base}/denied"));
        assert!(matches!(denied.complete(request()).await, Err(ProviderError::AuthenticationFailed(_))));
        let broken = AnthropicProvider::new("k").with_base_url(format!("{base}/broken"));
        assert!(matches!(
            broken.complete(request()).await,
            Err(ProviderError::ApiError { status_code: 500, .. })
        ));
    }
}
