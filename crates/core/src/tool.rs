//! Tool abstractions — what an agent can do.
//!
//! A [`ToolHandler`] is a local capability registered under a name; an
//! [`ExternalToolProvider`] is a third-party integration that owns its own
//! tool schemas and execution endpoint. The dispatcher in `lorekeep-tools`
//! routes every call to exactly one of them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ToolError;
use crate::provider::ToolDefinition;

/// A request to execute a tool, as produced by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Provider-assigned id, unique within a turn
    pub id: String,

    /// Name of the tool to execute
    pub name: String,

    /// Named arguments
    pub input: serde_json::Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, input: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            input,
        }
    }
}

/// The result of a tool call, fed back to the model on the next turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// The call ID this result is for
    pub call_id: String,

    /// Text shown to the model
    pub content: String,

    /// Whether the call failed
    #[serde(default)]
    pub is_error: bool,

    /// Optional structured data (never shown to the model)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ToolResult {
    pub fn success(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: content.into(),
            is_error: false,
            data: None,
        }
    }

    pub fn error(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: content.into(),
            is_error: true,
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// What a local handler returns on success.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolOutput {
    pub content: String,
    pub data: Option<serde_json::Value>,
}

impl ToolOutput {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

impl From<String> for ToolOutput {
    fn from(content: String) -> Self {
        Self::text(content)
    }
}

impl From<&str> for ToolOutput {
    fn from(content: &str) -> Self {
        Self::text(content)
    }
}

/// A locally executed tool.
///
/// Handlers receive the call's named arguments and either produce output or
/// fail; the dispatcher turns failures into error results, so a handler never
/// needs to build a [`ToolResult`] itself.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, input: serde_json::Value) -> std::result::Result<ToolOutput, ToolError>;
}

/// Outcome of an external provider execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExternalExecution {
    #[serde(default)]
    pub successful: bool,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default)]
    pub error: Option<String>,
}

/// A third-party tool integration (mail, drive, sheets...).
///
/// It is addressed by an external user identity, which is distinct from the
/// pipeline's client id.
#[async_trait]
pub trait ExternalToolProvider: Send + Sync {
    /// Human-readable name used in error messages.
    fn name(&self) -> &str;

    /// Tool schemas for one data-source category.
    async fn tools(&self, user_id: &str, category: &str) -> std::result::Result<Vec<ToolDefinition>, ToolError>;

    /// Execute a tool on behalf of `user_id`.
    async fn execute(
        &self,
        user_id: &str,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> std::result::Result<ExternalExecution, ToolError>;
}

/// Read a required string argument.
pub fn required_str<'a>(input: &'a serde_json::Value, key: &str) -> std::result::Result<&'a str, ToolError> {
    input
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::InvalidArguments(format!("missing required parameter '{key}'")))
}

/// Read an optional string argument; empty strings count as absent.
pub fn optional_str<'a>(input: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    input
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn result_constructors() {
        let ok = ToolResult::success("c1", "done");
        assert!(!ok.is_error);
        let err = ToolResult::error("c2", "boom").with_data(json!({"code": 1}));
        assert!(err.is_error);
        assert_eq!(err.data.unwrap()["code"], 1);
    }

    #[test]
    fn argument_helpers() {
        let input = json!({"query": "invoices", "phase": ""});
        assert_eq!(required_str(&input, "query").unwrap(), "invoices");
        assert!(matches!(
            required_str(&input, "title"),
            Err(ToolError::InvalidArguments(_))
        ));
        assert_eq!(optional_str(&input, "phase"), None);
    }

    #[test]
    fn external_execution_tolerates_missing_fields() {
        let exec: ExternalExecution = serde_json::from_value(json!({"successful": true})).unwrap();
        assert!(exec.successful);
        assert!(exec.error.is_none());
        assert!(exec.data.is_null());
    }
}
