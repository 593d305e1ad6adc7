//! Tool Dispatcher.
//!
//! One façade over the local [`HandlerRegistry`] and an optional external
//! tool provider. Routing is decided by name prefix alone, so every call is
//! answered by exactly one of: a local handler, the external provider, or the
//! registry's `Unknown tool` result.

use lorekeep_core::provider::ToolDefinition;
use lorekeep_core::tool::{ExternalToolProvider, ToolCall, ToolResult};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::registry::HandlerRegistry;

/// Where a tool call is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Local,
    External,
}

/// The external half of the dispatcher.
#[derive(Clone)]
pub struct ExternalRoute {
    provider: Arc<dyn ExternalToolProvider>,
    user_id: String,
    prefixes: Vec<String>,
    char_cap: usize,
}

impl ExternalRoute {
    pub fn new(
        provider: Arc<dyn ExternalToolProvider>,
        user_id: impl Into<String>,
        prefixes: Vec<String>,
        char_cap: usize,
    ) -> Self {
        Self {
            provider,
            user_id: user_id.into(),
            prefixes: prefixes.into_iter().map(|p| p.to_uppercase()).collect(),
            char_cap,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Whether `name` belongs to the external integration (case-insensitive prefix).
    pub fn claims(&self, name: &str) -> bool {
        let upper = name.to_uppercase();
        self.prefixes.iter().any(|p| upper.starts_with(p.as_str()))
    }
}

pub struct Dispatcher {
    local: HandlerRegistry,
    external: Option<ExternalRoute>,
}

impl Dispatcher {
    pub fn new(local: HandlerRegistry) -> Self {
        Self { local, external: None }
    }

    pub fn with_external(mut self, external: ExternalRoute) -> Self {
        self.external = Some(external);
        self
    }

    pub fn local(&self) -> &HandlerRegistry {
        &self.local
    }

    pub fn has_external(&self) -> bool {
        self.external.is_some()
    }

    pub fn route(&self, name: &str) -> Route {
        match &self.external {
            Some(ext) if ext.claims(name) => Route::External,
            _ => Route::Local,
        }
    }

    pub async fn execute(&self, call: &ToolCall) -> ToolResult {
        match (self.route(&call.name), &self.external) {
            (Route::External, Some(ext)) => execute_external(ext, call).await,
            _ => self.local.execute(call).await,
        }
    }

    /// The tool surface for one data-source category.
    ///
    /// With an external provider, its schemas for `category` come first and
    /// local schemas are appended only when their name is not already
    /// present. Names are unique in the result.
    pub async fn tool_surface(&self, category: &str, local: Vec<ToolDefinition>) -> Vec<ToolDefinition> {
        let mut surface = Vec::new();
        if let Some(ext) = &self.external {
            match ext.provider.tools(&ext.user_id, category).await {
                Ok(tools) => surface = tools,
                Err(e) => warn!(
                    provider = ext.provider.name(),
                    category,
                    error = %e,
                    "Could not fetch external tool schemas"
                ),
            }
        }
        merge_unique(surface, local)
    }
}

/// Append `extra` to `base`, skipping any name already present.
pub fn merge_unique(base: Vec<ToolDefinition>, extra: Vec<ToolDefinition>) -> Vec<ToolDefinition> {
    let mut seen = HashSet::new();
    base.into_iter()
        .chain(extra)
        .filter(|def| seen.insert(def.name.clone()))
        .collect()
}

async fn execute_external(ext: &ExternalRoute, call: &ToolCall) -> ToolResult {
    let provider = ext.provider.name();
    debug!(tool = %call.name, provider, "Executing external tool");
    match ext.provider.execute(&ext.user_id, &call.name, call.input.clone()).await {
        Ok(exec) if exec.successful => {
            let text = match &exec.data {
                serde_json::Value::String(s) => s.clone(),
                other => serde_json::to_string_pretty(other).unwrap_or_default(),
            };
            ToolResult::success(&call.id, truncate_with_marker(&text, ext.char_cap))
        }
        Ok(exec) => {
            let reason = exec.error.unwrap_or_else(|| "unknown failure".into());
            warn!(tool = %call.name, provider, error = %reason, "External tool reported failure");
            ToolResult::error(&call.id, format!("{provider} tool error: {reason}"))
        }
        Err(e) => {
            warn!(tool = %call.name, provider, error = %e, "External tool failed");
            ToolResult::error(&call.id, format!("{provider} tool error: {e}"))
        }
    }
}

/// Keep at most `cap` characters, noting the original length when cut.
pub fn truncate_with_marker(text: &str, cap: usize) -> String {
    let total = text.chars().count();
    if total <= cap {
        return text.to_string();
    }
    let head: String = text.chars().take(cap).collect();
    format!("{head}\n\n[truncated: showing {cap} of {total} characters]")
}
