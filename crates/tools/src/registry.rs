//! Local handler registry.
//!
//! Maps tool names to [`ToolHandler`]s and converts whatever a handler does
//! into a [`ToolResult`]: output becomes a success, a handler error becomes
//! `Tool error: …` and an unregistered name becomes `Unknown tool: …`.

use lorekeep_core::tool::{ToolCall, ToolHandler, ToolResult};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn ToolHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. Replaces any existing handler with the same name.
    pub fn register(&mut self, name: impl Into<String>, handler: impl ToolHandler + 'static) {
        self.handlers.insert(name.into(), Arc::new(handler));
    }

    pub fn register_arc(&mut self, name: impl Into<String>, handler: Arc<dyn ToolHandler>) {
        self.handlers.insert(name.into(), handler);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub async fn execute(&self, call: &ToolCall) -> ToolResult {
        let Some(handler) = self.handlers.get(&call.name) else {
            warn!(tool = %call.name, "Unknown tool requested");
            return ToolResult::error(&call.id, format!("Unknown tool: {}", call.name));
        };

        debug!(tool = %call.name, call_id = %call.id, "Executing local tool");
        match handler.call(call.input.clone()).await {
            Ok(output) => ToolResult {
                call_id: call.id.clone(),
                content: output.content,
                is_error: false,
                data: output.data,
            },
            Err(e) => {
                warn!(tool = %call.name, error = %e, "Tool failed");
                ToolResult::error(&call.id, format!("Tool error: {e}"))
            }
        }
    }
}
