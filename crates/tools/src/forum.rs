//! Shared forum tools. Agents leave notes for one another through the backend.

use async_trait::async_trait;
use lorekeep_core::backend::{Backend, ForumPost, ForumQuery};
use lorekeep_core::error::ToolError;
use lorekeep_core::tool::{optional_str, required_str, ToolHandler, ToolOutput};
use serde_json::Value;
use std::sync::Arc;

pub struct CheckForum {
    backend: Arc<dyn Backend>,
}

impl CheckForum {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl ToolHandler for CheckForum {
    async fn call(&self, input: Value) -> Result<ToolOutput, ToolError> {
        let query = ForumQuery {
            query: required_str(&input, "query")?.to_string(),
            source_type: optional_str(&input, "source_type").map(String::from),
            phase: optional_str(&input, "phase").map(String::from),
            file_type: optional_str(&input, "file_type").map(String::from),
        };
        let hits = self.backend.search_forum(&query).await;
        if hits.is_empty() {
            return Ok("No forum entries found.".into());
        }
        let text = serde_json::to_string_pretty(&hits).map_err(|e| ToolError::failed("check_forum", e.to_string()))?;
        Ok(text.into())
    }
}

pub struct WriteToForum {
    backend: Arc<dyn Backend>,
    author: String,
}

impl WriteToForum {
    pub fn new(backend: Arc<dyn Backend>, author: impl Into<String>) -> Self {
        Self {
            backend,
            author: author.into(),
        }
    }
}

#[async_trait]
impl ToolHandler for WriteToForum {
    async fn call(&self, input: Value) -> Result<ToolOutput, ToolError> {
        let tags = input
            .get("tags")
            .and_then(Value::as_array)
            .map(|tags| tags.iter().filter_map(Value::as_str).map(String::from).collect())
            .unwrap_or_default();
        let post = ForumPost {
            title: required_str(&input, "title")?.to_string(),
            category: optional_str(&input, "category").unwrap_or("general").to_string(),
            content: required_str(&input, "content")?.to_string(),
            author_agent: self.author.clone(),
            tags,
            source_type: optional_str(&input, "source_type").map(String::from),
            phase: optional_str(&input, "phase").map(String::from),
            file_type: optional_str(&input, "file_type").map(String::from),
        };
        match self.backend.create_forum_entry(&post).await {
            Some(id) => Ok(ToolOutput::text("Forum entry created.").with_data(serde_json::json!({ "id": id }))),
            None => Ok("Forum entry created.".into()),
        }
    }
}
