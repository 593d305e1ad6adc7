//! Backend-writing tools: contradiction records and knowledge entries.

use async_trait::async_trait;
use lorekeep_core::backend::{Backend, NewKnowledgeEntry};
use lorekeep_core::error::ToolError;
use lorekeep_core::report::Contradiction;
use lorekeep_core::tool::{optional_str, required_str, ToolHandler, ToolOutput};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::warn;

/// Persists a contradiction. Serves both `add_contradiction` and
/// `flag_contradiction`; only the acknowledgement differs.
pub struct RecordContradiction {
    backend: Arc<dyn Backend>,
    client_id: String,
    acknowledgement: &'static str,
}

impl RecordContradiction {
    /// The structurer's `add_contradiction`.
    pub fn recorded(backend: Arc<dyn Backend>, client_id: impl Into<String>) -> Self {
        Self {
            backend,
            client_id: client_id.into(),
            acknowledgement: "Contradiction recorded.",
        }
    }

    /// The knowledge writer's `flag_contradiction`.
    pub fn flagged(backend: Arc<dyn Backend>, client_id: impl Into<String>) -> Self {
        Self {
            backend,
            client_id: client_id.into(),
            acknowledgement: "Contradiction flagged.",
        }
    }
}

#[async_trait]
impl ToolHandler for RecordContradiction {
    async fn call(&self, input: Value) -> Result<ToolOutput, ToolError> {
        required_str(&input, "description")?;
        let contradiction = Contradiction::from_input(&input);
        let id = self.backend.add_contradiction(&self.client_id, &contradiction).await;
        if id.is_none() {
            warn!(client_id = %self.client_id, "Contradiction was not persisted");
        }
        Ok(ToolOutput::text(self.acknowledgement).with_data(json!({ "id": id })))
    }
}

pub struct WriteKnowledgeEntry {
    backend: Arc<dyn Backend>,
    client_id: String,
}

impl WriteKnowledgeEntry {
    pub fn new(backend: Arc<dyn Backend>, client_id: impl Into<String>) -> Self {
        Self {
            backend,
            client_id: client_id.into(),
        }
    }
}

#[async_trait]
impl ToolHandler for WriteKnowledgeEntry {
    async fn call(&self, input: Value) -> Result<ToolOutput, ToolError> {
        let confidence = input
            .get("confidence")
            .and_then(Value::as_f64)
            .ok_or_else(|| ToolError::InvalidArguments("missing required parameter 'confidence'".into()))?;
        let entry = NewKnowledgeEntry {
            client_id: self.client_id.clone(),
            tree_node_id: required_str(&input, "tree_node_id")?.to_string(),
            title: required_str(&input, "title")?.to_string(),
            content: required_str(&input, "content")?.to_string(),
            source_ref: optional_str(&input, "source_ref").unwrap_or_default().to_string(),
            confidence: confidence.clamp(0.0, 1.0),
            verified: false,
        };
        let id = self.backend.create_knowledge_entry(&entry).await?;
        Ok(ToolOutput::text(format!("Knowledge entry created: {id}")).with_data(json!({ "id": id })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lorekeep_core::testing::RecordingBackend;

    fn contradiction_args() -> Value {
        json!({
            "description": "Revenue differs",
            "source_a": "Q3.xlsx",
            "source_b": "board email",
            "value_a": "1.2M",
            "value_b": "1.4M",
        })
    }

    #[tokio::test]
    async fn add_contradiction_returns_backend_id() {
        let backend = Arc::new(RecordingBackend::default());
        let out = RecordContradiction::recorded(backend.clone(), "c1")
            .call(contradiction_args())
            .await
            .unwrap();
        assert_eq!(out.content, "Contradiction recorded.");
        assert_eq!(out.data, Some(json!({"id": "contradiction-1"})));
        assert_eq!(backend.recorded().contradictions[0].value_b, "1.4M");
    }

    #[tokio::test]
    async fn flag_contradiction_acknowledges() {
        let backend = Arc::new(RecordingBackend::default());
        let out = RecordContradiction::flagged(backend, "c1").call(contradiction_args()).await.unwrap();
        assert_eq!(out.content, "Contradiction flagged.");
    }

    #[tokio::test]
    async fn entry_is_unverified_with_clamped_confidence() {
        let backend = Arc::new(RecordingBackend::default());
        let out = WriteKnowledgeEntry::new(backend.clone(), "c1")
            .call(json!({"tree_node_id": "node-1", "title": "Pricing", "content": "Tiered", "confidence": 1.7}))
            .await
            .unwrap();
        assert_eq!(out.content, "Knowledge entry created: entry-1");
        let entry = &backend.recorded().entries[0];
        assert_eq!(entry.client_id, "c1");
        assert_eq!(entry.confidence, 1.0);
        assert!(!entry.verified);
        assert_eq!(entry.source_ref, "");
    }

    #[tokio::test]
    async fn entry_backend_failure_is_error() {
        let backend = Arc::new(RecordingBackend::default());
        backend.fail_knowledge_entries();
        let err = WriteKnowledgeEntry::new(backend, "c1")
            .call(json!({"tree_node_id": "n", "title": "t", "content": "c", "confidence": 0.5}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Backend(_)));
    }
}
