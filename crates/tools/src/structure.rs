//! Content tools used while structuring: multimodal extraction of staged
//! files and relevance classification.

use async_trait::async_trait;
use lorekeep_core::error::ToolError;
use lorekeep_core::provider::{Extractor, Provider, ProviderRequest};
use lorekeep_core::tool::{required_str, ToolHandler, ToolOutput};
use lorekeep_security::Workspace;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Characters of content sent for classification.
const CLASSIFY_CONTENT_CAP: usize = 3000;

const CLASSIFIER_SYSTEM: &str = "You are a business data classifier. Respond only with valid JSON.";

pub struct ExtractContent {
    workspace: Arc<Workspace>,
    extractor: Arc<dyn Extractor>,
}

impl ExtractContent {
    pub fn new(workspace: Arc<Workspace>, extractor: Arc<dyn Extractor>) -> Self {
        Self { workspace, extractor }
    }
}

#[async_trait]
impl ToolHandler for ExtractContent {
    async fn call(&self, input: Value) -> Result<ToolOutput, ToolError> {
        let file_id = required_str(&input, "file_id")?;
        let prompt = required_str(&input, "extraction_prompt")?;

        let file = self
            .workspace
            .list_files()
            .into_iter()
            .find(|f| f.path.contains(file_id))
            .ok_or_else(|| ToolError::failed("extract_content", format!("File not found in workspace: {file_id}")))?;
        let bytes = self
            .workspace
            .read_bytes(&file.path)
            .map_err(|e| ToolError::failed("extract_content", e.to_string()))?;

        debug!(file = %file.path, mime = %file.mime_type, bytes = bytes.len(), extractor = self.extractor.name(), "Extracting content");
        let text = self.extractor.extract(&bytes, &file.mime_type, prompt).await?;
        Ok(text.into())
    }
}

pub struct ClassifyRelevance {
    provider: Arc<dyn Provider>,
    model: String,
}

impl ClassifyRelevance {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }
}

fn classification_prompt(content: &str, context: &str) -> String {
    let content: String = content.chars().take(CLASSIFY_CONTENT_CAP).collect();
    format!(
        "Classify the relevance of the following content to a business knowledge base.\n\n\
         Business context: {context}\n\n\
         Content to classify:\n{content}\n\n\
         Respond with a JSON object containing:\n\
         - \"relevance\": \"high\", \"medium\", or \"low\"\n\
         - \"category\": the business category this belongs to\n\
         - \"key_facts\": array of key facts extracted\n\
         - \"reasoning\": brief explanation of relevance rating"
    )
}

#[async_trait]
impl ToolHandler for ClassifyRelevance {
    async fn call(&self, input: Value) -> Result<ToolOutput, ToolError> {
        let content = required_str(&input, "content")?;
        let context = required_str(&input, "context")?;
        let request = ProviderRequest::text(&self.model, CLASSIFIER_SYSTEM, classification_prompt(content, context));
        let response = self.provider.complete(request).await?;
        Ok(response.text.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lorekeep_core::error::ProviderError;
    use lorekeep_core::testing::{text_response, ScriptedProvider, StaticExtractor};
    use serde_json::json;

    #[tokio::test]
    async fn extract_finds_file_by_partial_path() {
        let parent = tempfile::tempdir().unwrap();
        let ws = Arc::new(Workspace::create(parent.path(), "s").unwrap());
        ws.stage_file("drive/1AbC_invoice.pdf", b"%PDF-1.7").unwrap();
        let extractor = Arc::new(StaticExtractor::returning("Total: 4,200 EUR"));

        let out = ExtractContent::new(ws, extractor.clone())
            .call(json!({"file_id": "1AbC", "extraction_prompt": "Get the total"}))
            .await
            .unwrap();
        assert_eq!(out.content, "Total: 4,200 EUR");
        assert_eq!(extractor.seen(), vec![(8, "application/pdf".to_string(), "Get the total".to_string())]);
    }

    #[tokio::test]
    async fn extract_missing_file_is_error() {
        let parent = tempfile::tempdir().unwrap();
        let ws = Arc::new(Workspace::create(parent.path(), "s").unwrap());
        let err = ExtractContent::new(ws, Arc::new(StaticExtractor::returning("x")))
            .call(json!({"file_id": "nope", "extraction_prompt": "p"}))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "File not found in workspace: nope");
    }

    #[tokio::test]
    async fn extractor_failure_propagates() {
        let parent = tempfile::tempdir().unwrap();
        let ws = Arc::new(Workspace::create(parent.path(), "s").unwrap());
        ws.stage_file("a.png", b"png").unwrap();
        let err = ExtractContent::new(ws, Arc::new(StaticExtractor::failing(ProviderError::Timeout("60s".into()))))
            .call(json!({"file_id": "a.png", "extraction_prompt": "p"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Provider(ProviderError::Timeout(_))));
    }

    #[tokio::test]
    async fn classify_truncates_content_and_uses_classifier_prompt() {
        let provider = Arc::new(
            ScriptedProvider::new().script("business data classifier", vec![text_response(r#"{"relevance":"high"}"#)]),
        );
        let long = "x".repeat(5000);
        let out = ClassifyRelevance::new(provider.clone(), "m")
            .call(json!({"content": long, "context": "logistics"}))
            .await
            .unwrap();
        assert_eq!(out.content, r#"{"relevance":"high"}"#);

        let request = &provider.requests()[0];
        assert!(request.tools.is_empty());
        let lorekeep_core::Turn::User { content } = &request.turns[0] else {
            panic!("expected a user turn");
        };
        assert!(content.contains(&"x".repeat(3000)));
        assert!(!content.contains(&"x".repeat(3001)));
        assert!(content.contains("Business context: logistics"));
    }

    #[tokio::test]
    async fn classify_provider_error_is_tool_error() {
        let provider = Arc::new(ScriptedProvider::new().fail("classifier", ProviderError::RateLimited { retry_after_secs: 3 }));
        let err = ClassifyRelevance::new(provider, "m")
            .call(json!({"content": "c", "context": "k"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Provider(_)));
    }
}
