//! Gemini multimodal extractor.
//!
//! Sends a file inline (base64) together with an instruction to
//! `generateContent` and returns the concatenated text parts.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use lorekeep_core::error::ProviderError;
use lorekeep_core::provider::Extractor;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

pub struct GeminiExtractor {
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl GeminiExtractor {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            model: model.into(),
            client,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

#[async_trait]
impl Extractor for GeminiExtractor {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn extract(&self, bytes: &[u8], mime_type: &str, instruction: &str) -> Result<String, ProviderError> {
        let url = format!("{}/v1beta/models/{}:generateContent", self.base_url, self.model);
        let body = json!({
            "contents": [{
                "role": "user",
                "parts": [
                    {"inline_data": {"mime_type": mime_type, "data": STANDARD.encode(bytes)}},
                    {"text": instruction}
                ]
            }]
        });

        debug!(model = %self.model, mime_type, bytes = bytes.len(), "Sending extraction request");
        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        if status == 429 {
            return Err(ProviderError::RateLimited { retry_after_secs: 10 });
        }
        if status == 401 || status == 403 {
            return Err(ProviderError::AuthenticationFailed("Invalid Gemini API key".into()));
        }
        if status != 200 {
            let message = response.text().await.unwrap_or_default();
            warn!(status, body = %message, "Gemini API error");
            return Err(ProviderError::ApiError {
                status_code: status,
                message,
            });
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("Failed to parse Gemini response: {e}")))?;
        let text: Vec<String> = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();
        if text.is_empty() {
            return Err(ProviderError::InvalidResponse("Gemini returned no text".into()));
        }
        Ok(text.join(""))
    }
}

/// Stands in when no extraction key is configured; every call fails with
/// `NotConfigured` so the calling tool reports an error instead of panicking.
pub struct UnconfiguredExtractor;

#[async_trait]
impl Extractor for UnconfiguredExtractor {
    fn name(&self) -> &str {
        "unconfigured"
    }

    async fn extract(&self, _bytes: &[u8], _mime_type: &str, _instruction: &str) -> Result<String, ProviderError> {
        Err(ProviderError::NotConfigured("GEMINI_API_KEY is not set".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::Value;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn sends_inline_data_and_joins_text_parts() {
        let router = Router::new().route(
            "/v1beta/models/{model}",
            post(|Json(body): Json<Value>| async move {
                let parts = &body["contents"][0]["parts"];
                assert_eq!(parts[0]["inline_data"]["mime_type"], "application/pdf");
                assert_eq!(parts[0]["inline_data"]["data"], "JVBERg==");
                assert_eq!(parts[1]["text"], "Summarize");
                Json(serde_json::json!({
                    "candidates": [{"content": {"parts": [{"text": "Invoice "}, {"text": "total 42"}]}}]
                }))
            }),
        );
        let extractor = GeminiExtractor::new("k", "gemini-test").with_base_url(serve(router).await);
        let text = extractor.extract(b"%PDF", "application/pdf", "Summarize").await.unwrap();
        assert_eq!(text, "Invoice total 42");
    }

    #[tokio::test]
    async fn empty_candidates_are_invalid() {
        let router = Router::new().route(
            "/v1beta/models/{model}",
            post(|| async { Json(serde_json::json!({"candidates": []})) }),
        );
        let extractor = GeminiExtractor::new("k", "m").with_base_url(serve(router).await);
        let err = extractor.extract(b"x", "text/plain", "p").await.unwrap_err();
        assert!(matches!(err, ProviderError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn unconfigured_always_fails() {
        let err = UnconfiguredExtractor.extract(b"x", "text/plain", "p").await.unwrap_err();
        assert!(matches!(err, ProviderError::NotConfigured(_)));
    }
}
