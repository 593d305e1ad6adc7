use std::time::Duration;

use async_trait::async_trait;
use lorekeep_config::BackendConfig;
use lorekeep_core::backend::{
    AgentEvent, Backend, ForumPost, ForumQuery, NewKnowledgeEntry, NewKnowledgeNode, PipelineUpdate,
};
use lorekeep_core::error::BackendError;
use lorekeep_core::pipeline::{DataSource, Question, QuestionnaireResponse};
use lorekeep_core::report::Contradiction;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

/// Gateway-level statuses worth another attempt.
const RETRYABLE_STATUS: [u16; 3] = [502, 503, 504];

pub struct HttpBackend {
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
    max_retries: u32,
    /// First backoff delay; doubles per attempt
    backoff_base: Duration,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            client: build_client(Duration::from_secs(30)),
            max_retries: 3,
            backoff_base: Duration::from_secs(1),
        }
    }

    pub fn from_config(config: &BackendConfig) -> Result<Self, BackendError> {
        if config.url.trim().is_empty() {
            return Err(BackendError::NotConfigured("BACKEND_URL is not set".into()));
        }
        let mut backend = Self::new(&config.url, config.token.clone()).with_max_retries(config.max_retries);
        backend.client = build_client(Duration::from_secs(config.timeout_secs));
        Ok(backend)
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    pub fn with_backoff_base(mut self, backoff_base: Duration) -> Self {
        self.backoff_base = backoff_base;
        self
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// POST with retries on transport errors and 502/503/504.
    async fn post(&self, path: &str, payload: &Value) -> Result<Value, BackendError> {
        let url = format!("{}{}", self.base_url, path);
        let mut last_error = String::new();

        for attempt in 0..self.max_retries {
            let last_attempt = attempt + 1 == self.max_retries;
            let sent = self.authorized(self.client.post(&url)).json(payload).send().await;
            match sent {
                Ok(response) => {
                    let status = response.status().as_u16();
                    if RETRYABLE_STATUS.contains(&status) {
                        last_error = format!("HTTP {status}");
                        if !last_attempt {
                            self.backoff(path, attempt, &last_error).await;
                            continue;
                        }
                        break;
                    }
                    if !response.status().is_success() {
                        let body = response.text().await.unwrap_or_default();
                        return Err(BackendError::Status {
                            method: "POST".into(),
                            path: path.into(),
                            status,
                            body,
                        });
                    }
                    return read_json(path, response).await;
                }
                Err(e) => {
                    last_error = e.to_string();
                    if !last_attempt {
                        self.backoff(path, attempt, &last_error).await;
                        continue;
                    }
                }
            }
        }

        Err(BackendError::RetriesExhausted {
            path: path.into(),
            attempts: self.max_retries,
            last_error,
        })
    }

    async fn backoff(&self, path: &str, attempt: u32, error: &str) {
        let delay = backoff_delay(self.backoff_base, attempt);
        warn!(path, attempt = attempt + 1, error, delay_ms = delay.as_millis() as u64, "Transient backend error, retrying");
        tokio::time::sleep(delay).await;
    }

    /// Best-effort POST: failures are logged and swallowed.
    async fn post_quietly(&self, path: &str, payload: &Value) -> Option<Value> {
        match self.post(path, payload).await {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(path, error = %e, "Backend call failed");
                None
            }
        }
    }

    async fn get(&self, path: &str, query: &[(&str, &str)]) -> Option<Value> {
        let url = format!("{}{}", self.base_url, path);
        let result = async {
            let response = self
                .authorized(self.client.get(&url))
                .query(query)
                .send()
                .await
                .map_err(|e| BackendError::Transport {
                    path: path.into(),
                    reason: e.to_string(),
                })?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(BackendError::Status {
                    method: "GET".into(),
                    path: path.into(),
                    status: status.as_u16(),
                    body,
                });
            }
            read_json(path, response).await
        }
        .await;

        match result {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(path, error = %e, "Backend read failed");
                None
            }
        }
    }

    async fn create_critical(&self, path: &str, payload: &Value) -> Result<String, BackendError> {
        let value = self.post(path, payload).await?;
        extract_id(&value).ok_or_else(|| BackendError::Decode {
            path: path.into(),
            reason: format!("response has no id: {value}"),
        })
    }
}

fn build_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

async fn read_json(path: &str, response: reqwest::Response) -> Result<Value, BackendError> {
    let text = response.text().await.map_err(|e| BackendError::Transport {
        path: path.into(),
        reason: e.to_string(),
    })?;
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&text).map_err(|e| BackendError::Decode {
        path: path.into(),
        reason: e.to_string(),
    })
}

/// `{"id": ..}`, `{"_id": ..}` or a bare string.
fn extract_id(value: &Value) -> Option<String> {
    match value {
        Value::String(id) => Some(id.clone()),
        Value::Object(map) => map
            .get("id")
            .or_else(|| map.get("_id"))
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    }
}

/// Either a bare list or `{key: [...]}`.
fn list_under<T: DeserializeOwned>(value: Option<Value>, key: &str) -> Vec<T> {
    let items = match value {
        Some(Value::Array(items)) => items,
        Some(Value::Object(mut map)) => match map.remove(key) {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    };
    items
        .into_iter()
        .filter_map(|item| match serde_json::from_value(item) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                debug!(key, error = %e, "Skipping malformed backend item");
                None
            }
        })
        .collect()
}

fn insert_opt(payload: &mut Value, key: &str, value: Option<&str>) {
    if let (Some(value), Some(map)) = (value, payload.as_object_mut()) {
        map.insert(key.into(), Value::from(value));
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn emit_event(&self, event: &AgentEvent) -> Option<String> {
        let payload = json!({
            "clientId": event.client_id,
            "agentName": event.agent,
            "eventType": event.kind,
            "message": event.message,
            "metadata": event.metadata.clone().unwrap_or_else(|| json!({})),
        });
        self.post_quietly("/api/agent/event", &payload)
            .await
            .and_then(|v| extract_id(&v))
    }

    async fn update_pipeline(&self, update: &PipelineUpdate) -> Option<()> {
        let payload = json!({
            "clientId": update.client_id,
            "currentPhase": update.phase.as_str(),
            "phaseProgress": update.progress,
            "activeAgents": update.active_agents,
            "lastActivity": chrono::Utc::now().timestamp_millis(),
        });
        self.post_quietly("/api/agent/pipeline/update", &payload).await.map(|_| ())
    }

    async fn pipeline_status(&self, client_id: &str) -> Option<Value> {
        self.get("/api/agent/pipeline", &[("clientId", client_id)])
            .await
            .filter(|v| !v.is_null())
    }

    async fn data_sources(&self, client_id: &str) -> Vec<DataSource> {
        let value = self.get("/api/agent/data-sources", &[("clientId", client_id)]).await;
        list_under(value, "dataSources")
    }

    async fn upsert_exploration(
        &self,
        client_id: &str,
        data_source_id: &str,
        metrics: &Map<String, Value>,
        status: &str,
    ) -> Option<String> {
        let payload = json!({
            "clientId": client_id,
            "dataSourceId": data_source_id,
            "metrics": metrics,
            "status": status,
        });
        self.post_quietly("/api/agent/exploration", &payload)
            .await
            .and_then(|v| extract_id(&v))
    }

    async fn add_contradiction(&self, client_id: &str, contradiction: &Contradiction) -> Option<String> {
        let payload = json!({
            "clientId": client_id,
            "description": contradiction.description,
            "sourceA": contradiction.source_a,
            "sourceB": contradiction.source_b,
            "valueA": contradiction.value_a,
            "valueB": contradiction.value_b,
        });
        self.post_quietly("/api/agent/contradiction", &payload)
            .await
            .and_then(|v| extract_id(&v))
    }

    async fn create_knowledge_node(&self, node: &NewKnowledgeNode) -> Result<String, BackendError> {
        let mut payload = json!({
            "clientId": node.client_id,
            "name": node.name,
            "type": node.kind.as_str(),
            "order": node.order,
        });
        insert_opt(&mut payload, "parentId", node.parent_id.as_deref());
        insert_opt(&mut payload, "readme", Some(node.readme.as_str()).filter(|r| !r.is_empty()));
        self.create_critical("/api/agent/knowledge/node", &payload).await
    }

    async fn create_knowledge_entry(&self, entry: &NewKnowledgeEntry) -> Result<String, BackendError> {
        let mut payload = json!({
            "clientId": entry.client_id,
            "treeNodeId": entry.tree_node_id,
            "title": entry.title,
            "content": entry.content,
            "confidence": entry.confidence,
            "verified": entry.verified,
        });
        insert_opt(&mut payload, "sourceRef", Some(entry.source_ref.as_str()).filter(|s| !s.is_empty()));
        self.create_critical("/api/agent/knowledge/entry", &payload).await
    }

    async fn search_forum(&self, query: &ForumQuery) -> Vec<Value> {
        let mut payload = json!({ "query": query.query });
        insert_opt(&mut payload, "sourceType", query.source_type.as_deref());
        insert_opt(&mut payload, "phase", query.phase.as_deref());
        insert_opt(&mut payload, "fileType", query.file_type.as_deref());
        let value = self.post_quietly("/api/agent/forum/search", &payload).await;
        list_under(value, "results")
    }

    async fn create_forum_entry(&self, post: &ForumPost) -> Option<String> {
        let mut payload = json!({
            "title": post.title,
            "category": post.category,
            "content": post.content,
            "authorAgent": post.author_agent,
            "tags": post.tags,
        });
        insert_opt(&mut payload, "sourceType", post.source_type.as_deref());
        insert_opt(&mut payload, "phase", post.phase.as_deref());
        insert_opt(&mut payload, "fileType", post.file_type.as_deref());
        self.post_quietly("/api/agent/forum/create", &payload)
            .await
            .and_then(|v| extract_id(&v))
    }

    async fn create_questionnaire(&self, client_id: &str, title: &str, questions: &[Question]) -> Option<String> {
        let payload = json!({
            "clientId": client_id,
            "title": title,
            "questions": questions,
        });
        self.post_quietly("/api/agent/questionnaire/create", &payload)
            .await
            .and_then(|v| extract_id(&v))
    }

    async fn questionnaire_responses(&self, client_id: &str, questionnaire_id: &str) -> Vec<QuestionnaireResponse> {
        let value = self
            .get(
                "/api/agent/questionnaire/responses",
                &[("clientId", client_id), ("questionnaireId", questionnaire_id)],
            )
            .await;
        list_under(value, "responses")
    }
}

/// `base * 2^attempt`, saturating instead of overflowing.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.checked_pow(attempt).unwrap_or(u32::MAX))
}
