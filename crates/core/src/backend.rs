//! Backend trait — the persistence and event service the pipeline reports to.
//!
//! Calls fall into two classes. *Critical* writes (knowledge nodes and
//! entries) return `Result` and are retried by the implementation before
//! failing. *Best-effort* calls degrade to `None`/empty after logging.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::BackendError;
use crate::pipeline::{DataSource, NodeKind, Phase, Question, QuestionnaireResponse};
use crate::report::Contradiction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Info,
    Progress,
    Warning,
    Error,
    Complete,
}

/// A telemetry event shown in the client's live activity feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentEvent {
    pub client_id: String,
    pub agent: String,
    pub kind: EventKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl AgentEvent {
    pub fn new(
        client_id: impl Into<String>,
        agent: impl Into<String>,
        kind: EventKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            agent: agent.into(),
            kind,
            message: message.into(),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ForumQuery {
    pub query: String,
    pub source_type: Option<String>,
    pub phase: Option<String>,
    pub file_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ForumPost {
    pub title: String,
    pub category: String,
    pub content: String,
    pub author_agent: String,
    pub tags: Vec<String>,
    pub source_type: Option<String>,
    pub phase: Option<String>,
    pub file_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewKnowledgeNode {
    pub client_id: String,
    pub parent_id: Option<String>,
    pub name: String,
    pub kind: NodeKind,
    pub readme: String,
    pub order: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewKnowledgeEntry {
    pub client_id: String,
    pub tree_node_id: String,
    pub title: String,
    pub content: String,
    pub source_ref: String,
    pub confidence: f64,
    pub verified: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineUpdate {
    pub client_id: String,
    pub phase: Phase,
    pub progress: u8,
    pub active_agents: Vec<String>,
}

#[async_trait]
pub trait Backend: Send + Sync {
    /// Best-effort telemetry event. Returns the event id when accepted.
    async fn emit_event(&self, event: &AgentEvent) -> Option<String>;

    /// Report phase progress.
    async fn update_pipeline(&self, update: &PipelineUpdate) -> Option<()>;

    /// Current pipeline record for a client, as stored remotely.
    async fn pipeline_status(&self, client_id: &str) -> Option<Value>;

    async fn data_sources(&self, client_id: &str) -> Vec<DataSource>;

    /// Record per-source exploration status.
    async fn upsert_exploration(
        &self,
        client_id: &str,
        data_source_id: &str,
        metrics: &Map<String, Value>,
        status: &str,
    ) -> Option<String>;

    async fn add_contradiction(&self, client_id: &str, contradiction: &Contradiction) -> Option<String>;

    /// Critical: returns the created node id.
    async fn create_knowledge_node(&self, node: &NewKnowledgeNode) -> Result<String, BackendError>;

    /// Critical: returns the created entry id.
    async fn create_knowledge_entry(&self, entry: &NewKnowledgeEntry) -> Result<String, BackendError>;

    async fn search_forum(&self, query: &ForumQuery) -> Vec<Value>;

    async fn create_forum_entry(&self, post: &ForumPost) -> Option<String>;

    async fn create_questionnaire(&self, client_id: &str, title: &str, questions: &[Question]) -> Option<String>;

    async fn questionnaire_responses(&self, client_id: &str, questionnaire_id: &str) -> Vec<QuestionnaireResponse>;
}
