//! In-memory doubles for the core traits, shared by the test suites of the
//! downstream crates. Enabled with the `testing` feature.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::backend::{AgentEvent, Backend, ForumPost, ForumQuery, NewKnowledgeEntry, NewKnowledgeNode, PipelineUpdate};
use crate::error::{BackendError, ProviderError};
use crate::pipeline::{DataSource, Question, QuestionnaireResponse};
use crate::provider::{Extractor, Provider, ProviderRequest, ProviderResponse, Usage};
use crate::report::Contradiction;
use crate::tool::ToolCall;

/// A text-only model response.
pub fn text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        text: text.into(),
        tool_calls: Vec::new(),
        model: "mock".into(),
        usage: Some(Usage {
            input_tokens: 10,
            output_tokens: 5,
        }),
    }
}

/// A model response requesting the given tool calls.
pub fn tool_response(calls: Vec<ToolCall>) -> ProviderResponse {
    ProviderResponse {
        tool_calls: calls,
        ..text_response("")
    }
}

/// Shorthand for one tool call with a generated id.
pub fn call(name: &str, input: Value) -> ToolCall {
    ToolCall::new(format!("call_{}", uuid::Uuid::new_v4().simple()), name, input)
}

struct Script {
    marker: String,
    queue: VecDeque<Result<ProviderResponse, ProviderError>>,
}

/// A provider that replays scripted responses.
///
/// Scripts are selected by a marker substring of the request's system prompt,
/// so concurrent agents sharing one provider each follow their own script. A
/// request matching no script (or an exhausted one) gets a plain `"Done."`.
#[derive(Default)]
pub struct ScriptedProvider {
    scripts: Mutex<Vec<Script>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script responses for requests whose system prompt contains `marker`.
    pub fn script(self, marker: &str, responses: Vec<ProviderResponse>) -> Self {
        self.push(marker, responses.into_iter().map(Ok).collect())
    }

    /// Fail the next request whose system prompt contains `marker`.
    pub fn fail(self, marker: &str, error: ProviderError) -> Self {
        self.push(marker, VecDeque::from([Err(error)]))
    }

    fn push(self, marker: &str, queue: VecDeque<Result<ProviderResponse, ProviderError>>) -> Self {
        self.scripts.lock().unwrap().push(Script {
            marker: marker.into(),
            queue,
        });
        self
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let mut scripts = self.scripts.lock().unwrap();
        let next = scripts
            .iter_mut()
            .filter(|s| request.system.contains(&s.marker))
            .find_map(|s| s.queue.pop_front());
        drop(scripts);
        self.requests.lock().unwrap().push(request);
        next.unwrap_or_else(|| Ok(text_response("Done.")))
    }
}

/// An extractor returning fixed text, or failing.
pub struct StaticExtractor {
    result: Result<String, ProviderError>,
    seen: Mutex<Vec<(usize, String, String)>>,
}

impl StaticExtractor {
    pub fn returning(text: &str) -> Self {
        Self {
            result: Ok(text.into()),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(error: ProviderError) -> Self {
        Self {
            result: Err(error),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// `(byte length, mime type, instruction)` per call.
    pub fn seen(&self) -> Vec<(usize, String, String)> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Extractor for StaticExtractor {
    fn name(&self) -> &str {
        "static"
    }

    async fn extract(&self, bytes: &[u8], mime_type: &str, instruction: &str) -> Result<String, ProviderError> {
        self.seen
            .lock()
            .unwrap()
            .push((bytes.len(), mime_type.into(), instruction.into()));
        self.result.clone()
    }
}

/// Everything a [`RecordingBackend`] has been sent.
#[derive(Debug, Default, Clone)]
pub struct Recorded {
    pub events: Vec<AgentEvent>,
    pub updates: Vec<PipelineUpdate>,
    pub explorations: Vec<(String, Map<String, Value>, String)>,
    pub contradictions: Vec<Contradiction>,
    pub nodes: Vec<NewKnowledgeNode>,
    pub entries: Vec<NewKnowledgeEntry>,
    pub forum_queries: Vec<ForumQuery>,
    pub forum_posts: Vec<ForumPost>,
    pub questionnaires: Vec<(String, Vec<Question>)>,
    pub response_polls: usize,
}

#[derive(Default)]
struct Seeds {
    data_sources: Vec<DataSource>,
    forum_hits: Vec<Value>,
    /// Responses returned per poll; the last batch repeats.
    responses: VecDeque<Vec<QuestionnaireResponse>>,
    fail_nodes: bool,
    fail_entries: bool,
}

/// A backend that records every call and answers from seeded data.
#[derive(Default)]
pub struct RecordingBackend {
    recorded: Mutex<Recorded>,
    seeds: Mutex<Seeds>,
}

impl RecordingBackend {
    pub fn with_sources(sources: Vec<DataSource>) -> Self {
        let backend = Self::default();
        backend.seeds.lock().unwrap().data_sources = sources;
        backend
    }

    pub fn seed_forum(&self, hit: Value) {
        self.seeds.lock().unwrap().forum_hits.push(hit);
    }

    /// Queue the responses returned by the next poll.
    pub fn seed_responses(&self, responses: Vec<QuestionnaireResponse>) {
        self.seeds.lock().unwrap().responses.push_back(responses);
    }

    pub fn fail_knowledge_nodes(&self) {
        self.seeds.lock().unwrap().fail_nodes = true;
    }

    pub fn fail_knowledge_entries(&self) {
        self.seeds.lock().unwrap().fail_entries = true;
    }

    pub fn recorded(&self) -> Recorded {
        self.recorded.lock().unwrap().clone()
    }

    pub fn forum_queries(&self) -> Vec<ForumQuery> {
        self.recorded().forum_queries
    }

    pub fn forum_posts(&self) -> Vec<ForumPost> {
        self.recorded().forum_posts
    }

    fn rejected(path: &str) -> BackendError {
        BackendError::Status {
            method: "POST".into(),
            path: path.into(),
            status: 500,
            body: "rejected".into(),
        }
    }
}

#[async_trait]
impl Backend for RecordingBackend {
    async fn emit_event(&self, event: &AgentEvent) -> Option<String> {
        let mut rec = self.recorded.lock().unwrap();
        rec.events.push(event.clone());
        Some(format!("event-{}", rec.events.len()))
    }

    async fn update_pipeline(&self, update: &PipelineUpdate) -> Option<()> {
        self.recorded.lock().unwrap().updates.push(update.clone());
        Some(())
    }

    async fn pipeline_status(&self, client_id: &str) -> Option<Value> {
        let rec = self.recorded.lock().unwrap();
        rec.updates
            .iter()
            .rev()
            .find(|u| u.client_id == client_id)
            .and_then(|u| serde_json::to_value(u).ok())
    }

    async fn data_sources(&self, _client_id: &str) -> Vec<DataSource> {
        self.seeds.lock().unwrap().data_sources.clone()
    }

    async fn upsert_exploration(
        &self,
        _client_id: &str,
        data_source_id: &str,
        metrics: &Map<String, Value>,
        status: &str,
    ) -> Option<String> {
        let mut rec = self.recorded.lock().unwrap();
        rec.explorations
            .push((data_source_id.into(), metrics.clone(), status.into()));
        Some(format!("exploration-{}", rec.explorations.len()))
    }

    async fn add_contradiction(&self, _client_id: &str, contradiction: &Contradiction) -> Option<String> {
        let mut rec = self.recorded.lock().unwrap();
        rec.contradictions.push(contradiction.clone());
        Some(format!("contradiction-{}", rec.contradictions.len()))
    }

    async fn create_knowledge_node(&self, node: &NewKnowledgeNode) -> Result<String, BackendError> {
        if self.seeds.lock().unwrap().fail_nodes {
            return Err(Self::rejected("/api/knowledge/tree"));
        }
        let mut rec = self.recorded.lock().unwrap();
        rec.nodes.push(node.clone());
        Ok(format!("node-{}", rec.nodes.len()))
    }

    async fn create_knowledge_entry(&self, entry: &NewKnowledgeEntry) -> Result<String, BackendError> {
        if self.seeds.lock().unwrap().fail_entries {
            return Err(Self::rejected("/api/knowledge/entries"));
        }
        let mut rec = self.recorded.lock().unwrap();
        rec.entries.push(entry.clone());
        Ok(format!("entry-{}", rec.entries.len()))
    }

    async fn search_forum(&self, query: &ForumQuery) -> Vec<Value> {
        self.recorded.lock().unwrap().forum_queries.push(query.clone());
        self.seeds.lock().unwrap().forum_hits.clone()
    }

    async fn create_forum_entry(&self, post: &ForumPost) -> Option<String> {
        let mut rec = self.recorded.lock().unwrap();
        rec.forum_posts.push(post.clone());
        Some(format!("forum-{}", rec.forum_posts.len()))
    }

    async fn create_questionnaire(&self, _client_id: &str, title: &str, questions: &[Question]) -> Option<String> {
        let mut rec = self.recorded.lock().unwrap();
        rec.questionnaires.push((title.into(), questions.to_vec()));
        Some(format!("questionnaire-{}", rec.questionnaires.len()))
    }

    async fn questionnaire_responses(&self, _client_id: &str, _questionnaire_id: &str) -> Vec<QuestionnaireResponse> {
        self.recorded.lock().unwrap().response_polls += 1;
        let mut seeds = self.seeds.lock().unwrap();
        if seeds.responses.len() > 1 {
            seeds.responses.pop_front().unwrap_or_default()
        } else {
            seeds.responses.front().cloned().unwrap_or_default()
        }
    }
}
