//! Role hooks: how each agent role intercepts its report-style tools.
//!
//! Before a call reaches the dispatcher the engine offers it to the role's
//! hook. A hook either answers it locally ([`Intercept::Handled`]) or lets it
//! through and gets to look at the result afterwards.

use std::sync::Arc;

use async_trait::async_trait;
use lorekeep_core::backend::{AgentEvent, Backend, EventKind};
use lorekeep_core::pipeline::{QuestionnaireDraft, TreeNodeDraft};
use lorekeep_core::report::{Contradiction, SubAgentReport};
use lorekeep_core::tool::{ToolCall, ToolResult};
use serde_json::Value;
use tracing::{info, warn};

pub enum Intercept {
    /// Answered locally with this content
    Handled(String),
    Forward,
}

#[async_trait]
pub trait RoleHook: Send {
    async fn before(&mut self, _call: &ToolCall, _report: &mut SubAgentReport) -> Intercept {
        Intercept::Forward
    }

    async fn after(&mut self, _call: &ToolCall, _result: &ToolResult, _report: &mut SubAgentReport) {}
}

/// Forwards everything.
pub struct NoHook;

impl RoleHook for NoHook {}

/// Explorer: `report_metrics` lands in the report.
pub struct ExplorerHook {
    backend: Arc<dyn Backend>,
    client_id: String,
}

impl ExplorerHook {
    pub fn new(backend: Arc<dyn Backend>, client_id: impl Into<String>) -> Self {
        Self {
            backend,
            client_id: client_id.into(),
        }
    }
}

#[async_trait]
impl RoleHook for ExplorerHook {
    async fn before(&mut self, call: &ToolCall, report: &mut SubAgentReport) -> Intercept {
        if call.name != "report_metrics" {
            return Intercept::Forward;
        }
        if let Some(metrics) = call.input.get("metrics").and_then(Value::as_object) {
            report.metrics.extend(metrics.clone());
        }
        if let Some(summary) = call.input.get("summary").and_then(Value::as_str) {
            report.findings.push(summary.to_string());
        }
        let event = AgentEvent::new(
            &self.client_id,
            &report.agent_name,
            EventKind::Progress,
            format!("Metrics: {}", call.input),
        );
        self.backend.emit_event(&event).await;
        Intercept::Handled("Metrics recorded.".into())
    }
}

/// Structurer: `message_master` becomes a finding; recorded contradictions
/// are copied into the report with the id the backend assigned.
pub struct StructurerHook {
    backend: Arc<dyn Backend>,
    client_id: String,
}

impl StructurerHook {
    pub fn new(backend: Arc<dyn Backend>, client_id: impl Into<String>) -> Self {
        Self {
            backend,
            client_id: client_id.into(),
        }
    }
}

#[async_trait]
impl RoleHook for StructurerHook {
    async fn before(&mut self, call: &ToolCall, report: &mut SubAgentReport) -> Intercept {
        if call.name != "message_master" {
            return Intercept::Forward;
        }
        let message = call.input.get("message").and_then(Value::as_str).unwrap_or_default();
        info!(agent = %report.agent_name, message, "Message to master");
        report.findings.push(message.to_string());
        let preview: String = message.chars().take(300).collect();
        let event = AgentEvent::new(
            &self.client_id,
            &report.agent_name,
            EventKind::Info,
            format!("Sub-agent message: {preview}"),
        );
        self.backend.emit_event(&event).await;
        Intercept::Handled("Message received by master.".into())
    }

    async fn after(&mut self, call: &ToolCall, result: &ToolResult, report: &mut SubAgentReport) {
        if call.name == "add_contradiction" && !result.is_error {
            report.contradictions.push(recorded_contradiction(call, result));
        }
    }
}

/// Knowledge writer: counts entries, keeps flagged contradictions.
#[derive(Default)]
pub struct WriterHook;

#[async_trait]
impl RoleHook for WriterHook {
    async fn after(&mut self, call: &ToolCall, result: &ToolResult, report: &mut SubAgentReport) {
        if result.is_error {
            return;
        }
        match call.name.as_str() {
            "write_knowledge_entry" => report.bump_metric("entries_written", 1),
            "flag_contradiction" => report.contradictions.push(recorded_contradiction(call, result)),
            _ => {}
        }
    }
}

/// Coordinator: captures the tree and questionnaire drafts for the
/// orchestrator to persist once the agent returns.
#[derive(Default)]
pub struct CoordinatorHook {
    pub tree: Option<Vec<TreeNodeDraft>>,
    pub questionnaire: Option<QuestionnaireDraft>,
}

#[async_trait]
impl RoleHook for CoordinatorHook {
    async fn before(&mut self, call: &ToolCall, _report: &mut SubAgentReport) -> Intercept {
        match call.name.as_str() {
            "define_knowledge_tree" => {
                let nodes = call.input.get("nodes").cloned().unwrap_or(Value::Array(Vec::new()));
                match serde_json::from_value::<Vec<TreeNodeDraft>>(nodes) {
                    Ok(nodes) => {
                        let count = nodes.len();
                        self.tree = Some(nodes);
                        Intercept::Handled(format!("Knowledge tree defined with {count} nodes."))
                    }
                    Err(e) => {
                        warn!(error = %e, "Rejected malformed knowledge tree");
                        Intercept::Handled(format!("Invalid knowledge tree: {e}. Call define_knowledge_tree again."))
                    }
                }
            }
            "generate_questionnaire" => {
                let draft = QuestionnaireDraft::from_input(&call.input);
                let count = draft.questions.len();
                self.questionnaire = Some(draft);
                Intercept::Handled(format!("Questionnaire generated with {count} questions."))
            }
            _ => Intercept::Forward,
        }
    }
}

fn recorded_contradiction(call: &ToolCall, result: &ToolResult) -> Contradiction {
    let mut contradiction = Contradiction::from_input(&call.input);
    contradiction.id = result
        .data
        .as_ref()
        .and_then(|d| d.get("id"))
        .and_then(Value::as_str)
        .map(str::to_string);
    contradiction
}

#[cfg(test)]
mod tests {
    use super::*;
    use lorekeep_core::testing::RecordingBackend;
    use serde_json::json;

    fn report() -> SubAgentReport {
        SubAgentReport::new("explorer-gmail", "gmail")
    }

    #[tokio::test]
    async fn explorer_merges_metrics_and_summary() {
        let backend = Arc::new(RecordingBackend::default());
        let mut hook = ExplorerHook::new(backend.clone(), "c1");
        let mut report = report();
        let call = ToolCall::new(
            "1",
            "report_metrics",
            json!({"summary": "1,204 emails", "metrics": {"email_count": 1204, "files": ["a.pdf"]}}),
        );
        let Intercept::Handled(content) = hook.before(&call, &mut report).await else {
            panic!("report_metrics must be intercepted");
        };
        assert_eq!(content, "Metrics recorded.");
        assert_eq!(report.metric_u64("email_count"), 1204);
        assert_eq!(report.findings, vec!["1,204 emails".to_string()]);
        assert_eq!(backend.recorded().events[0].kind, EventKind::Progress);

        let other = ToolCall::new("2", "check_forum", json!({"query": "q"}));
        assert!(matches!(hook.before(&other, &mut report).await, Intercept::Forward));
    }

    #[tokio::test]
    async fn structurer_messages_and_contradictions() {
        let backend = Arc::new(RecordingBackend::default());
        let mut hook = StructurerHook::new(backend.clone(), "c1");
        let mut report = SubAgentReport::new("structurer", "structure");

        let msg = ToolCall::new("1", "message_master", json!({"message": "Found pricing sheet"}));
        assert!(matches!(hook.before(&msg, &mut report).await, Intercept::Handled(_)));
        assert_eq!(report.findings, vec!["Found pricing sheet".to_string()]);
        assert_eq!(backend.recorded().events[0].message, "Sub-agent message: Found pricing sheet");

        let add = ToolCall::new("2", "add_contradiction", json!({"description": "d", "value_a": "1", "value_b": "2"}));
        assert!(matches!(hook.before(&add, &mut report).await, Intercept::Forward));
        let result = ToolResult::success("2", "Contradiction recorded.").with_data(json!({"id": "k7"}));
        hook.after(&add, &result, &mut report).await;
        assert_eq!(report.contradictions[0].id.as_deref(), Some("k7"));
        assert_eq!(report.contradictions[0].value_b, "2");
    }

    #[tokio::test]
    async fn writer_counts_successful_entries_only() {
        let mut hook = WriterHook;
        let mut report = SubAgentReport::new("knowledge-writer", "use");
        let write = ToolCall::new("1", "write_knowledge_entry", json!({}));
        hook.after(&write, &ToolResult::success("1", "Knowledge entry created: e1"), &mut report).await;
        hook.after(&write, &ToolResult::error("1", "Tool error: rejected"), &mut report).await;
        assert_eq!(report.metric_u64("entries_written"), 1);
    }

    #[tokio::test]
    async fn coordinator_last_tree_wins() {
        let mut hook = CoordinatorHook::default();
        let mut report = SubAgentReport::new("master", "structure");
        let first = ToolCall::new("1", "define_knowledge_tree", json!({"nodes": [{"name": "Old", "type": "domain"}]}));
        let second = ToolCall::new(
            "2",
            "define_knowledge_tree",
            json!({"nodes": [
                {"name": "Finance", "type": "domain"},
                {"name": "Invoicing", "type": "skill", "parent_name": "Finance"}
            ]}),
        );
        hook.before(&first, &mut report).await;
        hook.before(&second, &mut report).await;
        let tree = hook.tree.unwrap();
        assert_eq!(tree.len(), 2);
        assert_eq!(tree[1].parent_name.as_deref(), Some("Finance"));
    }

    #[tokio::test]
    async fn coordinator_rejects_malformed_tree() {
        let mut hook = CoordinatorHook::default();
        let mut report = SubAgentReport::new("master", "structure");
        let bad = ToolCall::new("1", "define_knowledge_tree", json!({"nodes": [{"name": "X", "type": "galaxy"}]}));
        let Intercept::Handled(content) = hook.before(&bad, &mut report).await else {
            panic!("expected interception");
        };
        assert!(content.starts_with("Invalid knowledge tree"));
        assert!(hook.tree.is_none());
    }

    #[tokio::test]
    async fn coordinator_captures_questionnaire() {
        let mut hook = CoordinatorHook::default();
        let mut report = SubAgentReport::new("master", "verify");
        let call = ToolCall::new(
            "1",
            "generate_questionnaire",
            json!({"questions": [{"text": "Which revenue?", "options": ["1.2M", "1.4M"], "contradiction_id": "k1"}]}),
        );
        hook.before(&call, &mut report).await;
        let draft = hook.questionnaire.unwrap();
        assert_eq!(draft.title, "Verification Questionnaire");
        assert_eq!(draft.questions[0].id, "q1");
        assert_eq!(draft.questions[0].contradiction_id.as_deref(), Some("k1"));
    }
}
