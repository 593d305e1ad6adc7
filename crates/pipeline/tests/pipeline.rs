//! End-to-end pipeline runs against a scripted model and a recording backend.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use lorekeep_config::AppConfig;
use lorekeep_core::error::{Error, ProviderError, ToolError};
use lorekeep_core::event::{EventBus, PipelineEvent};
use lorekeep_core::backend::PipelineUpdate;
use lorekeep_core::pipeline::{DataSource, Phase, QuestionnaireResponse};
use lorekeep_core::provider::ToolDefinition;
use lorekeep_core::testing::{RecordingBackend, ScriptedProvider, StaticExtractor, call, text_response, tool_response};
use lorekeep_pipeline::Orchestrator;
use lorekeep_core::tool::{ExternalExecution, ExternalToolProvider};
use serde_json::{Value, json};

const EXPLORE_DRIVE: &str = "investigating a drive data source";
const EXPLORE_GMAIL: &str = "investigating a gmail data source";
const TREE: &str = "design a knowledge tree structure";
const STRUCTURER: &str = "You are a structurer agent";
const QUESTIONNAIRE: &str = "generate a verification questionnaire";
const WRITER: &str = "You are a knowledge writer agent";

fn orchestrator(root: &Path, provider: &Arc<ScriptedProvider>, backend: &Arc<RecordingBackend>) -> Orchestrator {
    let mut config = AppConfig::default();
    config.sandbox.workspace_root = Some(root.to_path_buf());
    Orchestrator::new(
        "acme",
        config,
        provider.clone(),
        Arc::new(StaticExtractor::returning("extracted")),
        backend.clone(),
    )
}

fn drive() -> DataSource {
    DataSource::new("ds-drive", "drive", "Shared drive")
}

fn explore_files(files: &[&str]) -> Vec<lorekeep_core::ProviderResponse> {
    vec![
        tool_response(vec![call(
            "report_metrics",
            json!({"summary": "Finance folder", "metrics": {"total_files": files.len(), "files": files}}),
        )]),
        text_response("Exploration finished."),
    ]
}

fn price_conflict() -> serde_json::Value {
    json!({
        "description": "Q3 revenue differs",
        "source_a": "q3.pdf",
        "source_b": "budget.xlsx",
        "value_a": "1.2M",
        "value_b": "1.4M",
    })
}

fn checkpoints(updates: &[PipelineUpdate]) -> Vec<(Phase, u8)> {
    updates.iter().map(|u| (u.phase, u.progress)).collect()
}

/// Phases never go backwards and each one reaches 100 before the next starts.
fn assert_phases_in_order(updates: &[PipelineUpdate]) {
    let mut seen: Vec<Phase> = Vec::new();
    for window in updates.windows(2) {
        let (prev, next) = (&window[0], &window[1]);
        if prev.phase != next.phase {
            assert_eq!(prev.progress, 100, "{} left before completing", prev.phase);
            assert_eq!(next.progress, 0, "{} did not start at 0", next.phase);
            assert_eq!(next.phase.previous(), Some(prev.phase));
        }
    }
    for update in updates {
        if seen.last() != Some(&update.phase) {
            seen.push(update.phase);
        }
    }
    assert_eq!(seen, Phase::ALL);
}

fn workspace_dirs(root: &Path) -> usize {
    std::fs::read_dir(root).unwrap().count()
}

#[tokio::test]
async fn zero_sources_completes_every_phase() {
    let root = tempfile::tempdir().unwrap();
    let provider = Arc::new(ScriptedProvider::new());
    let backend = Arc::new(RecordingBackend::default());

    let outcome = orchestrator(root.path(), &provider, &backend).run(vec![]).await.unwrap();

    assert_eq!(outcome.reports, 0);
    assert_eq!(outcome.tree_nodes, 0);
    assert_eq!(outcome.open_contradictions, 0);
    assert_eq!(outcome.entries_written, 0);
    assert_eq!(provider.calls(), 0);

    let updates = backend.recorded().updates;
    assert_eq!(
        checkpoints(&updates),
        [
            (Phase::Explore, 0),
            (Phase::Explore, 10),
            (Phase::Explore, 100),
            (Phase::Structure, 0),
            (Phase::Structure, 20),
            (Phase::Structure, 50),
            (Phase::Structure, 100),
            (Phase::Verify, 0),
            (Phase::Verify, 100),
            (Phase::Use, 0),
            (Phase::Use, 100),
        ]
    );
    assert_phases_in_order(&updates);
}

#[tokio::test]
async fn failing_explorer_is_excluded_not_fatal() {
    let root = tempfile::tempdir().unwrap();
    let provider = Arc::new(ScriptedProvider::new().fail(EXPLORE_DRIVE, ProviderError::Network("connection reset".into())));
    let backend = Arc::new(RecordingBackend::default());
    let bus = Arc::new(EventBus::new(256));
    let mut rx = bus.subscribe();

    let outcome = orchestrator(root.path(), &provider, &backend)
        .with_event_bus(bus)
        .run(vec![drive()])
        .await
        .unwrap();

    assert_eq!(outcome.reports, 0);
    let recorded = backend.recorded();
    assert!(recorded.explorations.is_empty());
    assert!(checkpoints(&recorded.updates).contains(&(Phase::Explore, 100)));
    assert_phases_in_order(&recorded.updates);
    assert_eq!(workspace_dirs(root.path()), 0);

    let mut failed = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let PipelineEvent::AgentFailed { agent, error, .. } = event.as_ref() {
            failed.push((agent.clone(), error.clone()));
        }
    }
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].0, "explorer-drive");
    assert!(failed[0].1.contains("connection reset"));
}

#[tokio::test]
async fn sibling_explorers_survive_a_failure() {
    let root = tempfile::tempdir().unwrap();
    let provider = Arc::new(
        ScriptedProvider::new()
            .fail(EXPLORE_DRIVE, ProviderError::Timeout("60s".into()))
            .script(
                EXPLORE_GMAIL,
                vec![
                    tool_response(vec![call(
                        "report_metrics",
                        json!({"summary": "300 invoices", "metrics": {"total_messages": 300}}),
                    )]),
                    text_response("Done."),
                ],
            ),
    );
    let backend = Arc::new(RecordingBackend::default());
    let sources = vec![drive(), DataSource::new("ds-gmail", "gmail", "Inbox")];

    let outcome = orchestrator(root.path(), &provider, &backend).run(sources).await.unwrap();

    let explorations = backend.recorded().explorations;
    assert_eq!(explorations.len(), 1);
    assert_eq!(explorations[0].0, "ds-gmail");
    assert_eq!(explorations[0].1["total_messages"], 300);
    assert_eq!(explorations[0].2, "completed");

    // the gmail report, plus one structurer fed from it
    let agents: Vec<&str> = outcome.state.reports.iter().map(|r| r.agent_name.as_str()).collect();
    assert_eq!(agents, ["explorer-gmail", "structurer-1"]);
    assert_eq!(outcome.state.reports[0].findings, ["300 invoices", "Done."]);
}

#[tokio::test]
async fn duplicate_contradictions_across_batches_are_merged() {
    let root = tempfile::tempdir().unwrap();
    let provider = Arc::new(
        ScriptedProvider::new()
            .script(EXPLORE_DRIVE, explore_files(&["q3.pdf", "budget.xlsx"]))
            .script(
                STRUCTURER,
                vec![
                    tool_response(vec![call("add_contradiction", price_conflict())]),
                    tool_response(vec![call("add_contradiction", price_conflict())]),
                ],
            ),
    );
    let backend = Arc::new(RecordingBackend::default());

    let outcome = orchestrator(root.path(), &provider, &backend).run(vec![drive()]).await.unwrap();

    let structurers = outcome
        .state
        .reports
        .iter()
        .filter(|r| r.agent_name.starts_with("structurer-"))
        .count();
    assert_eq!(structurers, 2);
    assert_eq!(backend.recorded().contradictions.len(), 2);
    assert_eq!(outcome.open_contradictions, 1);
    let kept = &outcome.state.open_contradictions[0];
    assert_eq!(kept.description, "Q3 revenue differs");
    // the merged copy's backend id stays reachable through the kept record
    let mut ids: Vec<&str> = kept.id.iter().chain(&kept.duplicate_ids).map(String::as_str).collect();
    ids.sort();
    assert_eq!(ids, ["contradiction-1", "contradiction-2"]);
    assert_eq!(workspace_dirs(root.path()), 0);
}

#[tokio::test]
async fn tree_is_created_parents_first_and_filled_by_the_writer() {
    let root = tempfile::tempdir().unwrap();
    let provider = Arc::new(
        ScriptedProvider::new()
            .script(EXPLORE_DRIVE, explore_files(&["q3.pdf"]))
            .script(
                TREE,
                vec![
                    tool_response(vec![call(
                        "define_knowledge_tree",
                        json!({"nodes": [
                            {"name": "Invoices", "type": "entry_group", "parent_name": "Billing"},
                            {"name": "Billing", "type": "skill", "parent_name": "Finance"},
                            {"name": "Finance", "type": "domain"},
                            {"name": "Stray", "type": "skill", "parent_name": "Nowhere"},
                            {"name": "Stray notes", "type": "entry_group", "parent_name": "Stray"},
                        ]}),
                    )]),
                    text_response("Tree defined."),
                ],
            )
            .script(
                WRITER,
                vec![
                    tool_response(vec![call(
                        "write_knowledge_entry",
                        json!({
                            "tree_node_id": "node-3",
                            "title": "Invoice terms",
                            "content": "Net 30 for all customers",
                            "confidence": 0.9,
                        }),
                    )]),
                    text_response("All nodes covered."),
                ],
            ),
    );
    let backend = Arc::new(RecordingBackend::default());

    let outcome = orchestrator(root.path(), &provider, &backend).run(vec![drive()]).await.unwrap();
    let recorded = backend.recorded();

    let names: Vec<&str> = recorded.nodes.iter().map(|n| n.name.as_str()).collect();
    assert_eq!(names, ["Finance", "Billing", "Invoices", "Stray", "Stray notes"]);
    let parents: Vec<Option<&str>> = recorded.nodes.iter().map(|n| n.parent_id.as_deref()).collect();
    // Stray's parent is missing, so it becomes a root; its child still attaches
    assert_eq!(parents, [None, Some("node-1"), Some("node-2"), None, Some("node-4")]);
    assert_eq!(outcome.tree_nodes, 5);

    assert_eq!(outcome.entries_written, 1);
    assert_eq!(recorded.entries.len(), 1);
    assert_eq!(recorded.entries[0].tree_node_id, "node-3");
    assert!(!recorded.entries[0].verified);

    // no contradictions: verify skips straight to 100
    assert!(checkpoints(&recorded.updates).contains(&(Phase::Verify, 100)));
    assert!(!checkpoints(&recorded.updates).contains(&(Phase::Verify, 20)));
    assert!(checkpoints(&recorded.updates).contains(&(Phase::Use, 20)));
    assert_phases_in_order(&recorded.updates);
    assert_eq!(workspace_dirs(root.path()), 0);
}

fn verify_script() -> ScriptedProvider {
    ScriptedProvider::new()
        .script(EXPLORE_DRIVE, explore_files(&["q3.pdf"]))
        .script(
            STRUCTURER,
            vec![tool_response(vec![call("add_contradiction", price_conflict())])],
        )
        .script(
            QUESTIONNAIRE,
            vec![
                tool_response(vec![call(
                    "generate_questionnaire",
                    json!({
                        "title": "Revenue check",
                        "questions": [{
                            "text": "What was Q3 revenue?",
                            "options": ["1.2M", "1.4M", "I don't know"],
                            "contradiction_id": "contradiction-1",
                        }],
                    }),
                )]),
                text_response("Questionnaire ready."),
            ],
        )
}

#[tokio::test(start_paused = true)]
async fn verify_timeout_leaves_contradictions_open() {
    let root = tempfile::tempdir().unwrap();
    let provider = Arc::new(verify_script());
    let backend = Arc::new(RecordingBackend::default());

    let outcome = orchestrator(root.path(), &provider, &backend).run(vec![drive()]).await.unwrap();
    let recorded = backend.recorded();

    assert_eq!(recorded.questionnaires.len(), 1);
    assert_eq!(recorded.questionnaires[0].0, "Revenue check");
    assert_eq!(recorded.questionnaires[0].1[0].id, "q1");
    // 5 + 10 + 15 * 7 seconds
    assert_eq!(recorded.response_polls, 9);
    assert_eq!(outcome.open_contradictions, 1);
    assert!(checkpoints(&recorded.updates).contains(&(Phase::Verify, 100)));
    assert_phases_in_order(&recorded.updates);
}

#[tokio::test(start_paused = true)]
async fn answered_question_resolves_its_contradiction() {
    let root = tempfile::tempdir().unwrap();
    let provider = Arc::new(verify_script());
    let backend = Arc::new(RecordingBackend::default());
    backend.seed_responses(vec![QuestionnaireResponse {
        question_id: Some("q1".into()),
        contradiction_id: None,
        answer: "1.4M".into(),
    }]);

    let outcome = orchestrator(root.path(), &provider, &backend).run(vec![drive()]).await.unwrap();

    assert_eq!(backend.recorded().response_polls, 1);
    assert_eq!(outcome.open_contradictions, 0);
}

#[tokio::test]
async fn rejected_tree_node_aborts_the_pipeline() {
    let root = tempfile::tempdir().unwrap();
    let provider = Arc::new(
        ScriptedProvider::new()
            .script(EXPLORE_DRIVE, explore_files(&["q3.pdf"]))
            .script(
                TREE,
                vec![tool_response(vec![call(
                    "define_knowledge_tree",
                    json!({"nodes": [{"name": "Finance", "type": "domain"}]}),
                )])],
            ),
    );
    let backend = Arc::new(RecordingBackend::default());
    backend.fail_knowledge_nodes();

    let err = orchestrator(root.path(), &provider, &backend)
        .run(vec![drive()])
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Backend(_)), "got {err:?}");
    let phases: Vec<Phase> = backend.recorded().updates.iter().map(|u| u.phase).collect();
    assert!(!phases.contains(&Phase::Verify));
}

/// Drive integration that serves one PDF for any download request.
#[derive(Default)]
struct DriveWithOnePdf {
    calls: Mutex<Vec<(String, String, Value)>>,
}

#[async_trait]
impl ExternalToolProvider for DriveWithOnePdf {
    fn name(&self) -> &str {
        "drive"
    }

    async fn tools(&self, _user_id: &str, _category: &str) -> Result<Vec<ToolDefinition>, ToolError> {
        Ok(Vec::new())
    }

    async fn execute(&self, user_id: &str, tool_name: &str, arguments: Value) -> Result<ExternalExecution, ToolError> {
        self.calls
            .lock()
            .unwrap()
            .push((user_id.to_string(), tool_name.to_string(), arguments));
        Ok(ExternalExecution {
            successful: true,
            // "%PDF-1.7"
            data: json!({"name": "Q3 report.pdf", "content": "JVBERi0xLjc="}),
            error: None,
        })
    }
}

#[tokio::test]
async fn structurer_downloads_a_file_then_extracts_it() {
    let root = tempfile::tempdir().unwrap();
    let provider = Arc::new(
        ScriptedProvider::new()
            .script(EXPLORE_DRIVE, explore_files(&["f-q3"]))
            .script(
                STRUCTURER,
                vec![
                    tool_response(vec![call("download_file", json!({"file_id": "f-q3", "filename": "q3.pdf"}))]),
                    tool_response(vec![call(
                        "extract_content",
                        json!({"file_id": "q3", "extraction_prompt": "List revenue figures"}),
                    )]),
                    text_response("Batch processed."),
                ],
            ),
    );
    let backend = Arc::new(RecordingBackend::default());
    let extractor = Arc::new(StaticExtractor::returning("Revenue 1.2M"));
    let drive_api = Arc::new(DriveWithOnePdf::default());

    let mut config = AppConfig::default();
    config.sandbox.workspace_root = Some(root.path().to_path_buf());
    let outcome = Orchestrator::new("acme", config, provider.clone(), extractor.clone(), backend.clone())
        .with_external(drive_api.clone())
        .run(vec![drive()])
        .await
        .unwrap();

    let calls = drive_api.calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "lorekeep_acme");
    assert_eq!(calls[0].1, "GOOGLEDRIVE_DOWNLOAD_FILE");
    assert_eq!(calls[0].2["file_id"], "f-q3");

    assert_eq!(
        extractor.seen(),
        [(8, "application/pdf".to_string(), "List revenue figures".to_string())]
    );
    let structurer = outcome
        .state
        .reports
        .iter()
        .find(|r| r.agent_name == "structurer-1")
        .unwrap();
    assert_eq!(structurer.findings.last().map(String::as_str), Some("Batch processed."));
    assert_eq!(workspace_dirs(root.path()), 0);
}
