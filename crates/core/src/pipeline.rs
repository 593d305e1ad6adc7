//! Pipeline state and the records the orchestrator keeps across phases.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;
use crate::report::{Contradiction, SubAgentReport};

/// The four pipeline phases, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Explore,
    Structure,
    Verify,
    Use,
}

impl Phase {
    pub const ALL: [Phase; 4] = [Phase::Explore, Phase::Structure, Phase::Verify, Phase::Use];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Explore => "explore",
            Self::Structure => "structure",
            Self::Verify => "verify",
            Self::Use => "use",
        }
    }

    /// The phase that must precede this one.
    pub fn previous(&self) -> Option<Phase> {
        match self {
            Self::Explore => None,
            Self::Structure => Some(Self::Explore),
            Self::Verify => Some(Self::Structure),
            Self::Use => Some(Self::Verify),
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A configured data source as listed by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSource {
    #[serde(rename = "_id", alias = "id", default)]
    pub id: String,
    /// Category: gmail, drive, sheets...
    #[serde(rename = "type")]
    pub source_type: String,
    #[serde(default)]
    pub label: String,
}

impl DataSource {
    pub fn new(id: impl Into<String>, source_type: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source_type: source_type.into(),
            label: label.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Domain,
    Skill,
    EntryGroup,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Domain => "domain",
            Self::Skill => "skill",
            Self::EntryGroup => "entry_group",
        }
    }
}

/// A node as proposed by the coordinating agent, before it exists remotely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeNodeDraft {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    #[serde(default)]
    pub parent_name: Option<String>,
    #[serde(default)]
    pub readme: String,
    #[serde(default)]
    pub order: i64,
}

/// A knowledge-tree node that has been created in the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeNode {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    #[serde(default)]
    pub parent_name: Option<String>,
    #[serde(default)]
    pub parent_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: String,
    pub text: String,
    pub options: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contradiction_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionnaireDraft {
    pub title: String,
    pub questions: Vec<Question>,
}

impl QuestionnaireDraft {
    /// Build from `generate_questionnaire` arguments, numbering questions `q1..qN`.
    pub fn from_input(input: &Value) -> Self {
        let title = input
            .get("title")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .unwrap_or("Verification Questionnaire")
            .to_string();
        let questions = input
            .get("questions")
            .and_then(Value::as_array)
            .map(|qs| {
                qs.iter()
                    .enumerate()
                    .map(|(i, q)| Question {
                        id: format!("q{}", i + 1),
                        text: q.get("text").and_then(Value::as_str).unwrap_or_default().to_string(),
                        options: q
                            .get("options")
                            .and_then(Value::as_array)
                            .map(|o| o.iter().filter_map(Value::as_str).map(str::to_string).collect())
                            .unwrap_or_default(),
                        contradiction_id: q
                            .get("contradiction_id")
                            .and_then(Value::as_str)
                            .filter(|s| !s.is_empty())
                            .map(str::to_string),
                    })
                    .collect()
            })
            .unwrap_or_default();
        Self { title, questions }
    }
}

/// A human answer to one questionnaire question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionnaireResponse {
    #[serde(default, alias = "question_id")]
    pub question_id: Option<String>,
    #[serde(default, alias = "contradiction_id")]
    pub contradiction_id: Option<String>,
    #[serde(default, alias = "selectedOption")]
    pub answer: String,
}

/// Shared pipeline state. Only the orchestrator mutates it, and only after an
/// agent has returned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineState {
    pub client_id: String,
    pub current_phase: Option<Phase>,
    pub reports: Vec<SubAgentReport>,
    pub knowledge_tree_draft: Vec<TreeNode>,
    pub open_contradictions: Vec<Contradiction>,
    #[serde(default)]
    pub entries_written: u64,
}

/// Metric keys an explorer may use to list the files it discovered.
const FILE_REF_KEYS: [&str; 3] = ["files", "file_list", "discovered_files"];

impl PipelineState {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            current_phase: None,
            reports: Vec::new(),
            knowledge_tree_draft: Vec::new(),
            open_contradictions: Vec::new(),
            entries_written: 0,
        }
    }

    /// Move to `phase`. Phases run strictly in order, once each.
    pub fn enter(&mut self, phase: Phase) -> Result<(), Error> {
        if self.current_phase != phase.previous() {
            return Err(Error::Internal(format!(
                "illegal phase transition {} -> {phase}",
                self.current_phase.map(|p| p.as_str()).unwrap_or("start")
            )));
        }
        self.current_phase = Some(phase);
        Ok(())
    }

    pub fn add_report(&mut self, report: SubAgentReport) {
        self.reports.push(report);
    }

    /// Add contradictions not already open. Records are compared field by
    /// field, ignoring ids. A duplicate is not added: the open copy keeps its
    /// id and the duplicate's id goes to its `duplicate_ids`, so an answer
    /// naming either id resolves it. Returns how many were added.
    pub fn merge_contradictions(&mut self, incoming: impl IntoIterator<Item = Contradiction>) -> usize {
        let mut added = 0;
        for c in incoming {
            match self.open_contradictions.iter_mut().find(|open| open.same_record(&c)) {
                Some(open) => {
                    let ids = c.id.into_iter().chain(c.duplicate_ids);
                    for id in ids {
                        if open.id.is_none() {
                            open.id = Some(id);
                        } else if !open.answers_to(&id) {
                            open.duplicate_ids.push(id);
                        }
                    }
                }
                None => {
                    self.open_contradictions.push(c);
                    added += 1;
                }
            }
        }
        added
    }

    /// Drop the open contradiction with this id, or with this id merged into
    /// it. Returns whether one was removed.
    pub fn resolve_contradiction(&mut self, id: &str) -> bool {
        let before = self.open_contradictions.len();
        self.open_contradictions.retain(|c| !c.answers_to(id));
        before != self.open_contradictions.len()
    }

    /// File references listed in report metrics, or one reference per report
    /// when no explorer listed files.
    pub fn file_refs(&self) -> Vec<Value> {
        let mut refs: Vec<Value> = self
            .reports
            .iter()
            .flat_map(|r| {
                FILE_REF_KEYS
                    .iter()
                    .filter_map(|k| r.metrics.get(*k).and_then(Value::as_array))
                    .flatten()
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect();

        if refs.is_empty() {
            refs = self
                .reports
                .iter()
                .map(|r| {
                    serde_json::json!({
                        "source_type": r.source_type,
                        "agent_name": r.agent_name,
                        "findings": r.findings,
                        "metrics": r.metrics,
                    })
                })
                .collect();
        }
        refs
    }

    /// One-paragraph overview used in prompts.
    pub fn summary(&self) -> String {
        let sources: Vec<&str> = self.reports.iter().map(|r| r.source_type.as_str()).collect();
        format!(
            "Client: {}\nPhase: {}\nReports: {} ({})\nKnowledge tree nodes: {}\nOpen contradictions: {}",
            self.client_id,
            self.current_phase.map(|p| p.as_str()).unwrap_or("not started"),
            self.reports.len(),
            sources.join(", "),
            self.knowledge_tree_draft.len(),
            self.open_contradictions.len(),
        )
    }

    /// Every report's metrics and findings, for the knowledge writer.
    pub fn accumulated_knowledge(&self) -> String {
        self.reports
            .iter()
            .map(|r| {
                let metrics = serde_json::to_string_pretty(&r.metrics).unwrap_or_default();
                let findings: String = r.findings.iter().map(|f| format!("  - {f}\n")).collect();
                format!(
                    "=== {} ({}) ===\nMetrics: {metrics}\nFindings:\n{findings}",
                    r.agent_name, r.source_type
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
