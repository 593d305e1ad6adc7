//! Structured agent output.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Why a loop engine stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The model answered without requesting any tool.
    Concluded,
    /// The loop detector saw the agent repeating itself.
    Repetition,
    /// `max_turns` model turns were used.
    TurnBudgetExhausted,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Concluded => "concluded",
            Self::Repetition => "repetition",
            Self::TurnBudgetExhausted => "turn_budget_exhausted",
        };
        f.write_str(s)
    }
}

/// A disagreement between two source-derived values awaiting human review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contradiction {
    pub description: String,
    pub source_a: String,
    pub source_b: String,
    pub value_a: String,
    pub value_b: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Ids of identical records merged into this one.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub duplicate_ids: Vec<String>,
}

impl Contradiction {
    /// Build from tool arguments; missing fields become empty strings.
    pub fn from_input(input: &Value) -> Self {
        let field = |k: &str| input.get(k).and_then(Value::as_str).unwrap_or_default().to_string();
        Self {
            description: field("description"),
            source_a: field("source_a"),
            source_b: field("source_b"),
            value_a: field("value_a"),
            value_b: field("value_b"),
            id: None,
            duplicate_ids: Vec::new(),
        }
    }

    /// Whether `id` names this record or one merged into it.
    pub fn answers_to(&self, id: &str) -> bool {
        self.id.as_deref() == Some(id) || self.duplicate_ids.iter().any(|d| d == id)
    }

    /// Same disagreement, whatever id the backend gave each copy.
    pub fn same_record(&self, other: &Contradiction) -> bool {
        self.description == other.description
            && self.source_a == other.source_a
            && self.source_b == other.source_b
            && self.value_a == other.value_a
            && self.value_b == other.value_b
    }
}

/// What one agent run hands back to the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubAgentReport {
    pub agent_name: String,
    pub source_type: String,
    #[serde(default)]
    pub metrics: Map<String, Value>,
    #[serde(default)]
    pub findings: Vec<String>,
    #[serde(default)]
    pub contradictions: Vec<Contradiction>,
    pub stop_reason: StopReason,
    /// Model turns actually used
    #[serde(default)]
    pub turns: usize,
}

impl SubAgentReport {
    pub fn new(agent_name: impl Into<String>, source_type: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
            source_type: source_type.into(),
            metrics: Map::new(),
            findings: Vec::new(),
            contradictions: Vec::new(),
            stop_reason: StopReason::Concluded,
            turns: 0,
        }
    }

    /// Add `delta` to an integer metric, creating it at zero.
    pub fn bump_metric(&mut self, key: &str, delta: u64) {
        let current = self.metrics.get(key).and_then(Value::as_u64).unwrap_or(0);
        self.metrics.insert(key.to_string(), Value::from(current + delta));
    }

    pub fn metric_u64(&self, key: &str) -> u64 {
        self.metrics.get(key).and_then(Value::as_u64).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn contradiction_from_partial_input() {
        let c = Contradiction::from_input(&json!({
            "description": "Revenue mismatch",
            "source_a": "Q3.xlsx",
            "value_a": "1.2M"
        }));
        assert_eq!(c.source_a, "Q3.xlsx");
        assert_eq!(c.source_b, "");
        assert!(c.id.is_none());
    }

    #[test]
    fn bump_metric_accumulates() {
        let mut report = SubAgentReport::new("knowledge-writer", "mixed");
        report.bump_metric("entries_written", 1);
        report.bump_metric("entries_written", 2);
        assert_eq!(report.metric_u64("entries_written"), 3);
        assert_eq!(report.metric_u64("missing"), 0);
    }

    #[test]
    fn stop_reason_display_matches_serde() {
        assert_eq!(StopReason::TurnBudgetExhausted.to_string(), "turn_budget_exhausted");
        assert_eq!(
            serde_json::to_value(StopReason::Repetition).unwrap(),
            json!("repetition")
        );
    }
}
