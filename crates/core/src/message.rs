//! Conversation domain types.
//!
//! A conversation is the append-only record of one agent's exchange with the
//! language model: an opening user turn, then alternating model turns and
//! tool-result turns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::tool::{ToolCall, ToolResult};

/// Unique identifier for a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One entry in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Turn {
    /// Text supplied by the orchestrator (the task description).
    User { content: String },

    /// What the model produced: optional text plus zero or more tool calls.
    Model {
        text: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCall>,
    },

    /// One result per tool call of the preceding model turn, same order.
    ToolResults { results: Vec<ToolResult> },
}

/// The append-only conversation owned by a single loop engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationState {
    pub id: ConversationId,
    turns: Vec<Turn>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationState {
    /// Start a conversation with the opening user message.
    pub fn new(initial_user_message: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: ConversationId::new(),
            turns: vec![Turn::User {
                content: initial_user_message.into(),
            }],
            created_at: now,
            updated_at: now,
        }
    }

    pub fn push_model(&mut self, text: impl Into<String>, tool_calls: Vec<ToolCall>) {
        self.push(Turn::Model {
            text: text.into(),
            tool_calls,
        });
    }

    pub fn push_results(&mut self, results: Vec<ToolResult>) {
        self.push(Turn::ToolResults { results });
    }

    fn push(&mut self, turn: Turn) {
        self.updated_at = Utc::now();
        self.turns.push(turn);
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Number of model turns so far.
    pub fn model_turns(&self) -> usize {
        self.turns
            .iter()
            .filter(|t| matches!(t, Turn::Model { .. }))
            .count()
    }

    /// Rough token estimate (4 chars ≈ 1 token).
    pub fn estimated_tokens(&self) -> usize {
        self.turns
            .iter()
            .map(|t| match t {
                Turn::User { content } => content.len(),
                Turn::Model { text, tool_calls } => {
                    text.len() + tool_calls.iter().map(|c| c.input.to_string().len()).sum::<usize>()
                }
                Turn::ToolResults { results } => results.iter().map(|r| r.content.len()).sum(),
            })
            .sum::<usize>()
            / 4
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn conversation_starts_with_user_turn() {
        let conv = ConversationState::new("Explore the drive");
        assert_eq!(conv.len(), 1);
        assert!(matches!(&conv.turns()[0], Turn::User { content } if content == "Explore the drive"));
        assert_eq!(conv.model_turns(), 0);
    }

    #[test]
    fn conversation_appends_model_and_results() {
        let mut conv = ConversationState::new("go");
        let call = ToolCall::new("c1", "list_workspace", json!({}));
        conv.push_model("looking", vec![call]);
        conv.push_results(vec![ToolResult::success("c1", "Workspace is empty.")]);

        assert_eq!(conv.len(), 3);
        assert_eq!(conv.model_turns(), 1);
        match &conv.turns()[2] {
            Turn::ToolResults { results } => assert_eq!(results[0].call_id, "c1"),
            other => panic!("expected tool results, got {other:?}"),
        }
    }

    #[test]
    fn token_estimate() {
        // 20 chars ≈ 5 tokens
        let conv = ConversationState::new("12345678901234567890");
        assert_eq!(conv.estimated_tokens(), 5);
    }
}
