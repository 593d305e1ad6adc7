//! # Lorekeep Core
//!
//! Domain types, traits, and error definitions for the lorekeep knowledge-base
//! pipeline. This crate has **no transport dependencies**: it defines the
//! domain model that every other crate implements against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator is a trait here. Implementations live in their
//! respective crates. This enables:
//! - Swapping the language model, tool integration or backend via configuration
//! - Easy testing with scripted/recording implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod backend;
pub mod error;
pub mod event;
pub mod message;
pub mod pipeline;
pub mod provider;
pub mod report;
pub mod tool;

#[cfg(feature = "testing")]
pub mod testing;

// Re-export key types at crate root for ergonomics
pub use backend::{AgentEvent, Backend, EventKind, ForumPost, ForumQuery, NewKnowledgeEntry, NewKnowledgeNode, PipelineUpdate};
pub use error::{BackendError, Error, ProviderError, Result, ToolError, WorkspaceError};
pub use event::{EventBus, PipelineEvent};
pub use message::{ConversationId, ConversationState, Turn};
pub use pipeline::{DataSource, NodeKind, Phase, PipelineState, Question, QuestionnaireDraft, QuestionnaireResponse, TreeNode, TreeNodeDraft};
pub use provider::{Extractor, Provider, ProviderRequest, ProviderResponse, ToolDefinition, Usage};
pub use report::{Contradiction, StopReason, SubAgentReport};
pub use tool::{ExternalExecution, ExternalToolProvider, ToolCall, ToolHandler, ToolOutput, ToolResult};
