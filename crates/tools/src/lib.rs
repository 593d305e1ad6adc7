//! Tool handlers and routing for lorekeep agents.
//!
//! Every agent gets its own [`HandlerRegistry`]: sandbox tools bound to the
//! agent's workspace plus the role-specific handlers built by [`RoleTools`].
//! A [`Dispatcher`] wraps the registry and forwards source tools to the
//! external integration when one is configured.

pub mod catalog;
pub mod dispatcher;
pub mod download;
pub mod external;
pub mod forum;
pub mod knowledge;
pub mod registry;
pub mod sandbox;
pub mod structure;

use std::sync::Arc;

use lorekeep_core::backend::Backend;
use lorekeep_core::provider::{Extractor, Provider};
use lorekeep_security::{CommandGate, Workspace};

pub use dispatcher::{Dispatcher, ExternalRoute, Route, merge_unique, truncate_with_marker};
pub use download::FileSource;
pub use external::ComposioToolProvider;
pub use registry::HandlerRegistry;
pub use sandbox::{SandboxLimits, register_sandbox_tools};

/// Shared collaborators for building per-role registries.
#[derive(Clone)]
pub struct RoleTools {
    pub backend: Arc<dyn Backend>,
    pub client_id: String,
    pub gate: Arc<CommandGate>,
    pub limits: SandboxLimits,
    /// Backs `download_file`; without it downloads fail with an error result.
    pub downloads: Option<FileSource>,
}

impl RoleTools {
    /// Forum tools plus the sandbox, authored as `agent_name`.
    pub fn explorer(&self, agent_name: &str, workspace: Arc<Workspace>) -> HandlerRegistry {
        let mut registry = self.forum(agent_name);
        register_sandbox_tools(&mut registry, workspace, self.gate.clone(), self.limits, self.downloads.clone());
        registry
    }

    pub fn structurer(
        &self,
        workspace: Arc<Workspace>,
        extractor: Arc<dyn Extractor>,
        provider: Arc<dyn Provider>,
        model: &str,
    ) -> HandlerRegistry {
        let mut registry = self.forum("structurer");
        registry.register("extract_content", structure::ExtractContent::new(workspace.clone(), extractor));
        registry.register("classify_relevance", structure::ClassifyRelevance::new(provider, model));
        registry.register(
            "add_contradiction",
            knowledge::RecordContradiction::recorded(self.backend.clone(), &self.client_id),
        );
        register_sandbox_tools(&mut registry, workspace, self.gate.clone(), self.limits, self.downloads.clone());
        registry
    }

    pub fn knowledge_writer(&self) -> HandlerRegistry {
        let mut registry = HandlerRegistry::new();
        registry.register(
            "write_knowledge_entry",
            knowledge::WriteKnowledgeEntry::new(self.backend.clone(), &self.client_id),
        );
        registry.register(
            "flag_contradiction",
            knowledge::RecordContradiction::flagged(self.backend.clone(), &self.client_id),
        );
        registry
    }

    fn forum(&self, author: &str) -> HandlerRegistry {
        let mut registry = HandlerRegistry::new();
        registry.register("check_forum", forum::CheckForum::new(self.backend.clone()));
        registry.register("write_to_forum", forum::WriteToForum::new(self.backend.clone(), author));
        registry
    }
}
