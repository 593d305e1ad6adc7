//! The phase orchestrator.
//!
//! [`Orchestrator::run`] drives Explore, Structure, Verify and Use strictly
//! in order. Each phase reports its checkpoints to the backend and the event
//! bus before the next one starts.
//!
//! Agent runs are isolated: one that fails is logged, announced as
//! `AgentFailed` and left out of the results. Only a critical backend write
//! (knowledge nodes) can abort the pipeline.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use lorekeep_agent::{CoordinatorHook, ExplorerHook, LoopRequest, RoleHook, StructurerHook, ToolCallingLoop, WriterHook};
use lorekeep_config::AppConfig;
use lorekeep_core::backend::{AgentEvent, Backend, EventKind, NewKnowledgeNode, PipelineUpdate};
use lorekeep_core::error::Error;
use lorekeep_core::event::{EventBus, PipelineEvent};
use lorekeep_core::pipeline::{
    DataSource, Phase, PipelineState, Question, QuestionnaireDraft, QuestionnaireResponse, TreeNode, TreeNodeDraft,
};
use lorekeep_core::provider::{Extractor, Provider, ToolDefinition};
use lorekeep_core::report::SubAgentReport;
use lorekeep_core::tool::ExternalToolProvider;
use lorekeep_security::{CommandGate, Workspace};
use lorekeep_tools::{
    Dispatcher, ExternalRoute, FileSource, HandlerRegistry, RoleTools, SandboxLimits, catalog, merge_unique,
};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::prompts::{self, Prompt};
use crate::tree::{creation_order, parent_of};

const MASTER: &str = "master";
const STRUCTURER: &str = "structurer";
const WRITER: &str = "knowledge-writer";

/// What a finished run produced.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineOutcome {
    pub client_id: String,
    pub reports: usize,
    pub tree_nodes: usize,
    pub open_contradictions: usize,
    pub entries_written: u64,
    #[serde(skip)]
    pub state: PipelineState,
}

impl PipelineOutcome {
    fn from_state(state: PipelineState) -> Self {
        Self {
            client_id: state.client_id.clone(),
            reports: state.reports.len(),
            tree_nodes: state.knowledge_tree_draft.len(),
            open_contradictions: state.open_contradictions.len(),
            entries_written: state.entries_written,
            state,
        }
    }
}

pub struct Orchestrator {
    config: AppConfig,
    provider: Arc<dyn Provider>,
    extractor: Arc<dyn Extractor>,
    backend: Arc<dyn Backend>,
    external: Option<Arc<dyn ExternalToolProvider>>,
    event_bus: Arc<EventBus>,
    tools: RoleTools,
    state: PipelineState,
}

impl Orchestrator {
    pub fn new(
        client_id: impl Into<String>,
        config: AppConfig,
        provider: Arc<dyn Provider>,
        extractor: Arc<dyn Extractor>,
        backend: Arc<dyn Backend>,
    ) -> Self {
        let client_id = client_id.into();
        let sandbox = &config.sandbox;
        let tools = RoleTools {
            backend: backend.clone(),
            client_id: client_id.clone(),
            gate: Arc::new(CommandGate::with_max_timeout(sandbox.max_timeout_secs)),
            limits: SandboxLimits {
                default_timeout_secs: sandbox.default_timeout_secs,
                install_timeout_secs: sandbox.install_timeout_secs,
                output_char_cap: sandbox.output_char_cap,
                read_char_cap: sandbox.read_char_cap,
            },
            downloads: None,
        };
        Self {
            config,
            provider,
            extractor,
            backend,
            external: None,
            event_bus: Arc::new(EventBus::default()),
            tools,
            state: PipelineState::new(client_id),
        }
    }

    /// Route integration tools (mail, drive, sheets) to `provider`.
    /// Also backs `download_file` in every workspace.
    pub fn with_external(mut self, provider: Arc<dyn ExternalToolProvider>) -> Self {
        self.tools.downloads = Some(FileSource {
            provider: provider.clone(),
            user_id: self.config.external_tools.user_id(&self.state.client_id),
        });
        self.external = Some(provider);
        self
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = event_bus;
        self
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        self.event_bus.clone()
    }

    pub fn client_id(&self) -> &str {
        &self.state.client_id
    }

    /// Run all four phases over `sources`.
    pub async fn run(mut self, sources: Vec<DataSource>) -> Result<PipelineOutcome, Error> {
        info!(client_id = %self.state.client_id, sources = sources.len(), "Pipeline starting");

        self.explore(&sources).await?;
        self.structure().await?;
        self.verify().await?;
        self.use_knowledge().await?;

        let outcome = PipelineOutcome::from_state(self.state);
        info!(
            client_id = %outcome.client_id,
            reports = outcome.reports,
            tree_nodes = outcome.tree_nodes,
            open_contradictions = outcome.open_contradictions,
            entries_written = outcome.entries_written,
            "Pipeline complete"
        );
        Ok(outcome)
    }

    // ── Explore ─────────────────────────────────────────────────────

    async fn explore(&mut self, sources: &[DataSource]) -> Result<(), Error> {
        self.state.enter(Phase::Explore)?;
        self.progress(Phase::Explore, 0, &[MASTER]).await;
        self.emit(
            MASTER,
            EventKind::Info,
            format!("Starting explore phase with {} data sources", sources.len()),
        )
        .await;

        let names: Vec<String> = sources.iter().map(explorer_name).collect();
        let mut active = vec![MASTER];
        active.extend(names.iter().map(String::as_str));
        self.progress(Phase::Explore, 10, &active).await;

        let results = join_all(sources.iter().map(|source| self.run_explorer(source))).await;

        for (source, result) in sources.iter().zip(results) {
            match result {
                Ok(report) => {
                    self.backend
                        .upsert_exploration(&self.state.client_id, &source.id, &report.metrics, "completed")
                        .await;
                    self.state.add_report(report);
                }
                Err(e) => self.agent_failed(&explorer_name(source), &e).await,
            }
        }

        self.progress(Phase::Explore, 100, &[MASTER]).await;
        self.emit(
            MASTER,
            EventKind::Complete,
            format!("Explore phase complete. {} sources explored.", self.state.reports.len()),
        )
        .await;
        Ok(())
    }

    async fn run_explorer(&self, source: &DataSource) -> Result<SubAgentReport, Error> {
        let name = explorer_name(source);
        let workspace = Arc::new(self.workspace(&source.source_type)?);
        let dispatcher = self.dispatcher(self.tools.explorer(&name, workspace.clone()));
        let local = merge_unique(catalog::explorer_tools(), catalog::sandbox_tools());
        let surface = dispatcher.tool_surface(&source.source_type, local).await;

        self.emit(&name, EventKind::Info, format!("Starting exploration of {}", source.label))
            .await;

        let mut hook = ExplorerHook::new(self.backend.clone(), &self.state.client_id);
        let result = self
            .run_agent(
                SubAgentReport::new(&name, &source.source_type),
                prompts::explorer(source),
                surface,
                self.config.pipeline.explorer_max_turns,
                dispatcher,
                &mut hook,
            )
            .await;
        release(workspace);

        let report = result?;
        let summary = report.findings.first().map(String::as_str).unwrap_or("done");
        self.emit(&name, EventKind::Complete, format!("Exploration complete: {summary}"))
            .await;
        Ok(report)
    }

    // ── Structure ───────────────────────────────────────────────────

    async fn structure(&mut self) -> Result<(), Error> {
        self.state.enter(Phase::Structure)?;
        self.progress(Phase::Structure, 0, &[MASTER]).await;
        self.emit(MASTER, EventKind::Info, "Starting structure phase").await;
        self.progress(Phase::Structure, 20, &[MASTER]).await;

        if self.state.reports.is_empty() {
            info!("No exploration reports; skipping knowledge tree design");
        } else {
            let drafts = self.design_tree().await;
            if let Some(drafts) = drafts {
                self.create_tree(drafts).await?;
            }
        }

        self.progress(Phase::Structure, 50, &[MASTER, STRUCTURER]).await;

        let categories = self.source_categories();
        let batches = partition(self.state.file_refs(), self.config.pipeline.structurer_batches);
        debug!(batches = batches.len(), "Structurer batches");

        let results = join_all(
            batches
                .iter()
                .enumerate()
                .map(|(i, batch)| self.run_structurer(i + 1, batch, &categories)),
        )
        .await;

        for (i, result) in results.into_iter().enumerate() {
            match result {
                Ok(report) => {
                    let added = self.state.merge_contradictions(report.contradictions.iter().cloned());
                    debug!(agent = %report.agent_name, added, "Merged contradictions");
                    self.state.add_report(report);
                }
                Err(e) => self.agent_failed(&format!("{STRUCTURER}-{}", i + 1), &e).await,
            }
        }

        self.progress(Phase::Structure, 100, &[MASTER]).await;
        self.emit(
            MASTER,
            EventKind::Complete,
            format!(
                "Structure phase complete. {} tree nodes, {} contradictions found.",
                self.state.knowledge_tree_draft.len(),
                self.state.open_contradictions.len()
            ),
        )
        .await;
        Ok(())
    }

    async fn design_tree(&self) -> Option<Vec<TreeNodeDraft>> {
        let mut hook = CoordinatorHook::default();
        let result = self
            .run_agent(
                SubAgentReport::new(MASTER, "coordinator"),
                prompts::knowledge_tree(&self.state),
                vec![catalog::define_knowledge_tree()],
                self.config.pipeline.coordinator_max_turns,
                Dispatcher::new(HandlerRegistry::new()),
                &mut hook,
            )
            .await;
        match result {
            Ok(_) => {
                if hook.tree.is_none() {
                    warn!("Coordinator finished without defining a knowledge tree");
                }
                hook.tree
            }
            Err(e) => {
                self.agent_failed(MASTER, &e).await;
                None
            }
        }
    }

    /// Create the drafted nodes one at a time, parents first.
    async fn create_tree(&mut self, drafts: Vec<TreeNodeDraft>) -> Result<(), Error> {
        let total = drafts.len();
        let mut ids: HashMap<String, String> = HashMap::new();

        for planned in creation_order(drafts) {
            let draft = planned.draft;
            let parent_name = if planned.orphaned {
                warn!(node = %draft.name, parent = ?draft.parent_name, "Parent was never defined; creating node as a root");
                None
            } else {
                parent_of(&draft).map(str::to_string)
            };
            let parent_id = parent_name.as_ref().and_then(|p| ids.get(p)).cloned();

            let node = NewKnowledgeNode {
                client_id: self.state.client_id.clone(),
                parent_id: parent_id.clone(),
                name: draft.name.clone(),
                kind: draft.kind,
                readme: draft.readme,
                order: draft.order,
            };
            let id = self.backend.create_knowledge_node(&node).await?;
            debug!(node = %draft.name, id = %id, "Knowledge node created");

            ids.insert(draft.name.clone(), id.clone());
            self.state.knowledge_tree_draft.push(TreeNode {
                id,
                name: draft.name,
                kind: draft.kind,
                parent_name,
                parent_id,
            });
        }

        self.emit(MASTER, EventKind::Progress, format!("Knowledge tree created with {total} nodes"))
            .await;
        Ok(())
    }

    async fn run_structurer(
        &self,
        index: usize,
        batch: &[Value],
        categories: &[String],
    ) -> Result<SubAgentReport, Error> {
        let name = format!("{STRUCTURER}-{index}");
        let workspace = Arc::new(self.workspace(&name)?);
        let registry = self.tools.structurer(
            workspace.clone(),
            self.extractor.clone(),
            self.provider.clone(),
            &self.config.model.model,
        );
        let dispatcher = self.dispatcher(registry);

        let mut surface = merge_unique(catalog::structurer_tools(), catalog::sandbox_tools());
        for category in categories {
            surface = dispatcher.tool_surface(category, surface).await;
        }

        self.emit(
            &name,
            EventKind::Info,
            format!("Starting structurer with {} files to process", batch.len()),
        )
        .await;

        let mut hook = StructurerHook::new(self.backend.clone(), &self.state.client_id);
        let result = self
            .run_agent(
                SubAgentReport::new(&name, "mixed"),
                prompts::structurer(batch, &surface),
                surface,
                self.config.pipeline.structurer_max_turns,
                dispatcher,
                &mut hook,
            )
            .await;
        release(workspace);

        let report = result?;
        self.emit(
            &name,
            EventKind::Complete,
            format!(
                "Structuring complete: {} findings, {} contradictions",
                report.findings.len(),
                report.contradictions.len()
            ),
        )
        .await;
        Ok(report)
    }

    /// Distinct source categories that produced a report, sorted.
    fn source_categories(&self) -> Vec<String> {
        let mut categories: Vec<String> = self.state.reports.iter().map(|r| r.source_type.clone()).collect();
        categories.sort();
        categories.dedup();
        categories
    }

    // ── Verify ──────────────────────────────────────────────────────

    async fn verify(&mut self) -> Result<(), Error> {
        self.state.enter(Phase::Verify)?;
        self.progress(Phase::Verify, 0, &[MASTER]).await;
        self.emit(MASTER, EventKind::Info, "Starting verify phase").await;

        if self.state.open_contradictions.is_empty() {
            self.emit(
                MASTER,
                EventKind::Info,
                "No contradictions to verify; skipping questionnaire generation",
            )
            .await;
            self.progress(Phase::Verify, 100, &[MASTER]).await;
            return Ok(());
        }

        self.progress(Phase::Verify, 20, &[MASTER]).await;
        let draft = self.draft_questionnaire().await;
        self.progress(Phase::Verify, 50, &[MASTER]).await;

        match draft.filter(|d| !d.questions.is_empty()) {
            Some(draft) => self.collect_answers(draft).await,
            None => warn!("No questionnaire was generated; contradictions stay open"),
        }

        self.progress(Phase::Verify, 100, &[MASTER]).await;
        self.emit(
            MASTER,
            EventKind::Complete,
            format!(
                "Verify phase complete. {} contradictions remain open.",
                self.state.open_contradictions.len()
            ),
        )
        .await;
        Ok(())
    }

    async fn draft_questionnaire(&self) -> Option<QuestionnaireDraft> {
        let mut hook = CoordinatorHook::default();
        let result = self
            .run_agent(
                SubAgentReport::new(MASTER, "coordinator"),
                prompts::questionnaire(&self.state.open_contradictions),
                vec![catalog::generate_questionnaire()],
                self.config.pipeline.coordinator_max_turns,
                Dispatcher::new(HandlerRegistry::new()),
                &mut hook,
            )
            .await;
        match result {
            Ok(_) => hook.questionnaire,
            Err(e) => {
                self.agent_failed(MASTER, &e).await;
                None
            }
        }
    }

    /// Persist the questionnaire, wait for answers and resolve what they
    /// point at.
    async fn collect_answers(&mut self, draft: QuestionnaireDraft) {
        let persisted = self
            .backend
            .create_questionnaire(&self.state.client_id, &draft.title, &draft.questions)
            .await;
        let Some(questionnaire_id) = persisted else {
            warn!("Questionnaire was not persisted; contradictions stay open");
            return;
        };

        self.emit(
            MASTER,
            EventKind::Progress,
            format!(
                "Questionnaire created with {} questions (id: {questionnaire_id})",
                draft.questions.len()
            ),
        )
        .await;
        self.emit(MASTER, EventKind::Info, "Waiting for human verification responses...")
            .await;

        let responses = self.await_responses(&questionnaire_id).await;
        if responses.is_empty() {
            self.emit(
                MASTER,
                EventKind::Info,
                "No human responses received within timeout; continuing with unresolved contradictions",
            )
            .await;
            return;
        }

        let resolved = resolve_responses(&mut self.state, &draft.questions, &responses);
        info!(responses = responses.len(), resolved, "Applied verification responses");
    }

    /// Poll for responses with a doubling interval until the first
    /// non-empty answer or the verification timeout.
    async fn await_responses(&self, questionnaire_id: &str) -> Vec<QuestionnaireResponse> {
        let settings = &self.config.pipeline;
        let timeout = Duration::from_secs(settings.verify_timeout_secs);
        let cap = Duration::from_secs(settings.verify_poll_max_secs.max(1));
        let mut interval = Duration::from_secs(settings.verify_poll_initial_secs.max(1)).min(cap);
        let mut waited = Duration::ZERO;

        while waited < timeout {
            let step = interval.min(timeout - waited);
            tokio::time::sleep(step).await;
            waited += step;

            let responses = self
                .backend
                .questionnaire_responses(&self.state.client_id, questionnaire_id)
                .await;
            if !responses.is_empty() {
                self.emit(
                    MASTER,
                    EventKind::Progress,
                    format!("Received {} human responses", responses.len()),
                )
                .await;
                return responses;
            }
            debug!(waited_secs = waited.as_secs(), "No verification responses yet");
            interval = (interval * 2).min(cap);
        }
        Vec::new()
    }

    // ── Use ─────────────────────────────────────────────────────────

    async fn use_knowledge(&mut self) -> Result<(), Error> {
        self.state.enter(Phase::Use)?;
        self.progress(Phase::Use, 0, &[MASTER]).await;
        self.emit(MASTER, EventKind::Info, "Starting use phase: writing knowledge entries")
            .await;

        if self.state.knowledge_tree_draft.is_empty() {
            self.emit(MASTER, EventKind::Info, "No tree nodes available; skipping knowledge writing")
                .await;
            self.progress(Phase::Use, 100, &[MASTER]).await;
            return Ok(());
        }

        self.progress(Phase::Use, 20, &[MASTER, WRITER]).await;

        let prompt = prompts::knowledge_writer(&self.state.knowledge_tree_draft, &self.state.accumulated_knowledge());
        let mut hook = WriterHook;
        let result = self
            .run_agent(
                SubAgentReport::new(WRITER, "knowledge"),
                prompt,
                catalog::knowledge_writer_tools(),
                self.config.pipeline.writer_max_turns,
                Dispatcher::new(self.tools.knowledge_writer()),
                &mut hook,
            )
            .await;

        match result {
            Ok(report) => {
                self.state.entries_written += report.metric_u64("entries_written");
                self.state.merge_contradictions(report.contradictions);
            }
            Err(e) => self.agent_failed(WRITER, &e).await,
        }

        self.progress(Phase::Use, 100, &[MASTER]).await;
        self.emit(
            MASTER,
            EventKind::Complete,
            format!("Use phase complete. {} knowledge entries written.", self.state.entries_written),
        )
        .await;
        Ok(())
    }

    // ── Plumbing ────────────────────────────────────────────────────

    async fn run_agent(
        &self,
        report: SubAgentReport,
        prompt: Prompt,
        tool_surface: Vec<ToolDefinition>,
        max_turns: usize,
        dispatcher: Dispatcher,
        hook: &mut dyn RoleHook,
    ) -> Result<SubAgentReport, Error> {
        let agent = report.agent_name.clone();
        self.event_bus.publish(PipelineEvent::AgentStarted {
            agent: agent.clone(),
            timestamp: Utc::now(),
        });

        let model = &self.config.model;
        let engine = ToolCallingLoop::new(self.provider.clone(), Arc::new(dispatcher), &model.model)
            .with_temperature(model.temperature)
            .with_max_tokens(model.max_tokens)
            .with_loop_detection(self.config.loop_detection.clone())
            .with_event_bus(self.event_bus.clone());
        let request = LoopRequest {
            initial_user_message: prompt.user,
            system_instructions: prompt.system,
            tool_surface,
            max_turns,
        };

        let report = engine.run(report, request, hook).await?;
        info!(agent = %agent, stop_reason = %report.stop_reason, turns = report.turns, "Agent finished");
        self.event_bus.publish(PipelineEvent::AgentFinished {
            agent,
            stop_reason: report.stop_reason,
            turns: report.turns,
            timestamp: Utc::now(),
        });
        Ok(report)
    }

    fn dispatcher(&self, registry: HandlerRegistry) -> Dispatcher {
        let dispatcher = Dispatcher::new(registry);
        match &self.external {
            Some(provider) => {
                let settings = &self.config.external_tools;
                dispatcher.with_external(ExternalRoute::new(
                    provider.clone(),
                    settings.user_id(&self.state.client_id),
                    settings.tool_prefixes.clone(),
                    settings.result_char_cap,
                ))
            }
            None => dispatcher,
        }
    }

    fn workspace(&self, label: &str) -> Result<Workspace, Error> {
        let parent = self.config.sandbox.workspace_root();
        Ok(Workspace::create(&parent, &format!("{}_{label}", self.state.client_id))?)
    }

    async fn progress(&self, phase: Phase, progress: u8, agents: &[&str]) {
        let active_agents: Vec<String> = agents.iter().map(|a| a.to_string()).collect();
        info!(client_id = %self.state.client_id, phase = %phase, progress, "Phase progress");

        let update = PipelineUpdate {
            client_id: self.state.client_id.clone(),
            phase,
            progress,
            active_agents: active_agents.clone(),
        };
        if self.backend.update_pipeline(&update).await.is_none() {
            debug!(phase = %phase, progress, "Progress update not acknowledged");
        }
        self.event_bus.publish(PipelineEvent::PhaseProgress {
            client_id: self.state.client_id.clone(),
            phase,
            progress,
            active_agents,
            timestamp: Utc::now(),
        });
    }

    async fn emit(&self, agent: &str, kind: EventKind, message: impl Into<String>) {
        let event = AgentEvent::new(&self.state.client_id, agent, kind, message);
        self.backend.emit_event(&event).await;
    }

    async fn agent_failed(&self, agent: &str, err: &Error) {
        error!(agent, error = %err, "Agent failed; continuing without its report");
        self.event_bus.publish(PipelineEvent::AgentFailed {
            agent: agent.to_string(),
            error: err.to_string(),
            timestamp: Utc::now(),
        });
        self.emit(MASTER, EventKind::Error, format!("{agent} failed: {err}")).await;
    }
}

fn explorer_name(source: &DataSource) -> String {
    format!("explorer-{}", source.source_type)
}

/// Destroy a workspace once its agent is done with it.
fn release(workspace: Arc<Workspace>) {
    match Arc::try_unwrap(workspace) {
        Ok(workspace) => workspace.destroy(),
        Err(shared) => warn!(
            workspace = %shared.root().display(),
            "Workspace still referenced; it is removed when the last handle drops"
        ),
    }
}

/// Split `items` into at most `batches` contiguous batches whose sizes
/// differ by at most one. No items, no batches.
pub fn partition<T>(items: Vec<T>, batches: usize) -> Vec<Vec<T>> {
    let total = items.len();
    if total == 0 {
        return Vec::new();
    }
    let count = batches.clamp(1, total);
    let mut out: Vec<Vec<T>> = (0..count).map(|_| Vec::new()).collect();
    for (i, item) in items.into_iter().enumerate() {
        out[i * count / total].push(item);
    }
    out
}

/// Close every open contradiction a response points at, either directly
/// or through the question it answers. Returns how many were closed.
pub fn resolve_responses(
    state: &mut PipelineState,
    questions: &[Question],
    responses: &[QuestionnaireResponse],
) -> usize {
    let mut resolved = 0;
    for response in responses {
        let target = response.contradiction_id.clone().or_else(|| {
            let question_id = response.question_id.as_deref()?;
            questions
                .iter()
                .find(|q| q.id == question_id)
                .and_then(|q| q.contradiction_id.clone())
        });
        match target {
            Some(id) if state.resolve_contradiction(&id) => {
                info!(contradiction_id = %id, answer = %response.answer, "Contradiction resolved");
                resolved += 1;
            }
            Some(id) => debug!(contradiction_id = %id, "Response names no open contradiction"),
            None => debug!(question_id = ?response.question_id, "Response is not tied to a contradiction"),
        }
    }
    resolved
}
