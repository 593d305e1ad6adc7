//! The tool-calling loop.
//!
//! One [`ToolCallingLoop`] drives one agent's conversation: ask the model,
//! run the tools it asks for, feed the results back, repeat. The loop stops
//! when the model answers without tools, when the loop detector reports
//! repetition, or after `max_turns` model turns.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use lorekeep_config::LoopDetectionConfig;
use lorekeep_core::event::{EventBus, PipelineEvent};
use lorekeep_core::message::ConversationState;
use lorekeep_core::provider::{Provider, ProviderRequest, ToolDefinition};
use lorekeep_core::report::{StopReason, SubAgentReport};
use lorekeep_core::tool::ToolResult;
use lorekeep_tools::Dispatcher;
use tracing::{debug, info, warn};

use crate::hooks::{Intercept, RoleHook};
use crate::loop_detection::LoopDetector;

/// Inputs for one run.
#[derive(Debug, Clone)]
pub struct LoopRequest {
    pub initial_user_message: String,
    pub system_instructions: String,
    pub tool_surface: Vec<ToolDefinition>,
    pub max_turns: usize,
}

pub struct ToolCallingLoop {
    /// The LLM provider to use
    provider: Arc<dyn Provider>,

    /// Routes forwarded calls to local handlers or the external integration
    dispatcher: Arc<Dispatcher>,

    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    detection: LoopDetectionConfig,
    event_bus: Option<Arc<EventBus>>,
}

impl ToolCallingLoop {
    pub fn new(provider: Arc<dyn Provider>, dispatcher: Arc<Dispatcher>, model: impl Into<String>) -> Self {
        Self {
            provider,
            dispatcher,
            model: model.into(),
            temperature: 0.2,
            max_tokens: None,
            detection: LoopDetectionConfig::default(),
            event_bus: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_loop_detection(mut self, detection: LoopDetectionConfig) -> Self {
        self.detection = detection;
        self
    }

    /// Publish a `ToolExecuted` event for every call.
    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Run to a stop condition and return the filled-in report.
    ///
    /// A provider error on the main completion is returned as `Err`; the
    /// caller treats it as a failure of this agent only.
    pub async fn run(
        &self,
        report: SubAgentReport,
        request: LoopRequest,
        hook: &mut dyn RoleHook,
    ) -> Result<SubAgentReport, lorekeep_core::Error> {
        self.run_with_conversation(report, request, hook)
            .await
            .map(|(report, _)| report)
    }

    /// Like [`run`](Self::run), also handing back the conversation.
    pub async fn run_with_conversation(
        &self,
        mut report: SubAgentReport,
        request: LoopRequest,
        hook: &mut dyn RoleHook,
    ) -> Result<(SubAgentReport, ConversationState), lorekeep_core::Error> {
        let agent = report.agent_name.clone();
        let mut conversation = ConversationState::new(request.initial_user_message);
        let mut detector = LoopDetector::from_config(&self.detection);
        report.stop_reason = StopReason::TurnBudgetExhausted;

        info!(agent = %agent, max_turns = request.max_turns, tools = request.tool_surface.len(), "Agent loop starting");

        for turn in 1..=request.max_turns {
            let provider_request = ProviderRequest {
                model: self.model.clone(),
                system: request.system_instructions.clone(),
                turns: conversation.turns().to_vec(),
                tools: request.tool_surface.clone(),
                temperature: self.temperature,
                max_tokens: self.max_tokens,
            };
            let response = self.provider.complete(provider_request).await?;
            report.turns = turn;

            if response.tool_calls.is_empty() {
                let text = response.text.trim();
                if !text.is_empty() {
                    report.findings.push(text.to_string());
                }
                report.stop_reason = StopReason::Concluded;
                debug!(agent = %agent, turn, "Model concluded");
                break;
            }

            debug!(agent = %agent, turn, tool_count = response.tool_calls.len(), "Executing tool calls");
            let calls = response.tool_calls;
            conversation.push_model(response.text, calls.clone());

            let mut results = Vec::with_capacity(calls.len());
            for call in &calls {
                detector.record(&call.name, &call.input);
                let start = Instant::now();
                let result = match hook.before(call, &mut report).await {
                    Intercept::Handled(content) => ToolResult::success(&call.id, content),
                    Intercept::Forward => {
                        let result = self.dispatcher.execute(call).await;
                        hook.after(call, &result, &mut report).await;
                        result
                    }
                };
                if result.is_error {
                    warn!(agent = %agent, tool = %call.name, error = %result.content, "Tool call failed");
                }
                self.publish(&agent, &call.name, result.is_error, start);
                results.push(result);
            }
            conversation.push_results(results);

            if detector.is_stuck() {
                warn!(agent = %agent, turn, "Agent is repeating tool calls, stopping early");
                report.stop_reason = StopReason::Repetition;
                break;
            }
        }

        info!(
            agent = %agent,
            turns = report.turns,
            stop_reason = %report.stop_reason,
            findings = report.findings.len(),
            "Agent loop finished"
        );
        Ok((report, conversation))
    }

    fn publish(&self, agent: &str, tool_name: &str, is_error: bool, start: Instant) {
        if let Some(bus) = &self.event_bus {
            bus.publish(PipelineEvent::ToolExecuted {
                agent: agent.to_string(),
                tool_name: tool_name.to_string(),
                is_error,
                duration_ms: start.elapsed().as_millis() as u64,
                timestamp: Utc::now(),
            });
        }
    }
}
