//! In-process pipeline events.
//!
//! Published on a broadcast bus so that the CLI, the gateway and tests can
//! observe a run without coupling to the orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

use crate::pipeline::Phase;
use crate::report::StopReason;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PipelineEvent {
    /// A phase checkpoint was reported
    PhaseProgress {
        client_id: String,
        phase: Phase,
        progress: u8,
        active_agents: Vec<String>,
        timestamp: DateTime<Utc>,
    },

    AgentStarted {
        agent: String,
        timestamp: DateTime<Utc>,
    },

    AgentFinished {
        agent: String,
        stop_reason: StopReason,
        turns: usize,
        timestamp: DateTime<Utc>,
    },

    /// An agent run raised instead of returning a report
    AgentFailed {
        agent: String,
        error: String,
        timestamp: DateTime<Utc>,
    },

    ToolExecuted {
        agent: String,
        tool_name: String,
        is_error: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus.
pub struct EventBus {
    sender: broadcast::Sender<Arc<PipelineEvent>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Returns how many subscribers received the event.
    pub fn publish(&self, event: PipelineEvent) -> usize {
        match self.sender.send(Arc::new(event)) {
            Ok(receivers) => receivers,
            Err(dropped) => {
                debug!(event = ?dropped.0, "No event subscribers, event dropped");
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<PipelineEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn event_bus_publish_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(PipelineEvent::ToolExecuted {
            agent: "explorer-drive".into(),
            tool_name: "run_command".into(),
            is_error: false,
            duration_ms: 42,
            timestamp: Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        match event.as_ref() {
            PipelineEvent::ToolExecuted { tool_name, is_error, .. } => {
                assert_eq!(tool_name, "run_command");
                assert!(!is_error);
            }
            _ => panic!("Expected ToolExecuted event"),
        }
    }

    #[test]
    fn event_bus_no_subscribers_doesnt_panic() {
        let bus = EventBus::new(16);
        let failed = || PipelineEvent::AgentFailed {
            agent: "explorer-gmail".into(),
            error: "no subscribers".into(),
            timestamp: Utc::now(),
        };
        assert_eq!(bus.publish(failed()), 0);

        let _rx = bus.subscribe();
        assert_eq!(bus.publish(failed()), 1);
    }
}
