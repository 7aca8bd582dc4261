//! Run progress events
//!
//! Every observable change of a run (phase, step, tool status, finalization,
//! cleanup) is published on a broadcast channel so API clients can follow a
//! run live without polling.

use crate::chat::EntryHandle;
use crate::orchestrator::run_context::RunId;
use crate::orchestrator::steps::{Phase, Step};
use crate::orchestrator::tools::ToolExecutionStatus;
use serde::Serialize;
use tokio::sync::broadcast;

/// Default number of buffered events per subscriber
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Event emitted while a run progresses
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    /// A run started and its placeholder entry was inserted
    RunStarted {
        /// Conversation of the run
        conversation_id: String,
        /// Run identifier
        run_id: RunId,
        /// Placeholder entry
        placeholder: EntryHandle,
    },
    /// The run entered a new phase
    PhaseChanged {
        /// Conversation of the run
        conversation_id: String,
        /// Run identifier
        run_id: RunId,
        /// New phase
        phase: Phase,
    },
    /// A step was created or changed
    StepUpdated {
        /// Conversation of the run
        conversation_id: String,
        /// Run identifier
        run_id: RunId,
        /// Current state of the step
        step: Step,
    },
    /// The tool invocation changed status
    ToolStatus {
        /// Conversation of the run
        conversation_id: String,
        /// Run identifier
        run_id: RunId,
        /// Current tool status
        status: ToolExecutionStatus,
    },
    /// The run was finalized into the conversation
    RunFinalized {
        /// Conversation of the run
        conversation_id: String,
        /// Run identifier
        run_id: RunId,
        /// Terminal phase
        phase: Phase,
        /// Entry holding the result, if one was written
        entry_id: Option<EntryHandle>,
        /// Whether the entry was appended because no placeholder was left
        appended: bool,
    },
    /// The live state of the run was reset after the grace period
    RunCleared {
        /// Conversation of the run
        conversation_id: String,
        /// Run identifier
        run_id: RunId,
    },
    /// The run was replaced by a newer run (or torn down)
    RunSuperseded {
        /// Conversation of the run
        conversation_id: String,
        /// Run identifier
        run_id: RunId,
        /// Replacing run, if any
        superseded_by: Option<RunId>,
    },
}

impl RunEvent {
    /// Conversation the event belongs to
    pub fn conversation_id(&self) -> &str {
        match self {
            RunEvent::RunStarted {
                conversation_id, ..
            }
            | RunEvent::PhaseChanged {
                conversation_id, ..
            }
            | RunEvent::StepUpdated {
                conversation_id, ..
            }
            | RunEvent::ToolStatus {
                conversation_id, ..
            }
            | RunEvent::RunFinalized {
                conversation_id, ..
            }
            | RunEvent::RunCleared {
                conversation_id, ..
            }
            | RunEvent::RunSuperseded {
                conversation_id, ..
            } => conversation_id,
        }
    }
}

/// Broadcast channel for run events
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<RunEvent>,
}

impl EventBus {
    /// Create a bus buffering `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event; events without subscribers are dropped
    pub fn publish(&self, event: RunEvent) {
        let _ = self.sender.send(event);
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EVENT_CHANNEL_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_to_subscriber() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.publish(RunEvent::RunCleared {
            conversation_id: "conv-1".to_string(),
            run_id: RunId::from(3),
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.conversation_id(), "conv-1");
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "run_cleared");
        assert_eq!(value["run_id"], 3);
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::default();
        bus.publish(RunEvent::RunCleared {
            conversation_id: "conv-1".to_string(),
            run_id: RunId::from(1),
        });
    }
}
