//! Step tracking
//!
//! A run keeps an ordered log of the phases it went through. Entering a phase
//! closes every earlier step, so at most one step (the current phase) is ever
//! incomplete. Attach operations look steps up by phase from the tail and
//! quietly do nothing on a miss, which keeps late or duplicated writes harmless.

use crate::orchestrator::tools::ToolExecutionStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tracing::trace;

/// Pipeline phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    /// Restating and understanding the request
    Thinking,
    /// Deciding whether a tool is needed
    AnalyzingTools,
    /// Running the simulated tool
    ExecutingTool,
    /// Turning the tool result into a summary
    ProcessingResults,
    /// Composing the reply
    GeneratingResponse,
    /// Terminal: the run finished successfully
    Completed,
    /// Terminal: the run failed
    Failed,
}

impl Phase {
    /// Wire name of the phase ("THINKING", ...)
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Thinking => "THINKING",
            Phase::AnalyzingTools => "ANALYZING_TOOLS",
            Phase::ExecutingTool => "EXECUTING_TOOL",
            Phase::ProcessingResults => "PROCESSING_RESULTS",
            Phase::GeneratingResponse => "GENERATING_RESPONSE",
            Phase::Completed => "COMPLETED",
            Phase::Failed => "FAILED",
        }
    }

    /// Default step label for the phase
    pub fn label(&self) -> &'static str {
        match self {
            Phase::Thinking => "Thinking",
            Phase::AnalyzingTools => "Analyzing available tools",
            Phase::ExecutingTool => "Executing tool",
            Phase::ProcessingResults => "Processing results",
            Phase::GeneratingResponse => "Generating response",
            Phase::Completed => "Completed",
            Phase::Failed => "Failed",
        }
    }

    /// Whether the phase ends a run
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Completed | Phase::Failed)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One occurrence of a phase within a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Phase this step records
    pub phase: Phase,
    /// Human-readable label ("Using {tool}" when a tool is attached)
    pub label: String,
    /// When the phase was entered
    pub start_time: DateTime<Utc>,
    /// Whether the phase is over
    pub completed: bool,
    /// Narrative produced during the phase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    /// Serialized tool request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_invocation: Option<String>,
    /// Tool result payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_result: Option<Value>,
    /// Provider detail ("Using {provider}"), used to compute the tools used
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl Step {
    fn new(phase: Phase, tool: Option<&ToolExecutionStatus>) -> Self {
        let mut step = Self {
            phase,
            label: phase.label().to_string(),
            start_time: Utc::now(),
            completed: false,
            response: None,
            tool_invocation: None,
            tool_result: None,
            details: None,
        };
        step.apply_tool(tool);
        step
    }

    fn apply_tool(&mut self, tool: Option<&ToolExecutionStatus>) {
        if let Some(tool) = tool {
            self.label = format!("Using {}", tool.tool_name);
            self.details = Some(format!("Using {}", tool.provider));
        }
    }
}

/// Ordered step log of a run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct StepTracker {
    steps: Vec<Step>,
}

impl StepTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Steps in the order they were entered
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Owned copy of the steps
    pub fn snapshot(&self) -> Vec<Step> {
        self.steps.clone()
    }

    /// Number of recorded steps
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether no step was recorded yet
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Most recent step for a phase
    pub fn last_for(&self, phase: Phase) -> Option<&Step> {
        self.steps.iter().rev().find(|step| step.phase == phase)
    }

    /// Enter a phase
    ///
    /// Every existing step is marked completed first. If a step for `phase`
    /// already exists it becomes the current step again and is updated in
    /// place; otherwise a new step is appended.
    pub fn begin_phase(&mut self, phase: Phase, tool: Option<&ToolExecutionStatus>) -> &Step {
        for step in &mut self.steps {
            step.completed = true;
        }

        let index = match self.position(phase) {
            Some(index) => {
                let step = &mut self.steps[index];
                step.completed = false;
                step.apply_tool(tool);
                index
            }
            None => {
                self.steps.push(Step::new(phase, tool));
                self.steps.len() - 1
            }
        };
        &self.steps[index]
    }

    /// Set the narrative of the most recent step for `phase`
    ///
    /// Returns false (and changes nothing) if no such step exists.
    pub fn attach_response(&mut self, phase: Phase, text: impl Into<String>) -> bool {
        match self.last_for_mut(phase) {
            Some(step) => {
                step.response = Some(text.into());
                true
            }
            None => {
                trace!(phase = %phase, "No step to attach response to");
                false
            }
        }
    }

    /// Record a tool invocation (and optionally its result) on the most recent step for `phase`
    ///
    /// Object results are merged key by key into any result already attached.
    /// Returns false (and changes nothing) if no such step exists.
    pub fn attach_tool_call(
        &mut self,
        phase: Phase,
        invocation: impl Into<String>,
        result: Option<Value>,
    ) -> bool {
        let Some(step) = self.last_for_mut(phase) else {
            trace!(phase = %phase, "No step to attach tool call to");
            return false;
        };

        step.tool_invocation = Some(invocation.into());
        if let Some(result) = result {
            step.tool_result = Some(match (step.tool_result.take(), result) {
                (Some(Value::Object(mut existing)), Value::Object(incoming)) => {
                    existing.extend(incoming);
                    Value::Object(existing)
                }
                (_, incoming) => incoming,
            });
        }
        true
    }

    /// Mark every step completed
    pub fn complete_all(&mut self) {
        for step in &mut self.steps {
            step.completed = true;
        }
    }

    /// Number of steps not yet completed
    pub fn incomplete_count(&self) -> usize {
        self.steps.iter().filter(|step| !step.completed).count()
    }

    fn position(&self, phase: Phase) -> Option<usize> {
        self.steps.iter().rposition(|step| step.phase == phase)
    }

    fn last_for_mut(&mut self, phase: Phase) -> Option<&mut Step> {
        self.steps.iter_mut().rev().find(|step| step.phase == phase)
    }
}
