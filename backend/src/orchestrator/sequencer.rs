//! Phase sequencer
//!
//! Drives a run through its phases in a fixed order:
//!
//! ```text
//! THINKING -> ANALYZING_TOOLS -> [EXECUTING_TOOL -> PROCESSING_RESULTS] -> GENERATING_RESPONSE
//! ```
//!
//! The bracketed branch only runs when the classifier finds at least one
//! category. Each phase is paced by its configured delay; delays race the
//! run's cancellation token, and every write goes through the run's
//! [`RunScope`] so a superseded run stops at its next write.
//!
//! The terminal phase (COMPLETED or FAILED) is set by finalization, except
//! when the tool fails: the sequence then moves to FAILED and stops.

use crate::orchestrator::classifier::{self, Category};
use crate::orchestrator::config::PhaseDelays;
use crate::orchestrator::run_context::{RunScope, Superseded};
use crate::orchestrator::steps::Phase;
use crate::orchestrator::tools::{
    ToolBinding, ToolExecutionStatus, ToolExecutor, ToolRequest, ToolResult, ToolStatus,
};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Why a sequence stopped early
#[derive(Error, Debug)]
pub enum SequenceError {
    /// The run's cancellation token fired during a delay
    #[error("run cancelled")]
    Cancelled,

    /// A newer run replaced this one
    #[error(transparent)]
    Superseded(#[from] Superseded),
}

/// What a finished sequence found and did
#[derive(Debug, Clone, Default)]
pub struct SequenceOutcome {
    /// Categories detected for the input
    pub categories: Vec<Category>,
    /// Tool that was executed, if any
    pub tool: Option<ToolBinding>,
    /// Tool failure, if the tool branch failed
    pub failure: Option<String>,
}

/// Runs the phases of one run
pub struct PhaseSequencer<'a> {
    scope: &'a RunScope,
    delays: &'a PhaseDelays,
    executor: &'a dyn ToolExecutor,
    cancel: &'a CancellationToken,
}

impl<'a> PhaseSequencer<'a> {
    /// Create a sequencer writing through `scope`
    pub fn new(
        scope: &'a RunScope,
        delays: &'a PhaseDelays,
        executor: &'a dyn ToolExecutor,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            scope,
            delays,
            executor,
            cancel,
        }
    }

    /// Run every phase for `input`
    pub async fn run(&self, input: &str) -> Result<SequenceOutcome, SequenceError> {
        self.thinking(input).await?;
        let categories = self.analyze_tools(input).await?;

        let mut outcome = SequenceOutcome {
            categories,
            ..Default::default()
        };

        if let Some(category) = classifier::primary(&outcome.categories) {
            let binding = ToolBinding::resolve(category);
            match self.execute_tool(&binding, input).await? {
                Ok(result) => self.process_results(&result).await?,
                Err(failure) => {
                    outcome.failure = Some(failure);
                    outcome.tool = Some(binding);
                    return Ok(outcome);
                }
            }
            outcome.tool = Some(binding);
        }

        self.generate_response(input, outcome.tool.as_ref()).await?;
        Ok(outcome)
    }

    async fn thinking(&self, input: &str) -> Result<(), SequenceError> {
        self.enter(Phase::Thinking, None).await?;
        self.pace(self.delays.thinking()).await?;
        self.scope
            .attach_response(Phase::Thinking, thinking_note(input))
            .await?;
        Ok(())
    }

    async fn analyze_tools(&self, input: &str) -> Result<Vec<Category>, SequenceError> {
        self.enter(Phase::AnalyzingTools, None).await?;
        self.pace(self.delays.analyzing_tools()).await?;

        let categories = classifier::categorize(input);
        let recorded = categories.clone();
        self.scope
            .update(|context| context.categories = recorded)
            .await?;
        self.scope
            .attach_response(Phase::AnalyzingTools, analysis_note(&categories))
            .await?;
        Ok(categories)
    }

    /// Returns the tool result, or the failure message if the tool failed
    async fn execute_tool(
        &self,
        binding: &ToolBinding,
        input: &str,
    ) -> Result<Result<ToolResult, String>, SequenceError> {
        self.enter(
            Phase::ExecutingTool,
            Some(ToolExecutionStatus::executing(binding)),
        )
        .await?;

        let request = ToolRequest::synthesize(binding, input);
        let invocation = request.invocation();
        self.scope
            .attach_tool_call(Phase::ExecutingTool, invocation.clone(), None)
            .await?;
        self.pace(self.delays.tool_execution()).await?;

        match self.executor.execute(binding, &request).await {
            Ok(result) => {
                self.scope
                    .attach_tool_call(Phase::ExecutingTool, invocation, Some(result.to_value()))
                    .await?;
                Ok(Ok(result))
            }
            Err(e) => {
                let failure = e.to_string();
                warn!(
                    conversation_id = %self.scope.conversation_id(),
                    run_id = %self.scope.run_id(),
                    tool_name = %binding.tool_name,
                    error = %failure,
                    "Tool execution failed"
                );
                self.scope
                    .update_tool(|tool| tool.finish(ToolStatus::Failed))
                    .await?;
                let note = format!("{} failed: {}", binding.tool_name, failure);
                self.scope
                    .attach_response(Phase::ExecutingTool, note)
                    .await?;
                let recorded = failure.clone();
                self.scope
                    .update(|context| {
                        context.failure = Some(recorded);
                        context.phase = Some(Phase::Failed);
                    })
                    .await?;
                Ok(Err(failure))
            }
        }
    }

    async fn process_results(&self, result: &ToolResult) -> Result<(), SequenceError> {
        self.scope
            .update_tool(|tool| tool.finish(ToolStatus::Completed))
            .await?;
        self.enter(Phase::ProcessingResults, None).await?;
        self.pace(self.delays.processing_results()).await?;
        self.scope
            .attach_response(Phase::ProcessingResults, result.summary_line())
            .await?;
        Ok(())
    }

    async fn generate_response(
        &self,
        input: &str,
        tool: Option<&ToolBinding>,
    ) -> Result<(), SequenceError> {
        self.enter(Phase::GeneratingResponse, None).await?;
        self.scope
            .attach_response(Phase::GeneratingResponse, generation_note(input, tool))
            .await?;
        self.pace(self.delays.generating_response()).await?;
        Ok(())
    }

    async fn enter(
        &self,
        phase: Phase,
        tool: Option<ToolExecutionStatus>,
    ) -> Result<(), SequenceError> {
        debug!(
            conversation_id = %self.scope.conversation_id(),
            run_id = %self.scope.run_id(),
            phase = %phase,
            "Entering phase"
        );
        self.scope.begin_phase(phase, tool).await?;
        Ok(())
    }

    async fn pace(&self, delay: Duration) -> Result<(), SequenceError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(SequenceError::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }
}

fn thinking_note(input: &str) -> String {
    format!(
        "Understanding the request: \"{}\". Analyzing the intent to choose the best approach.",
        input.trim()
    )
}

fn analysis_note(categories: &[Category]) -> String {
    match classifier::primary(categories) {
        Some(primary) => {
            let labels: Vec<&str> = categories.iter().map(|c| c.label.as_str()).collect();
            format!(
                "Detected capabilities: {}. Tool required: yes ({}).",
                labels.join(", "),
                ToolBinding::resolve(primary).provider
            )
        }
        None => "No specific capabilities detected. Tool required: no.".to_string(),
    }
}

fn generation_note(input: &str, tool: Option<&ToolBinding>) -> String {
    let tool_part = match tool {
        Some(binding) => format!("after using {}", binding.provider),
        None => "without using any tools".to_string(),
    };
    format!(
        "Composing the final reply to \"{}\" {}.",
        input.trim(),
        tool_part
    )
}
