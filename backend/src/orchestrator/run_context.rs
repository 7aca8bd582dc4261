//! Run contexts
//!
//! Each conversation has at most one active [`RunContext`], held in a shared
//! [`RunArena`]. Every run gets a monotonic [`RunId`]; writes go through a
//! [`RunScope`] that checks the id against the conversation's active run and
//! drops the write if the run has been superseded.
//!
//! A context owns the cancellation token and task handles of its run, so
//! superseding or tearing it down stops pending delays before they can apply
//! stale state.

use crate::chat::{Attribution, EntryHandle};
use crate::orchestrator::classifier::Category;
use crate::orchestrator::events::{EventBus, RunEvent};
use crate::orchestrator::steps::{Phase, Step, StepTracker};
use crate::orchestrator::tools::ToolExecutionStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Monotonic identifier of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(u64);

impl From<u64> for RunId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hands out increasing run ids, starting at 1
#[derive(Debug, Default)]
pub struct RunIdGenerator {
    last: AtomicU64,
}

impl RunIdGenerator {
    /// Next unused run id
    pub fn next_id(&self) -> RunId {
        RunId(self.last.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

/// State of one orchestration run
#[derive(Debug)]
pub struct RunContext {
    /// Run identifier
    pub run_id: RunId,
    /// Request text
    pub input: String,
    /// Who the run is for
    pub attribution: Attribution,
    /// Current phase, `None` when idle
    pub phase: Option<Phase>,
    /// Live tool status
    pub current_tool: Option<ToolExecutionStatus>,
    /// Whether the processing indicator should show
    pub indicator_visible: bool,
    /// Step log
    pub steps: StepTracker,
    /// Provisional conversation entry
    pub placeholder: Option<EntryHandle>,
    /// Categories detected during tool analysis
    pub categories: Vec<Category>,
    /// Tool failure, if the tool branch failed
    pub failure: Option<String>,
    /// When the run started
    pub started_at: DateTime<Utc>,
    finalized: bool,
    finalizing: bool,
    cancel: CancellationToken,
    sequenced: watch::Receiver<bool>,
    sequencer_task: Option<JoinHandle<()>>,
    cleanup_task: Option<JoinHandle<()>>,
}

impl RunContext {
    /// Create the context of a run whose placeholder is already inserted
    ///
    /// `sequenced` flips to true once the phase sequence has finished.
    pub fn new(
        run_id: RunId,
        input: String,
        attribution: Attribution,
        placeholder: EntryHandle,
        cancel: CancellationToken,
        sequenced: watch::Receiver<bool>,
    ) -> Self {
        Self {
            run_id,
            input,
            attribution,
            phase: None,
            current_tool: None,
            indicator_visible: true,
            steps: StepTracker::new(),
            placeholder: Some(placeholder),
            categories: Vec::new(),
            failure: None,
            started_at: Utc::now(),
            finalized: false,
            finalizing: false,
            cancel,
            sequenced,
            sequencer_task: None,
            cleanup_task: None,
        }
    }

    /// Whether the run's result has been written to the conversation
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Whether a finalize is written or in flight
    pub fn finalize_claimed(&self) -> bool {
        self.finalized || self.finalizing
    }

    /// Reserve the run for one finalize; false if another one holds it
    pub fn claim_finalization(&mut self) -> bool {
        if self.finalize_claimed() {
            return false;
        }
        self.finalizing = true;
        true
    }

    /// Give up a claim whose write never happened
    pub fn release_finalization(&mut self) {
        self.finalizing = false;
    }

    /// Record that the claimed finalize was written
    pub fn mark_finalized(&mut self) {
        self.finalizing = false;
        self.finalized = true;
    }

    /// Token cancelled when the run is abandoned
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Receiver that turns true when the phase sequence has finished
    pub fn sequenced(&self) -> watch::Receiver<bool> {
        self.sequenced.clone()
    }

    /// Attach the task driving the phase sequence
    pub fn set_sequencer_task(&mut self, handle: JoinHandle<()>) {
        self.sequencer_task = Some(handle);
    }

    /// Attach the cleanup timer, aborting any previous one
    pub fn set_cleanup_task(&mut self, handle: JoinHandle<()>) {
        if let Some(previous) = self.cleanup_task.replace(handle) {
            previous.abort();
        }
    }

    /// Stop the run: cancel pending delays and abort its tasks
    pub fn cancel(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.sequencer_task.take() {
            handle.abort();
        }
        if let Some(handle) = self.cleanup_task.take() {
            handle.abort();
        }
    }

    /// Reset the live run state; the step log is left alone
    pub fn clear_live_state(&mut self) {
        self.indicator_visible = false;
        self.phase = None;
        self.current_tool = None;
        self.placeholder = None;
        self.cleanup_task = None;
    }

    /// Serializable view of the run
    pub fn snapshot(&self, conversation_id: &str) -> RunSnapshot {
        RunSnapshot {
            conversation_id: conversation_id.to_string(),
            run_id: self.run_id,
            phase: self.phase,
            current_tool: self.current_tool.clone(),
            indicator_visible: self.indicator_visible,
            steps: self.steps.snapshot(),
            placeholder: self.placeholder.clone(),
            categories: self.categories.clone(),
            failure: self.failure.clone(),
            finalized: self.finalized,
            started_at: self.started_at,
        }
    }
}

/// Point-in-time view of a run
#[derive(Debug, Clone, Serialize)]
pub struct RunSnapshot {
    /// Conversation of the run
    pub conversation_id: String,
    /// Run identifier
    pub run_id: RunId,
    /// Current phase
    pub phase: Option<Phase>,
    /// Live tool status
    pub current_tool: Option<ToolExecutionStatus>,
    /// Whether the processing indicator should show
    pub indicator_visible: bool,
    /// Step log
    pub steps: Vec<Step>,
    /// Provisional conversation entry
    pub placeholder: Option<EntryHandle>,
    /// Detected categories
    pub categories: Vec<Category>,
    /// Tool failure, if any
    pub failure: Option<String>,
    /// Whether the run's result has been written to the conversation
    pub finalized: bool,
    /// When the run started
    pub started_at: DateTime<Utc>,
}

/// Run contexts keyed by conversation id
#[derive(Debug, Clone, Default)]
pub struct RunArena {
    runs: Arc<RwLock<HashMap<String, RunContext>>>,
}

impl RunArena {
    /// Create an empty arena
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `context` the active run of a conversation, returning the run it replaced
    pub async fn install(&self, conversation_id: &str, context: RunContext) -> Option<RunContext> {
        self.runs
            .write()
            .await
            .insert(conversation_id.to_string(), context)
    }

    /// Apply `f` to the run if `run_id` is still the conversation's active run
    pub async fn with_run<R>(
        &self,
        conversation_id: &str,
        run_id: RunId,
        f: impl FnOnce(&mut RunContext) -> R,
    ) -> Option<R> {
        let mut runs = self.runs.write().await;
        runs.get_mut(conversation_id)
            .filter(|context| context.run_id == run_id)
            .map(f)
    }

    /// Active run id of a conversation
    pub async fn active_run(&self, conversation_id: &str) -> Option<RunId> {
        self.runs
            .read()
            .await
            .get(conversation_id)
            .map(|context| context.run_id)
    }

    /// Snapshot of a conversation's active run
    pub async fn snapshot(&self, conversation_id: &str) -> Option<RunSnapshot> {
        self.runs
            .read()
            .await
            .get(conversation_id)
            .map(|context| context.snapshot(conversation_id))
    }

    /// Remove a conversation's run from the arena
    pub async fn remove(&self, conversation_id: &str) -> Option<RunContext> {
        self.runs.write().await.remove(conversation_id)
    }

    /// Remove every run
    pub async fn drain(&self) -> Vec<(String, RunContext)> {
        self.runs.write().await.drain().collect()
    }
}

/// A write was attempted by a run that is no longer active
#[derive(Debug, Clone, Error)]
#[error("run {run_id} of conversation {conversation_id} is no longer active")]
pub struct Superseded {
    /// Conversation of the stale run
    pub conversation_id: String,
    /// Stale run
    pub run_id: RunId,
}

/// Write access to one run, checked against the arena on every call
#[derive(Debug, Clone)]
pub struct RunScope {
    arena: RunArena,
    events: EventBus,
    conversation_id: String,
    run_id: RunId,
}

impl RunScope {
    /// Scope writes to `run_id` of `conversation_id`
    pub fn new(arena: RunArena, events: EventBus, conversation_id: String, run_id: RunId) -> Self {
        Self {
            arena,
            events,
            conversation_id,
            run_id,
        }
    }

    /// Conversation of the run
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Run identifier
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Apply `f` to the run context, or drop the write if the run was superseded
    pub async fn update<R>(&self, f: impl FnOnce(&mut RunContext) -> R) -> Result<R, Superseded> {
        match self.arena.with_run(&self.conversation_id, self.run_id, f).await {
            Some(result) => Ok(result),
            None => {
                warn!(
                    conversation_id = %self.conversation_id,
                    run_id = %self.run_id,
                    "Dropping write from superseded run"
                );
                Err(Superseded {
                    conversation_id: self.conversation_id.clone(),
                    run_id: self.run_id,
                })
            }
        }
    }

    /// Publish an event of this run
    pub fn publish(&self, event: RunEvent) {
        self.events.publish(event);
    }

    /// Enter a phase, optionally attaching a tool
    pub async fn begin_phase(
        &self,
        phase: Phase,
        tool: Option<ToolExecutionStatus>,
    ) -> Result<(), Superseded> {
        let (step, tool) = self
            .update(|context| {
                context.phase = Some(phase);
                if let Some(tool) = tool {
                    context.current_tool = Some(tool);
                }
                let tool = context.current_tool.clone();
                let attached = if phase == Phase::ExecutingTool {
                    tool.as_ref()
                } else {
                    None
                };
                let step = context.steps.begin_phase(phase, attached).clone();
                (step, tool)
            })
            .await?;

        self.publish(RunEvent::PhaseChanged {
            conversation_id: self.conversation_id.clone(),
            run_id: self.run_id,
            phase,
        });
        if phase == Phase::ExecutingTool {
            if let Some(status) = tool {
                self.publish(RunEvent::ToolStatus {
                    conversation_id: self.conversation_id.clone(),
                    run_id: self.run_id,
                    status,
                });
            }
        }
        self.publish_step(step);
        Ok(())
    }

    /// Attach a narrative to the most recent step of `phase`
    pub async fn attach_response(&self, phase: Phase, text: String) -> Result<(), Superseded> {
        let step = self
            .update(|context| {
                context
                    .steps
                    .attach_response(phase, text)
                    .then(|| context.steps.last_for(phase).cloned())
                    .flatten()
            })
            .await?;
        if let Some(step) = step {
            self.publish_step(step);
        }
        Ok(())
    }

    /// Attach a tool invocation and optional result to the most recent step of `phase`
    pub async fn attach_tool_call(
        &self,
        phase: Phase,
        invocation: String,
        result: Option<Value>,
    ) -> Result<(), Superseded> {
        let step = self
            .update(|context| {
                context
                    .steps
                    .attach_tool_call(phase, invocation, result)
                    .then(|| context.steps.last_for(phase).cloned())
                    .flatten()
            })
            .await?;
        if let Some(step) = step {
            self.publish_step(step);
        }
        Ok(())
    }

    /// Change the live tool status, if the run has a tool
    pub async fn update_tool(
        &self,
        f: impl FnOnce(&mut ToolExecutionStatus),
    ) -> Result<(), Superseded> {
        let status = self
            .update(|context| {
                context.current_tool.as_mut().map(|tool| {
                    f(tool);
                    tool.clone()
                })
            })
            .await?;
        if let Some(status) = status {
            self.publish(RunEvent::ToolStatus {
                conversation_id: self.conversation_id.clone(),
                run_id: self.run_id,
                status,
            });
        }
        Ok(())
    }

    fn publish_step(&self, step: Step) {
        self.publish(RunEvent::StepUpdated {
            conversation_id: self.conversation_id.clone(),
            run_id: self.run_id,
            step,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::tools::ToolStatus;

    fn context(run_id: u64) -> (RunContext, watch::Sender<bool>) {
        let (tx, rx) = watch::channel(false);
        let context = RunContext::new(
            RunId::from(run_id),
            "hello".to_string(),
            Attribution::default(),
            EntryHandle::from("entry-1"),
            CancellationToken::new(),
            rx,
        );
        (context, tx)
    }

    fn scope(arena: &RunArena, run_id: u64) -> RunScope {
        RunScope::new(
            arena.clone(),
            EventBus::default(),
            "conv-1".to_string(),
            RunId::from(run_id),
        )
    }

    #[test]
    fn test_run_ids_are_monotonic() {
        let generator = RunIdGenerator::default();
        let first = generator.next_id();
        let second = generator.next_id();
        assert_eq!(first, RunId::from(1));
        assert!(second > first);
    }

    #[test]
    fn test_finalize_claim_lifecycle() {
        let (mut ctx, _tx) = context(1);
        assert!(ctx.claim_finalization());
        assert!(!ctx.claim_finalization());
        assert!(!ctx.is_finalized());

        // A released claim can be taken again
        ctx.release_finalization();
        assert!(!ctx.finalize_claimed());
        assert!(ctx.claim_finalization());

        ctx.mark_finalized();
        assert!(ctx.is_finalized());
        assert!(!ctx.claim_finalization());
        assert!(ctx.snapshot("conv-1").finalized);
    }

    #[tokio::test]
    async fn test_scope_writes_to_active_run() {
        let arena = RunArena::new();
        let (ctx, _tx) = context(1);
        arena.install("conv-1", ctx).await;

        let scope = scope(&arena, 1);
        scope.begin_phase(Phase::Thinking, None).await.unwrap();
        scope
            .attach_response(Phase::Thinking, "noted".to_string())
            .await
            .unwrap();

        let snapshot = arena.snapshot("conv-1").await.unwrap();
        assert_eq!(snapshot.phase, Some(Phase::Thinking));
        assert_eq!(snapshot.steps.len(), 1);
        assert_eq!(snapshot.steps[0].response.as_deref(), Some("noted"));
    }

    #[tokio::test]
    async fn test_superseded_scope_drops_writes() {
        let arena = RunArena::new();
        let (old, _old_tx) = context(1);
        arena.install("conv-1", old).await;
        let stale = scope(&arena, 1);

        let (new, _new_tx) = context(2);
        let replaced = arena.install("conv-1", new).await;
        assert_eq!(replaced.map(|c| c.run_id), Some(RunId::from(1)));

        let result = stale.begin_phase(Phase::Thinking, None).await;
        assert!(result.is_err());
        let snapshot = arena.snapshot("conv-1").await.unwrap();
        assert_eq!(snapshot.run_id, RunId::from(2));
        assert!(snapshot.steps.is_empty());
    }

    #[tokio::test]
    async fn test_tool_only_labels_executing_step() {
        let arena = RunArena::new();
        let (ctx, _tx) = context(1);
        arena.install("conv-1", ctx).await;
        let scope = scope(&arena, 1);

        let tool = ToolExecutionStatus {
            tool_name: "web_service_action".to_string(),
            provider: "web_service".to_string(),
            status: ToolStatus::Executing,
            start_time: Utc::now(),
            end_time: None,
        };
        scope
            .begin_phase(Phase::ExecutingTool, Some(tool))
            .await
            .unwrap();
        scope
            .update_tool(|tool| tool.finish(ToolStatus::Completed))
            .await
            .unwrap();
        scope
            .begin_phase(Phase::ProcessingResults, None)
            .await
            .unwrap();

        let snapshot = arena.snapshot("conv-1").await.unwrap();
        assert_eq!(snapshot.steps[0].label, "Using web_service_action");
        assert_eq!(snapshot.steps[1].label, "Processing results");
        assert!(snapshot.steps[1].details.is_none());
        let tool = snapshot.current_tool.unwrap();
        assert_eq!(tool.status, ToolStatus::Completed);
        assert!(tool.end_time.is_some());
    }

    #[tokio::test]
    async fn test_clear_live_state_keeps_steps() {
        let arena = RunArena::new();
        let (ctx, _tx) = context(1);
        arena.install("conv-1", ctx).await;
        scope(&arena, 1)
            .begin_phase(Phase::Thinking, None)
            .await
            .unwrap();

        arena
            .with_run("conv-1", RunId::from(1), RunContext::clear_live_state)
            .await
            .unwrap();

        let snapshot = arena.snapshot("conv-1").await.unwrap();
        assert!(!snapshot.indicator_visible);
        assert!(snapshot.phase.is_none());
        assert!(snapshot.current_tool.is_none());
        assert!(snapshot.placeholder.is_none());
        assert_eq!(snapshot.steps.len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_fires_token() {
        let (mut ctx, _tx) = context(1);
        let token = ctx.cancel_token();
        ctx.cancel();
        assert!(token.is_cancelled());
    }
}
