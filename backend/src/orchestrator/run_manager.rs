//! Run manager
//!
//! Entry point of the orchestrator. Starts runs (placeholder, context,
//! sequencer task), finalizes them through the [`MessageSynchronizer`],
//! schedules cleanup, and supersedes or tears down runs when a conversation
//! moves on.

use crate::chat::{Attribution, ConversationEntry, ConversationStore, EntryHandle, ProcessSummary};
use crate::error::AppError;
use crate::orchestrator::config::{
    validate_and_apply_config_update, ConfigUpdateRequest, OrchestratorConfig,
};
use crate::orchestrator::events::{EventBus, RunEvent};
use crate::orchestrator::run_context::{
    RunArena, RunContext, RunId, RunIdGenerator, RunScope, RunSnapshot,
};
use crate::orchestrator::sequencer::{PhaseSequencer, SequenceError};
use crate::orchestrator::synchronizer::{FinalizeOutcome, FinalizeReport, MessageSynchronizer};
use crate::orchestrator::tools::{SimulatedToolExecutor, ToolExecutor};
use crate::orchestrator::utils::{hash_input, validate_input};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Request to start a run
#[derive(Debug, Clone, Deserialize)]
pub struct StartRunRequest {
    /// Request text
    pub input: String,
    /// Ids stamped on the entries the run produces
    #[serde(flatten)]
    pub attribution: Attribution,
}

impl StartRunRequest {
    /// Request without attribution
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            attribution: Attribution::default(),
        }
    }
}

/// Returned when a run starts
#[derive(Debug, Clone, Serialize)]
pub struct RunTicket {
    /// Conversation of the run
    pub conversation_id: String,
    /// New run
    pub run_id: RunId,
    /// Placeholder entry inserted for the run
    pub placeholder: EntryHandle,
}

/// Orchestrates runs across conversations
pub struct RunManager {
    config: RwLock<OrchestratorConfig>,
    synchronizer: MessageSynchronizer,
    executor: Arc<dyn ToolExecutor>,
    arena: RunArena,
    events: EventBus,
    run_ids: RunIdGenerator,
    shutdown: CancellationToken,
}

impl RunManager {
    /// Create a manager over `store`, running tools with `executor`
    pub fn new(
        config: OrchestratorConfig,
        store: Arc<dyn ConversationStore>,
        executor: Arc<dyn ToolExecutor>,
    ) -> Self {
        Self {
            config: RwLock::new(config),
            synchronizer: MessageSynchronizer::new(store),
            executor,
            arena: RunArena::new(),
            events: EventBus::default(),
            run_ids: RunIdGenerator::default(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Create a manager with the simulated tool executor
    pub fn with_simulated_tools(
        config: OrchestratorConfig,
        store: Arc<dyn ConversationStore>,
    ) -> Self {
        Self::new(config, store, Arc::new(SimulatedToolExecutor))
    }

    /// Current configuration
    pub async fn config(&self) -> OrchestratorConfig {
        self.config.read().await.clone()
    }

    /// Validate and apply a configuration update
    pub async fn update_config(
        &self,
        request: ConfigUpdateRequest,
    ) -> Result<OrchestratorConfig, AppError> {
        let mut config = self.config.write().await;
        let updated = validate_and_apply_config_update(config.clone(), request)?;
        *config = updated.clone();
        info!(config = ?updated, "Orchestrator configuration updated");
        Ok(updated)
    }

    /// Conversation store runs write to
    pub fn store(&self) -> Arc<dyn ConversationStore> {
        self.synchronizer.store()
    }

    /// Entries of a conversation
    pub async fn entries(&self, conversation_id: &str) -> Result<Vec<ConversationEntry>, AppError> {
        Ok(self.store().entries(conversation_id).await?)
    }

    /// Subscribe to run events of every conversation
    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.events.subscribe()
    }

    /// Start a run for `conversation_id`, superseding any run it already has
    ///
    /// Inserts the placeholder, installs a fresh run context and spawns the
    /// phase sequence. Returns as soon as the sequence is scheduled.
    pub async fn start_run(
        &self,
        conversation_id: &str,
        request: StartRunRequest,
    ) -> Result<RunTicket, AppError> {
        let config = self.config().await;
        validate_input(&request.input, config.max_input_length)?;

        let run_id = self.run_ids.next_id();
        let placeholder = self
            .synchronizer
            .insert_placeholder(conversation_id, &request.attribution, run_id)
            .await?;

        let cancel = self.shutdown.child_token();
        let (sequenced_tx, sequenced_rx) = watch::channel(false);
        let context = RunContext::new(
            run_id,
            request.input.clone(),
            request.attribution,
            placeholder.clone(),
            cancel.clone(),
            sequenced_rx,
        );

        if let Some(previous) = self.arena.install(conversation_id, context).await {
            self.supersede(conversation_id, previous, Some(run_id)).await;
        }

        info!(
            conversation_id = %conversation_id,
            run_id = %run_id,
            input_hash = %hash_input(&request.input),
            "Run started"
        );
        self.events.publish(RunEvent::RunStarted {
            conversation_id: conversation_id.to_string(),
            run_id,
            placeholder: placeholder.clone(),
        });

        let scope = RunScope::new(
            self.arena.clone(),
            self.events.clone(),
            conversation_id.to_string(),
            run_id,
        );
        let executor = Arc::clone(&self.executor);
        let delays = config.delays;
        let input = request.input;
        let handle = tokio::spawn(async move {
            let sequencer = PhaseSequencer::new(&scope, &delays, executor.as_ref(), &cancel);
            match sequencer.run(&input).await {
                Ok(outcome) => {
                    debug!(
                        conversation_id = %scope.conversation_id(),
                        run_id = %scope.run_id(),
                        categories = outcome.categories.len(),
                        tool_failed = outcome.failure.is_some(),
                        "Phase sequence finished"
                    );
                    let _ = sequenced_tx.send(true);
                }
                Err(SequenceError::Cancelled) => {
                    debug!(
                        conversation_id = %scope.conversation_id(),
                        run_id = %scope.run_id(),
                        "Phase sequence cancelled"
                    );
                }
                Err(SequenceError::Superseded(e)) => {
                    debug!(error = %e, "Phase sequence stopped by a newer run");
                }
            }
        });

        let abort = handle.abort_handle();
        let attached = self
            .arena
            .with_run(conversation_id, run_id, |context| {
                context.set_sequencer_task(handle)
            })
            .await;
        if attached.is_none() {
            // Replaced before the task was attached
            abort.abort();
        }

        Ok(RunTicket {
            conversation_id: conversation_id.to_string(),
            run_id,
            placeholder,
        })
    }

    /// Wait until the phase sequence of a run has finished
    ///
    /// Fails with `RunSuperseded` if the run stops being active first.
    pub async fn wait_for_sequencing(
        &self,
        conversation_id: &str,
        run_id: RunId,
    ) -> Result<(), AppError> {
        let superseded =
            || AppError::RunSuperseded(format!("run {} of {}", run_id, conversation_id));

        let mut sequenced = self
            .arena
            .with_run(conversation_id, run_id, |context| context.sequenced())
            .await
            .ok_or_else(superseded)?;

        sequenced
            .wait_for(|done| *done)
            .await
            .map(|_| ())
            .map_err(|_| superseded())
    }

    /// Finalize a conversation's run with `outcome`
    ///
    /// `run_id` defaults to the active run. Waits for the phase sequence to
    /// finish, completes every step, writes the result into the conversation
    /// and schedules cleanup of the live state.
    ///
    /// A finalize that fails to write, or is dropped before it does, leaves
    /// the run open so it can be finalized again.
    pub async fn finalize(
        &self,
        conversation_id: &str,
        run_id: Option<RunId>,
        outcome: FinalizeOutcome,
    ) -> Result<FinalizeReport, AppError> {
        let active = self
            .arena
            .active_run(conversation_id)
            .await
            .ok_or_else(|| AppError::RunNotFound(conversation_id.to_string()))?;
        let run_id = run_id.unwrap_or(active);
        if run_id != active {
            return Err(AppError::RunSuperseded(format!(
                "run {} of {} was replaced by run {}",
                run_id, conversation_id, active
            )));
        }

        let already_finalized =
            || AppError::RunAlreadyFinalized(format!("run {} of {}", run_id, conversation_id));
        let claimed = self
            .arena
            .with_run(conversation_id, run_id, |context| context.finalize_claimed())
            .await;
        if claimed == Some(true) {
            return Err(already_finalized());
        }

        // Claimed only after the wait; an abandoned wait leaves the run open
        self.wait_for_sequencing(conversation_id, run_id).await?;

        let (steps, placeholder, attribution, phase) = self
            .arena
            .with_run(conversation_id, run_id, |context| {
                if !context.claim_finalization() {
                    return None;
                }
                context.steps.complete_all();
                let phase = outcome.terminal_phase(context.failure.is_some());
                context.phase = Some(phase);
                Some((
                    context.steps.snapshot(),
                    context.placeholder.clone(),
                    context.attribution.clone(),
                    phase,
                ))
            })
            .await
            .ok_or_else(|| {
                AppError::RunSuperseded(format!("run {} of {}", run_id, conversation_id))
            })?
            .ok_or_else(already_finalized)?;
        let claim = FinalizeClaim::new(self.arena.clone(), conversation_id, run_id);

        let summary = ProcessSummary::from_steps(steps, Utc::now());
        let result = match self
            .synchronizer
            .finalize(
                conversation_id,
                placeholder.as_ref(),
                summary,
                &outcome,
                &attribution,
                run_id,
            )
            .await
        {
            Ok(result) => result,
            Err(e) => {
                warn!(
                    conversation_id = %conversation_id,
                    run_id = %run_id,
                    error = %e,
                    "Finalize write failed, run left open for retry"
                );
                claim.release().await;
                return Err(e.into());
            }
        };
        claim.complete().await;

        info!(
            conversation_id = %conversation_id,
            run_id = %run_id,
            phase = %phase,
            appended = result.appended,
            "Run finalized"
        );
        self.events.publish(RunEvent::PhaseChanged {
            conversation_id: conversation_id.to_string(),
            run_id,
            phase,
        });
        self.events.publish(RunEvent::RunFinalized {
            conversation_id: conversation_id.to_string(),
            run_id,
            phase,
            entry_id: result.entry.as_ref().map(|entry| entry.id.clone()),
            appended: result.appended,
        });

        let cleanup_timeout = self.config.read().await.cleanup_timeout();
        self.schedule_cleanup(conversation_id, run_id, cleanup_timeout)
            .await;

        Ok(FinalizeReport {
            conversation_id: conversation_id.to_string(),
            run_id,
            phase,
            entry: result.entry,
            appended: result.appended,
        })
    }

    /// Start a run and finalize it with `outcome` once its sequence finishes
    pub async fn process(
        &self,
        conversation_id: &str,
        request: StartRunRequest,
        outcome: FinalizeOutcome,
    ) -> Result<FinalizeReport, AppError> {
        let ticket = self.start_run(conversation_id, request).await?;
        self.finalize(conversation_id, Some(ticket.run_id), outcome)
            .await
    }

    /// Snapshot of a conversation's run
    pub async fn snapshot(&self, conversation_id: &str) -> Result<RunSnapshot, AppError> {
        self.arena
            .snapshot(conversation_id)
            .await
            .ok_or_else(|| AppError::RunNotFound(conversation_id.to_string()))
    }

    /// Stop and forget a conversation's run
    pub async fn teardown(&self, conversation_id: &str) -> Result<RunId, AppError> {
        let context = self
            .arena
            .remove(conversation_id)
            .await
            .ok_or_else(|| AppError::RunNotFound(conversation_id.to_string()))?;
        let run_id = context.run_id;
        self.supersede(conversation_id, context, None).await;
        Ok(run_id)
    }

    /// Cancel every run; called on server shutdown
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let runs = self.arena.drain().await;
        let count = runs.len();
        for (_, mut context) in runs {
            context.cancel();
        }
        info!(runs = count, "Run manager shut down");
    }

    /// Stop a run that is no longer active
    ///
    /// A placeholder whose result was never written is closed so the
    /// conversation is not left with a pending entry.
    async fn supersede(
        &self,
        conversation_id: &str,
        mut previous: RunContext,
        superseded_by: Option<RunId>,
    ) {
        previous.cancel();
        warn!(
            conversation_id = %conversation_id,
            run_id = %previous.run_id,
            superseded_by = ?superseded_by,
            "Run superseded"
        );

        if !previous.is_finalized() {
            if let Some(placeholder) = &previous.placeholder {
                if let Err(e) = self
                    .synchronizer
                    .retire_placeholder(conversation_id, placeholder)
                    .await
                {
                    warn!(
                        conversation_id = %conversation_id,
                        run_id = %previous.run_id,
                        error = %e,
                        "Failed to retire placeholder"
                    );
                }
            }
        }

        self.events.publish(RunEvent::RunSuperseded {
            conversation_id: conversation_id.to_string(),
            run_id: previous.run_id,
            superseded_by,
        });
    }

    /// Reset the live state of a run after `delay`, unless it is superseded first
    async fn schedule_cleanup(&self, conversation_id: &str, run_id: RunId, delay: Duration) {
        let Some(cancel) = self
            .arena
            .with_run(conversation_id, run_id, |context| context.cancel_token())
            .await
        else {
            return;
        };

        let arena = self.arena.clone();
        let events = self.events.clone();
        let conversation = conversation_id.to_string();
        let handle = tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }

            let cleared = arena
                .with_run(&conversation, run_id, RunContext::clear_live_state)
                .await;
            if cleared.is_some() {
                info!(conversation_id = %conversation, run_id = %run_id, "Run cleaned up");
                events.publish(RunEvent::RunCleared {
                    conversation_id: conversation,
                    run_id,
                });
            } else {
                debug!(
                    conversation_id = %conversation,
                    run_id = %run_id,
                    "Skipping cleanup of superseded run"
                );
            }
        });

        let abort = handle.abort_handle();
        let attached = self
            .arena
            .with_run(conversation_id, run_id, |context| {
                context.set_cleanup_task(handle)
            })
            .await;
        if attached.is_none() {
            abort.abort();
        }
    }
}

/// Finalize claim held while the result is written
///
/// Dropped without [`FinalizeClaim::complete`], the claim is released so a
/// later finalize can retry.
struct FinalizeClaim {
    arena: RunArena,
    conversation_id: String,
    run_id: RunId,
    armed: bool,
}

impl FinalizeClaim {
    fn new(arena: RunArena, conversation_id: &str, run_id: RunId) -> Self {
        Self {
            arena,
            conversation_id: conversation_id.to_string(),
            run_id,
            armed: true,
        }
    }

    async fn complete(mut self) {
        self.armed = false;
        self.arena
            .with_run(&self.conversation_id, self.run_id, RunContext::mark_finalized)
            .await;
    }

    async fn release(mut self) {
        self.armed = false;
        self.arena
            .with_run(
                &self.conversation_id,
                self.run_id,
                RunContext::release_finalization,
            )
            .await;
    }
}

impl Drop for FinalizeClaim {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let arena = self.arena.clone();
        let conversation_id = std::mem::take(&mut self.conversation_id);
        let run_id = self.run_id;
        debug!(conversation_id = %conversation_id, run_id = %run_id, "Releasing abandoned finalize");
        runtime.spawn(async move {
            arena
                .with_run(&conversation_id, run_id, RunContext::release_finalization)
                .await;
        });
    }
}
