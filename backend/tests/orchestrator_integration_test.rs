//! Integration tests for the response-processing flow
//!
//! These tests drive the run manager end to end:
//! 1. Run start and placeholder insertion
//! 2. Phase sequencing with and without a tool
//! 3. Finalization into the conversation (flag and reply)
//! 4. Supersession, cleanup and run events
//!
//! Timing tests run with paused tokio time, so phase delays elapse instantly.

use agent_console_backend::chat::{
    ConversationEntry, ConversationStore, EntryHandle, EntryRole, InMemoryConversationStore,
    StoreError,
};
use agent_console_backend::error::AppError;
use agent_console_backend::orchestrator::tools::{
    ToolBinding, ToolError, ToolExecutor, ToolRequest, ToolResult, ToolStatus,
};
use agent_console_backend::orchestrator::{
    FinalizeOutcome, OrchestratorConfig, Phase, RunEvent, RunManager, StartRunRequest,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn setup() -> (Arc<InMemoryConversationStore>, RunManager) {
    let store = Arc::new(InMemoryConversationStore::new());
    let manager = RunManager::with_simulated_tools(OrchestratorConfig::default(), store.clone());
    (store, manager)
}

fn reply(content: &str) -> FinalizeOutcome {
    FinalizeOutcome::Response {
        content: content.to_string(),
    }
}

/// Executor whose provider is always down
struct FailingExecutor;

#[async_trait]
impl ToolExecutor for FailingExecutor {
    async fn execute(
        &self,
        binding: &ToolBinding,
        _request: &ToolRequest,
    ) -> Result<ToolResult, ToolError> {
        Err(ToolError::ExecutionFailed(format!(
            "{} did not respond",
            binding.provider
        )))
    }
}

/// In-memory store whose next replace fails once when armed
#[derive(Default)]
struct FlakyStore {
    inner: InMemoryConversationStore,
    fail_next_replace: AtomicBool,
}

#[async_trait]
impl ConversationStore for FlakyStore {
    async fn append(
        &self,
        conversation_id: &str,
        entry: ConversationEntry,
    ) -> Result<EntryHandle, StoreError> {
        self.inner.append(conversation_id, entry).await
    }

    async fn replace(
        &self,
        conversation_id: &str,
        entry: ConversationEntry,
    ) -> Result<(), StoreError> {
        if self.fail_next_replace.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection reset".to_string()));
        }
        self.inner.replace(conversation_id, entry).await
    }

    async fn get(
        &self,
        conversation_id: &str,
        handle: &EntryHandle,
    ) -> Result<Option<ConversationEntry>, StoreError> {
        self.inner.get(conversation_id, handle).await
    }

    async fn entries(&self, conversation_id: &str) -> Result<Vec<ConversationEntry>, StoreError> {
        self.inner.entries(conversation_id).await
    }
}

/// Email request end to end: five phases, one tool, reply rewrites the placeholder
#[tokio::test(start_paused = true)]
async fn test_email_request_full_flow() {
    let (store, manager) = setup();
    store
        .append(
            "conv-1",
            ConversationEntry::new(
                EntryRole::User,
                "Please email John the quarterly report".to_string(),
            ),
        )
        .await
        .unwrap();

    let report = manager
        .process(
            "conv-1",
            StartRunRequest::new("Please email John the quarterly report"),
            reply("I've sent the quarterly report to John."),
        )
        .await
        .unwrap();

    assert_eq!(report.phase, Phase::Completed);
    assert!(!report.appended);

    let entries = store.entries("conv-1").await.unwrap();
    assert_eq!(entries.len(), 2);
    let entry = &entries[1];
    assert_eq!(entry.role, EntryRole::Assistant);
    assert_eq!(entry.content, "I've sent the quarterly report to John.");
    assert!(entry.metadata.is_completed);

    let summary = entry.process_summary.as_ref().unwrap();
    let phases: Vec<Phase> = summary.steps.iter().map(|step| step.phase).collect();
    assert_eq!(
        phases,
        vec![
            Phase::Thinking,
            Phase::AnalyzingTools,
            Phase::ExecutingTool,
            Phase::ProcessingResults,
            Phase::GeneratingResponse,
        ]
    );
    assert!(summary.steps.iter().all(|step| step.completed));
    assert_eq!(summary.tools_used, vec!["Using email_service".to_string()]);
    assert_eq!(summary.steps[2].label, "Using email_service_action");

    let snapshot = manager.snapshot("conv-1").await.unwrap();
    assert_eq!(snapshot.phase, Some(Phase::Completed));
    assert_eq!(snapshot.categories[0].label, "Communication");
    let tool = snapshot.current_tool.unwrap();
    assert_eq!(tool.tool_name, "email_service_action");
    assert_eq!(tool.provider, "email_service");
    assert_eq!(tool.status, ToolStatus::Completed);
}

#[tokio::test(start_paused = true)]
async fn test_request_without_keywords_skips_tool() {
    let (_, manager) = setup();
    let report = manager
        .process(
            "conv-1",
            StartRunRequest::new("How are you today?"),
            reply("Doing well!"),
        )
        .await
        .unwrap();

    let summary = report.entry.unwrap().process_summary.unwrap();
    assert_eq!(summary.steps.len(), 3);
    assert!(summary
        .steps
        .iter()
        .all(|step| step.phase != Phase::ExecutingTool && step.phase != Phase::ProcessingResults));
    assert!(summary.tools_used.is_empty());

    let snapshot = manager.snapshot("conv-1").await.unwrap();
    assert!(snapshot.categories.is_empty());
    assert!(snapshot.current_tool.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_reply_appends_when_placeholder_missing() {
    let (store, manager) = setup();
    let ticket = manager
        .start_run("conv-1", StartRunRequest::new("search for rust news"))
        .await
        .unwrap();
    assert!(store.remove("conv-1", &ticket.placeholder).await);

    let report = manager
        .finalize("conv-1", Some(ticket.run_id), reply("Here is the news."))
        .await
        .unwrap();

    assert!(report.appended);
    let entries = store.entries("conv-1").await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].role, EntryRole::Assistant);
    assert_eq!(entries[0].content, "Here is the news.");
    assert_eq!(entries[0].metadata.run_id, Some(ticket.run_id));
}

#[tokio::test(start_paused = true)]
async fn test_flag_failure_keeps_placeholder_text() {
    let (store, manager) = setup();
    let report = manager
        .process(
            "conv-1",
            StartRunRequest::new("draft a document"),
            FinalizeOutcome::Flag { success: false },
        )
        .await
        .unwrap();

    assert_eq!(report.phase, Phase::Failed);
    let entries = store.entries("conv-1").await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].role, EntryRole::Thinking);
    assert_eq!(entries[0].content, "Thinking...");
    assert!(entries[0].metadata.is_completed);
    assert!(entries[0].process_summary.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_duration_measured_from_first_step() {
    let (_, manager) = setup();
    let report = manager
        .process(
            "conv-1",
            StartRunRequest::new("chart the sales dataset"),
            reply("Chart ready."),
        )
        .await
        .unwrap();

    let summary = report.entry.unwrap().process_summary.unwrap();
    let expected = (summary.finalized_at - summary.steps[0].start_time).num_milliseconds();
    assert!(summary.total_duration_ms >= 0);
    assert_eq!(summary.total_duration_ms, expected.max(0));
}

#[tokio::test(start_paused = true)]
async fn test_new_run_supersedes_previous() {
    let (store, manager) = setup();
    let mut events = manager.subscribe();

    let first = manager
        .start_run("conv-1", StartRunRequest::new("email Alice"))
        .await
        .unwrap();
    let second = manager
        .start_run("conv-1", StartRunRequest::new("email Bob"))
        .await
        .unwrap();
    assert!(second.run_id > first.run_id);

    match manager
        .finalize("conv-1", Some(first.run_id), reply("stale"))
        .await
    {
        Err(AppError::RunSuperseded(_)) => {}
        other => panic!("Expected RunSuperseded, got: {:?}", other),
    }

    let report = manager
        .finalize("conv-1", Some(second.run_id), reply("Sent to Bob."))
        .await
        .unwrap();
    assert_eq!(report.entry.as_ref().unwrap().id, second.placeholder);

    let retired = store
        .get("conv-1", &first.placeholder)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(retired.role, EntryRole::Thinking);
    assert!(retired.metadata.is_completed);

    // Only the second run ever wrote steps
    let snapshot = manager.snapshot("conv-1").await.unwrap();
    assert_eq!(snapshot.run_id, second.run_id);
    assert_eq!(snapshot.steps.len(), 5);

    let mut superseded = None;
    while let Ok(event) = events.try_recv() {
        if let RunEvent::RunSuperseded {
            run_id,
            superseded_by,
            ..
        } = event
        {
            superseded = Some((run_id, superseded_by));
        }
    }
    assert_eq!(superseded, Some((first.run_id, Some(second.run_id))));
}

/// A run superseded while its finalize waits on the sequence leaves no pending entry
#[tokio::test(start_paused = true)]
async fn test_supersede_during_pending_finalize_retires_placeholder() {
    let (store, manager) = setup();
    let manager = Arc::new(manager);

    let first = manager
        .start_run("conv-1", StartRunRequest::new("email Alice"))
        .await
        .unwrap();
    let pending = {
        let manager = Arc::clone(&manager);
        let run_id = first.run_id;
        tokio::spawn(async move {
            manager
                .finalize("conv-1", Some(run_id), FinalizeOutcome::Flag { success: true })
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    let second = manager
        .start_run("conv-1", StartRunRequest::new("email Bob"))
        .await
        .unwrap();

    match pending.await.unwrap() {
        Err(AppError::RunSuperseded(_)) => {}
        other => panic!("Expected RunSuperseded, got: {:?}", other),
    }

    let retired = store
        .get("conv-1", &first.placeholder)
        .await
        .unwrap()
        .unwrap();
    assert!(!retired.is_pending_placeholder());

    let pending: Vec<_> = store
        .entries("conv-1")
        .await
        .unwrap()
        .into_iter()
        .filter(|entry| entry.is_pending_placeholder())
        .map(|entry| entry.id)
        .collect();
    assert_eq!(pending, vec![second.placeholder]);
}

#[tokio::test(start_paused = true)]
async fn test_finalize_retry_after_timeout() {
    let (store, manager) = setup();
    let ticket = manager
        .start_run("conv-1", StartRunRequest::new("email the team"))
        .await
        .unwrap();

    let timed_out = tokio::time::timeout(
        Duration::from_millis(100),
        manager.finalize("conv-1", None, FinalizeOutcome::Flag { success: true }),
    )
    .await;
    assert!(timed_out.is_err());

    tokio::time::sleep(Duration::from_secs(10)).await;
    let report = manager
        .finalize("conv-1", None, reply("hi"))
        .await
        .unwrap();
    assert_eq!(report.run_id, ticket.run_id);

    let entry = store
        .get("conv-1", &ticket.placeholder)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.role, EntryRole::Assistant);
    assert_eq!(entry.content, "hi");
}

#[tokio::test(start_paused = true)]
async fn test_finalize_retry_after_store_failure() {
    let store = Arc::new(FlakyStore::default());
    let manager = RunManager::with_simulated_tools(OrchestratorConfig::default(), store.clone());
    let ticket = manager
        .start_run("conv-1", StartRunRequest::new("draft a document"))
        .await
        .unwrap();

    store.fail_next_replace.store(true, Ordering::SeqCst);
    match manager.finalize("conv-1", None, reply("Draft ready.")).await {
        Err(AppError::Store(StoreError::Unavailable(reason))) => {
            assert_eq!(reason, "connection reset")
        }
        other => panic!("Expected Store(Unavailable), got: {:?}", other),
    }
    assert!(!manager.snapshot("conv-1").await.unwrap().finalized);

    let report = manager
        .finalize("conv-1", None, reply("Draft ready."))
        .await
        .unwrap();
    assert!(!report.appended);
    assert!(manager.snapshot("conv-1").await.unwrap().finalized);

    let entry = store
        .get("conv-1", &ticket.placeholder)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.content, "Draft ready.");
    assert!(entry.metadata.is_completed);
}

#[tokio::test(start_paused = true)]
async fn test_cleanup_resets_live_state_only() {
    let (_, manager) = setup();
    manager
        .process(
            "conv-1",
            StartRunRequest::new("schedule a meeting with Sam"),
            reply("Booked."),
        )
        .await
        .unwrap();

    let before = manager.snapshot("conv-1").await.unwrap();
    assert!(before.indicator_visible);
    assert!(before.current_tool.is_some());

    tokio::time::sleep(Duration::from_millis(2_001)).await;

    let after = manager.snapshot("conv-1").await.unwrap();
    assert!(!after.indicator_visible);
    assert!(after.phase.is_none());
    assert!(after.current_tool.is_none());
    assert!(after.placeholder.is_none());
    assert_eq!(after.steps, before.steps);
    assert!(after.finalized);
}

#[tokio::test(start_paused = true)]
async fn test_superseded_cleanup_does_not_touch_new_run() {
    let (_, manager) = setup();
    manager
        .process("conv-1", StartRunRequest::new("hello"), reply("hi"))
        .await
        .unwrap();

    let second = manager
        .start_run("conv-1", StartRunRequest::new("hello again"))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;
    let snapshot = manager.snapshot("conv-1").await.unwrap();
    assert_eq!(snapshot.run_id, second.run_id);
    assert!(snapshot.indicator_visible);
    assert_eq!(snapshot.placeholder, Some(second.placeholder.clone()));

    // Past the first run's cleanup deadline
    tokio::time::sleep(Duration::from_millis(2_500)).await;
    let snapshot = manager.snapshot("conv-1").await.unwrap();
    assert!(snapshot.indicator_visible);
    assert_eq!(snapshot.placeholder, Some(second.placeholder));
}

#[tokio::test(start_paused = true)]
async fn test_failing_tool_ends_in_failed() {
    let store = Arc::new(InMemoryConversationStore::new());
    let manager = RunManager::new(
        OrchestratorConfig::default(),
        store.clone(),
        Arc::new(FailingExecutor),
    );

    let report = manager
        .process(
            "conv-1",
            StartRunRequest::new("look up the weather online"),
            reply("Sorry, search is unavailable."),
        )
        .await
        .unwrap();

    assert_eq!(report.phase, Phase::Failed);
    let summary = report.entry.unwrap().process_summary.unwrap();
    let phases: Vec<Phase> = summary.steps.iter().map(|step| step.phase).collect();
    assert_eq!(
        phases,
        vec![Phase::Thinking, Phase::AnalyzingTools, Phase::ExecutingTool]
    );
    assert!(summary.steps.iter().all(|step| step.completed));

    let snapshot = manager.snapshot("conv-1").await.unwrap();
    assert_eq!(
        snapshot.failure.as_deref(),
        Some("Tool execution failed: web_service did not respond")
    );
    assert_eq!(snapshot.current_tool.unwrap().status, ToolStatus::Failed);
}

#[tokio::test(start_paused = true)]
async fn test_events_follow_run() {
    let (_, manager) = setup();
    let mut events = manager.subscribe();

    manager
        .process("conv-1", StartRunRequest::new("tell me a story"), reply("Once..."))
        .await
        .unwrap();

    let mut kinds = Vec::new();
    let mut phases = Vec::new();
    while let Ok(event) = events.try_recv() {
        assert_eq!(event.conversation_id(), "conv-1");
        match &event {
            RunEvent::RunStarted { .. } => kinds.push("started"),
            RunEvent::PhaseChanged { phase, .. } => phases.push(*phase),
            RunEvent::RunFinalized { appended, .. } => {
                assert!(!appended);
                kinds.push("finalized");
            }
            _ => {}
        }
    }

    assert_eq!(kinds, vec!["started", "finalized"]);
    assert_eq!(
        phases,
        vec![
            Phase::Thinking,
            Phase::AnalyzingTools,
            Phase::GeneratingResponse,
            Phase::Completed,
        ]
    );
}
