//! Message synchronizer
//!
//! Owns every conversation-store mutation a run makes: inserting the
//! placeholder when the run starts, finalizing it when the caller reports an
//! outcome, and retiring it when the run is abandoned.

use crate::chat::{
    Attribution, ConversationEntry, ConversationStore, EntryHandle, EntryRole, ProcessSummary,
    StoreError,
};
use crate::orchestrator::run_context::RunId;
use crate::orchestrator::steps::Phase;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, trace};

/// How the caller ends a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FinalizeOutcome {
    /// Mark the placeholder completed, keeping its role and content
    Flag {
        /// Whether processing succeeded
        success: bool,
    },
    /// Turn the placeholder into an assistant reply with `content`
    Response {
        /// Final reply text
        content: String,
    },
}

impl FinalizeOutcome {
    /// Terminal phase of a run ending with this outcome
    ///
    /// A tool failure always wins over the caller's outcome.
    pub fn terminal_phase(&self, tool_failed: bool) -> Phase {
        match self {
            _ if tool_failed => Phase::Failed,
            FinalizeOutcome::Flag { success: false } => Phase::Failed,
            FinalizeOutcome::Flag { success: true } | FinalizeOutcome::Response { .. } => {
                Phase::Completed
            }
        }
    }
}

/// What finalization did to the conversation
#[derive(Debug, Clone, Serialize)]
pub struct FinalizeReport {
    /// Conversation of the run
    pub conversation_id: String,
    /// Finalized run
    pub run_id: RunId,
    /// Terminal phase of the run
    pub phase: Phase,
    /// Entry holding the result, if one was written
    pub entry: Option<ConversationEntry>,
    /// Whether the entry was appended because no placeholder was left
    pub appended: bool,
}

/// Store changes made by one finalization
#[derive(Debug, Clone, Default)]
pub struct SyncResult {
    /// Entry that was written, if any
    pub entry: Option<ConversationEntry>,
    /// Whether a new entry was appended
    pub appended: bool,
}

/// Writes run results into conversations
#[derive(Clone)]
pub struct MessageSynchronizer {
    store: Arc<dyn ConversationStore>,
}

impl MessageSynchronizer {
    /// Create a synchronizer over `store`
    pub fn new(store: Arc<dyn ConversationStore>) -> Self {
        Self { store }
    }

    /// Store the synchronizer writes to
    pub fn store(&self) -> Arc<dyn ConversationStore> {
        Arc::clone(&self.store)
    }

    /// Append the provisional entry of a new run
    pub async fn insert_placeholder(
        &self,
        conversation_id: &str,
        attribution: &Attribution,
        run_id: RunId,
    ) -> Result<EntryHandle, StoreError> {
        let entry = ConversationEntry::placeholder(attribution, run_id);
        self.store.append(conversation_id, entry).await
    }

    /// Close the placeholder of an abandoned run so it is no longer pending
    ///
    /// Returns true if a pending placeholder was closed.
    pub async fn retire_placeholder(
        &self,
        conversation_id: &str,
        placeholder: &EntryHandle,
    ) -> Result<bool, StoreError> {
        match self.store.get(conversation_id, placeholder).await? {
            Some(mut entry) if entry.is_pending_placeholder() => {
                entry.metadata.is_completed = true;
                self.store.replace(conversation_id, entry).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Write the outcome of a run into its conversation
    ///
    /// # Arguments
    /// * `conversation_id` - Conversation of the run
    /// * `placeholder` - Placeholder the run inserted, if it still tracks one
    /// * `summary` - Completed step history of the run
    /// * `outcome` - How the caller ends the run
    /// * `attribution` - Ids stamped on an appended entry
    /// * `run_id` - Finalized run
    pub async fn finalize(
        &self,
        conversation_id: &str,
        placeholder: Option<&EntryHandle>,
        summary: ProcessSummary,
        outcome: &FinalizeOutcome,
        attribution: &Attribution,
        run_id: RunId,
    ) -> Result<SyncResult, StoreError> {
        match outcome {
            FinalizeOutcome::Flag { .. } => {
                self.finalize_flag(conversation_id, placeholder, summary)
                    .await
            }
            FinalizeOutcome::Response { content } => {
                self.finalize_response(conversation_id, content, summary, attribution, run_id)
                    .await
            }
        }
    }

    async fn finalize_flag(
        &self,
        conversation_id: &str,
        placeholder: Option<&EntryHandle>,
        summary: ProcessSummary,
    ) -> Result<SyncResult, StoreError> {
        let Some(handle) = placeholder else {
            trace!(conversation_id = %conversation_id, "No placeholder to flag");
            return Ok(SyncResult::default());
        };

        match self.store.get(conversation_id, handle).await? {
            Some(mut entry) if entry.role == EntryRole::Thinking => {
                entry.metadata.is_completed = true;
                entry.process_summary = Some(summary);
                self.store.replace(conversation_id, entry.clone()).await?;
                debug!(
                    conversation_id = %conversation_id,
                    entry_id = %entry.id,
                    "Flagged placeholder as completed"
                );
                Ok(SyncResult {
                    entry: Some(entry),
                    appended: false,
                })
            }
            _ => {
                trace!(
                    conversation_id = %conversation_id,
                    entry_id = %handle,
                    "Placeholder gone or already rewritten, nothing to flag"
                );
                Ok(SyncResult::default())
            }
        }
    }

    async fn finalize_response(
        &self,
        conversation_id: &str,
        content: &str,
        summary: ProcessSummary,
        attribution: &Attribution,
        run_id: RunId,
    ) -> Result<SyncResult, StoreError> {
        let entries = self.store.entries(conversation_id).await?;
        let pending = entries
            .into_iter()
            .rev()
            .find(ConversationEntry::is_pending_placeholder);

        match pending {
            Some(mut entry) => {
                entry.role = EntryRole::Assistant;
                entry.content = content.to_string();
                entry.metadata.is_completed = true;
                entry.process_summary = Some(summary);
                self.store.replace(conversation_id, entry.clone()).await?;
                debug!(
                    conversation_id = %conversation_id,
                    entry_id = %entry.id,
                    "Rewrote placeholder as assistant reply"
                );
                Ok(SyncResult {
                    entry: Some(entry),
                    appended: false,
                })
            }
            None => {
                let entry = ConversationEntry::assistant_reply(
                    content.to_string(),
                    attribution,
                    run_id,
                    summary,
                );
                self.store.append(conversation_id, entry.clone()).await?;
                debug!(
                    conversation_id = %conversation_id,
                    entry_id = %entry.id,
                    "No pending placeholder, appended assistant reply"
                );
                Ok(SyncResult {
                    entry: Some(entry),
                    appended: true,
                })
            }
        }
    }
}
