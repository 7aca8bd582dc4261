//! Conversation entry models
//!
//! Defines the entries the orchestrator writes into a conversation: the
//! provisional "thinking" placeholder shown while a run is in flight and the
//! finalized entry carrying the run's process summary.

use crate::orchestrator::run_context::RunId;
use crate::orchestrator::steps::Step;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Content shown in a placeholder entry while the run is in progress
pub const PLACEHOLDER_CONTENT: &str = "Thinking...";

/// Role of a conversation entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryRole {
    /// Entry written by the user
    User,
    /// Finalized reply from the assistant
    Assistant,
    /// Provisional entry for a run that is still processing
    Thinking,
}

impl EntryRole {
    /// Convert the role to its string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryRole::User => "user",
            EntryRole::Assistant => "assistant",
            EntryRole::Thinking => "thinking",
        }
    }
}

/// Handle identifying one entry inside a conversation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryHandle(String);

impl EntryHandle {
    /// Generate a fresh, unique handle
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Borrow the handle as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EntryHandle {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for EntryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who a run was performed for
///
/// Stamped onto produced entries only; never consulted for control flow.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribution {
    /// Agent answering the request
    #[serde(default)]
    pub agent_id: Option<String>,
    /// User who made the request
    #[serde(default)]
    pub user_id: Option<String>,
}

/// Completion and attribution metadata of an entry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryMetadata {
    /// Whether the entry is final (false only for a live placeholder)
    pub is_completed: bool,
    /// Agent the entry is attributed to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    /// User the entry is attributed to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Run that produced the entry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<RunId>,
}

impl EntryMetadata {
    fn for_run(attribution: &Attribution, run_id: RunId, is_completed: bool) -> Self {
        Self {
            is_completed,
            agent_id: attribution.agent_id.clone(),
            user_id: attribution.user_id.clone(),
            run_id: Some(run_id),
        }
    }
}

/// Record of the processing pipeline attached to a finalized entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessSummary {
    /// Snapshot of every step of the run, all completed
    pub steps: Vec<Step>,
    /// Milliseconds between the first step starting and finalization
    pub total_duration_ms: i64,
    /// Provider details of every step that used a tool
    pub tools_used: Vec<String>,
    /// When the run was finalized
    pub finalized_at: DateTime<Utc>,
}

impl ProcessSummary {
    /// Build a summary from a step snapshot taken at `finalized_at`
    ///
    /// The duration is measured from the first step's start time and never
    /// goes negative, even if the wall clock stepped backwards.
    pub fn from_steps(steps: Vec<Step>, finalized_at: DateTime<Utc>) -> Self {
        let total_duration_ms = steps
            .first()
            .map(|first| (finalized_at - first.start_time).num_milliseconds().max(0))
            .unwrap_or(0);
        let tools_used = steps
            .iter()
            .filter_map(|step| step.details.clone())
            .collect();

        Self {
            steps,
            total_duration_ms,
            tools_used,
            finalized_at,
        }
    }
}

/// A single entry in a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationEntry {
    /// Unique handle of the entry
    pub id: EntryHandle,
    /// Role of the entry
    pub role: EntryRole,
    /// Text content
    pub content: String,
    /// When the entry was created
    pub timestamp: DateTime<Utc>,
    /// Completion and attribution metadata
    pub metadata: EntryMetadata,
    /// Processing record, present once a run has been finalized into it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_summary: Option<ProcessSummary>,
}

impl ConversationEntry {
    /// Create a completed entry with the given role and content
    pub fn new(role: EntryRole, content: String) -> Self {
        Self {
            id: EntryHandle::generate(),
            role,
            content,
            timestamp: Utc::now(),
            metadata: EntryMetadata {
                is_completed: true,
                ..Default::default()
            },
            process_summary: None,
        }
    }

    /// Create the provisional "thinking" entry for a run
    pub fn placeholder(attribution: &Attribution, run_id: RunId) -> Self {
        Self {
            id: EntryHandle::generate(),
            role: EntryRole::Thinking,
            content: PLACEHOLDER_CONTENT.to_string(),
            timestamp: Utc::now(),
            metadata: EntryMetadata::for_run(attribution, run_id, false),
            process_summary: None,
        }
    }

    /// Create a finalized assistant entry, used when no placeholder is left to rewrite
    pub fn assistant_reply(
        content: String,
        attribution: &Attribution,
        run_id: RunId,
        summary: ProcessSummary,
    ) -> Self {
        Self {
            id: EntryHandle::generate(),
            role: EntryRole::Assistant,
            content,
            timestamp: Utc::now(),
            metadata: EntryMetadata::for_run(attribution, run_id, true),
            process_summary: Some(summary),
        }
    }

    /// Whether this entry is a placeholder that has not been finalized yet
    pub fn is_pending_placeholder(&self) -> bool {
        self.role == EntryRole::Thinking && !self.metadata.is_completed
    }
}
