//! Tool bindings and execution
//!
//! Each category resolves to a provider, a tool name and an action from a
//! static lookup table. Requests and results are tagged unions keyed by the
//! action, so every action carries its own payload shape.
//!
//! Tool execution goes through the [`ToolExecutor`] trait. The only
//! implementation is [`SimulatedToolExecutor`], which synthesizes a
//! successful result without contacting anything.

use crate::orchestrator::classifier::{Category, CategoryKind};
use crate::orchestrator::utils::excerpt;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// Maximum number of results a simulated web search asks for
pub const SEARCH_MAX_RESULTS: u32 = 5;

/// Maximum length of generated subjects and titles
const TITLE_MAX_CHARS: usize = 60;

/// Lifecycle of a tool invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    /// Resolved but not started
    Pending,
    /// Running
    Executing,
    /// Finished successfully
    Completed,
    /// Finished with an error
    Failed,
}

/// Live status of the tool invocation of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolExecutionStatus {
    /// Tool being run ("email_service_action")
    pub tool_name: String,
    /// Provider of the tool ("email_service")
    pub provider: String,
    /// Current status
    pub status: ToolStatus,
    /// When execution started
    pub start_time: DateTime<Utc>,
    /// When execution ended, if it has
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}

impl ToolExecutionStatus {
    /// Status of a tool that starts executing now
    pub fn executing(binding: &ToolBinding) -> Self {
        Self {
            tool_name: binding.tool_name.clone(),
            provider: binding.provider.clone(),
            status: ToolStatus::Executing,
            start_time: Utc::now(),
            end_time: None,
        }
    }

    /// Mark the invocation finished with the given status
    pub fn finish(&mut self, status: ToolStatus) {
        self.status = status;
        self.end_time = Some(Utc::now());
    }
}

/// Action performed for a category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolAction {
    /// Send an email
    SendEmail,
    /// Run a web search
    WebSearch,
    /// Create a document
    CreateDocument,
    /// Any other category
    ExecuteAction,
}

impl ToolAction {
    /// Look up the action for a category
    pub fn for_category(kind: CategoryKind) -> Self {
        match kind {
            CategoryKind::Email => ToolAction::SendEmail,
            CategoryKind::Web => ToolAction::WebSearch,
            CategoryKind::Docs => ToolAction::CreateDocument,
            CategoryKind::Calendar | CategoryKind::Data => ToolAction::ExecuteAction,
        }
    }

    /// Wire name of the action
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolAction::SendEmail => "send_email",
            ToolAction::WebSearch => "web_search",
            ToolAction::CreateDocument => "create_document",
            ToolAction::ExecuteAction => "execute_action",
        }
    }
}

/// Tool selected for a category
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolBinding {
    /// Category that selected the tool
    pub category: Category,
    /// Provider name ("{category}_service")
    pub provider: String,
    /// Tool name ("{provider}_action")
    pub tool_name: String,
    /// Action the tool performs
    pub action: ToolAction,
}

impl ToolBinding {
    /// Resolve the tool for a category
    pub fn resolve(category: &Category) -> Self {
        let provider = format!("{}_service", category.id.id());
        Self {
            category: category.clone(),
            tool_name: format!("{}_action", provider),
            provider,
            action: ToolAction::for_category(category.id),
        }
    }
}

/// Request sent to a tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ToolRequest {
    /// Send an email
    SendEmail {
        /// Recipient guessed from the request, if any
        recipient: Option<String>,
        /// Subject line
        subject: String,
        /// Message body
        body: String,
    },
    /// Search the web
    WebSearch {
        /// Query text
        query: String,
        /// Maximum number of results
        max_results: u32,
    },
    /// Create a document
    CreateDocument {
        /// Document title
        title: String,
        /// Initial content
        content: String,
    },
    /// Generic action for categories without a dedicated tool
    ExecuteAction {
        /// Category being served
        category: CategoryKind,
        /// Instruction text
        instruction: String,
    },
}

impl ToolRequest {
    /// Build the request for a binding from the user's input
    pub fn synthesize(binding: &ToolBinding, input: &str) -> Self {
        let input = input.trim();
        match binding.action {
            ToolAction::SendEmail => ToolRequest::SendEmail {
                recipient: guess_recipient(input),
                subject: excerpt(input, TITLE_MAX_CHARS),
                body: input.to_string(),
            },
            ToolAction::WebSearch => ToolRequest::WebSearch {
                query: input.to_string(),
                max_results: SEARCH_MAX_RESULTS,
            },
            ToolAction::CreateDocument => ToolRequest::CreateDocument {
                title: excerpt(input, TITLE_MAX_CHARS),
                content: input.to_string(),
            },
            ToolAction::ExecuteAction => ToolRequest::ExecuteAction {
                category: binding.category.id,
                instruction: input.to_string(),
            },
        }
    }

    /// Action this request performs
    pub fn action(&self) -> ToolAction {
        match self {
            ToolRequest::SendEmail { .. } => ToolAction::SendEmail,
            ToolRequest::WebSearch { .. } => ToolAction::WebSearch,
            ToolRequest::CreateDocument { .. } => ToolAction::CreateDocument,
            ToolRequest::ExecuteAction { .. } => ToolAction::ExecuteAction,
        }
    }

    /// Serialized form recorded on the step
    pub fn invocation(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| self.action().as_str().to_string())
    }
}

/// Action-specific part of a tool result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ToolOutcome {
    /// Email was sent
    SendEmail {
        /// Identifier of the sent message
        message_id: String,
    },
    /// Search finished
    WebSearch {
        /// Number of results found
        result_count: u32,
    },
    /// Document was created
    CreateDocument {
        /// Identifier of the operation
        operation_id: String,
    },
    /// Generic action ran
    ExecuteAction {
        /// Identifier of the operation
        operation_id: String,
    },
}

/// Result of a tool invocation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolResult {
    /// Result status reported by the tool
    pub status: ToolStatus,
    /// Action-specific payload
    #[serde(flatten)]
    pub outcome: ToolOutcome,
    /// When the tool finished
    pub executed_at: DateTime<Utc>,
    /// Category the tool served
    pub category: CategoryKind,
}

impl ToolResult {
    /// JSON form recorded on the step
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// One-line, human-readable description of what the tool did
    pub fn summary_line(&self) -> String {
        match &self.outcome {
            ToolOutcome::SendEmail { message_id } => {
                format!("Email sent successfully (message id {}).", message_id)
            }
            ToolOutcome::WebSearch { result_count } => {
                format!("Web search completed with {} results.", result_count)
            }
            ToolOutcome::CreateDocument { operation_id } => {
                format!("Document created successfully (operation {}).", operation_id)
            }
            ToolOutcome::ExecuteAction { operation_id } => format!(
                "{} action completed successfully (operation {}).",
                self.category.label(),
                operation_id
            ),
        }
    }
}

/// Errors raised by a tool executor
#[derive(Error, Debug)]
pub enum ToolError {
    /// The provider cannot serve the request
    #[error("Tool {0} is not available")]
    Unavailable(String),

    /// The tool ran and failed
    #[error("Tool execution failed: {0}")]
    ExecutionFailed(String),
}

/// Runs a tool for a run
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Execute `request` with the tool selected by `binding`
    async fn execute(
        &self,
        binding: &ToolBinding,
        request: &ToolRequest,
    ) -> Result<ToolResult, ToolError>;
}

/// Executor that fabricates a successful result for every request
///
/// Tool latency is simulated by the sequencer's configured delay, not here.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimulatedToolExecutor;

#[async_trait]
impl ToolExecutor for SimulatedToolExecutor {
    async fn execute(
        &self,
        binding: &ToolBinding,
        request: &ToolRequest,
    ) -> Result<ToolResult, ToolError> {
        let outcome = match request {
            ToolRequest::SendEmail { .. } => ToolOutcome::SendEmail {
                message_id: synthetic_id("msg"),
            },
            ToolRequest::WebSearch { max_results, .. } => ToolOutcome::WebSearch {
                result_count: *max_results,
            },
            ToolRequest::CreateDocument { .. } => ToolOutcome::CreateDocument {
                operation_id: synthetic_id("op"),
            },
            ToolRequest::ExecuteAction { .. } => ToolOutcome::ExecuteAction {
                operation_id: synthetic_id("op"),
            },
        };

        tracing::debug!(
            tool_name = %binding.tool_name,
            action = request.action().as_str(),
            "Simulated tool execution"
        );

        Ok(ToolResult {
            status: ToolStatus::Completed,
            outcome,
            executed_at: Utc::now(),
            category: binding.category.id,
        })
    }
}

fn synthetic_id(prefix: &str) -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("{}_{}", prefix, &id[..12])
}

/// Pick a capitalized name directly after "email", "mail", "message" or "to"
fn guess_recipient(input: &str) -> Option<String> {
    let words: Vec<&str> = input.split_whitespace().collect();
    words.windows(2).find_map(|pair| {
        let marker = pair[0].to_lowercase();
        let candidate = pair[1].trim_matches(|c: char| !c.is_alphanumeric());
        let is_marker = matches!(marker.as_str(), "email" | "e-mail" | "mail" | "message" | "to");
        let is_name = candidate
            .chars()
            .next()
            .map(char::is_uppercase)
            .unwrap_or(false);
        (is_marker && is_name).then(|| candidate.to_string())
    })
}
