//! Run API handlers
//!
//! Start, inspect, finalize and tear down the run of a conversation, and list
//! the conversation's entries.

use crate::api::utils::{resolve_outcome, RouterState};
use crate::chat::ConversationEntry;
use crate::error::AppError;
use crate::orchestrator::{FinalizeReport, RunId, RunSnapshot, RunTicket, StartRunRequest};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Finalize request
#[derive(Debug, Default, Deserialize)]
pub struct FinalizeRequest {
    /// Run to finalize (defaults to the active run)
    pub run_id: Option<RunId>,
    /// Flag outcome
    pub success: Option<bool>,
    /// Reply text
    pub content: Option<String>,
}

/// Teardown response
#[derive(Debug, Serialize)]
pub struct TeardownResponse {
    /// Conversation whose run was removed
    pub conversation_id: String,
    /// Removed run
    pub run_id: RunId,
}

/// Conversation entries response
#[derive(Debug, Serialize)]
pub struct EntriesResponse {
    /// Entries in insertion order
    pub entries: Vec<ConversationEntry>,
    /// Total number of entries
    pub count: usize,
}

/// POST /api/conversations/:id/runs - Start a run
pub async fn start_run(
    State(manager): State<RouterState>,
    Path(conversation_id): Path<String>,
    Json(request): Json<StartRunRequest>,
) -> Result<(StatusCode, Json<RunTicket>), AppError> {
    let ticket = manager.start_run(&conversation_id, request).await?;
    Ok((StatusCode::ACCEPTED, Json(ticket)))
}

/// GET /api/conversations/:id/runs/current - Snapshot of the active run
pub async fn current_run(
    State(manager): State<RouterState>,
    Path(conversation_id): Path<String>,
) -> Result<Json<RunSnapshot>, AppError> {
    Ok(Json(manager.snapshot(&conversation_id).await?))
}

/// POST /api/conversations/:id/runs/current/finalize - Finalize the active run
pub async fn finalize_run(
    State(manager): State<RouterState>,
    Path(conversation_id): Path<String>,
    Json(request): Json<FinalizeRequest>,
) -> Result<Json<FinalizeReport>, AppError> {
    let outcome = resolve_outcome(request.success, request.content)?;
    let report = manager
        .finalize(&conversation_id, request.run_id, outcome)
        .await?;
    Ok(Json(report))
}

/// DELETE /api/conversations/:id/runs/current - Stop and remove the active run
pub async fn teardown_run(
    State(manager): State<RouterState>,
    Path(conversation_id): Path<String>,
) -> Result<Json<TeardownResponse>, AppError> {
    let run_id = manager.teardown(&conversation_id).await?;
    info!(conversation_id = %conversation_id, run_id = %run_id, "Run torn down");
    Ok(Json(TeardownResponse {
        conversation_id,
        run_id,
    }))
}

/// GET /api/conversations/:id/entries - List conversation entries
pub async fn list_entries(
    State(manager): State<RouterState>,
    Path(conversation_id): Path<String>,
) -> Result<Json<EntriesResponse>, AppError> {
    let entries = manager.entries(&conversation_id).await?;
    Ok(Json(EntriesResponse {
        count: entries.len(),
        entries,
    }))
}
