//! API utility functions
//!
//! Shared router state and request-body helpers used by the handlers.

use crate::error::AppError;
use crate::orchestrator::{FinalizeOutcome, RunManager};
use std::sync::Arc;

/// State shared by every handler
pub type RouterState = Arc<RunManager>;

/// Resolve the finalize body fields into an outcome
///
/// # Arguments
/// * `success` - Flag outcome, if the caller sent one
/// * `content` - Reply text, if the caller sent one
///
/// # Returns
/// * `Ok(FinalizeOutcome)` - Exactly one field was present
/// * `Err(AppError::InvalidRequest)` - Both or neither were present
pub fn resolve_outcome(
    success: Option<bool>,
    content: Option<String>,
) -> Result<FinalizeOutcome, AppError> {
    match (success, content) {
        (Some(success), None) => Ok(FinalizeOutcome::Flag { success }),
        (None, Some(content)) => Ok(FinalizeOutcome::Response { content }),
        (Some(_), Some(_)) => Err(AppError::InvalidRequest(
            "Send either success or content, not both".to_string(),
        )),
        (None, None) => Err(AppError::InvalidRequest(
            "Either success or content is required".to_string(),
        )),
    }
}
