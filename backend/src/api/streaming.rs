//! Streaming utilities for Server-Sent Events (SSE)
//!
//! Streams the run events of one conversation as `data: {json}\n\n` frames.

use crate::api::utils::RouterState;
use crate::error::AppError;
use crate::orchestrator::RunEvent;
use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::Response,
};
use futures_util::{stream::Stream, StreamExt};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::warn;

/// GET /api/conversations/:id/events - Stream run events of a conversation
pub async fn stream_events(
    State(manager): State<RouterState>,
    Path(conversation_id): Path<String>,
) -> Result<Response, AppError> {
    create_sse_stream(manager.subscribe(), conversation_id)
}

/// Create an SSE response from a run event subscription
///
/// # Arguments
/// * `receiver` - Subscription to the event bus
/// * `conversation_id` - Only events of this conversation are forwarded
///
/// # Returns
/// * `Result<Response, AppError>` - SSE HTTP response or error
pub fn create_sse_stream(
    receiver: broadcast::Receiver<RunEvent>,
    conversation_id: String,
) -> Result<Response, AppError> {
    let sse_stream = conversation_events(receiver, conversation_id)
        .map(|data| Ok::<_, std::io::Error>(format!("data: {}\n\n", data)));

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .body(Body::from_stream(sse_stream))
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to build SSE response: {}", e)))
}

/// Serialized events of one conversation, ending when the bus closes
fn conversation_events(
    mut receiver: broadcast::Receiver<RunEvent>,
    conversation_id: String,
) -> impl Stream<Item = String> {
    use async_stream::stream;

    stream! {
        loop {
            match receiver.recv().await {
                Ok(event) if event.conversation_id() == conversation_id => {
                    match serde_json::to_string(&event) {
                        Ok(json) => yield json,
                        Err(e) => warn!(error = %e, "Failed to serialize run event"),
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(
                        conversation_id = %conversation_id,
                        skipped,
                        "Event stream lagged, events dropped"
                    );
                }
                Err(RecvError::Closed) => break,
            }
        }
    }
}
