//! Orchestrator configuration handlers

use crate::api::utils::RouterState;
use crate::error::AppError;
use crate::orchestrator::{ConfigUpdateRequest, OrchestratorConfig};
use axum::{extract::State, response::Json};

/// GET /api/config - Current orchestrator configuration
pub async fn get_config(State(manager): State<RouterState>) -> Json<OrchestratorConfig> {
    Json(manager.config().await)
}

/// POST /api/config - Update orchestrator configuration
///
/// Only fields present in the body change. Runs already in progress keep
/// the delays they started with.
pub async fn update_config(
    State(manager): State<RouterState>,
    Json(request): Json<ConfigUpdateRequest>,
) -> Result<Json<OrchestratorConfig>, AppError> {
    Ok(Json(manager.update_config(request).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::InMemoryConversationStore;
    use crate::orchestrator::RunManager;
    use std::sync::Arc;

    fn create_test_state() -> RouterState {
        Arc::new(RunManager::with_simulated_tools(
            OrchestratorConfig::default(),
            Arc::new(InMemoryConversationStore::new()),
        ))
    }

    #[tokio::test]
    async fn test_get_and_update_config() {
        let state = create_test_state();

        let Json(config) = get_config(State(state.clone())).await;
        assert_eq!(config, OrchestratorConfig::default());

        let Json(updated) = update_config(
            State(state.clone()),
            Json(ConfigUpdateRequest {
                generating_response_ms: Some(50),
                ..Default::default()
            }),
        )
        .await
        .unwrap();
        assert_eq!(updated.delays.generating_response_ms, 50);

        let Json(config) = get_config(State(state)).await;
        assert_eq!(config.delays.generating_response_ms, 50);
    }

    #[tokio::test]
    async fn test_update_config_rejects_invalid() {
        let state = create_test_state();
        let result = update_config(
            State(state),
            Json(ConfigUpdateRequest {
                cleanup_timeout_ms: Some(120_000),
                ..Default::default()
            }),
        )
        .await;
        match result {
            Err(AppError::InvalidConfig(_)) => {}
            other => panic!("Expected InvalidConfig error, got: {:?}", other),
        }
    }
}
