//! Orchestrator configuration
//!
//! Phase pacing, cleanup grace period and input limits. Runs take a snapshot
//! of the phase delays when they start, so delay updates only affect new
//! runs; the cleanup grace period is read when a run is finalized.

use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Upper bound for any configured delay (one minute)
pub const MAX_DELAY_MS: u64 = 60_000;

/// Dwell time of each phase, in milliseconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseDelays {
    /// Before the thinking note is attached
    pub thinking_ms: u64,
    /// Before the classification result is attached
    pub analyzing_tools_ms: u64,
    /// Simulated tool latency
    pub tool_execution_ms: u64,
    /// Before the result summary is attached
    pub processing_results_ms: u64,
    /// Before the response phase completes
    pub generating_response_ms: u64,
}

impl PhaseDelays {
    /// Thinking delay
    pub fn thinking(&self) -> Duration {
        Duration::from_millis(self.thinking_ms)
    }

    /// Tool analysis delay
    pub fn analyzing_tools(&self) -> Duration {
        Duration::from_millis(self.analyzing_tools_ms)
    }

    /// Tool execution delay
    pub fn tool_execution(&self) -> Duration {
        Duration::from_millis(self.tool_execution_ms)
    }

    /// Result processing delay
    pub fn processing_results(&self) -> Duration {
        Duration::from_millis(self.processing_results_ms)
    }

    /// Response generation delay
    pub fn generating_response(&self) -> Duration {
        Duration::from_millis(self.generating_response_ms)
    }
}

impl Default for PhaseDelays {
    fn default() -> Self {
        Self {
            thinking_ms: 1000,
            analyzing_tools_ms: 800,
            tool_execution_ms: 1500,
            processing_results_ms: 600,
            generating_response_ms: 500,
        }
    }
}

/// Orchestrator configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Per-phase pacing
    pub delays: PhaseDelays,
    /// Grace period after finalization before the live indicator resets
    pub cleanup_timeout_ms: u64,
    /// Maximum request length in characters
    pub max_input_length: usize,
}

impl OrchestratorConfig {
    /// Cleanup grace period
    pub fn cleanup_timeout(&self) -> Duration {
        Duration::from_millis(self.cleanup_timeout_ms)
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            delays: PhaseDelays::default(),
            cleanup_timeout_ms: 2000,
            max_input_length: 10_000, // 10KB
        }
    }
}

/// Request body for updating orchestrator configuration
#[derive(Debug, Default, Deserialize)]
pub struct ConfigUpdateRequest {
    /// Thinking delay (optional)
    pub thinking_ms: Option<u64>,
    /// Tool analysis delay (optional)
    pub analyzing_tools_ms: Option<u64>,
    /// Tool execution delay (optional)
    pub tool_execution_ms: Option<u64>,
    /// Result processing delay (optional)
    pub processing_results_ms: Option<u64>,
    /// Response generation delay (optional)
    pub generating_response_ms: Option<u64>,
    /// Cleanup grace period (optional)
    pub cleanup_timeout_ms: Option<u64>,
    /// Maximum request length (optional)
    pub max_input_length: Option<usize>,
}

/// Validate and apply configuration updates
///
/// The caller's config is only replaced when every field of the request is valid.
///
/// # Arguments
/// * `config` - The current config to update
/// * `request` - The update request with optional fields
///
/// # Returns
/// * `Ok(OrchestratorConfig)` - The updated configuration
/// * `Err(AppError::InvalidConfig)` - If validation fails
pub fn validate_and_apply_config_update(
    mut config: OrchestratorConfig,
    request: ConfigUpdateRequest,
) -> Result<OrchestratorConfig, AppError> {
    let delay_updates = [
        ("thinking_ms", request.thinking_ms, &mut config.delays.thinking_ms),
        (
            "analyzing_tools_ms",
            request.analyzing_tools_ms,
            &mut config.delays.analyzing_tools_ms,
        ),
        (
            "tool_execution_ms",
            request.tool_execution_ms,
            &mut config.delays.tool_execution_ms,
        ),
        (
            "processing_results_ms",
            request.processing_results_ms,
            &mut config.delays.processing_results_ms,
        ),
        (
            "generating_response_ms",
            request.generating_response_ms,
            &mut config.delays.generating_response_ms,
        ),
        (
            "cleanup_timeout_ms",
            request.cleanup_timeout_ms,
            &mut config.cleanup_timeout_ms,
        ),
    ];

    for (name, value, slot) in delay_updates {
        if let Some(value) = value {
            if value > MAX_DELAY_MS {
                return Err(AppError::InvalidConfig(format!(
                    "{} must be <= {} (got {})",
                    name, MAX_DELAY_MS, value
                )));
            }
            *slot = value;
        }
    }

    if let Some(max_input) = request.max_input_length {
        if max_input == 0 {
            return Err(AppError::InvalidConfig(
                "max_input_length must be > 0".to_string(),
            ));
        }
        config.max_input_length = max_input;
    }

    Ok(config)
}
