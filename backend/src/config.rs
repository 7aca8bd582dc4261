//! Application configuration
//!
//! Centralized configuration management with environment variable support
//! and sensible defaults.

use crate::orchestrator::{OrchestratorConfig, PhaseDelays};
use std::env;
use std::str::FromStr;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Orchestrator configuration
    pub orchestrator: OrchestratorConfig,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to bind the server to
    pub port: u16,
    /// Host address to bind to
    pub host: String,
}

impl Config {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        let defaults = OrchestratorConfig::default();
        Self {
            server: ServerConfig {
                port: env_or("PORT", 8080),
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            },
            orchestrator: OrchestratorConfig {
                delays: PhaseDelays {
                    thinking_ms: env_or("THINKING_DELAY_MS", defaults.delays.thinking_ms),
                    analyzing_tools_ms: env_or(
                        "ANALYZING_TOOLS_DELAY_MS",
                        defaults.delays.analyzing_tools_ms,
                    ),
                    tool_execution_ms: env_or(
                        "TOOL_EXECUTION_DELAY_MS",
                        defaults.delays.tool_execution_ms,
                    ),
                    processing_results_ms: env_or(
                        "PROCESSING_RESULTS_DELAY_MS",
                        defaults.delays.processing_results_ms,
                    ),
                    generating_response_ms: env_or(
                        "GENERATING_RESPONSE_DELAY_MS",
                        defaults.delays.generating_response_ms,
                    ),
                },
                cleanup_timeout_ms: env_or("CLEANUP_TIMEOUT_MS", defaults.cleanup_timeout_ms),
                max_input_length: env_or("MAX_INPUT_LENGTH", defaults.max_input_length),
            },
        }
    }

    /// Get the server address as a string
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

/// Parse an environment variable, falling back to `default` when unset or invalid
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}
