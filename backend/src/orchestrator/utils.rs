//! Orchestrator utility functions
//!
//! Input validation, hashing for log correlation, and text helpers.

use crate::error::AppError;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Compute a short hash for request text
///
/// Returns an 8-character hexadecimal hash so runs can be correlated in logs
/// without writing the request itself.
pub fn hash_input(input: &str) -> String {
    let mut hasher = DefaultHasher::new();
    input.hash(&mut hasher);
    format!("{:016x}", hasher.finish())[..8].to_string()
}

/// Validate request text before a run starts
///
/// # Arguments
/// * `input` - Request text
/// * `max_length` - Maximum length in characters
///
/// # Returns
/// * `Ok(())` - Input is usable
/// * `Err(AppError::InvalidRequest)` - Input is empty or too long
pub fn validate_input(input: &str, max_length: usize) -> Result<(), AppError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(AppError::InvalidRequest(
            "Input cannot be empty".to_string(),
        ));
    }
    let length = trimmed.chars().count();
    if length > max_length {
        return Err(AppError::InvalidRequest(format!(
            "Input too long ({} > {} characters)",
            length, max_length
        )));
    }
    Ok(())
}

/// Shorten text to at most `max_chars` characters, ending in "..." when cut
pub fn excerpt(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let kept: String = trimmed.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{}...", kept.trim_end())
}
