//! Agent Console Backend Library
//!
//! Response-processing orchestrator for the agent console: runs a request
//! through visible processing phases, records every step, and finalizes the
//! result into the conversation.
//!
//! The main binary is in `src/main.rs`.

pub mod api;
/// Conversation entries and the store they live in
pub mod chat;
pub mod config;
pub mod error;
pub mod orchestrator;
