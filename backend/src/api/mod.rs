//! API module
//!
//! Contains HTTP request handlers for runs, conversation entries, run event
//! streams and orchestrator configuration.

pub mod config;
pub mod runs;
pub mod streaming;
pub mod utils;

pub use utils::RouterState;
