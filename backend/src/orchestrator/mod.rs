//! Orchestrator module
//!
//! Turns a user request into a sequence of visible processing phases, keeps
//! the step history of each run, and writes the result back into the
//! conversation when the caller finalizes the run.
//!
//! The pieces compose bottom-up: the [`classifier`] picks categories, the
//! [`tools`] table binds them to a tool, [`steps`] records progress, the
//! [`sequencer`] drives the phases, the [`synchronizer`] owns store writes,
//! and the [`run_manager`] ties runs to conversations.

pub mod classifier;
pub mod config;
pub mod events;
pub mod run_context;
pub mod run_manager;
pub mod sequencer;
pub mod steps;
pub mod synchronizer;
pub mod tools;
pub mod utils;

pub use config::{ConfigUpdateRequest, OrchestratorConfig, PhaseDelays};
pub use events::{EventBus, RunEvent};
pub use run_context::{RunId, RunSnapshot};
pub use run_manager::{RunManager, RunTicket, StartRunRequest};
pub use steps::{Phase, Step};
pub use synchronizer::{FinalizeOutcome, FinalizeReport};
