//! Chat module
//!
//! Conversation entry models and the store the orchestrator writes through.

pub mod models;
pub mod store;

pub use models::{
    Attribution, ConversationEntry, EntryHandle, EntryMetadata, EntryRole, ProcessSummary,
};
pub use store::{ConversationStore, InMemoryConversationStore, StoreError};
