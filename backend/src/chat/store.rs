//! Conversation store
//!
//! The orchestrator does not own conversation lists; it appends to and
//! rewrites entries through the [`ConversationStore`] trait. The in-memory
//! implementation backs the HTTP server and the tests.

use crate::chat::models::{ConversationEntry, EntryHandle};
use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

/// Errors raised by a conversation store
#[derive(Error, Debug)]
pub enum StoreError {
    /// The entry to replace does not exist in the conversation
    #[error("Entry {entry_id} not found in conversation {conversation_id}")]
    EntryNotFound {
        /// Conversation that was searched
        conversation_id: String,
        /// Entry that was expected
        entry_id: String,
    },

    /// The backing store could not be reached
    #[error("Conversation store unavailable: {0}")]
    Unavailable(String),
}

/// Append/replace access to conversation entry lists
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Append an entry to the end of a conversation, creating the conversation if needed
    async fn append(
        &self,
        conversation_id: &str,
        entry: ConversationEntry,
    ) -> Result<EntryHandle, StoreError>;

    /// Replace the entry with the same id, keeping its position
    async fn replace(&self, conversation_id: &str, entry: ConversationEntry)
        -> Result<(), StoreError>;

    /// Look up one entry by handle
    async fn get(
        &self,
        conversation_id: &str,
        handle: &EntryHandle,
    ) -> Result<Option<ConversationEntry>, StoreError>;

    /// All entries of a conversation in insertion order (empty if unknown)
    async fn entries(&self, conversation_id: &str) -> Result<Vec<ConversationEntry>, StoreError>;
}

/// Conversation store kept in process memory
#[derive(Debug, Default)]
pub struct InMemoryConversationStore {
    conversations: RwLock<HashMap<String, Vec<ConversationEntry>>>,
}

impl InMemoryConversationStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove an entry from a conversation
    ///
    /// Returns true if the entry existed.
    pub async fn remove(&self, conversation_id: &str, handle: &EntryHandle) -> bool {
        let mut conversations = self.conversations.write().await;
        let Some(entries) = conversations.get_mut(conversation_id) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|entry| &entry.id != handle);
        entries.len() != before
    }

    /// Number of entries in a conversation
    pub async fn len(&self, conversation_id: &str) -> usize {
        self.conversations
            .read()
            .await
            .get(conversation_id)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn append(
        &self,
        conversation_id: &str,
        entry: ConversationEntry,
    ) -> Result<EntryHandle, StoreError> {
        let handle = entry.id.clone();
        debug!(
            conversation_id = %conversation_id,
            entry_id = %handle,
            role = entry.role.as_str(),
            "Appending conversation entry"
        );
        self.conversations
            .write()
            .await
            .entry(conversation_id.to_string())
            .or_default()
            .push(entry);
        Ok(handle)
    }

    async fn replace(
        &self,
        conversation_id: &str,
        entry: ConversationEntry,
    ) -> Result<(), StoreError> {
        let mut conversations = self.conversations.write().await;
        let slot = conversations
            .get_mut(conversation_id)
            .and_then(|entries| entries.iter_mut().find(|existing| existing.id == entry.id))
            .ok_or_else(|| StoreError::EntryNotFound {
                conversation_id: conversation_id.to_string(),
                entry_id: entry.id.to_string(),
            })?;
        *slot = entry;
        Ok(())
    }

    async fn get(
        &self,
        conversation_id: &str,
        handle: &EntryHandle,
    ) -> Result<Option<ConversationEntry>, StoreError> {
        Ok(self
            .conversations
            .read()
            .await
            .get(conversation_id)
            .and_then(|entries| entries.iter().find(|entry| &entry.id == handle))
            .cloned())
    }

    async fn entries(&self, conversation_id: &str) -> Result<Vec<ConversationEntry>, StoreError> {
        Ok(self
            .conversations
            .read()
            .await
            .get(conversation_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::models::EntryRole;

    #[tokio::test]
    async fn test_append_and_list() {
        let store = InMemoryConversationStore::new();
        let first = ConversationEntry::new(EntryRole::User, "hello".to_string());
        let second = ConversationEntry::new(EntryRole::Assistant, "hi".to_string());

        store.append("conv-1", first.clone()).await.unwrap();
        store.append("conv-1", second.clone()).await.unwrap();

        let entries = store.entries("conv-1").await.unwrap();
        assert_eq!(entries, vec![first, second]);
        assert!(store.entries("conv-2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_replace_keeps_position() {
        let store = InMemoryConversationStore::new();
        let first = ConversationEntry::new(EntryRole::User, "one".to_string());
        let mut second = ConversationEntry::new(EntryRole::Thinking, "two".to_string());
        store.append("conv-1", first).await.unwrap();
        store.append("conv-1", second.clone()).await.unwrap();

        second.content = "rewritten".to_string();
        store.replace("conv-1", second.clone()).await.unwrap();

        let entries = store.entries("conv-1").await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].content, "rewritten");
    }

    #[tokio::test]
    async fn test_replace_missing_entry() {
        let store = InMemoryConversationStore::new();
        let entry = ConversationEntry::new(EntryRole::User, "lost".to_string());

        let result = store.replace("conv-1", entry).await;
        match result {
            Err(StoreError::EntryNotFound { conversation_id, .. }) => {
                assert_eq!(conversation_id, "conv-1");
            }
            other => panic!("Expected EntryNotFound, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_remove_and_get() {
        let store = InMemoryConversationStore::new();
        let entry = ConversationEntry::new(EntryRole::User, "bye".to_string());
        let handle = store.append("conv-1", entry).await.unwrap();

        assert!(store.get("conv-1", &handle).await.unwrap().is_some());
        assert!(store.remove("conv-1", &handle).await);
        assert!(!store.remove("conv-1", &handle).await);
        assert!(store.get("conv-1", &handle).await.unwrap().is_none());
        assert_eq!(store.len("conv-1").await, 0);
    }
}
