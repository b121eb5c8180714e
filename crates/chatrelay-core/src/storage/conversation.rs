//! Typed conversation storage wrapper.
//!
//! Wraps the byte-level API from chatrelay-storage with the `Conversation`
//! model, serialising records as JSON.

use anyhow::{Context, Result};
use async_trait::async_trait;
use redb::Database;
use std::sync::Arc;

use super::ConversationStore;
use crate::models::Conversation;

#[derive(Debug, Clone)]
pub struct RedbConversationStore {
    inner: chatrelay_storage::ConversationStorage,
}

impl RedbConversationStore {
    pub fn new(db: Arc<Database>) -> Result<Self> {
        Ok(Self {
            inner: chatrelay_storage::ConversationStorage::new(db)?,
        })
    }

    fn create_blocking(&self, conversation: &Conversation) -> Result<()> {
        if self.inner.exists(&conversation.id)? {
            return Err(anyhow::anyhow!(
                "Conversation {} already exists",
                conversation.id
            ));
        }
        let json = serde_json::to_vec(conversation)?;
        self.inner.put_raw(&conversation.id, &json)
    }

    fn get_blocking(&self, id: &str) -> Result<Option<Conversation>> {
        match self.inner.get_raw(id)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn update_title_if_blocking(&self, id: &str, expected: &str, title: &str) -> Result<bool> {
        self.inner.update_raw(id, |bytes| {
            let mut conversation: Conversation = serde_json::from_slice(bytes)?;
            if conversation.title != expected {
                return Ok(None);
            }
            conversation.rename(title);
            Ok(Some(serde_json::to_vec(&conversation)?))
        })
    }

    fn list_for_owner_blocking(&self, owner_id: &str) -> Result<Vec<Conversation>> {
        let mut conversations = Vec::new();
        for (_, bytes) in self.inner.list_raw()? {
            let conversation: Conversation = serde_json::from_slice(&bytes)?;
            if conversation.is_owned_by(owner_id) {
                conversations.push(conversation);
            }
        }

        // Most recent first
        conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(conversations)
    }

    /// Delete a conversation record.
    pub fn delete(&self, id: &str) -> Result<bool> {
        self.inner.delete(id)
    }
}

async fn blocking<T, F>(what: &'static str, task: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .with_context(|| format!("conversation {what} task panicked"))?
}

#[async_trait]
impl ConversationStore for RedbConversationStore {
    async fn create(&self, conversation: &Conversation) -> Result<()> {
        let store = self.clone();
        let conversation = conversation.clone();
        blocking("create", move || store.create_blocking(&conversation)).await
    }

    async fn get(&self, id: &str) -> Result<Option<Conversation>> {
        let store = self.clone();
        let id = id.to_string();
        blocking("get", move || store.get_blocking(&id)).await
    }

    async fn update_title_if(&self, id: &str, expected: &str, title: &str) -> Result<bool> {
        let store = self.clone();
        let (id, expected, title) = (id.to_string(), expected.to_string(), title.to_string());
        blocking("update", move || {
            store.update_title_if_blocking(&id, &expected, &title)
        })
        .await
    }

    async fn list_for_owner(&self, owner_id: &str) -> Result<Vec<Conversation>> {
        let store = self.clone();
        let owner_id = owner_id.to_string();
        blocking("list", move || store.list_for_owner_blocking(&owner_id)).await
    }
}
