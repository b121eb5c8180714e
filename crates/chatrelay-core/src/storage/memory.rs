//! In-memory stores.
//!
//! Each conversation's log sits behind its own async mutex, so appends to one
//! conversation are serialised while other conversations are untouched.

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::{ConversationStore, TranscriptStore};
use crate::models::{ChatRole, Conversation, Turn};

#[derive(Debug, Default, Clone)]
pub struct InMemoryTranscriptStore {
    logs: Arc<DashMap<String, Arc<Mutex<Vec<Turn>>>>>,
}

impl InMemoryTranscriptStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn log_for(&self, conversation_id: &str) -> Arc<Mutex<Vec<Turn>>> {
        // Clone the Arc out so no map shard stays locked across an await.
        self.logs
            .entry(conversation_id.to_string())
            .or_default()
            .clone()
    }
}

#[async_trait]
impl TranscriptStore for InMemoryTranscriptStore {
    async fn append(&self, conversation_id: &str, role: ChatRole, content: &str) -> Result<Turn> {
        let log = self.log_for(conversation_id);
        let mut turns = log.lock().await;
        let turn = Turn::next_after(
            turns.last(),
            conversation_id,
            turns.len() as u64,
            role,
            content,
        );
        turns.push(turn.clone());
        Ok(turn)
    }

    async fn list_ordered(&self, conversation_id: &str) -> Result<Vec<Turn>> {
        let Some(log) = self.logs.get(conversation_id).map(|entry| entry.value().clone()) else {
            return Ok(Vec::new());
        };
        let turns = log.lock().await;
        Ok(turns.clone())
    }
}

#[derive(Debug, Default, Clone)]
pub struct InMemoryConversationStore {
    conversations: Arc<DashMap<String, Conversation>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn create(&self, conversation: &Conversation) -> Result<()> {
        match self.conversations.entry(conversation.id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(anyhow::anyhow!(
                "Conversation {} already exists",
                conversation.id
            )),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(conversation.clone());
                Ok(())
            }
        }
    }

    async fn get(&self, id: &str) -> Result<Option<Conversation>> {
        Ok(self.conversations.get(id).map(|entry| entry.value().clone()))
    }

    async fn update_title_if(&self, id: &str, expected: &str, title: &str) -> Result<bool> {
        let Some(mut conversation) = self.conversations.get_mut(id) else {
            return Ok(false);
        };
        if conversation.title != expected {
            return Ok(false);
        }
        conversation.rename(title);
        Ok(true)
    }

    async fn list_for_owner(&self, owner_id: &str) -> Result<Vec<Conversation>> {
        let mut conversations: Vec<Conversation> = self
            .conversations
            .iter()
            .filter(|entry| entry.is_owned_by(owner_id))
            .map(|entry| entry.value().clone())
            .collect();
        conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(conversations)
    }
}
