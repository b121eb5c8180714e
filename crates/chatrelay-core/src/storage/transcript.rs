//! Typed transcript storage over chatrelay-storage::TurnStorage.
//!
//! redb calls block, so every operation runs on the blocking pool and never
//! holds up the async workers shared with other relay sessions.

use anyhow::{Context, Result};
use async_trait::async_trait;
use redb::Database;
use std::sync::Arc;

use super::TranscriptStore;
use crate::models::{ChatRole, Turn};

#[derive(Debug, Clone)]
pub struct RedbTranscriptStore {
    inner: chatrelay_storage::TurnStorage,
}

impl RedbTranscriptStore {
    pub fn new(db: Arc<Database>) -> Result<Self> {
        Ok(Self {
            inner: chatrelay_storage::TurnStorage::new(db)?,
        })
    }

    fn append_blocking(&self, conversation_id: &str, role: ChatRole, content: &str) -> Result<Turn> {
        let (_, bytes) = self.inner.append_raw(conversation_id, |seq, last| {
            let previous = match last {
                Some(bytes) => Some(serde_json::from_slice::<Turn>(bytes)?),
                None => None,
            };
            let turn = Turn::next_after(previous.as_ref(), conversation_id, seq, role, content);
            Ok(serde_json::to_vec(&turn)?)
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn list_blocking(&self, conversation_id: &str) -> Result<Vec<Turn>> {
        self.inner
            .list_raw(conversation_id)?
            .into_iter()
            .map(|(_, bytes)| serde_json::from_slice::<Turn>(&bytes).map_err(anyhow::Error::from))
            .collect()
    }

    /// Remove a conversation's whole transcript.
    pub async fn delete_conversation(&self, conversation_id: &str) -> Result<usize> {
        let store = self.clone();
        let conversation_id = conversation_id.to_string();
        tokio::task::spawn_blocking(move || store.inner.delete_conversation(&conversation_id))
            .await
            .context("transcript delete task panicked")?
    }
}

#[async_trait]
impl TranscriptStore for RedbTranscriptStore {
    async fn append(&self, conversation_id: &str, role: ChatRole, content: &str) -> Result<Turn> {
        let store = self.clone();
        let conversation_id = conversation_id.to_string();
        let content = content.to_string();
        tokio::task::spawn_blocking(move || store.append_blocking(&conversation_id, role, &content))
            .await
            .context("transcript append task panicked")?
    }

    async fn list_ordered(&self, conversation_id: &str) -> Result<Vec<Turn>> {
        let store = self.clone();
        let conversation_id = conversation_id.to_string();
        tokio::task::spawn_blocking(move || store.list_blocking(&conversation_id))
            .await
            .context("transcript list task panicked")?
    }
}
