//! Storage layer with typed wrappers around chatrelay-storage.
//!
//! The relay only depends on the two traits below. The redb-backed
//! implementations wrap the byte-level APIs from chatrelay-storage; the
//! in-memory ones back tests and ephemeral deployments.

pub mod conversation;
pub mod memory;
pub mod transcript;

use anyhow::Result;
use async_trait::async_trait;
use redb::Database;
use std::sync::Arc;

use crate::models::{ChatRole, Conversation, Turn};

pub use conversation::RedbConversationStore;
pub use memory::{InMemoryConversationStore, InMemoryTranscriptStore};
pub use transcript::RedbTranscriptStore;

/// Append-only ordered log of turns per conversation.
///
/// Appends to one conversation are serialised; appends to different
/// conversations may proceed concurrently.
#[async_trait]
pub trait TranscriptStore: Send + Sync {
    async fn append(&self, conversation_id: &str, role: ChatRole, content: &str) -> Result<Turn>;

    async fn list_ordered(&self, conversation_id: &str) -> Result<Vec<Turn>>;
}

/// Conversation records; creation and deletion belong to the CRUD surface.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Create a new conversation (fails if the id already exists).
    async fn create(&self, conversation: &Conversation) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<Conversation>>;

    /// Fetch a conversation only if `owner_id` owns it.
    async fn get_owned(&self, id: &str, owner_id: &str) -> Result<Option<Conversation>> {
        Ok(self
            .get(id)
            .await?
            .filter(|conversation| conversation.is_owned_by(owner_id)))
    }

    /// Replace the title only while it still equals `expected`.
    ///
    /// Returns whether the title was written.
    async fn update_title_if(&self, id: &str, expected: &str, title: &str) -> Result<bool>;

    /// Conversations of one owner, most recently updated first.
    async fn list_for_owner(&self, owner_id: &str) -> Result<Vec<Conversation>>;
}

/// Central storage manager for the redb-backed stores.
pub struct Storage {
    db: Arc<Database>,
    pub conversations: RedbConversationStore,
    pub transcripts: RedbTranscriptStore,
}

impl Storage {
    /// Create a new storage instance at the given path.
    pub fn new(path: &str) -> Result<Self> {
        let db = Arc::new(Database::create(path)?);

        let conversations = RedbConversationStore::new(db.clone())?;
        let transcripts = RedbTranscriptStore::new(db.clone())?;

        Ok(Self {
            db,
            conversations,
            transcripts,
        })
    }

    /// Get a reference to the underlying database
    pub fn get_db(&self) -> Arc<Database> {
        self.db.clone()
    }
}
