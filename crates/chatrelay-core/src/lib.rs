//! ChatRelay core: conversation transcripts and the streaming relay.

pub mod error;
pub mod models;
pub mod paths;
pub mod relay;
pub mod storage;
pub mod title;
pub mod writer;

pub use error::RelayError;
pub use models::*;
pub use relay::{DisconnectPolicy, RelayConfig, RelayOutcome, RelayService, RelaySession, RelayState};
pub use writer::{BufferedWriter, ChannelWriter, DownstreamClosed, DownstreamWriter, RelayEvent};

use chatrelay_ai::LlmClient;
use std::sync::Arc;
use storage::{
    ConversationStore, InMemoryConversationStore, InMemoryTranscriptStore, Storage, TranscriptStore,
};
use title::TitleWorker;
use tracing::info;

/// Core application state shared by the HTTP handlers.
#[derive(Clone)]
pub struct AppCore {
    pub conversations: Arc<dyn ConversationStore>,
    pub transcripts: Arc<dyn TranscriptStore>,
    pub relay: RelayService,
}

impl AppCore {
    /// Open the redb database at `db_path` and start the title worker.
    pub async fn new(
        db_path: &str,
        llm: Arc<dyn LlmClient>,
        config: RelayConfig,
    ) -> anyhow::Result<Self> {
        let storage = Storage::new(db_path)?;
        info!(db_path, "Initializing ChatRelay");

        Ok(Self::assemble(
            Arc::new(storage.conversations),
            Arc::new(storage.transcripts),
            llm,
            config,
        ))
    }

    /// Process-local stores; nothing survives a restart.
    pub fn in_memory(llm: Arc<dyn LlmClient>, config: RelayConfig) -> Self {
        info!("Initializing ChatRelay with in-memory storage");
        Self::assemble(
            Arc::new(InMemoryConversationStore::new()),
            Arc::new(InMemoryTranscriptStore::new()),
            llm,
            config,
        )
    }

    fn assemble(
        conversations: Arc<dyn ConversationStore>,
        transcripts: Arc<dyn TranscriptStore>,
        llm: Arc<dyn LlmClient>,
        config: RelayConfig,
    ) -> Self {
        let (titles, _worker) =
            TitleWorker::new(llm.clone(), conversations.clone(), config.default_title.clone())
                .with_request_timeout(config.read_timeout)
                .spawn();
        let relay = RelayService::new(transcripts.clone(), conversations.clone(), llm, config)
            .with_titles(titles);

        Self {
            conversations,
            transcripts,
            relay,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatrelay_ai::{MockLlmClient, MockStream};
    use std::time::Duration;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_app_core_titles_new_conversations() {
        let llm = MockLlmClient::from_streams(vec![MockStream::tokens(&["Sure."])]);
        llm.push_completion("Packing List").await;
        let temp_dir = tempdir().unwrap();
        let db_path = temp_dir.path().join("core.db");
        let core = AppCore::new(
            db_path.to_str().unwrap(),
            Arc::new(llm.clone()),
            RelayConfig::default(),
        )
        .await
        .unwrap();

        let conversation = Conversation::new("alice", "m");
        core.conversations.create(&conversation).await.unwrap();
        let outcome = core
            .relay
            .relay_buffered("alice", &conversation.id, "what should I pack?")
            .await
            .unwrap();
        assert_eq!(outcome.content, "Sure.");

        let mut title = String::new();
        for _ in 0..100 {
            title = core.conversations.get(&conversation.id).await.unwrap().unwrap().title;
            if title != DEFAULT_CONVERSATION_TITLE {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(title, "Packing List");
        assert_eq!(core.transcripts.list_ordered(&conversation.id).await.unwrap().len(), 2);
    }
}
