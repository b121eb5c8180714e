use std::sync::Arc;

use chatrelay_ai::{ByteStream, CompletionRequest, LlmClient, SseFrame, extract_token, frames};
use futures::StreamExt;
use tracing::{debug, error, info, warn};

use super::context::{build_messages, system_prompt};
use super::{DisconnectPolicy, RelayConfig, RelayOutcome, RelayState};
use crate::error::RelayError;
use crate::models::{ChatRole, Conversation, Turn};
use crate::storage::{ConversationStore, TranscriptStore};
use crate::title::{TitleHandle, TitleJob};
use crate::writer::{BufferedWriter, DownstreamWriter, RelayEvent};

fn log_transition(conversation_id: &str, from: RelayState, to: RelayState) {
    debug!(
        conversation_id,
        from = from.as_str(),
        to = to.as_str(),
        "Relay state transition"
    );
}

/// Entry point for relay invocations; cheap to clone.
#[derive(Clone)]
pub struct RelayService {
    transcripts: Arc<dyn TranscriptStore>,
    conversations: Arc<dyn ConversationStore>,
    llm: Arc<dyn LlmClient>,
    titles: Option<TitleHandle>,
    config: Arc<RelayConfig>,
}

impl RelayService {
    pub fn new(
        transcripts: Arc<dyn TranscriptStore>,
        conversations: Arc<dyn ConversationStore>,
        llm: Arc<dyn LlmClient>,
        config: RelayConfig,
    ) -> Self {
        Self {
            transcripts,
            conversations,
            llm,
            titles: None,
            config: Arc::new(config),
        }
    }

    pub fn with_titles(mut self, titles: TitleHandle) -> Self {
        self.titles = Some(titles);
        self
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Validate, persist the user turn and open the upstream.
    ///
    /// Once this returns an error nothing has been written to the client.
    pub async fn prepare(
        &self,
        owner_id: &str,
        conversation_id: &str,
        message: &str,
    ) -> Result<RelaySession, RelayError> {
        match self.initialize(owner_id, conversation_id, message).await {
            Ok(session) => Ok(session),
            Err(err) => {
                log_transition(conversation_id, RelayState::Initializing, RelayState::Failed);
                if err.status_code() >= 500 {
                    warn!(conversation_id, kind = err.kind(), error = %err, "Relay failed before streaming");
                } else {
                    debug!(conversation_id, kind = err.kind(), error = %err, "Relay request rejected");
                }
                Err(err)
            }
        }
    }

    async fn initialize(
        &self,
        owner_id: &str,
        conversation_id: &str,
        message: &str,
    ) -> Result<RelaySession, RelayError> {
        let message = message.trim();
        if message.is_empty() {
            return Err(RelayError::Validation("Message must not be empty".to_string()));
        }

        let conversation = self
            .conversations
            .get_owned(conversation_id, owner_id)
            .await
            .map_err(|err| RelayError::persistence("load conversation", err))?
            .ok_or_else(|| {
                RelayError::NotFound(format!("Conversation {conversation_id} not found"))
            })?;

        let prior_turns = self
            .transcripts
            .list_ordered(conversation_id)
            .await
            .map_err(|err| RelayError::persistence("load transcript", err))?;

        // Durable before the upstream is contacted.
        let user_turn = self
            .transcripts
            .append(conversation_id, ChatRole::User, message)
            .await
            .map_err(|err| RelayError::persistence("append user turn", err))?;

        let first_user_message = prior_turns
            .iter()
            .find(|turn| turn.role == ChatRole::User)
            .map_or(message, |turn| turn.content.as_str())
            .to_string();

        let messages = build_messages(
            system_prompt(&conversation, &self.config.system_prompt),
            &prior_turns,
            self.config.context_turns,
            message,
        );
        let request = CompletionRequest::new(conversation.model.clone(), messages).streaming();

        let upstream =
            match tokio::time::timeout(self.config.connect_timeout, self.llm.open_stream(request))
                .await
            {
                Ok(Ok(upstream)) => upstream,
                Ok(Err(err)) => return Err(RelayError::from_connect(err)),
                Err(_) => {
                    return Err(RelayError::UpstreamTimeout(format!(
                        "{} did not respond within {}ms",
                        self.llm.provider(),
                        self.config.connect_timeout.as_millis()
                    )));
                }
            };

        info!(
            conversation_id,
            model = %conversation.model,
            prior_turns = prior_turns.len(),
            "Relay upstream opened"
        );

        Ok(RelaySession {
            service: self.clone(),
            conversation,
            user_turn,
            first_user_message,
            upstream,
        })
    }

    /// Relay one turn without a live client and return the collected outcome.
    pub async fn relay_buffered(
        &self,
        owner_id: &str,
        conversation_id: &str,
        message: &str,
    ) -> Result<RelayOutcome, RelayError> {
        let session = self.prepare(owner_id, conversation_id, message).await?;
        let mut writer = BufferedWriter::new();
        let outcome = session.run(&mut writer).await;
        match (&outcome.state, &outcome.error) {
            (RelayState::Failed, Some(err)) => Err(err.clone()),
            _ => Ok(outcome),
        }
    }

    async fn append_assistant(&self, conversation_id: &str, content: &str) -> Result<Turn, RelayError> {
        self.transcripts
            .append(conversation_id, ChatRole::Assistant, content)
            .await
            .map_err(|err| {
                // The client already has this text; only the transcript loses it.
                error!(
                    conversation_id,
                    lost_chars = content.chars().count(),
                    error = %format!("{err:#}"),
                    "Failed to persist assistant turn"
                );
                RelayError::persistence("append assistant turn", err)
            })
    }

    async fn request_title(&self, conversation: &Conversation, first_user_message: &str) {
        let Some(titles) = &self.titles else {
            return;
        };

        // Re-read so a rename made during this turn is respected.
        match self.conversations.get(&conversation.id).await {
            Ok(Some(current)) if current.title == self.config.default_title => {
                let job = TitleJob {
                    conversation_id: conversation.id.clone(),
                    model: conversation.model.clone(),
                    first_user_message: first_user_message.to_string(),
                };
                if !titles.enqueue(job) {
                    warn!(conversation_id = %conversation.id, "Title worker is not running");
                }
            }
            Ok(_) => {}
            Err(err) => warn!(
                conversation_id = %conversation.id,
                error = %format!("{err:#}"),
                "Failed to re-read conversation for titling"
            ),
        }
    }
}

/// A relay invocation whose upstream is open.
pub struct RelaySession {
    service: RelayService,
    conversation: Conversation,
    user_turn: Turn,
    first_user_message: String,
    upstream: ByteStream,
}

impl RelaySession {
    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn user_turn(&self) -> &Turn {
        &self.user_turn
    }

    /// Stream the reply to `writer` and persist it.
    ///
    /// The writer is closed only after the assistant turn is stored.
    pub async fn run(self, writer: &mut dyn DownstreamWriter) -> RelayOutcome {
        // The upstream is not `Sync`; nothing may borrow `self` across an await.
        let RelaySession {
            service,
            conversation,
            user_turn,
            first_user_message,
            upstream,
        } = self;
        let conversation_id = conversation.id.as_str();
        let config = service.config.clone();

        log_transition(conversation_id, RelayState::Initializing, RelayState::Streaming);
        let mut frames = frames(upstream, config.read_timeout);

        let mut content = String::new();
        let mut fragments_total = 0;
        let mut fragments_forwarded = 0;
        let mut started = false;
        let mut client_open = true;
        let mut upstream_aborted = false;
        let mut failure = None;

        while let Some(frame) = frames.next().await {
            let payload = match frame {
                Ok(SseFrame::Payload(payload)) => payload,
                Ok(SseFrame::Done) => break,
                Err(err) => {
                    failure = Some(RelayError::from_stream(err));
                    break;
                }
            };
            let Some(token) = extract_token(&payload) else {
                continue;
            };

            fragments_total += 1;
            content.push_str(&token);
            if !client_open {
                continue;
            }

            match writer.write(RelayEvent::Token(token)).await {
                Ok(()) => {
                    fragments_forwarded += 1;
                    started = true;
                }
                Err(_) => {
                    client_open = false;
                    warn!(
                        conversation_id,
                        forwarded = fragments_forwarded,
                        policy = ?config.disconnect_policy,
                        "Client disconnected mid-stream"
                    );
                    if config.disconnect_policy == DisconnectPolicy::Abort {
                        upstream_aborted = true;
                        break;
                    }
                }
            }
        }
        // Dropping the frame stream closes the upstream connection.
        drop(frames);

        log_transition(conversation_id, RelayState::Streaming, RelayState::Finalizing);

        let mut assistant_turn = None;
        let error;
        let final_state;
        match failure {
            None => {
                if client_open {
                    match writer.write(RelayEvent::Done).await {
                        Ok(()) => started = true,
                        Err(_) => client_open = false,
                    }
                }

                match service.append_assistant(conversation_id, &content).await {
                    Ok(turn) => {
                        assistant_turn = Some(turn);
                        error = None;
                    }
                    Err(err) => error = Some(err),
                }
                writer.close().await;

                if assistant_turn.is_some() {
                    service.request_title(&conversation, &first_user_message).await;
                }
                final_state = RelayState::Completed;
            }
            Some(err) => {
                // Without prior output the caller answers with a plain error status.
                if started && client_open {
                    let _ = writer.write(RelayEvent::Error(err.to_string())).await;
                }
                if !content.is_empty() {
                    assistant_turn = service.append_assistant(conversation_id, &content).await.ok();
                }
                writer.close().await;

                warn!(
                    conversation_id,
                    kind = err.kind(),
                    error = %err,
                    started,
                    "Relay failed mid-stream"
                );
                error = Some(err);
                final_state = RelayState::Failed;
            }
        }
        log_transition(conversation_id, RelayState::Finalizing, final_state);

        info!(
            conversation_id,
            state = final_state.as_str(),
            fragments = fragments_total,
            forwarded = fragments_forwarded,
            "Relay finished"
        );

        RelayOutcome {
            state: final_state,
            content,
            fragments_total,
            fragments_forwarded,
            started,
            client_disconnected: !client_open,
            upstream_aborted,
            user_turn,
            assistant_turn,
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DEFAULT_CONVERSATION_TITLE;
    use crate::storage::{InMemoryConversationStore, InMemoryTranscriptStore};
    use crate::writer::ChannelWriter;
    use chatrelay_ai::llm::mock_client::token_frame;
    use chatrelay_ai::{MockLlmClient, MockStream, Role};
    use std::time::Duration;
    use tokio::sync::mpsc;

    const OWNER: &str = "alice";

    struct Harness {
        llm: MockLlmClient,
        transcripts: InMemoryTranscriptStore,
        conversations: InMemoryConversationStore,
        service: RelayService,
        conversation: Conversation,
    }

    impl Harness {
        async fn new(streams: Vec<MockStream>) -> Self {
            Self::with_config(streams, RelayConfig::default(), Conversation::new(OWNER, "test-model"))
                .await
        }

        async fn with_config(
            streams: Vec<MockStream>,
            config: RelayConfig,
            conversation: Conversation,
        ) -> Self {
            let llm = MockLlmClient::from_streams(streams);
            let transcripts = InMemoryTranscriptStore::new();
            let conversations = InMemoryConversationStore::new();
            conversations.create(&conversation).await.unwrap();
            let service = RelayService::new(
                Arc::new(transcripts.clone()),
                Arc::new(conversations.clone()),
                Arc::new(llm.clone()),
                config,
            );
            Self {
                llm,
                transcripts,
                conversations,
                service,
                conversation,
            }
        }

        async fn run(&self, message: &str, writer: &mut dyn DownstreamWriter) -> RelayOutcome {
            self.service
                .prepare(OWNER, &self.conversation.id, message)
                .await
                .unwrap()
                .run(writer)
                .await
        }

        async fn turns(&self) -> Vec<Turn> {
            self.transcripts
                .list_ordered(&self.conversation.id)
                .await
                .unwrap()
        }
    }

    /// Records how many turns were stored when the session closed it.
    struct CloseWatcher {
        transcripts: InMemoryTranscriptStore,
        conversation_id: String,
        turns_at_close: Option<usize>,
    }

    #[async_trait::async_trait]
    impl DownstreamWriter for CloseWatcher {
        async fn write(&mut self, _event: RelayEvent) -> Result<(), crate::writer::DownstreamClosed> {
            Ok(())
        }

        async fn close(&mut self) {
            let turns = self.transcripts.list_ordered(&self.conversation_id).await.unwrap();
            self.turns_at_close = Some(turns.len());
        }
    }

    #[tokio::test]
    async fn test_assistant_turn_is_stored_before_writer_closes() {
        let harness = Harness::new(vec![
            MockStream::tokens(&["done"]),
            MockStream::tokens_without_sentinel(&["half"]).then_fail("reset"),
        ])
        .await;

        for expected in [2, 4] {
            let mut writer = CloseWatcher {
                transcripts: harness.transcripts.clone(),
                conversation_id: harness.conversation.id.clone(),
                turns_at_close: None,
            };
            harness.run("go", &mut writer).await;
            assert_eq!(writer.turns_at_close, Some(expected));
        }
    }

    #[tokio::test]
    async fn test_successful_relay() {
        let harness = Harness::new(vec![MockStream::tokens(&["Hi", " there"])]).await;
        let mut writer = BufferedWriter::new();

        let outcome = harness.run("  hello  ", &mut writer).await;

        assert_eq!(outcome.state, RelayState::Completed);
        assert_eq!(
            writer.events(),
            &[
                RelayEvent::Token("Hi".into()),
                RelayEvent::Token(" there".into()),
                RelayEvent::Done,
            ]
        );
        assert!(writer.is_closed());
        assert!(outcome.started);
        assert!(outcome.error.is_none());

        let turns = harness.turns().await;
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].role, ChatRole::User);
        assert_eq!(turns[0].content, "hello");
        assert_eq!(turns[1].role, ChatRole::Assistant);
        assert_eq!(turns[1].content, "Hi there");
        assert_eq!(outcome.assistant_turn.as_ref(), Some(&turns[1]));
    }

    #[tokio::test]
    async fn test_persisted_reply_is_concatenation_of_forwarded_tokens() {
        let tokens = ["h\u{e9}llo", " w\u{f6}rld", " \u{1f389}", "", "!"];
        let harness = Harness::new(vec![MockStream::tokens(&tokens)]).await;
        let mut writer = BufferedWriter::new();

        let outcome = harness.run("go", &mut writer).await;

        let forwarded = writer.tokens().concat();
        assert_eq!(forwarded, "h\u{e9}llo w\u{f6}rld \u{1f389}!");
        assert_eq!(outcome.assistant_turn.unwrap().content, forwarded);
        assert_eq!(outcome.fragments_total, 4);
    }

    #[tokio::test]
    async fn test_frames_split_mid_json() {
        let wire = format!("{}{}data: [DONE]\n\n", token_frame("Hi"), token_frame(" there"));
        let split = wire.find("{\"to").unwrap() + 4;
        let (head, tail) = wire.split_at(split);
        let harness = Harness::new(vec![MockStream::chunks(vec![
            head.to_string(),
            tail.to_string(),
        ])])
        .await;
        let mut writer = BufferedWriter::new();

        let outcome = harness.run("hello", &mut writer).await;

        assert_eq!(writer.tokens(), vec!["Hi", " there"]);
        assert_eq!(outcome.content, "Hi there");
    }

    #[tokio::test]
    async fn test_malformed_frame_is_skipped() {
        let harness = Harness::new(vec![MockStream::chunks(vec![
            token_frame("a"),
            "data: {not json}\n\n".to_string(),
            ": keep-alive\n\n".to_string(),
            token_frame("b"),
            "data: [DONE]\n\n".to_string(),
        ])])
        .await;
        let mut writer = BufferedWriter::new();

        let outcome = harness.run("hello", &mut writer).await;

        assert_eq!(outcome.state, RelayState::Completed);
        assert_eq!(writer.tokens(), vec!["a", "b"]);
        assert_eq!(outcome.assistant_turn.unwrap().content, "ab");
    }

    #[tokio::test]
    async fn test_closure_without_sentinel_completes() {
        let harness = Harness::new(vec![MockStream::tokens_without_sentinel(&["x", "y"])]).await;
        let mut writer = BufferedWriter::new();

        let outcome = harness.run("hello", &mut writer).await;

        assert_eq!(outcome.state, RelayState::Completed);
        assert_eq!(writer.events().last(), Some(&RelayEvent::Done));
        assert_eq!(outcome.content, "xy");
    }

    #[tokio::test]
    async fn test_second_invocation_sees_first_turns() {
        let harness = Harness::new(vec![
            MockStream::tokens(&["first reply"]),
            MockStream::tokens(&["second reply"]),
        ])
        .await;

        harness.run("one", &mut BufferedWriter::new()).await;
        harness.run("two", &mut BufferedWriter::new()).await;

        let requests = harness.llm.requests().await;
        assert_eq!(requests.len(), 2);
        assert!(requests[1].stream);
        assert_eq!(requests[1].model, "test-model");
        let sent: Vec<(Role, &str)> = requests[1]
            .messages
            .iter()
            .map(|m| (m.role, m.content.as_str()))
            .collect();
        assert_eq!(
            sent,
            vec![
                (Role::System, RelayConfig::default().system_prompt.as_str()),
                (Role::User, "one"),
                (Role::Assistant, "first reply"),
                (Role::User, "two"),
            ]
        );

        let contents: Vec<String> = harness.turns().await.into_iter().map(|t| t.content).collect();
        assert_eq!(contents, vec!["one", "first reply", "two", "second reply"]);
    }

    #[tokio::test]
    async fn test_context_window_drops_oldest_turns() {
        let config = RelayConfig {
            context_turns: 2,
            ..RelayConfig::default()
        };
        let harness = Harness::with_config(vec![], config, Conversation::new(OWNER, "m")).await;

        for message in ["a", "b", "c"] {
            harness.run(message, &mut BufferedWriter::new()).await;
        }

        let requests = harness.llm.requests().await;
        let last: Vec<&str> = requests[2].messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(
            last,
            vec![
                RelayConfig::default().system_prompt.as_str(),
                "b",
                "mock-echo: b",
                "c"
            ]
        );
    }

    #[tokio::test]
    async fn test_system_prompt_override() {
        let conversation = Conversation::new(OWNER, "m").with_system_prompt("Talk like a pirate.");
        let harness = Harness::with_config(vec![], RelayConfig::default(), conversation).await;

        harness.run("ahoy", &mut BufferedWriter::new()).await;

        let requests = harness.llm.requests().await;
        assert_eq!(requests[0].messages[0], chatrelay_ai::Message::system("Talk like a pirate."));
    }

    #[tokio::test]
    async fn test_blank_message_rejected_before_any_effect() {
        let harness = Harness::new(vec![]).await;

        for message in ["", "   ", "\n\t "] {
            let err = harness
                .service
                .prepare(OWNER, &harness.conversation.id, message)
                .await
                .err()
                .unwrap();
            assert_eq!(err.status_code(), 400);
        }

        assert!(harness.turns().await.is_empty());
        assert!(harness.llm.requests().await.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_or_foreign_conversation_is_not_found() {
        let harness = Harness::new(vec![]).await;

        let missing = harness.service.prepare(OWNER, "missing", "hi").await.err().unwrap();
        assert_eq!(missing.status_code(), 404);

        let foreign = harness
            .service
            .prepare("mallory", &harness.conversation.id, "hi")
            .await
            .err()
            .unwrap();
        assert_eq!(foreign.kind(), "not_found");

        assert!(harness.turns().await.is_empty());
        assert!(harness.llm.requests().await.is_empty());
    }

    #[tokio::test]
    async fn test_connect_failures_keep_user_turn() {
        let harness = Harness::new(vec![
            MockStream::connect_error("connection refused"),
            MockStream::connect_timeout(),
        ])
        .await;

        let refused = harness
            .service
            .prepare(OWNER, &harness.conversation.id, "one")
            .await
            .err()
            .unwrap();
        assert_eq!(refused.kind(), "upstream_connect");
        assert_eq!(refused.status_code(), 500);

        let timed_out = harness
            .service
            .prepare(OWNER, &harness.conversation.id, "two")
            .await
            .err()
            .unwrap();
        assert_eq!(timed_out.kind(), "upstream_timeout");

        let turns = harness.turns().await;
        assert_eq!(turns.len(), 2);
        assert!(turns.iter().all(|t| t.role == ChatRole::User));
    }

    #[tokio::test]
    async fn test_mid_stream_failure_emits_error_and_keeps_partial() {
        let harness = Harness::new(vec![
            MockStream::tokens_without_sentinel(&["par", "tial"]).then_fail("connection reset"),
        ])
        .await;
        let mut writer = BufferedWriter::new();

        let outcome = harness.run("hello", &mut writer).await;

        assert_eq!(outcome.state, RelayState::Failed);
        assert_eq!(outcome.error.as_ref().map(RelayError::kind), Some("upstream_stream"));
        let events = writer.events();
        assert_eq!(events.len(), 3);
        assert!(matches!(&events[2], RelayEvent::Error(message) if message.contains("connection reset")));
        assert!(!events.contains(&RelayEvent::Done));

        let turns = harness.turns().await;
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[1].content, "partial");
    }

    #[tokio::test]
    async fn test_failure_before_first_token_writes_nothing() {
        let harness =
            Harness::new(vec![MockStream::tokens_without_sentinel(&[]).then_fail("reset")]).await;
        let mut writer = BufferedWriter::new();

        let outcome = harness.run("hello", &mut writer).await;

        assert_eq!(outcome.state, RelayState::Failed);
        assert!(!outcome.started);
        assert!(writer.events().is_empty());
        assert!(writer.is_closed());
        assert!(outcome.assistant_turn.is_none());
        assert_eq!(harness.turns().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_timeout_fails_with_timeout_kind() {
        let config = RelayConfig {
            read_timeout: Duration::from_millis(50),
            ..RelayConfig::default()
        };
        let harness = Harness::with_config(
            vec![MockStream::tokens_without_sentinel(&["a"]).then_stall()],
            config,
            Conversation::new(OWNER, "m"),
        )
        .await;
        let mut writer = BufferedWriter::new();

        let outcome = harness.run("hello", &mut writer).await;

        assert_eq!(outcome.state, RelayState::Failed);
        assert_eq!(outcome.error.as_ref().map(RelayError::kind), Some("upstream_timeout"));
        assert!(matches!(writer.events().last(), Some(RelayEvent::Error(_))));
        assert_eq!(outcome.assistant_turn.unwrap().content, "a");
    }

    #[tokio::test]
    async fn test_disconnect_drains_upstream() {
        let harness =
            Harness::new(vec![MockStream::tokens(&["1", "2", "3", "4", "5"])]).await;
        let mut writer = BufferedWriter::fail_after(2);

        let outcome = harness.run("count", &mut writer).await;

        assert_eq!(outcome.state, RelayState::Completed);
        assert!(outcome.client_disconnected);
        assert!(!outcome.upstream_aborted);
        assert_eq!(outcome.fragments_forwarded, 2);
        assert_eq!(outcome.fragments_total, 5);
        assert_eq!(writer.tokens(), vec!["1", "2"]);

        let turns = harness.turns().await;
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[1].content, "12345");
    }

    #[tokio::test]
    async fn test_disconnect_with_abort_policy_keeps_partial() {
        let config = RelayConfig {
            disconnect_policy: DisconnectPolicy::Abort,
            ..RelayConfig::default()
        };
        let harness = Harness::with_config(
            vec![MockStream::tokens(&["1", "2", "3", "4", "5"])],
            config,
            Conversation::new(OWNER, "m"),
        )
        .await;
        let mut writer = BufferedWriter::fail_after(2);

        let outcome = harness.run("count", &mut writer).await;

        assert_eq!(outcome.state, RelayState::Completed);
        assert!(outcome.upstream_aborted);
        assert_eq!(outcome.assistant_turn.unwrap().content, "123");
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_receiver_mid_stream_still_persists_everything() {
        let harness = Harness::new(vec![
            MockStream::tokens(&["a", "b", "c", "d", "e"]).with_delay(10),
        ])
        .await;
        let session = harness
            .service
            .prepare(OWNER, &harness.conversation.id, "go")
            .await
            .unwrap();

        let (mut writer, mut rx) = ChannelWriter::channel(8);
        let task = tokio::spawn(async move { session.run(&mut writer).await });

        assert_eq!(rx.recv().await, Some(RelayEvent::Token("a".into())));
        assert_eq!(rx.recv().await, Some(RelayEvent::Token("b".into())));
        drop(rx);

        let outcome = task.await.unwrap();
        assert!(outcome.client_disconnected);
        assert_eq!(outcome.fragments_forwarded, 2);
        assert_eq!(outcome.assistant_turn.unwrap().content, "abcde");
    }

    #[tokio::test]
    async fn test_exactly_one_user_turn_per_invocation() {
        let harness = Harness::new(vec![
            MockStream::tokens(&["ok"]),
            MockStream::tokens_without_sentinel(&["x"]).then_fail("reset"),
            MockStream::tokens(&["1", "2", "3"]),
        ])
        .await;

        harness.run("a", &mut BufferedWriter::new()).await;
        harness.run("b", &mut BufferedWriter::new()).await;
        harness.run("c", &mut BufferedWriter::fail_after(1)).await;

        let users = harness
            .turns()
            .await
            .into_iter()
            .filter(|t| t.role == ChatRole::User)
            .count();
        assert_eq!(users, 3);
    }

    #[tokio::test]
    async fn test_relay_buffered() {
        let harness = Harness::new(vec![
            MockStream::tokens(&["all ", "at once"]),
            MockStream::connect_error("refused"),
        ])
        .await;

        let outcome = harness
            .service
            .relay_buffered(OWNER, &harness.conversation.id, "hi")
            .await
            .unwrap();
        assert_eq!(outcome.content, "all at once");

        let err = harness
            .service
            .relay_buffered(OWNER, &harness.conversation.id, "hi")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "upstream_connect");
    }

    fn with_title_channel(harness: Harness) -> (Harness, mpsc::UnboundedReceiver<TitleJob>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let service = harness.service.clone().with_titles(TitleHandle { tx });
        (Harness { service, ..harness }, rx)
    }

    #[tokio::test]
    async fn test_title_requested_after_assistant_turn() {
        let (harness, mut rx) = with_title_channel(
            Harness::new(vec![MockStream::tokens(&["r1"]), MockStream::tokens(&["r2"])]).await,
        );

        harness.run("plan a trip", &mut BufferedWriter::new()).await;
        let job = rx.try_recv().unwrap();
        assert_eq!(job.conversation_id, harness.conversation.id);
        assert_eq!(job.first_user_message, "plan a trip");
        assert_eq!(harness.turns().await.len(), 2);

        // Still the placeholder, so the second turn asks again with the first message.
        harness.run("and hotels", &mut BufferedWriter::new()).await;
        assert_eq!(rx.try_recv().unwrap().first_user_message, "plan a trip");

        harness
            .conversations
            .update_title_if(&harness.conversation.id, DEFAULT_CONVERSATION_TITLE, "Trip")
            .await
            .unwrap();
        harness.run("more", &mut BufferedWriter::new()).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_no_title_request_after_failure() {
        let (harness, mut rx) = with_title_channel(
            Harness::new(vec![MockStream::tokens_without_sentinel(&["x"]).then_fail("reset")])
                .await,
        );

        harness.run("hello", &mut BufferedWriter::new()).await;
        assert!(rx.try_recv().is_err());
    }
}
