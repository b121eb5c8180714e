//! Deterministic mock LLM client for relay and reliability tests.

use std::collections::VecDeque;
use std::sync::Arc;

use async_stream::stream;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Mutex;
use tokio::time::{Duration, sleep};

use crate::error::{AiError, Result};

use super::{ByteStream, CompletionRequest, LlmClient, Role};

/// How a scripted stream ends after its chunks were delivered.
#[derive(Debug, Clone, PartialEq)]
pub enum MockStreamEnd {
    /// Close the connection.
    Close,
    /// Fail the read with a stream error.
    Fail(String),
    /// Keep the connection open without sending anything.
    Stall,
}

/// Scripted response to one `open_stream` call.
#[derive(Debug, Clone)]
pub enum MockStream {
    /// Accept the request and deliver raw chunks.
    Chunks {
        chunks: Vec<Bytes>,
        delay_ms: u64,
        end: MockStreamEnd,
    },
    /// Refuse the request.
    ConnectError(String),
    /// Refuse the request with a timeout.
    ConnectTimeout,
}

impl MockStream {
    /// Deliver the given raw chunks as-is.
    pub fn chunks<I, C>(chunks: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<Bytes>,
    {
        Self::Chunks {
            chunks: chunks.into_iter().map(Into::into).collect(),
            delay_ms: 0,
            end: MockStreamEnd::Close,
        }
    }

    /// One `{"token": ..}` frame per chunk, then the sentinel.
    pub fn tokens(tokens: &[&str]) -> Self {
        let mut chunks: Vec<Bytes> = tokens
            .iter()
            .map(|token| Bytes::from(token_frame(token)))
            .collect();
        chunks.push(Bytes::from_static(b"data: [DONE]\n\n"));
        Self::chunks(chunks)
    }

    /// Like [`MockStream::tokens`] but without the sentinel.
    pub fn tokens_without_sentinel(tokens: &[&str]) -> Self {
        Self::chunks(tokens.iter().map(|token| Bytes::from(token_frame(token))))
    }

    pub fn connect_error(message: impl Into<String>) -> Self {
        Self::ConnectError(message.into())
    }

    pub fn connect_timeout() -> Self {
        Self::ConnectTimeout
    }

    /// Wait this long before each chunk.
    pub fn with_delay(mut self, delay: u64) -> Self {
        if let Self::Chunks { delay_ms, .. } = &mut self {
            *delay_ms = delay;
        }
        self
    }

    /// Fail the connection after the chunks were delivered.
    pub fn then_fail(mut self, message: impl Into<String>) -> Self {
        if let Self::Chunks { end, .. } = &mut self {
            *end = MockStreamEnd::Fail(message.into());
        }
        self
    }

    /// Go silent after the chunks were delivered.
    pub fn then_stall(mut self) -> Self {
        if let Self::Chunks { end, .. } = &mut self {
            *end = MockStreamEnd::Stall;
        }
        self
    }
}

/// Encode one fragment in the relay's frame shape.
pub fn token_frame(token: &str) -> String {
    format!("data: {}\n\n", serde_json::json!({ "token": token }))
}

/// Scripted outcome of one `complete` call.
#[derive(Debug, Clone, PartialEq)]
enum MockCompletion {
    Text(String),
    Error(String),
    Stall,
}

/// A deterministic mock LLM client driven by scripted steps.
#[derive(Debug, Clone, Default)]
pub struct MockLlmClient {
    streams: Arc<Mutex<VecDeque<MockStream>>>,
    completions: Arc<Mutex<VecDeque<MockCompletion>>>,
    requests: Arc<Mutex<Vec<CompletionRequest>>>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_streams(streams: Vec<MockStream>) -> Self {
        Self {
            streams: Arc::new(Mutex::new(VecDeque::from(streams))),
            ..Self::default()
        }
    }

    pub async fn push_stream(&self, stream: MockStream) {
        self.streams.lock().await.push_back(stream);
    }

    /// Script the next `complete` call to return `text`.
    pub async fn push_completion(&self, text: impl Into<String>) {
        self.completions.lock().await.push_back(MockCompletion::Text(text.into()));
    }

    /// Script the next `complete` call to fail.
    pub async fn push_completion_error(&self, message: impl Into<String>) {
        self.completions.lock().await.push_back(MockCompletion::Error(message.into()));
    }

    /// Script the next `complete` call to never answer.
    pub async fn push_completion_stall(&self) {
        self.completions.lock().await.push_back(MockCompletion::Stall);
    }

    /// Every request received so far, in arrival order.
    pub async fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().await.clone()
    }

    async fn record(&self, request: &CompletionRequest) {
        self.requests.lock().await.push(request.clone());
    }

    fn fallback_stream(request: &CompletionRequest) -> MockStream {
        let text = request
            .messages
            .iter()
            .rev()
            .find(|msg| msg.role == Role::User)
            .map(|msg| format!("mock-echo: {}", msg.content))
            .unwrap_or_else(|| "mock-ok".to_string());
        MockStream::tokens(&[text.as_str()])
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    fn provider(&self) -> &str {
        "mock"
    }

    async fn open_stream(&self, request: CompletionRequest) -> Result<ByteStream> {
        self.record(&request).await;
        let step = self
            .streams
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Self::fallback_stream(&request));

        let (chunks, delay_ms, end) = match step {
            MockStream::ConnectError(message) => return Err(AiError::Llm(message)),
            MockStream::ConnectTimeout => {
                return Err(AiError::Timeout("mock connect timeout".to_string()));
            }
            MockStream::Chunks {
                chunks,
                delay_ms,
                end,
            } => (chunks, delay_ms, end),
        };

        Ok(Box::pin(stream! {
            for chunk in chunks {
                if delay_ms > 0 {
                    sleep(Duration::from_millis(delay_ms)).await;
                }
                yield Ok(chunk);
            }
            match end {
                MockStreamEnd::Close => {}
                MockStreamEnd::Fail(message) => {
                    yield Err(AiError::Stream(message));
                }
                MockStreamEnd::Stall => {
                    futures::future::pending::<()>().await;
                }
            }
        }))
    }

    async fn complete(&self, request: CompletionRequest) -> Result<String> {
        self.record(&request).await;
        let next = self.completions.lock().await.pop_front();
        match next {
            Some(MockCompletion::Text(text)) => Ok(text),
            Some(MockCompletion::Error(message)) => Err(AiError::Llm(message)),
            Some(MockCompletion::Stall) => futures::future::pending().await,
            None => Ok("Mock title".to_string()),
        }
    }
}
