//! Background conversation titling.
//!
//! Sessions hand jobs to a detached worker over a channel. The worker owns its
//! error boundary: nothing it does can reach a client response.

use std::sync::Arc;
use std::time::Duration;

use chatrelay_ai::{AiError, CompletionRequest, LlmClient, LlmRetryConfig, Message};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::storage::ConversationStore;

const MAX_TITLE_CHARS: usize = 80;
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

const TITLE_INSTRUCTIONS: &str = "Summarize the user's message as a conversation title of at most six words. \
Reply with the title only, without quotes or punctuation at the end.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TitleJob {
    pub conversation_id: String,
    pub model: String,
    pub first_user_message: String,
}

/// Sending side of the title worker.
#[derive(Debug, Clone)]
pub struct TitleHandle {
    pub(crate) tx: mpsc::UnboundedSender<TitleJob>,
}

impl TitleHandle {
    /// Queue a job; returns false once the worker has stopped.
    pub fn enqueue(&self, job: TitleJob) -> bool {
        self.tx.send(job).is_ok()
    }
}

pub struct TitleWorker {
    llm: Arc<dyn LlmClient>,
    conversations: Arc<dyn ConversationStore>,
    placeholder: String,
    retry: LlmRetryConfig,
    request_timeout: Duration,
}

impl TitleWorker {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        conversations: Arc<dyn ConversationStore>,
        placeholder: impl Into<String>,
    ) -> Self {
        Self {
            llm,
            conversations,
            placeholder: placeholder.into(),
            retry: LlmRetryConfig::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_retry(mut self, retry: LlmRetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Bound on each provider call; the worker handles one job at a time.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Start the worker; it stops when every handle is dropped.
    pub fn spawn(self) -> (TitleHandle, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<TitleJob>();
        let task = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                if let Err(err) = self.process(&job).await {
                    warn!(
                        conversation_id = %job.conversation_id,
                        error = %format!("{err:#}"),
                        "Failed to generate conversation title"
                    );
                }
            }
            debug!("Title worker stopped");
        });
        (TitleHandle { tx }, task)
    }

    /// Generate and store a title for one job.
    ///
    /// Returns the stored title, or `None` when the conversation was renamed
    /// or removed in the meantime.
    pub async fn process(&self, job: &TitleJob) -> anyhow::Result<Option<String>> {
        if !self.still_placeholder(&job.conversation_id).await? {
            return Ok(None);
        }

        let raw = self.request_title(job).await?;
        let Some(title) = clean_title(&raw) else {
            return Err(anyhow::anyhow!("provider returned an empty title"));
        };

        let written = self
            .conversations
            .update_title_if(&job.conversation_id, &self.placeholder, &title)
            .await?;
        if !written {
            debug!(conversation_id = %job.conversation_id, "Title changed meanwhile, skipping");
            return Ok(None);
        }

        info!(conversation_id = %job.conversation_id, title = %title, "Conversation titled");
        Ok(Some(title))
    }

    async fn still_placeholder(&self, conversation_id: &str) -> anyhow::Result<bool> {
        Ok(self
            .conversations
            .get(conversation_id)
            .await?
            .is_some_and(|conversation| conversation.title == self.placeholder))
    }

    async fn request_title(&self, job: &TitleJob) -> Result<String, AiError> {
        let request = CompletionRequest::new(
            job.model.clone(),
            vec![
                Message::system(TITLE_INSTRUCTIONS),
                Message::user(job.first_user_message.clone()),
            ],
        )
        .with_temperature(0.2)
        .with_max_tokens(24);

        let mut attempt = 0;
        loop {
            let result = tokio::time::timeout(self.request_timeout, self.llm.complete(request.clone()))
                .await
                .unwrap_or_else(|_| {
                    Err(AiError::Timeout(format!(
                        "title request exceeded {}ms",
                        self.request_timeout.as_millis()
                    )))
                });
            match result {
                Ok(text) => return Ok(text),
                Err(err) => {
                    attempt += 1;
                    let Some(delay) = self.retry.next_delay(attempt, &err) else {
                        return Err(err);
                    };
                    debug!(attempt, ?delay, error = %err, "Retrying title request");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Normalise a provider reply into a stored title.
pub fn clean_title(raw: &str) -> Option<String> {
    let line = raw.lines().map(str::trim).find(|line| !line.is_empty())?;
    let line = line
        .strip_prefix("Title:")
        .or_else(|| line.strip_prefix("title:"))
        .unwrap_or(line);
    let trimmed = line
        .trim()
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '`' | '“' | '”'))
        .trim_end_matches('.')
        .trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.chars().take(MAX_TITLE_CHARS).collect())
}
