//! OpenAI-compatible chat-completions provider

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{AiError, Result};
use crate::http_client::build_http_client;
use crate::llm::client::{ByteStream, CompletionRequest, LlmClient, Message};
use crate::llm::retry::response_to_error;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// OpenAI client
pub struct OpenAIClient {
    client: Client,
    api_key: String,
    base_url: String,
    request_timeout: Option<Duration>,
}

impl OpenAIClient {
    /// Create a new OpenAI client
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: build_http_client(DEFAULT_CONNECT_TIMEOUT),
            api_key: api_key.into(),
            base_url: "https://api.openai.com/v1".to_string(),
            request_timeout: None,
        }
    }

    /// Set custom base URL (for API-compatible services)
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Bound the time spent establishing the TCP/TLS connection
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.client = build_http_client(timeout);
        self
    }

    /// Bound whole non-streaming requests (streaming reads are bounded by the caller)
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    async fn send(&self, body: &OpenAIRequest<'_>, timeout: Option<Duration>) -> Result<reqwest::Response> {
        let mut builder = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(body);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await.map_err(|err| {
            if err.is_timeout() {
                AiError::Timeout(format!("OpenAI request timed out: {}", err))
            } else {
                AiError::Http(err)
            }
        })?;

        if !response.status().is_success() {
            return Err(response_to_error(response, "OpenAI").await);
        }
        Ok(response)
    }
}

#[derive(Serialize)]
struct OpenAIRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

impl<'a> OpenAIRequest<'a> {
    fn from_request(request: &'a CompletionRequest, stream: bool) -> Self {
        Self {
            model: &request.model,
            messages: &request.messages,
            stream,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        }
    }
}

#[derive(Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Deserialize)]
struct OpenAIChoice {
    message: OpenAIResponseMessage,
}

#[derive(Deserialize)]
struct OpenAIResponseMessage {
    content: Option<String>,
}

#[async_trait]
impl LlmClient for OpenAIClient {
    fn provider(&self) -> &str {
        "openai"
    }

    async fn open_stream(&self, request: CompletionRequest) -> Result<ByteStream> {
        let body = OpenAIRequest::from_request(&request, true);
        let response = self.send(&body, None).await?;

        tracing::debug!(model = %request.model, messages = request.messages.len(), "OpenAI stream opened");

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|err| AiError::Stream(err.to_string())));
        Ok(Box::pin(stream))
    }

    async fn complete(&self, request: CompletionRequest) -> Result<String> {
        let body = OpenAIRequest::from_request(&request, false);
        let response = self.send(&body, self.request_timeout).await?;

        let data: OpenAIResponse = response.json().await?;
        data.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| AiError::InvalidFormat("response carried no message content".to_string()))
    }
}
