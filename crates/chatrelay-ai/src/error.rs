//! Error types for the upstream provider layer

use thiserror::Error;

/// Upstream provider error types
#[derive(Error, Debug)]
pub enum AiError {
    #[error("LLM error: {0}")]
    Llm(String),

    #[error("{provider} API error ({status}): {message}")]
    LlmHttp {
        provider: String,
        status: u16,
        message: String,
        retry_after_secs: Option<u64>,
    },

    #[error("Upstream timed out: {0}")]
    Timeout(String),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Invalid response format: {0}")]
    InvalidFormat(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AiError {
    /// Whether a caller may reasonably retry the same request.
    pub fn is_retryable(&self) -> bool {
        match self {
            AiError::LlmHttp { status, .. } => *status == 429 || *status >= 500,
            AiError::Timeout(_) => true,
            AiError::Http(err) => err.is_timeout() || err.is_connect(),
            AiError::Llm(message) => {
                let lower = message.to_ascii_lowercase();
                lower.contains("rate limit")
                    || lower.contains("timeout")
                    || lower.contains("overloaded")
            }
            AiError::Stream(_) | AiError::InvalidFormat(_) | AiError::Json(_) => false,
        }
    }

    /// Whether the error is a timeout, as opposed to a refusal or a broken connection.
    pub fn is_timeout(&self) -> bool {
        match self {
            AiError::Timeout(_) => true,
            AiError::Http(err) => err.is_timeout(),
            _ => false,
        }
    }
}

/// Result type alias for upstream operations
pub type Result<T> = std::result::Result<T, AiError>;
