use std::time::Duration;

use reqwest::Response;

use crate::error::AiError;

/// Backoff policy for callers that choose to retry provider calls.
#[derive(Debug, Clone)]
pub struct LlmRetryConfig {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for LlmRetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay_ms: 200,
            max_delay_ms: 5_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl LlmRetryConfig {
    pub fn delay_for(&self, attempt: u32, retry_after_secs: Option<u64>) -> Duration {
        if let Some(seconds) = retry_after_secs {
            return Duration::from_secs(seconds).min(Duration::from_millis(self.max_delay_ms));
        }

        let multiplier = self
            .backoff_multiplier
            .powi(attempt.saturating_sub(1) as i32);
        let delay = (self.initial_delay_ms as f64 * multiplier) as u64;
        Duration::from_millis(delay.min(self.max_delay_ms))
    }

    /// Delay before retrying `error` after `attempt` failed attempts, if it should be retried.
    pub fn next_delay(&self, attempt: u32, error: &AiError) -> Option<Duration> {
        if attempt > self.max_retries || !error.is_retryable() {
            return None;
        }
        let retry_after = match error {
            AiError::LlmHttp {
                retry_after_secs, ..
            } => *retry_after_secs,
            _ => None,
        };
        Some(self.delay_for(attempt, retry_after))
    }
}

pub fn parse_retry_after(response: &Response) -> Option<u64> {
    response
        .headers()
        .get("retry-after")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok())
}

pub async fn response_to_error(response: Response, provider: &str) -> AiError {
    let status = response.status().as_u16();
    let retry_after = parse_retry_after(&response);
    let body = response.text().await.unwrap_or_default();

    // Truncate error body to prevent leaking large or sensitive responses.
    const MAX_ERROR_BODY: usize = 512;
    let message = if body.len() > MAX_ERROR_BODY {
        let mut end = MAX_ERROR_BODY;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... [truncated]", &body[..end])
    } else {
        body
    };

    AiError::LlmHttp {
        provider: provider.to_string(),
        status,
        message,
        retry_after_secs: retry_after,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http_error(status: u16, retry_after_secs: Option<u64>) -> AiError {
        AiError::LlmHttp {
            provider: "openai".to_string(),
            status,
            message: String::new(),
            retry_after_secs,
        }
    }

    #[test]
    fn test_backoff_is_capped() {
        let config = LlmRetryConfig {
            max_delay_ms: 300,
            ..LlmRetryConfig::default()
        };
        assert_eq!(config.delay_for(2, None), Duration::from_millis(300));
        assert_eq!(config.delay_for(1, Some(60)), Duration::from_millis(300));
    }

    #[test]
    fn test_next_delay_follows_retry_after() {
        let config = LlmRetryConfig::default();
        assert_eq!(
            config.next_delay(1, &http_error(429, Some(3))),
            Some(Duration::from_secs(3))
        );
        assert_eq!(
            config.next_delay(2, &http_error(503, None)),
            Some(Duration::from_millis(400))
        );
    }

    #[test]
    fn test_next_delay_stops_after_budget_or_fatal_error() {
        let config = LlmRetryConfig::default();
        assert!(config.next_delay(3, &http_error(503, None)).is_none());
        assert!(config.next_delay(1, &http_error(401, None)).is_none());
        assert!(config.next_delay(1, &AiError::Stream("reset".to_string())).is_none());
        assert!(config.next_delay(1, &AiError::Timeout("slow".to_string())).is_some());
    }
}
