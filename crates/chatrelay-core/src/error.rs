//! Relay error taxonomy.

use chatrelay_ai::AiError;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RelayError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Upstream connection failed: {0}")]
    UpstreamConnect(String),

    #[error("Upstream timed out: {0}")]
    UpstreamTimeout(String),

    #[error("Upstream stream failed: {0}")]
    UpstreamStream(String),

    #[error("Persistence failed: {0}")]
    Persistence(String),
}

impl RelayError {
    pub fn persistence(context: &str, err: anyhow::Error) -> Self {
        Self::Persistence(format!("{context}: {err:#}"))
    }

    /// Map a failure to open the upstream stream.
    pub fn from_connect(err: AiError) -> Self {
        match err {
            AiError::Timeout(message) => Self::UpstreamTimeout(message),
            err if err.is_timeout() => Self::UpstreamTimeout(err.to_string()),
            err => Self::UpstreamConnect(err.to_string()),
        }
    }

    /// Map a failure after the upstream stream was open.
    pub fn from_stream(err: AiError) -> Self {
        match err {
            AiError::Timeout(message) => Self::UpstreamTimeout(message),
            AiError::Stream(message) => Self::UpstreamStream(message),
            err if err.is_timeout() => Self::UpstreamTimeout(err.to_string()),
            err => Self::UpstreamStream(err.to_string()),
        }
    }

    /// HTTP status used when the failure happens before streaming began.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::NotFound(_) => 404,
            Self::UpstreamConnect(_)
            | Self::UpstreamTimeout(_)
            | Self::UpstreamStream(_)
            | Self::Persistence(_) => 500,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound(_) => "not_found",
            Self::UpstreamConnect(_) => "upstream_connect",
            Self::UpstreamTimeout(_) => "upstream_timeout",
            Self::UpstreamStream(_) => "upstream_stream",
            Self::Persistence(_) => "persistence",
        }
    }

    /// Whether the caller may retry the whole invocation.
    ///
    /// Nothing is retried inside an invocation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::UpstreamConnect(_) | Self::UpstreamTimeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(RelayError::Validation("empty".into()).status_code(), 400);
        assert_eq!(RelayError::NotFound("x".into()).status_code(), 404);
        assert_eq!(RelayError::UpstreamTimeout("x".into()).status_code(), 500);
        assert_eq!(RelayError::Persistence("x".into()).status_code(), 500);
    }

    #[test]
    fn test_timeouts_keep_their_kind() {
        let connect = RelayError::from_connect(AiError::Timeout("connect".into()));
        assert_eq!(connect.kind(), "upstream_timeout");
        assert!(connect.is_retryable());

        let stream = RelayError::from_stream(AiError::Stream("reset".into()));
        assert_eq!(stream.kind(), "upstream_stream");
        assert_eq!(stream.to_string(), "Upstream stream failed: reset");
        assert!(!stream.is_retryable());
    }

    #[test]
    fn test_persistence_keeps_context_chain() {
        let err = anyhow::anyhow!("disk full").context("append turn");
        let relay = RelayError::persistence("user turn", err);
        assert_eq!(
            relay.to_string(),
            "Persistence failed: user turn: append turn: disk full"
        );
    }
}
