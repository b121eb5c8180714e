//! ChatRelay AI - upstream completion provider layer
//!
//! This crate provides:
//! - The injectable `LlmClient` trait and an OpenAI-compatible implementation
//! - A chunk-boundary independent frame parser for `data:` event streams
//! - Token extraction from decoded frame payloads
//! - A scripted mock upstream for deterministic tests

pub mod error;
mod http_client;
pub mod llm;

// Re-export commonly used types
pub use error::{AiError, Result};
pub use llm::{
    ByteStream, CompletionRequest, DONE_SENTINEL, FrameParser, FrameStream, LlmClient,
    LlmRetryConfig, Message, MockLlmClient, MockStream, MockStreamEnd, OpenAIClient, Role,
    SseFrame, extract_token, frames,
};
