//! LLM module - upstream provider abstraction and event-stream framing

mod client;
pub mod extract;
pub mod mock_client;
mod openai;
pub mod retry;
pub mod sse;

pub use client::{ByteStream, CompletionRequest, LlmClient, Message, Role};
pub use extract::extract_token;
pub use mock_client::{MockLlmClient, MockStream, MockStreamEnd};
pub use openai::OpenAIClient;
pub use retry::LlmRetryConfig;
pub use sse::{DONE_SENTINEL, FrameParser, FrameStream, SseFrame, Utf8ChunkDecoder, frames};
