//! Frame parser for delimited `data:` event streams.
//!
//! Network reads never line up with frames: one chunk may hold several frames,
//! a fraction of one, or split a multi-byte code point. The parser keeps a
//! single text buffer fed by an incremental UTF-8 decoder and only hands out
//! frames once their blank-line delimiter has arrived.

use std::pin::Pin;
use std::time::Duration;

use async_stream::stream;
use futures::{Stream, StreamExt};
use serde_json::Value;
use tracing::debug;

use crate::error::{AiError, Result};
use crate::llm::client::ByteStream;

/// Payload that marks the end of a stream.
pub const DONE_SENTINEL: &str = "[DONE]";

const DATA_TAG: &str = "data:";
const FRAME_DELIMITER: &str = "\n\n";

/// One decoded event of the upstream stream.
#[derive(Debug, Clone, PartialEq)]
pub enum SseFrame {
    Payload(Value),
    Done,
}

/// Decoded frames of one upstream response.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<SseFrame>> + Send>>;

/// Incremental UTF-8 decoder that carries split code points across calls.
#[derive(Debug, Default)]
pub struct Utf8ChunkDecoder {
    pending: Vec<u8>,
}

impl Utf8ChunkDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a chunk, holding back an incomplete trailing sequence.
    ///
    /// Invalid sequences become U+FFFD.
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        let mut bytes = std::mem::take(&mut self.pending);
        bytes.extend_from_slice(chunk);

        let mut out = String::with_capacity(bytes.len());
        let mut rest: &[u8] = &bytes;
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    break;
                }
                Err(err) => {
                    let (valid, after) = rest.split_at(err.valid_up_to());
                    out.push_str(&String::from_utf8_lossy(valid));
                    match err.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            self.pending = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    /// Flush a dangling partial sequence at end of input.
    pub fn finish(&mut self) -> String {
        if self.pending.is_empty() {
            String::new()
        } else {
            self.pending.clear();
            char::REPLACEMENT_CHARACTER.to_string()
        }
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

/// Buffer-and-split parser for one upstream response.
#[derive(Debug, Default)]
pub struct FrameParser {
    decoder: Utf8ChunkDecoder,
    buffer: String,
    done: bool,
}

impl FrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once the sentinel has been seen; later input is ignored.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feed one raw chunk and return every frame it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        let mut frames = Vec::new();
        if self.done {
            return frames;
        }

        let text = self.decoder.decode(chunk);
        self.buffer.push_str(&text);
        if self.buffer.contains('\r') {
            self.buffer = self.buffer.replace("\r\n", "\n");
        }

        while let Some(pos) = self.buffer.find(FRAME_DELIMITER) {
            let frame: String = self.buffer.drain(..pos + FRAME_DELIMITER.len()).collect();
            self.parse_frame(&frame[..pos], &mut frames);
            if self.done {
                self.buffer.clear();
                break;
            }
        }

        frames
    }

    /// Treat upstream closure as a final delimiter.
    pub fn finish(&mut self) -> Vec<SseFrame> {
        let mut frames = Vec::new();
        if self.done {
            return frames;
        }

        let tail = self.decoder.finish();
        self.buffer.push_str(&tail);
        let rest = std::mem::take(&mut self.buffer);
        if !rest.trim().is_empty() {
            self.parse_frame(&rest, &mut frames);
        }
        frames
    }

    fn parse_frame(&mut self, frame: &str, out: &mut Vec<SseFrame>) {
        for line in frame.lines() {
            // `event:`, `id:`, comments and blank lines carry no payload.
            let Some(data) = line.strip_prefix(DATA_TAG) else {
                continue;
            };
            let data = data.strip_prefix(' ').unwrap_or(data);
            let trimmed = data.trim();

            if trimmed == DONE_SENTINEL {
                self.done = true;
                out.push(SseFrame::Done);
                return;
            }
            if trimmed.is_empty() {
                continue;
            }

            match serde_json::from_str::<Value>(data) {
                Ok(value) => out.push(SseFrame::Payload(value)),
                Err(err) => {
                    debug!(error = %err, payload_len = data.len(), "Skipping malformed frame payload");
                }
            }
        }
    }
}

/// Drive a fresh [`FrameParser`] over an upstream byte stream.
///
/// Every read is bounded by `read_timeout`. The stream ends after the sentinel
/// or when the upstream closes; read failures surface as `AiError::Stream`
/// (or `AiError::Timeout`) and end the stream.
pub fn frames(mut upstream: ByteStream, read_timeout: Duration) -> FrameStream {
    Box::pin(stream! {
        let mut parser = FrameParser::new();

        loop {
            let next = match tokio::time::timeout(read_timeout, upstream.next()).await {
                Ok(next) => next,
                Err(_) => {
                    yield Err(AiError::Timeout(format!(
                        "no data from upstream within {}ms",
                        read_timeout.as_millis()
                    )));
                    return;
                }
            };

            let chunk = match next {
                Some(Ok(chunk)) => chunk,
                Some(Err(AiError::Stream(message))) => {
                    yield Err(AiError::Stream(message));
                    return;
                }
                Some(Err(err)) => {
                    yield Err(AiError::Stream(err.to_string()));
                    return;
                }
                None => break,
            };

            for frame in parser.push(&chunk) {
                let done = frame == SseFrame::Done;
                yield Ok(frame);
                if done {
                    return;
                }
            }
        }

        for frame in parser.finish() {
            yield Ok(frame);
        }
    })
}
