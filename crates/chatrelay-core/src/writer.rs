//! Downstream writers: where relay events go on their way to the client.

use async_trait::async_trait;
use serde_json::json;
use thiserror::Error;
use tokio::sync::mpsc;

use chatrelay_ai::DONE_SENTINEL;

/// One client-visible event of the relay stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    Token(String),
    Done,
    Error(String),
}

impl RelayEvent {
    /// Text that follows `data: ` on the wire.
    pub fn data(&self) -> String {
        match self {
            Self::Token(token) => json!({ "token": token }).to_string(),
            Self::Done => DONE_SENTINEL.to_string(),
            Self::Error(message) => json!({ "error": message }).to_string(),
        }
    }

    pub fn to_frame(&self) -> String {
        format!("data: {}\n\n", self.data())
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Token(_))
    }
}

/// The client is gone; further writes are pointless.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("downstream client disconnected")]
pub struct DownstreamClosed;

#[async_trait]
pub trait DownstreamWriter: Send {
    /// Deliver one event now; no batching.
    async fn write(&mut self, event: RelayEvent) -> Result<(), DownstreamClosed>;

    async fn close(&mut self);
}

/// Immediate-flush writer feeding the HTTP response body.
pub struct ChannelWriter {
    tx: Option<mpsc::Sender<RelayEvent>>,
}

impl ChannelWriter {
    pub fn new(tx: mpsc::Sender<RelayEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<RelayEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl DownstreamWriter for ChannelWriter {
    async fn write(&mut self, event: RelayEvent) -> Result<(), DownstreamClosed> {
        let Some(tx) = &self.tx else {
            return Err(DownstreamClosed);
        };
        tx.send(event).await.map_err(|_| DownstreamClosed)
    }

    async fn close(&mut self) {
        // Dropping the sender ends the receiver's stream.
        self.tx = None;
    }
}

/// Collects events in memory.
#[derive(Debug, Default)]
pub struct BufferedWriter {
    events: Vec<RelayEvent>,
    fail_after: Option<usize>,
    closed: bool,
}

impl BufferedWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `writes` events, then behave like a disconnected client.
    pub fn fail_after(writes: usize) -> Self {
        Self {
            fail_after: Some(writes),
            ..Self::default()
        }
    }

    pub fn events(&self) -> &[RelayEvent] {
        &self.events
    }

    pub fn tokens(&self) -> Vec<String> {
        self.events
            .iter()
            .filter_map(|event| match event {
                RelayEvent::Token(token) => Some(token.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn into_events(self) -> Vec<RelayEvent> {
        self.events
    }
}

#[async_trait]
impl DownstreamWriter for BufferedWriter {
    async fn write(&mut self, event: RelayEvent) -> Result<(), DownstreamClosed> {
        if self.closed || self.fail_after.is_some_and(|limit| self.events.len() >= limit) {
            return Err(DownstreamClosed);
        }
        self.events.push(event);
        Ok(())
    }

    async fn close(&mut self) {
        self.closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_format() {
        assert_eq!(
            RelayEvent::Token("Hi \"x\"".into()).to_frame(),
            "data: {\"token\":\"Hi \\\"x\\\"\"}\n\n"
        );
        assert_eq!(RelayEvent::Done.to_frame(), "data: [DONE]\n\n");
        assert_eq!(
            RelayEvent::Error("boom".into()).data(),
            "{\"error\":\"boom\"}"
        );
        assert!(RelayEvent::Done.is_terminal());
        assert!(!RelayEvent::Token(String::new()).is_terminal());
    }

    #[tokio::test]
    async fn test_channel_writer_reports_dropped_receiver() {
        let (mut writer, mut rx) = ChannelWriter::channel(4);
        writer.write(RelayEvent::Token("a".into())).await.unwrap();
        assert_eq!(rx.recv().await, Some(RelayEvent::Token("a".into())));

        drop(rx);
        assert_eq!(
            writer.write(RelayEvent::Token("b".into())).await,
            Err(DownstreamClosed)
        );
    }

    #[tokio::test]
    async fn test_channel_writer_close_ends_stream() {
        let (mut writer, mut rx) = ChannelWriter::channel(4);
        writer.write(RelayEvent::Done).await.unwrap();
        writer.close().await;

        assert_eq!(rx.recv().await, Some(RelayEvent::Done));
        assert_eq!(rx.recv().await, None);
        assert!(writer.write(RelayEvent::Done).await.is_err());
    }

    #[tokio::test]
    async fn test_buffered_writer_fail_after() {
        let mut writer = BufferedWriter::fail_after(2);
        for token in ["a", "b"] {
            writer.write(RelayEvent::Token(token.into())).await.unwrap();
        }
        assert!(writer.write(RelayEvent::Token("c".into())).await.is_err());
        assert_eq!(writer.tokens(), vec!["a", "b"]);
    }
}
