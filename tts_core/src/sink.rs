//! Destinations for the framed byte stream.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::SinkClosed;

/// Ordered byte-chunk consumer with backpressure: `send` resolves only once
/// the chunk has been accepted.
#[async_trait]
pub trait OutputSink: Send + Sync {
    async fn send(&mut self, chunk: Bytes) -> Result<(), SinkClosed>;

    /// Resolves when the consumer has gone away. Sinks that cannot observe
    /// this never resolve.
    async fn closed(&self) {
        std::future::pending::<()>().await
    }
}

/// Sink backed by a bounded channel. The receiver usually feeds an HTTP body;
/// dropping it closes the sink.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<Bytes>,
}

/// Create a channel sink holding at most `capacity` unread chunks.
pub fn channel_sink(capacity: usize) -> (ChannelSink, mpsc::Receiver<Bytes>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (ChannelSink { tx }, rx)
}

#[async_trait]
impl OutputSink for ChannelSink {
    async fn send(&mut self, chunk: Bytes) -> Result<(), SinkClosed> {
        self.tx.send(chunk).await.map_err(|_| SinkClosed)
    }

    async fn closed(&self) {
        self.tx.closed().await
    }
}

/// Collects every chunk in memory. Used for complete (non-streaming) replies.
#[derive(Debug, Default)]
pub struct MemorySink {
    chunks: Vec<Bytes>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chunks(&self) -> &[Bytes] {
        &self.chunks
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.chunks.concat()
    }
}

#[async_trait]
impl OutputSink for MemorySink {
    async fn send(&mut self, chunk: Bytes) -> Result<(), SinkClosed> {
        self.chunks.push(chunk);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_sink_reports_dropped_receiver() {
        let (mut sink, rx) = channel_sink(1);
        sink.send(Bytes::from_static(b"a")).await.unwrap();
        drop(rx);

        assert_eq!(sink.send(Bytes::from_static(b"b")).await, Err(SinkClosed));
        // resolves immediately once the receiver is gone
        sink.closed().await;
    }

    #[tokio::test]
    async fn test_memory_sink_keeps_order() {
        let mut sink = MemorySink::new();
        sink.send(Bytes::from_static(b"ab")).await.unwrap();
        sink.send(Bytes::from_static(b"cd")).await.unwrap();
        assert_eq!(sink.chunks().len(), 2);
        assert_eq!(sink.into_bytes(), b"abcd");
    }
}
