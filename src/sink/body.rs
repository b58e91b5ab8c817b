//! Sink feeding an axum streaming response body

use async_trait::async_trait;
use axum::body::Body;
use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::{FrameSink, SinkError};

/// Chunks queued between the writer and hyper. One is enough to keep the
/// socket busy while the next part is staged.
pub const DEFAULT_CHUNK_CAPACITY: usize = 1;

/// Sink that stages writes and hands each flushed part to a response body.
///
/// A flush waits for room in the bounded channel, so the writer never runs
/// ahead of the connection by more than the channel capacity. When hyper
/// drops the body (client gone) the receiver closes and every later flush
/// fails with [`SinkError::Disconnected`].
pub struct BodySink {
    tx: mpsc::Sender<Result<Bytes, std::io::Error>>,
    staged: BytesMut,
}

impl BodySink {
    /// Creates a sink and the response body it feeds
    pub fn new() -> (Self, Body) {
        Self::with_capacity(DEFAULT_CHUNK_CAPACITY)
    }

    /// Creates a sink whose channel holds up to `capacity` flushed parts
    pub fn with_capacity(capacity: usize) -> (Self, Body) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let body = Body::from_stream(ReceiverStream::new(rx));
        (
            Self {
                tx,
                staged: BytesMut::new(),
            },
            body,
        )
    }

    /// Creates a sink around an existing channel sender
    pub fn from_sender(tx: mpsc::Sender<Result<Bytes, std::io::Error>>) -> Self {
        Self {
            tx,
            staged: BytesMut::new(),
        }
    }

    /// Bytes written since the last flush
    pub fn staged_len(&self) -> usize {
        self.staged.len()
    }
}

#[async_trait]
impl FrameSink for BodySink {
    async fn write(&mut self, chunk: &[u8]) -> Result<(), SinkError> {
        if self.tx.is_closed() {
            return Err(SinkError::Disconnected);
        }
        self.staged.extend_from_slice(chunk);
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), SinkError> {
        if self.staged.is_empty() {
            return Ok(());
        }
        let chunk = self.staged.split().freeze();
        self.tx
            .send(Ok(chunk))
            .await
            .map_err(|_| SinkError::Disconnected)
    }

    async fn closed(&mut self) {
        self.tx.closed().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_flush_sends_one_chunk_per_part() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut sink = BodySink::from_sender(tx);

        sink.write(b"head").await.unwrap();
        sink.write(b"payload").await.unwrap();
        assert_eq!(sink.staged_len(), 11);
        assert!(rx.try_recv().is_err());

        sink.flush().await.unwrap();
        assert_eq!(sink.staged_len(), 0);

        let chunk = rx.recv().await.unwrap().unwrap();
        assert_eq!(&chunk[..], b"headpayload");
    }

    #[tokio::test]
    async fn test_empty_flush_sends_nothing() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut sink = BodySink::from_sender(tx);

        sink.flush().await.unwrap();
        drop(sink);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_dropped_receiver_is_disconnect() {
        let (tx, rx) = mpsc::channel(1);
        let mut sink = BodySink::from_sender(tx);
        drop(rx);

        assert!(matches!(
            sink.write(b"x").await,
            Err(SinkError::Disconnected)
        ));

        // closed() must resolve immediately
        sink.closed().await;
    }

    #[tokio::test]
    async fn test_flush_after_disconnect_fails() {
        let (tx, rx) = mpsc::channel(1);
        let mut sink = BodySink::from_sender(tx);

        sink.write(b"frame").await.unwrap();
        drop(rx);

        assert!(matches!(sink.flush().await, Err(SinkError::Disconnected)));
    }
}
