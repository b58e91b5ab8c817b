//! Sink over any tokio `AsyncWrite`

use async_trait::async_trait;
use std::io::ErrorKind;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::{FrameSink, SinkError};

/// Writes straight to an `AsyncWrite` such as a `TcpStream`.
pub struct IoSink<W> {
    inner: W,
}

impl<W> IoSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }
}

fn classify(err: std::io::Error) -> SinkError {
    match err.kind() {
        ErrorKind::BrokenPipe
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::NotConnected
        | ErrorKind::UnexpectedEof
        | ErrorKind::WriteZero => SinkError::Disconnected,
        _ => SinkError::Io(err),
    }
}

#[async_trait]
impl<W> FrameSink for IoSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn write(&mut self, chunk: &[u8]) -> Result<(), SinkError> {
        self.inner.write_all(chunk).await.map_err(classify)
    }

    async fn flush(&mut self) -> Result<(), SinkError> {
        self.inner.flush().await.map_err(classify)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_writes_reach_reader() {
        let (client, mut server) = tokio::io::duplex(64);
        let mut sink = IoSink::new(client);

        sink.write(b"hello ").await.unwrap();
        sink.write(b"world").await.unwrap();
        sink.flush().await.unwrap();
        drop(sink);

        let mut received = Vec::new();
        server.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"hello world");
    }

    #[tokio::test]
    async fn test_closed_reader_is_disconnect() {
        let (client, server) = tokio::io::duplex(64);
        drop(server);
        let mut sink = IoSink::new(client);

        assert!(matches!(
            sink.write(b"frame").await,
            Err(SinkError::Disconnected)
        ));
    }

    #[tokio::test]
    async fn test_other_errors_stay_io() {
        let mock = tokio_test::io::Builder::new()
            .write_error(std::io::Error::new(ErrorKind::Other, "disk on fire"))
            .build();
        let mut sink = IoSink::new(mock);

        assert!(matches!(sink.write(b"x").await, Err(SinkError::Io(_))));
    }
}
