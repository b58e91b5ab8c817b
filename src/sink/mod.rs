//! Byte sinks the stream writer emits into
//!
//! A sink is the transport side of a session: ordered writes, an explicit
//! flush that pushes everything written so far towards the peer, and a way
//! to notice that the peer went away.

mod body;
mod io;

pub use body::BodySink;
pub use io::IoSink;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("peer disconnected")]
    Disconnected,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sink does not support flushing")]
    FlushUnsupported,
}

/// Ordered, flushable byte sink for one connection.
#[async_trait]
pub trait FrameSink: Send {
    /// Queues bytes for the peer. May hold them until the next flush.
    async fn write(&mut self, chunk: &[u8]) -> Result<(), SinkError>;

    /// Pushes all queued bytes to the transport.
    async fn flush(&mut self) -> Result<(), SinkError>;

    /// Whether `flush` actually forces delivery. Streaming requires it.
    fn supports_flush(&self) -> bool {
        true
    }

    /// Resolves once the peer is known to be gone.
    ///
    /// Sinks that can only detect a disconnect through a failed write never
    /// resolve.
    async fn closed(&mut self) {
        std::future::pending::<()>().await
    }
}
