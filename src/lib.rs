//! Live MJPEG streaming over HTTP
//!
//! This library serves `multipart/x-mixed-replace` streams with:
//! - Per-frame boundary, `Content-Type` and `Content-Length` framing
//! - A flush after every frame so browsers show it immediately
//! - Prompt teardown when the client disconnects
//! - Pluggable frame sources (fixed sequences, test patterns, live feeds)
//! - Lock-free atomics for statistics
//!
//! # Example
//!
//! ```no_run
//! use rust_mjpeg_http::sink::IoSink;
//! use rust_mjpeg_http::source::{FrameSource, TestPattern};
//! use rust_mjpeg_http::MjpegWriter;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let writer = MjpegWriter::new("abcd4321")?;
//! let pattern = TestPattern::demo()?;
//! let mut sink = IoSink::new(tokio::io::stdout());
//!
//! let report = writer.stream_frames(&mut sink, pattern.open()).await?;
//! println!("sent {} frames", report.frames_sent);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod frame;
pub mod multipart;
pub mod server;
pub mod sink;
pub mod source;
pub mod streamer;

// Re-exports for convenience
pub use frame::Frame;
pub use sink::{BodySink, FrameSink, IoSink, SinkError};
pub use source::{FixedSequence, FrameSource, FrameStream, SourceError, TestPattern};
pub use streamer::{
    MjpegWriter, StatsSnapshot, StreamEnd, StreamError, StreamReport, StreamResult, StreamStats,
};
