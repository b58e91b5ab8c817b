//! MJPEG stream writer
//!
//! Drives the `multipart/x-mixed-replace` protocol for one connection: pulls
//! frames from a [`FrameStream`](crate::source::FrameStream), frames each one
//! with a boundary and header block, writes it and flushes so the client shows
//! it immediately.
//!
//! A session ends in one of three ways:
//! - the source runs out: the close delimiter is written and the report says
//!   [`StreamEnd::Exhausted`]
//! - the peer goes away, a timeout fires or the server shuts down: the source
//!   is dropped and the report carries the reason. This is a normal end.
//! - the source fails or a frame cannot be framed safely: a [`StreamError`].

mod stats;

pub use stats::{StatsSnapshot, StreamStats};

use bytes::BytesMut;
use futures_util::{Stream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, trace, warn};

use crate::config::StreamConfig;
use crate::frame::Frame;
use crate::multipart::{self, BoundaryError};
use crate::sink::{FrameSink, SinkError};
use crate::source::SourceError;

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("sink cannot flush, refusing to stream into a buffered response")]
    FlushUnsupported,

    #[error("invalid boundary: {0}")]
    InvalidBoundary(#[from] BoundaryError),

    #[error("frame {frame_index} has an unusable MIME type {mime_type:?}")]
    InvalidMimeType { frame_index: u64, mime_type: String },

    #[error("frame {frame_index} payload contains the boundary token")]
    BoundaryCollision { frame_index: u64 },

    #[error("frame source failed after {frame_index} frames: {source}")]
    Source {
        frame_index: u64,
        #[source]
        source: SourceError,
    },
}

impl StreamError {
    /// Frames fully delivered before the session failed
    pub fn frames_sent(&self) -> u64 {
        match self {
            Self::FlushUnsupported | Self::InvalidBoundary(_) => 0,
            Self::InvalidMimeType { frame_index, .. }
            | Self::BoundaryCollision { frame_index }
            | Self::Source { frame_index, .. } => *frame_index,
        }
    }
}

/// Why a session stopped without an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// The source has no more frames
    Exhausted,
    /// A write or flush failed, or the transport reported the peer gone
    Disconnected,
    /// The server is shutting down
    Cancelled,
    /// The source took longer than the frame timeout
    FrameTimeout,
    /// Handing a frame to the transport took longer than the flush timeout
    FlushTimeout,
}

impl StreamEnd {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exhausted => "exhausted",
            Self::Disconnected => "disconnected",
            Self::Cancelled => "cancelled",
            Self::FrameTimeout => "frame-timeout",
            Self::FlushTimeout => "flush-timeout",
        }
    }
}

/// Summary of a finished session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamReport {
    pub frames_sent: u64,
    /// Bytes handed to the sink, framing included
    pub bytes_sent: u64,
    pub elapsed: Duration,
    pub end: StreamEnd,
}

impl StreamReport {
    /// Average frame rate over the session
    pub fn fps(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.frames_sent as f64 / secs
    }
}

pub type StreamResult = Result<StreamReport, StreamError>;

/// Per-connection protocol state
#[derive(Debug)]
pub struct StreamSession {
    boundary: Arc<str>,
    frame_index: u64,
    bytes_sent: u64,
    terminated: bool,
    head: BytesMut,
}

enum SendFailure {
    Sink(SinkError),
    Timeout,
}

impl From<SinkError> for SendFailure {
    fn from(err: SinkError) -> Self {
        Self::Sink(err)
    }
}

impl StreamSession {
    pub fn new(boundary: Arc<str>) -> Self {
        Self {
            boundary,
            frame_index: 0,
            bytes_sent: 0,
            terminated: false,
            head: BytesMut::with_capacity(128),
        }
    }

    /// Number of frames delivered so far
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    fn terminate(&mut self) {
        self.terminated = true;
    }

    /// Writes delimiter, headers and payload of one frame, then flushes.
    async fn send_frame<S>(
        &mut self,
        sink: &mut S,
        frame: &Frame,
        limit: Option<Duration>,
    ) -> Result<(), SendFailure>
    where
        S: FrameSink + ?Sized,
    {
        debug_assert!(!self.terminated, "frame written after the session ended");

        self.head.clear();
        multipart::put_part_head(&mut self.head, &self.boundary, frame.mime_type(), frame.len());

        let head = &self.head;
        within(limit, async {
            sink.write(head).await?;
            sink.write(frame.payload()).await?;
            sink.flush().await
        })
        .await?;

        self.frame_index += 1;
        self.bytes_sent += (self.head.len() + frame.len()) as u64;
        Ok(())
    }

    /// Writes the close delimiter after the last frame.
    async fn finish<S>(&mut self, sink: &mut S, limit: Option<Duration>) -> Result<(), SendFailure>
    where
        S: FrameSink + ?Sized,
    {
        debug_assert!(!self.terminated, "close delimiter written after the session ended");

        let close = multipart::close_delimiter(&self.boundary);
        within(limit, async {
            sink.write(&close).await?;
            sink.flush().await
        })
        .await?;

        self.bytes_sent += close.len() as u64;
        Ok(())
    }
}

async fn within<F>(limit: Option<Duration>, delivery: F) -> Result<(), SendFailure>
where
    F: std::future::Future<Output = Result<(), SinkError>>,
{
    match limit {
        Some(limit) => timeout(limit, delivery)
            .await
            .map_err(|_| SendFailure::Timeout)?
            .map_err(SendFailure::Sink),
        None => delivery.await.map_err(SendFailure::Sink),
    }
}

enum Pull {
    Frame(Frame),
    Exhausted,
    Failed(SourceError),
    TimedOut,
}

async fn pull_frame<F>(frames: &mut F, limit: Option<Duration>) -> Pull
where
    F: Stream<Item = Result<Frame, SourceError>> + Unpin,
{
    let next = match limit {
        Some(limit) => match timeout(limit, frames.next()).await {
            Ok(next) => next,
            Err(_) => return Pull::TimedOut,
        },
        None => frames.next().await,
    };

    match next {
        Some(Ok(frame)) => Pull::Frame(frame),
        Some(Err(e)) => Pull::Failed(e),
        None => Pull::Exhausted,
    }
}

async fn wait_for_shutdown(shutdown: &mut Option<watch::Receiver<bool>>) {
    if let Some(rx) = shutdown {
        let requested = rx.wait_for(|stop| *stop).await.is_ok();
        if requested {
            return;
        }
    }
    // No signal, or the signal sender is gone: never fires
    std::future::pending::<()>().await
}

enum Event {
    Shutdown,
    PeerGone,
    Pulled(Pull),
}

/// Stream writer shared by all sessions of a route.
///
/// Holds only immutable settings, so cloning it per request is cheap.
#[derive(Debug, Clone)]
pub struct MjpegWriter {
    boundary: Arc<str>,
    frame_timeout: Option<Duration>,
    flush_timeout: Option<Duration>,
    reject_collisions: bool,
    shutdown: Option<watch::Receiver<bool>>,
}

impl MjpegWriter {
    /// Creates a writer using `boundary` as the part delimiter
    pub fn new(boundary: impl Into<String>) -> Result<Self, StreamError> {
        let boundary = boundary.into();
        multipart::validate_boundary(&boundary)?;

        Ok(Self {
            boundary: boundary.into(),
            frame_timeout: None,
            flush_timeout: None,
            reject_collisions: false,
            shutdown: None,
        })
    }

    /// Creates a writer from the `[stream]` configuration section
    pub fn from_config(config: &StreamConfig) -> Result<Self, StreamError> {
        Ok(Self::new(config.boundary.clone())?
            .with_frame_timeout(config.frame_timeout())
            .with_flush_timeout(config.flush_timeout())
            .reject_boundary_collisions(config.reject_boundary_collisions))
    }

    /// Longest wait for the source to produce the next frame
    pub fn with_frame_timeout(mut self, limit: Option<Duration>) -> Self {
        self.frame_timeout = limit;
        self
    }

    /// Longest wait for one frame to be written and flushed
    pub fn with_flush_timeout(mut self, limit: Option<Duration>) -> Self {
        self.flush_timeout = limit;
        self
    }

    /// Scan every payload for the boundary and fail the session on a match
    pub fn reject_boundary_collisions(mut self, reject: bool) -> Self {
        self.reject_collisions = reject;
        self
    }

    /// Ends sessions with [`StreamEnd::Cancelled`] once `shutdown` turns true
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Response `Content-Type` for streams from this writer
    pub fn content_type(&self) -> String {
        multipart::content_type(&self.boundary)
    }

    /// Fails fast when the sink cannot force delivery.
    pub fn check_sink<S>(&self, sink: &S) -> Result<(), StreamError>
    where
        S: FrameSink + ?Sized,
    {
        if sink.supports_flush() {
            Ok(())
        } else {
            Err(StreamError::FlushUnsupported)
        }
    }

    /// Streams `frames` into `sink` until the source ends, the peer leaves,
    /// a timeout fires, shutdown is requested or something fails.
    ///
    /// `frames` is dropped before this returns, whatever the outcome.
    pub async fn stream_frames<S, F>(&self, sink: &mut S, mut frames: F) -> StreamResult
    where
        S: FrameSink + ?Sized,
        F: Stream<Item = Result<Frame, SourceError>> + Unpin,
    {
        self.check_sink(sink)?;

        let started = Instant::now();
        let mut session = StreamSession::new(Arc::clone(&self.boundary));
        let mut shutdown = self.shutdown.clone();

        debug!(boundary = %self.boundary, "Stream session started");

        let end = loop {
            let event = tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut shutdown) => Event::Shutdown,
                _ = sink.closed() => Event::PeerGone,
                pulled = pull_frame(&mut frames, self.frame_timeout) => Event::Pulled(pulled),
            };

            let frame = match event {
                Event::Shutdown => break StreamEnd::Cancelled,
                Event::PeerGone => break StreamEnd::Disconnected,
                Event::Pulled(Pull::TimedOut) => break StreamEnd::FrameTimeout,
                Event::Pulled(Pull::Exhausted) => {
                    if let Err(failure) = session.finish(sink, self.flush_timeout).await {
                        // Every frame already went out; only the close delimiter is lost
                        debug!(reason = %describe(&failure), "Close delimiter not delivered");
                    }
                    break StreamEnd::Exhausted;
                }
                Event::Pulled(Pull::Failed(source)) => {
                    session.terminate();
                    drop(frames);
                    warn!(
                        frames = session.frame_index(),
                        error = %source,
                        "Frame source failed, closing stream"
                    );
                    return Err(StreamError::Source {
                        frame_index: session.frame_index(),
                        source,
                    });
                }
                Event::Pulled(Pull::Frame(frame)) => frame,
            };

            if let Err(err) = self.check_frame(&session, &frame) {
                session.terminate();
                return Err(err);
            }

            match session.send_frame(sink, &frame, self.flush_timeout).await {
                Ok(()) => trace!(
                    frame_index = session.frame_index(),
                    bytes = frame.len(),
                    "Frame sent"
                ),
                Err(SendFailure::Sink(SinkError::FlushUnsupported)) => {
                    session.terminate();
                    return Err(StreamError::FlushUnsupported);
                }
                Err(SendFailure::Sink(err)) => {
                    debug!(error = %err, "Sink failed, treating as disconnect");
                    break StreamEnd::Disconnected;
                }
                Err(SendFailure::Timeout) => break StreamEnd::FlushTimeout,
            }
        };

        session.terminate();
        drop(frames);

        let report = StreamReport {
            frames_sent: session.frame_index(),
            bytes_sent: session.bytes_sent(),
            elapsed: started.elapsed(),
            end,
        };

        info!(
            frames = report.frames_sent,
            bytes = report.bytes_sent,
            end = report.end.as_str(),
            "Stream session ended"
        );

        Ok(report)
    }

    fn check_frame(&self, session: &StreamSession, frame: &Frame) -> Result<(), StreamError> {
        if !frame.has_valid_mime_type() {
            return Err(StreamError::InvalidMimeType {
                frame_index: session.frame_index(),
                mime_type: frame.mime_type().to_string(),
            });
        }

        if self.reject_collisions && frame.contains_token(&self.boundary) {
            tracing::error!(
                frame_index = session.frame_index(),
                "Frame payload contains the stream boundary"
            );
            return Err(StreamError::BoundaryCollision {
                frame_index: session.frame_index(),
            });
        }

        Ok(())
    }
}

fn describe(failure: &SendFailure) -> String {
    match failure {
        SendFailure::Sink(err) => err.to_string(),
        SendFailure::Timeout => "timed out".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    fn frames(payloads: &[&'static [u8]]) -> Vec<Result<Frame, SourceError>> {
        payloads.iter().map(|p| Ok(Frame::jpeg(*p))).collect()
    }

    #[test]
    fn test_rejects_invalid_boundary() {
        assert!(matches!(
            MjpegWriter::new("bad\r\nboundary"),
            Err(StreamError::InvalidBoundary(_))
        ));
    }

    #[test]
    fn test_content_type() {
        let writer = MjpegWriter::new("abcd4321").unwrap();
        assert_eq!(
            writer.content_type(),
            "multipart/x-mixed-replace; boundary=abcd4321"
        );
    }

    #[tokio::test]
    #[should_panic(expected = "frame written after the session ended")]
    async fn test_no_writes_after_termination() {
        let mut session = StreamSession::new(Arc::from("abcd4321"));
        session.terminate();

        let mut sink = crate::sink::IoSink::new(Vec::new());
        let _ = session
            .send_frame(&mut sink, &Frame::jpeg(&b"x"[..]), None)
            .await;
    }

    #[tokio::test]
    async fn test_non_token_boundaries_stay_parsable() {
        for boundary in ["a b", "frame:1"] {
            let writer = MjpegWriter::new(boundary).unwrap();
            let header = writer.content_type();
            assert_eq!(
                header,
                format!("multipart/x-mixed-replace; boundary=\"{}\"", boundary)
            );

            let announced = multipart::boundary_from_content_type(&header).unwrap();
            assert_eq!(announced, boundary);

            let mut sink = crate::sink::IoSink::new(Vec::new());
            writer
                .stream_frames(&mut sink, stream::iter(frames(&[b"AB", b"CDE"])))
                .await
                .unwrap();

            let body = multipart::parse(sink.get_ref(), &announced).unwrap();
            assert!(body.closed);
            assert_eq!(body.parts.len(), 2);
            assert_eq!(&body.parts[1].body()[..], b"CDE");
        }
    }

    #[tokio::test]
    async fn test_exact_bytes() {
        let writer = MjpegWriter::new("abcd4321").unwrap();
        let mut sink = crate::sink::IoSink::new(Vec::new());

        let report = writer
            .stream_frames(&mut sink, stream::iter(frames(&[b"AB", b"CDE"])))
            .await
            .unwrap();

        let expected: &[u8] = b"\r\n--abcd4321\r\nContent-Type: image/jpeg\r\nContent-Length: 2\r\n\r\nAB\
\r\n--abcd4321\r\nContent-Type: image/jpeg\r\nContent-Length: 3\r\n\r\nCDE\
\r\n--abcd4321--\r\n";
        assert_eq!(sink.get_ref().as_slice(), expected);
        assert_eq!(report.frames_sent, 2);
        assert_eq!(report.bytes_sent, expected.len() as u64);
        assert_eq!(report.end, StreamEnd::Exhausted);
    }

    #[tokio::test]
    async fn test_empty_source() {
        let writer = MjpegWriter::new("abcd4321").unwrap();
        let mut sink = crate::sink::IoSink::new(Vec::new());

        let report = writer
            .stream_frames(&mut sink, stream::iter(frames(&[])))
            .await
            .unwrap();

        assert_eq!(sink.get_ref().as_slice(), b"\r\n--abcd4321--\r\n");
        assert_eq!(report.frames_sent, 0);
        assert_eq!(report.end, StreamEnd::Exhausted);
    }

    #[tokio::test]
    async fn test_invalid_mime_type_aborts() {
        let writer = MjpegWriter::new("abcd4321").unwrap();
        let mut sink = crate::sink::IoSink::new(Vec::new());
        let items = vec![
            Ok(Frame::jpeg(&b"ok"[..])),
            Ok(Frame::new(&b"bad"[..], "image/jpeg\r\nSet-Cookie: x")),
        ];

        let err = writer
            .stream_frames(&mut sink, stream::iter(items))
            .await
            .unwrap_err();

        assert!(matches!(err, StreamError::InvalidMimeType { frame_index: 1, .. }));
        assert_eq!(err.frames_sent(), 1);
    }

    #[tokio::test]
    async fn test_collision_check_is_opt_in() {
        let payload: &'static [u8] = b"xx--abcd4321yy";

        let lenient = MjpegWriter::new("abcd4321").unwrap();
        let mut sink = crate::sink::IoSink::new(Vec::new());
        let report = lenient
            .stream_frames(&mut sink, stream::iter(frames(&[payload])))
            .await
            .unwrap();
        assert_eq!(report.frames_sent, 1);

        let strict = lenient.reject_boundary_collisions(true);
        let mut sink = crate::sink::IoSink::new(Vec::new());
        let err = strict
            .stream_frames(&mut sink, stream::iter(frames(&[payload])))
            .await
            .unwrap_err();
        assert!(matches!(err, StreamError::BoundaryCollision { frame_index: 0 }));
        assert!(sink.get_ref().is_empty());
    }

    #[test]
    fn test_report_fps() {
        let report = StreamReport {
            frames_sent: 30,
            bytes_sent: 0,
            elapsed: Duration::from_secs(2),
            end: StreamEnd::Exhausted,
        };
        assert_eq!(report.fps(), 15.0);

        let instant = StreamReport {
            elapsed: Duration::ZERO,
            ..report
        };
        assert_eq!(instant.fps(), 0.0);
    }
}
