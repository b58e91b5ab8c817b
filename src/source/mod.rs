//! Frame sources
//!
//! A [`FrameSource`] is a shareable factory. Every session calls
//! [`FrameSource::open`] and gets its own [`FrameStream`], so one slow client
//! never holds back another. Dropping the stream releases whatever the
//! session held on the producer.

mod fixed;
mod live;
mod pattern;

pub use fixed::FixedSequence;
pub use live::{live_feed, LiveFeed, LivePublisher};
pub use pattern::{encode_solid_jpeg, Rgb, TestPattern};

use futures_util::Stream;
use std::pin::Pin;
use thiserror::Error;

use crate::frame::Frame;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("failed to encode frame: {0}")]
    Encode(String),

    #[error("invalid color {0:?}: expected #rrggbb")]
    InvalidColor(String),

    #[error("frame producer failed: {0}")]
    Producer(String),
}

/// Lazy, possibly paced and possibly endless sequence of frames.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame, SourceError>> + Send>>;

/// Factory for per-session frame streams
pub trait FrameSource: Send + Sync {
    /// Starts a fresh sequence from the source's own starting point.
    fn open(&self) -> FrameStream;
}
