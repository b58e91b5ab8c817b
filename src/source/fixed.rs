//! Fixed list of frames at a fixed pace

use futures_util::stream;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Interval, MissedTickBehavior};

use super::{FrameSource, FrameStream};
use crate::frame::Frame;

/// Emits a list of frames in order, one per `interval`.
///
/// The first frame is available immediately. With `repeat` the list loops
/// forever, otherwise the stream ends after the last frame.
#[derive(Debug, Clone)]
pub struct FixedSequence {
    frames: Arc<[Frame]>,
    interval: Duration,
    repeat: bool,
}

struct Cursor {
    frames: Arc<[Frame]>,
    position: usize,
    ticker: Option<Interval>,
}

impl FixedSequence {
    pub fn new(frames: Vec<Frame>, interval: Duration) -> Self {
        Self {
            frames: frames.into(),
            interval,
            repeat: false,
        }
    }

    /// Loops the sequence forever
    pub fn repeating(mut self, repeat: bool) -> Self {
        self.repeat = repeat;
        self
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

}

impl FrameSource for FixedSequence {
    fn open(&self) -> FrameStream {
        let interval = self.interval;
        let repeat = self.repeat;
        let cursor = Cursor {
            frames: Arc::clone(&self.frames),
            position: 0,
            ticker: None,
        };

        Box::pin(stream::unfold(cursor, move |mut cursor| async move {
            let len = cursor.frames.len();
            if len == 0 || (!repeat && cursor.position >= len) {
                return None;
            }

            if !interval.is_zero() {
                // Created lazily so opening does not need a runtime
                let ticker = cursor.ticker.get_or_insert_with(|| {
                    let mut ticker = tokio::time::interval(interval);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    ticker
                });
                ticker.tick().await;
            }

            let frame = cursor.frames[cursor.position % len].clone();
            cursor.position = if repeat {
                (cursor.position + 1) % len
            } else {
                cursor.position + 1
            };
            Some((Ok(frame), cursor))
        }))
    }
}
