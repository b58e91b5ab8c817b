//! Latest-frame feed from an external producer (camera, renderer)

use futures_util::stream;
use tokio::sync::watch;
use tracing::debug;

use super::{FrameSource, FrameStream, SourceError};
use crate::frame::Frame;

#[derive(Debug, Clone)]
enum FeedState {
    Waiting,
    Frame(Frame),
    Failed(String),
}

/// Producer half of a live feed
#[derive(Debug)]
pub struct LivePublisher {
    tx: watch::Sender<FeedState>,
}

/// Session factory for a live feed.
///
/// Each session sees the newest frame at the time it looks. Frames published
/// faster than a session can write them are skipped for that session only.
/// Streams end when the [`LivePublisher`] is dropped.
#[derive(Debug, Clone)]
pub struct LiveFeed {
    rx: watch::Receiver<FeedState>,
}

/// Creates a connected publisher and feed
pub fn live_feed() -> (LivePublisher, LiveFeed) {
    let (tx, rx) = watch::channel(FeedState::Waiting);
    (LivePublisher { tx }, LiveFeed { rx })
}

impl LivePublisher {
    /// Replaces the current frame
    pub fn publish(&self, frame: Frame) {
        self.tx.send_replace(FeedState::Frame(frame));
    }

    /// Reports a producer failure to every open session
    pub fn fail(&self, reason: impl Into<String>) {
        self.tx.send_replace(FeedState::Failed(reason.into()));
    }

    /// Number of open sessions
    pub fn session_count(&self) -> usize {
        // The feed itself holds one receiver
        self.tx.receiver_count().saturating_sub(1)
    }
}

impl FrameSource for LiveFeed {
    fn open(&self) -> FrameStream {
        let rx = self.rx.clone();

        Box::pin(stream::unfold(Some(rx), |state| async move {
            let mut rx = state?;
            loop {
                if rx.changed().await.is_err() {
                    debug!("Live feed publisher dropped");
                    return None;
                }
                let current = rx.borrow_and_update().clone();
                match current {
                    FeedState::Waiting => continue,
                    FeedState::Frame(frame) => return Some((Ok(frame), Some(rx))),
                    FeedState::Failed(reason) => {
                        return Some((Err(SourceError::Producer(reason)), None))
                    }
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn test_session_sees_latest_frame() {
        let (publisher, feed) = live_feed();
        publisher.publish(Frame::jpeg(&b"old"[..]));
        publisher.publish(Frame::jpeg(&b"new"[..]));

        let mut stream = feed.open();
        let frame = stream.next().await.unwrap().unwrap();
        assert_eq!(&frame.payload()[..], b"new");
    }

    #[tokio::test]
    async fn test_waits_for_next_frame() {
        let (publisher, feed) = live_feed();
        let mut stream = feed.open();

        let producer = tokio::spawn(async move {
            tokio::task::yield_now().await;
            publisher.publish(Frame::jpeg(&b"first"[..]));
            publisher
        });

        let frame = stream.next().await.unwrap().unwrap();
        assert_eq!(&frame.payload()[..], b"first");

        drop(producer.await.unwrap());
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_failure_ends_stream() {
        let (publisher, feed) = live_feed();
        let mut stream = feed.open();
        publisher.fail("sensor unplugged");

        assert_eq!(
            stream.next().await.unwrap(),
            Err(SourceError::Producer("sensor unplugged".to_string()))
        );
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_session_count() {
        let (publisher, feed) = live_feed();
        assert_eq!(publisher.session_count(), 0);

        let stream = feed.open();
        assert_eq!(publisher.session_count(), 1);

        drop(stream);
        assert_eq!(publisher.session_count(), 0);
    }
}
