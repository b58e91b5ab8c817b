//! Streaming statistics

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

use super::{StreamEnd, StreamError, StreamResult};

/// Lock-free counters shared by every session of a server
#[derive(Debug, Default)]
pub struct StreamStats {
    sessions_started: AtomicU64,
    sessions_active: AtomicU64,
    frames_sent: AtomicU64,
    bytes_sent: AtomicU64,
    completed: AtomicU64,
    disconnects: AtomicU64,
    cancellations: AtomicU64,
    timeouts: AtomicU64,
    source_faults: AtomicU64,
    rejected: AtomicU64,
}

impl StreamStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new session and returns its id (1-based)
    pub fn session_started(&self) -> u64 {
        self.sessions_active.fetch_add(1, Ordering::Relaxed);
        self.sessions_started.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Registers the outcome of a session started with [`Self::session_started`]
    pub fn session_finished(&self, result: &StreamResult) {
        self.sessions_active.fetch_sub(1, Ordering::Relaxed);

        match result {
            Ok(report) => {
                self.frames_sent
                    .fetch_add(report.frames_sent, Ordering::Relaxed);
                self.bytes_sent.fetch_add(report.bytes_sent, Ordering::Relaxed);

                let counter = match report.end {
                    StreamEnd::Exhausted => &self.completed,
                    StreamEnd::Disconnected => &self.disconnects,
                    StreamEnd::Cancelled => &self.cancellations,
                    StreamEnd::FrameTimeout | StreamEnd::FlushTimeout => &self.timeouts,
                };
                counter.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                self.frames_sent
                    .fetch_add(err.frames_sent(), Ordering::Relaxed);

                let counter = match err {
                    StreamError::Source { .. } => &self.source_faults,
                    _ => &self.rejected,
                };
                counter.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            sessions_started: self.sessions_started.load(Ordering::Relaxed),
            sessions_active: self.sessions_active.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            disconnects: self.disconnects.load(Ordering::Relaxed),
            cancellations: self.cancellations.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            source_faults: self.source_faults.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`StreamStats`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Sessions opened since start
    pub sessions_started: u64,

    /// Sessions currently streaming
    pub sessions_active: u64,

    /// Frames delivered across all finished sessions
    pub frames_sent: u64,

    /// Bytes delivered across all finished sessions, framing included
    pub bytes_sent: u64,

    /// Sessions whose source ran out
    pub completed: u64,

    /// Sessions ended by the client going away
    pub disconnects: u64,

    /// Sessions ended by server shutdown
    pub cancellations: u64,

    /// Sessions ended by a frame or flush timeout
    pub timeouts: u64,

    /// Sessions aborted by a failing frame source
    pub source_faults: u64,

    /// Sessions refused or aborted for protocol reasons
    pub rejected: u64,
}

impl StatsSnapshot {
    /// Calculates frame rate based on delta
    pub fn calculate_fps(&self, previous: &Self, elapsed_secs: f64) -> f64 {
        if elapsed_secs == 0.0 {
            return 0.0;
        }

        let frames_delta = self.frames_sent.saturating_sub(previous.frames_sent);
        frames_delta as f64 / elapsed_secs
    }

    /// Calculates bitrate in kbps based on delta
    pub fn calculate_bitrate_kbps(&self, previous: &Self, elapsed_secs: f64) -> f64 {
        if elapsed_secs == 0.0 {
            return 0.0;
        }

        let bytes_delta = self.bytes_sent.saturating_sub(previous.bytes_sent);
        (bytes_delta as f64 * 8.0) / elapsed_secs / 1000.0
    }

    /// Share of finished sessions that ended with the client leaving
    pub fn disconnect_rate(&self) -> f64 {
        let finished = self.sessions_started.saturating_sub(self.sessions_active);
        if finished == 0 {
            return 0.0;
        }

        self.disconnects as f64 / finished as f64
    }
}
