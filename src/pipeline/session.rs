//! Streaming session state for one camera slot

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;

use crate::capture::CaptureRequest;

/// Where a camera's pacing loop stands with the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamingState {
    /// Host has not enabled streaming.
    NotStreaming,
    /// Streaming just turned on; baseline captured, no frame sent yet.
    Starting,
    /// Streaming, no transfer outstanding.
    Streaming,
    /// A frame was submitted and its completion has not been consumed.
    TransferPending,
}

/// Values published by the commit handler and read by the pacing loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamParams {
    pub interval: Duration,
    /// Resolution selected by the last accepted commit, if any.
    pub capture: Option<CaptureRequest>,
    /// Bumped on every accepted commit.
    pub generation: u64,
}

/// Single-writer (commit handler) / single-reader (pacing loop) parameter cell.
#[derive(Debug)]
pub struct SharedParams {
    current: ArcSwap<StreamParams>,
}

impl SharedParams {
    pub fn new(interval: Duration) -> Self {
        Self {
            current: ArcSwap::from_pointee(StreamParams {
                interval,
                capture: None,
                generation: 0,
            }),
        }
    }

    pub fn load(&self) -> Arc<StreamParams> {
        self.current.load_full()
    }

    /// Publish a newly committed interval and resolution.
    pub fn publish(&self, interval: Duration, capture: CaptureRequest) -> u64 {
        let replaced = self.current.rcu(|prev| StreamParams {
            interval,
            capture: Some(capture),
            generation: prev.generation + 1,
        });
        replaced.generation + 1
    }
}

/// Mutable per-loop bookkeeping, owned by the pacing task alone.
#[derive(Debug)]
pub struct Session {
    state: StreamingState,
    baseline: Duration,
    frame_count: u64,
    generation: u64,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            state: StreamingState::NotStreaming,
            baseline: Duration::ZERO,
            frame_count: 0,
            generation: 0,
        }
    }

    pub fn state(&self) -> StreamingState {
        self.state
    }

    pub fn baseline(&self) -> Duration {
        self.baseline
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn is_armed(&self) -> bool {
        self.state != StreamingState::NotStreaming
    }

    pub fn in_flight(&self) -> bool {
        self.state == StreamingState::TransferPending
    }

    /// Forget everything; the next "on" observation starts pacing afresh.
    pub fn reset(&mut self) {
        self.state = StreamingState::NotStreaming;
        self.baseline = Duration::ZERO;
        self.frame_count = 0;
    }

    /// Capture the pacing baseline for a fresh streaming run.
    pub fn arm(&mut self, now: Duration, generation: u64) {
        self.state = StreamingState::Starting;
        self.baseline = now;
        self.generation = generation;
    }

    /// Restart pacing from `now` after a renegotiation, keeping any
    /// outstanding transfer accounted for.
    pub fn rebase(&mut self, now: Duration, generation: u64) {
        self.baseline = now;
        self.generation = generation;
    }

    /// Whether the pacing loop has yet to see commit `generation`.
    pub fn is_stale(&self, generation: u64) -> bool {
        self.generation != generation
    }

    pub fn advance_baseline(&mut self, by: Duration) {
        self.baseline += by;
    }

    pub fn set_baseline(&mut self, baseline: Duration) {
        self.baseline = baseline;
    }

    pub fn begin_acquire(&mut self) {
        self.state = StreamingState::Streaming;
    }

    pub fn mark_pending(&mut self) {
        self.state = StreamingState::TransferPending;
    }

    /// The pending transfer's completion was consumed.
    pub fn complete(&mut self) {
        self.frame_count += 1;
        self.state = StreamingState::Streaming;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::PixelFormat;

    #[test]
    fn reset_clears_counters_and_pending() {
        let mut session = Session::new();
        session.arm(Duration::from_millis(100), 0);
        session.mark_pending();
        session.complete();
        session.mark_pending();
        assert_eq!(session.frame_count(), 1);
        assert!(session.in_flight());

        session.reset();
        assert_eq!(session.state(), StreamingState::NotStreaming);
        assert_eq!(session.frame_count(), 0);
        assert_eq!(session.baseline(), Duration::ZERO);
        assert!(!session.in_flight());
    }

    #[test]
    fn publish_bumps_generation() {
        let params = SharedParams::new(Duration::from_millis(66));
        assert_eq!(params.load().generation, 0);

        let request = CaptureRequest {
            format: PixelFormat::Mjpeg,
            width: 320,
            height: 240,
            rate: 30,
        };
        assert_eq!(params.publish(Duration::from_millis(33), request), 1);
        assert_eq!(params.publish(Duration::from_millis(33), request), 2);

        let current = params.load();
        assert_eq!(current.generation, 2);
        assert_eq!(current.interval, Duration::from_millis(33));
        assert_eq!(current.capture, Some(request));
    }
}
