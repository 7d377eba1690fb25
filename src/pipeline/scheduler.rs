//! Per-camera frame pacing loop
//!
//! Each pass polls the host's streaming flag, waits out the negotiated
//! interval, consumes the previous transfer's completion, then copies one
//! fresh frame into the slot buffer and submits it. Every pass ends in a
//! bounded sleep or a bounded wait so sibling tasks are never starved.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use metrics::Counter;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, info_span, warn};

use crate::capture::FrameSource;
use crate::pipeline::completion::CompletionWaiter;
use crate::pipeline::session::{Session, SharedParams, StreamingState};
use crate::pipeline::stats::SlotStats;
use crate::usb::UsbVideo;
use crate::utils::Clock;

/// What to do with the pacing baseline once a frame is due.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PacingPolicy {
    /// Advance by exactly one interval. After a stall, frames go out
    /// back-to-back until the baseline catches up with the clock.
    #[default]
    CatchUp,
    /// Jump to the latest interval boundary, so a stall costs the missed
    /// frames instead of producing a burst.
    SkipMissed,
}

/// Loop timing knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacingTiming {
    /// Sleep for idle and not-yet-due passes.
    pub yield_for: Duration,
    /// Longest wait for a transfer completion in one pass.
    pub completion_wait: Duration,
    pub policy: PacingPolicy,
}

impl Default for PacingTiming {
    fn default() -> Self {
        Self {
            yield_for: Duration::from_millis(1),
            completion_wait: Duration::from_millis(1),
            policy: PacingPolicy::CatchUp,
        }
    }
}

/// Outcome of one scheduler pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Host is not streaming.
    Idle,
    /// Next frame not due yet.
    Waiting,
    /// Previous transfer still on the wire.
    AwaitingCompletion,
    /// Source had no frame; skipped this cycle.
    AcquireFailed,
    /// Frame larger than the slot buffer; released uncopied.
    Dropped { len: usize },
    /// USB stack refused the transfer.
    SubmitFailed,
    Submitted { len: usize },
}

struct FrameCounters {
    sent: Counter,
    dropped: Counter,
    acquire_failures: Counter,
}

impl FrameCounters {
    fn new(camera: usize) -> Self {
        let label = camera.to_string();
        Self {
            sent: metrics::counter!("uvcam_frames_sent_total", "camera" => label.clone()),
            dropped: metrics::counter!("uvcam_frames_dropped_total", "camera" => label.clone()),
            acquire_failures: metrics::counter!("uvcam_acquire_failures_total", "camera" => label),
        }
    }
}

/// Pacing loop state for one camera slot.
///
/// Owns the slot's destination buffer outright; the only thing it shares is
/// the parameter cell written by the commit handler and the stats it writes.
pub struct PacingScheduler {
    camera: usize,
    stream: usize,
    usb: Arc<dyn UsbVideo>,
    source: Arc<dyn FrameSource>,
    buffer: Box<[u8]>,
    params: Arc<SharedParams>,
    completion: CompletionWaiter,
    clock: Arc<dyn Clock>,
    timing: PacingTiming,
    session: Session,
    stats: Arc<SlotStats>,
    counters: FrameCounters,
}

impl PacingScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        camera: usize,
        usb: Arc<dyn UsbVideo>,
        source: Arc<dyn FrameSource>,
        buffer: Box<[u8]>,
        params: Arc<SharedParams>,
        completion: CompletionWaiter,
        clock: Arc<dyn Clock>,
        timing: PacingTiming,
    ) -> Self {
        Self {
            camera,
            stream: 0,
            usb,
            source,
            buffer,
            params,
            completion,
            clock,
            timing,
            session: Session::new(),
            stats: Arc::new(SlotStats::new()),
            counters: FrameCounters::new(camera),
        }
    }

    /// Share an externally owned stats block instead of a private one.
    pub fn with_stats(mut self, stats: Arc<SlotStats>) -> Self {
        self.stats = stats;
        self
    }

    pub fn camera(&self) -> usize {
        self.camera
    }

    pub fn state(&self) -> StreamingState {
        self.session.state()
    }

    pub fn frame_count(&self) -> u64 {
        self.session.frame_count()
    }

    pub fn baseline(&self) -> Duration {
        self.session.baseline()
    }

    pub fn stats(&self) -> &Arc<SlotStats> {
        &self.stats
    }

    /// Slot buffer contents; the first `len` bytes of the last submission.
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// Run passes until `shutdown` is raised.
    pub fn run(mut self, shutdown: &AtomicBool) {
        let span = info_span!("uvc", camera = self.camera);
        let _enter = span.enter();
        info!("Pacing task started, buffer {} bytes", self.buffer.len());

        while !shutdown.load(Ordering::Acquire) {
            self.step();
        }

        info!("Pacing task stopped after {} frames", self.session.frame_count());
    }

    /// One pass of the pacing loop. Every pass cedes the processor at least
    /// once, through the clock or the bounded completion wait.
    pub fn step(&mut self) -> Step {
        if !self.usb.is_streaming(self.camera, self.stream) {
            if self.session.is_armed() {
                info!(
                    "Streaming stopped after {} frames",
                    self.session.frame_count()
                );
                self.session.reset();
            }
            self.clock.sleep(self.timing.yield_for);
            return Step::Idle;
        }

        let params = self.params.load();
        if !self.session.is_armed() {
            info!("Streaming started, interval {:?}", params.interval);
            // A completion for a transfer abandoned by the last stop must not
            // release the first transfer of this run.
            self.completion.clear();
            self.session.arm(self.clock.now(), params.generation);
        } else if self.session.is_stale(params.generation) {
            info!("Renegotiated, interval now {:?}", params.interval);
            self.session.rebase(self.clock.now(), params.generation);
        }

        let now = self.clock.now();
        if now.saturating_sub(self.session.baseline()) < params.interval {
            self.clock.sleep(self.timing.yield_for);
            return Step::Waiting;
        }

        if self.session.in_flight() {
            if !self.completion.wait(self.timing.completion_wait) {
                self.stats.record_completion_timeout();
                if self.timing.completion_wait.is_zero() {
                    self.clock.sleep(self.timing.yield_for);
                }
                return Step::AwaitingCompletion;
            }
            self.session.complete();
        }

        self.advance_baseline(now, params.interval);
        self.session.begin_acquire();

        debug!("frame {} taking picture...", self.session.frame_count());
        let frame = match self.source.acquire() {
            Ok(frame) => frame,
            Err(e) => {
                error!("Failed to capture picture: {}", e);
                self.stats.record_acquire_failure();
                self.counters.acquire_failures.increment(1);
                self.clock.sleep(self.timing.yield_for);
                return Step::AcquireFailed;
            }
        };
        debug!("Picture taken! Its size was: {} bytes", frame.len());

        let len = frame.len();
        if len > self.buffer.len() {
            warn!(
                "frame size is too big, dropping frame ({} > {} bytes)",
                len,
                self.buffer.len()
            );
            self.source.release(frame);
            self.stats.record_dropped();
            self.counters.dropped.increment(1);
            self.clock.sleep(self.timing.yield_for);
            return Step::Dropped { len };
        }

        self.buffer[..len].copy_from_slice(frame.data());
        self.source.release(frame);

        if let Err(e) = self
            .usb
            .submit_frame(self.camera, self.stream, &self.buffer[..len])
        {
            warn!("frame {} not submitted: {}", self.session.frame_count(), e);
            self.stats.record_dropped();
            self.counters.dropped.increment(1);
            self.clock.sleep(self.timing.yield_for);
            return Step::SubmitFailed;
        }
        self.session.mark_pending();
        self.stats.record_sent(len);
        self.counters.sent.increment(1);
        debug!(
            "frame {} transfer start, size {}",
            self.session.frame_count(),
            len
        );
        self.clock.sleep(self.timing.yield_for);
        Step::Submitted { len }
    }

    fn advance_baseline(&mut self, now: Duration, interval: Duration) {
        match self.timing.policy {
            PacingPolicy::CatchUp => self.session.advance_baseline(interval),
            PacingPolicy::SkipMissed => {
                if interval.is_zero() {
                    self.session.set_baseline(now);
                    return;
                }
                let behind = now.saturating_sub(self.session.baseline());
                let missed = behind.as_nanos() / interval.as_nanos();
                let skip = interval.as_nanos() * missed;
                self.session
                    .advance_baseline(Duration::from_nanos(skip as u64));
            }
        }
    }
}
