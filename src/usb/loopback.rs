//! In-process USB stack that plays the host's part
//!
//! Transfers complete after a simulated wire time; completions, like
//! control bytes, are delivered from `task()`, the way a real stack reports
//! events from its own processing task.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::capture::CaptureRequest;
use crate::error::{NegotiationError, UsbError};
use crate::usb::{DeviceCallbacks, UsbVideo};
use crate::MAX_CAMERAS;

struct PendingTransfer {
    camera: usize,
    stream: usize,
    due: Instant,
}

pub struct LoopbackUsb {
    bytes_per_ms: usize,
    callbacks: Mutex<Option<DeviceCallbacks>>,
    streaming: [AtomicBool; MAX_CAMERAS],
    delivered: [AtomicU64; MAX_CAMERAS],
    transfers: Mutex<Vec<PendingTransfer>>,
    control_rx: Mutex<VecDeque<Vec<u8>>>,
}

impl LoopbackUsb {
    /// `bytes_per_ms` sets the simulated bus throughput.
    pub fn new(bytes_per_ms: usize) -> Self {
        Self {
            bytes_per_ms: bytes_per_ms.max(1),
            callbacks: Mutex::new(None),
            streaming: Default::default(),
            delivered: Default::default(),
            transfers: Mutex::new(Vec::new()),
            control_rx: Mutex::new(VecDeque::new()),
        }
    }

    fn callbacks(&self) -> Option<DeviceCallbacks> {
        self.callbacks
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// Host commits a frame index and interval on `camera`.
    pub fn commit(
        &self,
        camera: usize,
        frame_index: u8,
        interval_ticks: u32,
    ) -> Result<CaptureRequest, NegotiationError> {
        let callbacks = self
            .callbacks()
            .ok_or(NegotiationError::UnknownCamera(camera))?;
        callbacks.on_commit(camera, 0, frame_index, interval_ticks)
    }

    /// Host opens or closes the stream. Closing aborts the in-flight transfer
    /// and reports it complete, so a pacing loop that never saw the stream
    /// go down is not left waiting for it.
    pub fn set_streaming(&self, camera: usize, on: bool) {
        let Some(flag) = self.streaming.get(camera) else {
            return;
        };
        let aborted: Vec<PendingTransfer> = {
            let mut transfers = self.transfers.lock().unwrap_or_else(|p| p.into_inner());
            flag.store(on, Ordering::Release);
            if on {
                Vec::new()
            } else {
                let (aborted, kept): (Vec<_>, Vec<_>) =
                    transfers.drain(..).partition(|t| t.camera == camera);
                *transfers = kept;
                aborted
            }
        };
        info!(camera, on, "host streaming toggled");

        if aborted.is_empty() {
            return;
        }
        if let Some(callbacks) = self.callbacks() {
            for transfer in aborted {
                debug!(camera, "transfer aborted");
                callbacks.on_transfer_complete(transfer.camera, transfer.stream);
            }
        }
    }

    /// Host writes to the control channel.
    pub fn send_control(&self, bytes: &[u8]) {
        self.control_rx
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push_back(bytes.to_vec());
    }

    /// Host suspends the bus.
    pub fn suspend(&self) {
        if let Some(callbacks) = self.callbacks() {
            callbacks.on_suspend(false);
        }
    }

    /// Frames whose transfer completed on `camera`.
    pub fn frames_delivered(&self, camera: usize) -> u64 {
        self.delivered
            .get(camera)
            .map(|d| d.load(Ordering::Relaxed))
            .unwrap_or(0)
    }
}

impl UsbVideo for LoopbackUsb {
    fn start(&self, callbacks: DeviceCallbacks) -> Result<(), UsbError> {
        callbacks.on_mount();
        *self.callbacks.lock().unwrap_or_else(|p| p.into_inner()) = Some(callbacks);
        Ok(())
    }

    fn task(&self) {
        let Some(callbacks) = self.callbacks() else {
            return;
        };

        let now = Instant::now();
        let done: Vec<PendingTransfer> = {
            let mut transfers = self.transfers.lock().unwrap_or_else(|p| p.into_inner());
            let (done, waiting): (Vec<_>, Vec<_>) =
                transfers.drain(..).partition(|t| t.due <= now);
            *transfers = waiting;
            done
        };
        for transfer in done {
            self.delivered[transfer.camera].fetch_add(1, Ordering::Relaxed);
            callbacks.on_transfer_complete(transfer.camera, transfer.stream);
        }

        let chunks: Vec<Vec<u8>> = self
            .control_rx
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .drain(..)
            .collect();
        for chunk in chunks {
            callbacks.on_control_rx(&chunk);
        }
    }

    fn is_streaming(&self, camera: usize, _stream: usize) -> bool {
        self.streaming
            .get(camera)
            .map(|f| f.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    fn submit_frame(&self, camera: usize, stream: usize, payload: &[u8]) -> Result<(), UsbError> {
        // Checked under the transfer lock so a concurrent stop either sees
        // this transfer and aborts it, or rejects it here.
        let mut transfers = self.transfers.lock().unwrap_or_else(|p| p.into_inner());
        if !self.is_streaming(camera, stream) {
            return Err(UsbError::TransferRejected { camera, stream });
        }
        let wire = Duration::from_micros((payload.len() * 1000 / self.bytes_per_ms) as u64);
        debug!(camera, len = payload.len(), ?wire, "transfer queued");
        transfers.push(PendingTransfer {
            camera,
            stream,
            due: Instant::now() + wire,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::capture::{FrameSource, PixelFormat};
    use crate::pipeline::completion::completion_channel;
    use crate::pipeline::negotiation::{FrameTable, Negotiator, REFERENCE_FRAMES};
    use crate::pipeline::scheduler::{PacingPolicy, PacingScheduler, PacingTiming, Step};
    use crate::pipeline::session::{SharedParams, StreamingState};
    use crate::testing::{ManualClock, ScriptedSource};
    use crate::usb::callbacks::CameraLink;

    /// Loopback host wired to one pacing loop on a virtual clock. The bus is
    /// slow enough that no transfer finishes on its own during a test.
    fn rig() -> (Arc<LoopbackUsb>, PacingScheduler) {
        let usb = Arc::new(LoopbackUsb::new(1));
        let source: Arc<dyn FrameSource> = Arc::new(ScriptedSource::new().with_default_len(100));
        let params = Arc::new(SharedParams::new(Duration::from_millis(10)));
        let (notifier, waiter) = completion_channel();

        let link = CameraLink {
            negotiator: Negotiator::new(
                0,
                PixelFormat::Mjpeg,
                FrameTable::new(REFERENCE_FRAMES.clone()),
                source.clone(),
                params.clone(),
            ),
            completion: notifier,
            source: source.clone(),
        };
        usb.start(DeviceCallbacks::new(vec![link], None)).unwrap();

        let scheduler = PacingScheduler::new(
            0,
            usb.clone(),
            source,
            vec![0u8; 1024].into_boxed_slice(),
            params,
            waiter,
            Arc::new(ManualClock::new()),
            PacingTiming {
                yield_for: Duration::from_millis(1),
                completion_wait: Duration::ZERO,
                policy: PacingPolicy::CatchUp,
            },
        );
        (usb, scheduler)
    }

    fn step_until_submit(scheduler: &mut PacingScheduler, max: usize) -> bool {
        (0..max).any(|_| matches!(scheduler.step(), Step::Submitted { .. }))
    }

    #[test]
    fn quick_stop_and_restart_releases_pending_transfer() {
        let (usb, mut scheduler) = rig();
        usb.set_streaming(0, true);
        assert!(step_until_submit(&mut scheduler, 50));
        assert_eq!(scheduler.state(), StreamingState::TransferPending);

        // Host bounces the stream between two passes of the loop.
        usb.set_streaming(0, false);
        usb.set_streaming(0, true);

        assert!(step_until_submit(&mut scheduler, 50));
        assert_eq!(scheduler.frame_count(), 1);
        assert_eq!(usb.frames_delivered(0), 0);
    }

    #[test]
    fn stop_rejects_new_transfers() {
        let (usb, _scheduler) = rig();
        usb.set_streaming(0, true);
        usb.submit_frame(0, 0, &[0u8; 8]).unwrap();
        usb.set_streaming(0, false);

        assert!(matches!(
            usb.submit_frame(0, 0, &[0u8; 8]),
            Err(UsbError::TransferRejected { camera: 0, stream: 0 })
        ));
        assert!(usb.transfers.lock().unwrap().is_empty());
    }
}
