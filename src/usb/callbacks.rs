//! Entry points the USB stack calls on behalf of the host

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, warn};

use crate::capture::{CaptureRequest, FrameSource};
use crate::control::{CommandHandler, LineCoding, LineFramer};
use crate::error::NegotiationError;
use crate::pipeline::completion::CompletionNotifier;
use crate::pipeline::negotiation::Negotiator;

/// Type-erased handler owned by the control framer.
pub(crate) struct BoxedHandler(pub Box<dyn CommandHandler + Send>);

impl CommandHandler for BoxedHandler {
    fn handle(&mut self, line: &[u8]) {
        self.0.handle(line)
    }
}

pub(crate) type ControlFramer = LineFramer<BoxedHandler>;

pub(crate) struct CameraLink {
    pub negotiator: Negotiator,
    pub completion: CompletionNotifier,
    pub source: Arc<dyn FrameSource>,
}

/// Cloneable handle routing stack events to the camera slots.
#[derive(Clone)]
pub struct DeviceCallbacks {
    inner: Arc<Inner>,
}

struct Inner {
    cameras: Vec<CameraLink>,
    control: Option<Mutex<ControlFramer>>,
}

impl DeviceCallbacks {
    pub(crate) fn new(cameras: Vec<CameraLink>, control: Option<ControlFramer>) -> Self {
        Self {
            inner: Arc::new(Inner {
                cameras,
                control: control.map(Mutex::new),
            }),
        }
    }

    pub fn camera_count(&self) -> usize {
        self.inner.cameras.len()
    }

    pub fn on_mount(&self) {
        info!("Mount");
    }

    pub fn on_unmount(&self) {
        info!("UN-Mount");
    }

    /// Bus suspended: every camera stops producing until the next commit.
    pub fn on_suspend(&self, remote_wakeup: bool) {
        for link in &self.inner.cameras {
            link.source.stop_capture();
        }
        info!(remote_wakeup, "Suspend");
    }

    pub fn on_resume(&self) {
        info!("Resume");
    }

    /// A submitted frame left the wire. Runs in stack context; never blocks.
    pub fn on_transfer_complete(&self, camera: usize, stream: usize) {
        match self.inner.cameras.get(camera) {
            Some(link) => link.completion.notify(),
            None => warn!(camera, stream, "transfer completion for unknown camera"),
        }
    }

    /// Host committed a frame index and interval.
    pub fn on_commit(
        &self,
        camera: usize,
        stream: usize,
        frame_index: u8,
        interval_ticks: u32,
    ) -> Result<CaptureRequest, NegotiationError> {
        let link = self
            .inner
            .cameras
            .get(camera)
            .ok_or(NegotiationError::UnknownCamera(camera))?;
        debug!(camera, stream, "commit");
        link.negotiator.commit(frame_index, interval_ticks)
    }

    /// Raw bytes from the control channel.
    pub fn on_control_rx(&self, bytes: &[u8]) {
        match &self.inner.control {
            Some(control) => lock(control).push(bytes),
            None => debug!("{} control bytes ignored, no handler", bytes.len()),
        }
    }

    pub fn on_line_state(&self, dtr: bool, rts: bool) {
        info!("CDC line state changed: DTR={}, RTS={}", dtr, rts);
    }

    pub fn on_line_coding(&self, coding: &LineCoding) {
        info!(
            "CDC line coding: {} bps, {} stop bits, {} parity, {} data bits",
            coding.bit_rate, coding.stop_bits, coding.parity, coding.data_bits
        );
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
