//! Synthetic frame producer for bring-up without a sensor

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use bytes::{BufMut, BytesMut};
use tracing::{debug, info};

use crate::capture::frame::{CaptureRequest, FrameHandle};
use crate::capture::source::FrameSource;
use crate::error::FrameError;

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];

/// Produces JPEG-framed test payloads sized like a compressed frame at the
/// committed resolution. The payload is not a decodable image.
pub struct SyntheticSource {
    name: String,
    compression_ratio: u32,
    state: Mutex<State>,
    outstanding: AtomicUsize,
}

#[derive(Default)]
struct State {
    request: Option<CaptureRequest>,
    sequence: u64,
}

impl SyntheticSource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            compression_ratio: 10,
            state: Mutex::new(State::default()),
            outstanding: AtomicUsize::new(0),
        }
    }

    /// Bytes per pixel divisor used to size payloads (default 10).
    pub fn with_compression_ratio(mut self, ratio: u32) -> Self {
        self.compression_ratio = ratio.max(1);
        self
    }

    /// Frames acquired but not yet released.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    pub fn payload_len(&self, request: &CaptureRequest) -> usize {
        let body = (request.width as usize * request.height as usize)
            / self.compression_ratio as usize;
        body.max(16) + SOI.len() + EOI.len()
    }
}

impl FrameSource for SyntheticSource {
    fn acquire(&self) -> Result<FrameHandle, FrameError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| FrameError::Hardware("synthetic source poisoned".into()))?;
        let request = state.request.ok_or(FrameError::NotStarted)?;

        state.sequence += 1;
        let sequence = state.sequence;
        let len = self.payload_len(&request);

        let mut buf = BytesMut::with_capacity(len);
        buf.put_slice(&SOI);
        buf.put_u64(sequence);
        let base = (sequence % 256) as u8;
        for i in 0..(len - SOI.len() - EOI.len() - 8) {
            buf.put_u8(base.wrapping_add((i % 251) as u8));
        }
        buf.put_slice(&EOI);

        self.outstanding.fetch_add(1, Ordering::AcqRel);
        Ok(FrameHandle::new(buf.freeze(), sequence))
    }

    fn release(&self, frame: FrameHandle) {
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
        debug!(source = %self.name, token = frame.token(), "frame returned");
    }

    fn start_capture(&self, request: CaptureRequest) -> Result<(), FrameError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| FrameError::Hardware("synthetic source poisoned".into()))?;
        info!(
            source = %self.name,
            "Starting synthetic capture {}x{} @ {} fps ({:?})",
            request.width, request.height, request.rate, request.format
        );
        state.request = Some(request);
        Ok(())
    }

    fn stop_capture(&self) {
        if let Ok(mut state) = self.state.lock() {
            if state.request.take().is_some() {
                info!(source = %self.name, "Synthetic capture stopped");
            }
        }
    }
}
