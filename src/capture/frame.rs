use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Payload encodings a camera slot can advertise.
///
/// Frames arrive already encoded; the core never looks inside them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    Mjpeg,
    H264,
    Yuyv4,
}

/// A frame lent by a [`FrameSource`](super::FrameSource) for one transfer.
///
/// The handle is moved back into [`FrameSource::release`](super::FrameSource::release)
/// once its bytes have been copied (or rejected), so it cannot be returned
/// twice or kept past the pacing iteration that acquired it.
#[derive(Debug)]
pub struct FrameHandle {
    data: Bytes,

    /// Producer-side slot id, opaque to the core
    token: u64,

    /// Acquisition timestamp for latency tracking
    pub timestamp: Instant,
}

impl FrameHandle {
    pub fn new(data: Bytes, token: u64) -> Self {
        Self {
            data,
            token,
            timestamp: Instant::now(),
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn token(&self) -> u64 {
        self.token
    }
}

/// Resolution and rate a source is asked to produce after a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureRequest {
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub rate: u32,
}
