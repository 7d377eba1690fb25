//! Error types for the UVC streaming core
//!
//! Only configuration and negotiation failures cross the core boundary.
//! Per-frame failures are absorbed by the pacing loop and show up in logs
//! and slot statistics instead.

use thiserror::Error;

/// Setup-time failures. Fatal to bring-up, never defaulted.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("camera count {0} is not supported (expected 1 or 2)")]
    CameraCount(usize),

    #[error("camera index {index} is invalid (device has {count} cameras)")]
    InvalidIndex { index: usize, count: usize },

    #[error("frame source is missing")]
    MissingSource,

    #[error("destination buffer is missing")]
    MissingBuffer,

    #[error("destination buffer has zero capacity")]
    ZeroCapacity,

    #[error("frame rate must be non-zero")]
    ZeroFrameRate,

    #[error("frame table is empty")]
    EmptyFrameTable,

    #[error("camera {0} is not configured")]
    NotConfigured(usize),

    #[error("USB device stack failed to start: {0}")]
    UsbStart(#[source] UsbError),

    #[error("failed to spawn {name} task: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

/// Rejection of a host commit request.
#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error("frame index {index} is out of range (camera supports 1..={supported})")]
    FrameIndexOutOfRange { index: u8, supported: usize },

    #[error("camera index {0} is not known")]
    UnknownCamera(usize),

    #[error("camera start failed: {0}")]
    CameraStart(#[source] FrameError),
}

/// UVC request error code: out of range.
pub const VIDEO_ERROR_OUT_OF_RANGE: u8 = 0x04;

impl NegotiationError {
    /// Request error code reported to the host for this rejection.
    pub fn uvc_code(&self) -> u8 {
        // Hosts only act on "rejected", so every case reports out-of-range.
        match self {
            NegotiationError::FrameIndexOutOfRange { .. }
            | NegotiationError::UnknownCamera(_)
            | NegotiationError::CameraStart(_) => VIDEO_ERROR_OUT_OF_RANGE,
        }
    }
}

/// Failures reported by a frame source.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("no frame available")]
    Unavailable,

    #[error("capture not started")]
    NotStarted,

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("camera hardware error: {0}")]
    Hardware(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures reported by the USB device stack collaborator.
#[derive(Debug, Error)]
pub enum UsbError {
    #[error("device stack init failed: {0}")]
    Init(String),

    #[error("transfer rejected on camera {camera} stream {stream}")]
    TransferRejected { camera: usize, stream: usize },
}

/// Control channel command decoding failures.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("command line is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("command envelope contains no commands")]
    Empty,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_negotiation_rejection_reports_out_of_range() {
        let errors = [
            NegotiationError::FrameIndexOutOfRange {
                index: 9,
                supported: 4,
            },
            NegotiationError::UnknownCamera(3),
            NegotiationError::CameraStart(FrameError::Hardware("sensor".into())),
        ];
        for err in errors {
            assert_eq!(err.uvc_code(), VIDEO_ERROR_OUT_OF_RANGE);
        }
    }

    #[test]
    fn messages_name_the_offending_value() {
        let err = ConfigError::InvalidIndex { index: 2, count: 1 };
        assert_eq!(
            err.to_string(),
            "camera index 2 is invalid (device has 1 cameras)"
        );
        let err = NegotiationError::FrameIndexOutOfRange {
            index: 0,
            supported: 3,
        };
        assert!(err.to_string().contains("1..=3"));
    }
}
