//! Host commit handling: frame-index lookup and interval conversion

use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

use crate::capture::{CaptureRequest, FrameSource, PixelFormat};
use crate::error::NegotiationError;
use crate::pipeline::session::SharedParams;

/// USB frame intervals are expressed in 100 ns ticks.
pub const TICKS_PER_MS: u32 = 10_000;

/// One advertised frame descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameInfo {
    pub width: u32,
    pub height: u32,
    pub rate: u32,
}

/// Frame sizes advertised by the reference camera board.
pub static REFERENCE_FRAMES: Lazy<Vec<FrameInfo>> = Lazy::new(|| {
    vec![
        FrameInfo {
            width: 640,
            height: 480,
            rate: 15,
        },
        FrameInfo {
            width: 480,
            height: 320,
            rate: 30,
        },
        FrameInfo {
            width: 1280,
            height: 720,
            rate: 15,
        },
        FrameInfo {
            width: 1920,
            height: 1080,
            rate: 15,
        },
    ]
});

/// Immutable frame-index table for one camera. Indices are 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameTable {
    frames: Vec<FrameInfo>,
}

impl FrameTable {
    pub fn new(frames: Vec<FrameInfo>) -> Self {
        Self { frames }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn lookup(&self, frame_index: u8) -> Result<&FrameInfo, NegotiationError> {
        let out_of_range = || NegotiationError::FrameIndexOutOfRange {
            index: frame_index,
            supported: self.frames.len(),
        };
        let slot = (frame_index as usize).checked_sub(1).ok_or_else(out_of_range)?;
        self.frames.get(slot).ok_or_else(out_of_range)
    }
}

/// Truncating 100 ns tick to millisecond conversion.
pub fn interval_ms_from_ticks(ticks: u32) -> u32 {
    ticks / TICKS_PER_MS
}

/// Commit handler for one camera slot.
pub struct Negotiator {
    camera: usize,
    format: PixelFormat,
    table: FrameTable,
    source: Arc<dyn FrameSource>,
    params: Arc<SharedParams>,
}

impl Negotiator {
    pub fn new(
        camera: usize,
        format: PixelFormat,
        table: FrameTable,
        source: Arc<dyn FrameSource>,
        params: Arc<SharedParams>,
    ) -> Self {
        Self {
            camera,
            format,
            table,
            source,
            params,
        }
    }

    pub fn camera(&self) -> usize {
        self.camera
    }

    /// Validate a commit, start the source, and publish the new interval.
    ///
    /// The interval only changes once the source has accepted the new
    /// resolution, so a rejected commit leaves pacing untouched.
    #[instrument(skip(self), fields(camera = self.camera))]
    pub fn commit(
        &self,
        frame_index: u8,
        interval_ticks: u32,
    ) -> Result<CaptureRequest, NegotiationError> {
        info!("bFrameIndex: {}", frame_index);
        info!("dwFrameInterval: {}", interval_ticks);

        let frame = *self.table.lookup(frame_index)?;
        let interval_ms = interval_ms_from_ticks(interval_ticks);
        if interval_ms == 0 {
            warn!(
                "dwFrameInterval {} is under 1 ms, pacing by completions only",
                interval_ticks
            );
        }

        let request = CaptureRequest {
            format: self.format,
            width: frame.width,
            height: frame.height,
            rate: frame.rate,
        };

        if let Err(e) = self.source.start_capture(request) {
            error!("camera init failed: {}", e);
            return Err(NegotiationError::CameraStart(e));
        }

        let generation = self
            .params
            .publish(Duration::from_millis(interval_ms as u64), request);
        info!(
            "Committed {}x{} @ {} fps, pacing every {} ms (generation {})",
            frame.width, frame.height, frame.rate, interval_ms, generation
        );
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedSource;

    fn negotiator(source: Arc<ScriptedSource>) -> (Negotiator, Arc<SharedParams>) {
        let params = Arc::new(SharedParams::new(Duration::from_millis(66)));
        let negotiator = Negotiator::new(
            0,
            PixelFormat::Mjpeg,
            FrameTable::new(REFERENCE_FRAMES.clone()),
            source,
            params.clone(),
        );
        (negotiator, params)
    }

    #[test]
    fn interval_conversion_truncates() {
        assert_eq!(interval_ms_from_ticks(333_333), 33);
        assert_eq!(interval_ms_from_ticks(500_000), 50);
        assert_eq!(interval_ms_from_ticks(9_999), 0);
        assert_eq!(interval_ms_from_ticks(666_666), 66);
    }

    #[test]
    fn lookup_is_one_based() {
        let table = FrameTable::new(REFERENCE_FRAMES.clone());
        assert_eq!(table.lookup(1).unwrap().width, 640);
        assert_eq!(table.lookup(4).unwrap().width, 1920);
        assert!(table.lookup(0).is_err());
        assert!(table.lookup(5).is_err());
    }

    #[test]
    fn out_of_range_commit_never_starts_source() {
        let source = Arc::new(ScriptedSource::new());
        let (negotiator, params) = negotiator(source.clone());

        for index in [0u8, 5, 200] {
            let err = negotiator.commit(index, 333_333).unwrap_err();
            assert!(matches!(
                err,
                NegotiationError::FrameIndexOutOfRange { supported: 4, .. }
            ));
        }
        assert_eq!(source.starts(), 0);
        assert_eq!(params.load().generation, 0);
    }

    #[test]
    fn valid_commit_starts_source_and_publishes_interval() {
        let source = Arc::new(ScriptedSource::new());
        let (negotiator, params) = negotiator(source.clone());

        let request = negotiator.commit(2, 333_333).unwrap();
        assert_eq!((request.width, request.height, request.rate), (480, 320, 30));
        assert_eq!(source.starts(), 1);
        assert_eq!(source.last_request(), Some(request));

        let current = params.load();
        assert_eq!(current.interval, Duration::from_millis(33));
        assert_eq!(current.generation, 1);
    }

    #[test]
    fn camera_start_failure_is_a_rejection() {
        let source = Arc::new(ScriptedSource::new());
        source.fail_next_start();
        let (negotiator, params) = negotiator(source.clone());

        let err = negotiator.commit(1, 500_000).unwrap_err();
        assert!(matches!(err, NegotiationError::CameraStart(_)));
        assert_eq!(params.load().interval, Duration::from_millis(66));
        assert_eq!(params.load().generation, 0);
    }

    #[test]
    fn sub_millisecond_interval_is_accepted_as_zero() {
        let source = Arc::new(ScriptedSource::new());
        let (negotiator, params) = negotiator(source.clone());

        negotiator.commit(1, 9_999).unwrap();
        assert_eq!(params.load().interval, Duration::ZERO);
        assert_eq!(source.starts(), 1);
    }
}
