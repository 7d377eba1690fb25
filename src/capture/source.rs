use crate::capture::frame::{CaptureRequest, FrameHandle};
use crate::error::FrameError;

/// Producer side of a camera slot.
///
/// Called from the slot's pacing task (`acquire`/`release`) and from the USB
/// stack's context (`start_capture` on commit, `stop_capture` on suspend), so
/// implementations keep their own interior locking.
pub trait FrameSource: Send + Sync {
    /// Take the next frame. May block briefly while the sensor produces one.
    fn acquire(&self) -> Result<FrameHandle, FrameError>;

    /// Hand a frame's buffer back to the producer.
    fn release(&self, frame: FrameHandle);

    /// (Re)start producing frames at the committed resolution and rate.
    fn start_capture(&self, request: CaptureRequest) -> Result<(), FrameError>;

    fn stop_capture(&self);
}
