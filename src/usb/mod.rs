//! Seam between the streaming core and a USB device stack

pub mod callbacks;
pub mod loopback;

pub use callbacks::DeviceCallbacks;
pub use loopback::LoopbackUsb;

use crate::error::UsbError;

/// What the core needs from a USB device stack with a video function.
///
/// Host-driven events flow the other way, through the [`DeviceCallbacks`]
/// handed over in [`UsbVideo::start`].
pub trait UsbVideo: Send + Sync {
    /// Bring the stack up and keep `callbacks` for event delivery.
    fn start(&self, callbacks: DeviceCallbacks) -> Result<(), UsbError>;

    /// One pass of stack processing; called repeatedly from the USB task.
    fn task(&self);

    /// Whether the host has enabled streaming on this interface.
    fn is_streaming(&self, camera: usize, stream: usize) -> bool;

    /// Queue one frame for transfer.
    ///
    /// `payload` is only borrowed for the call; implementations stage it into
    /// their endpoint buffers and report completion through
    /// [`DeviceCallbacks::on_transfer_complete`].
    fn submit_frame(&self, camera: usize, stream: usize, payload: &[u8]) -> Result<(), UsbError>;
}
