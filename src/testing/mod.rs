//! Deterministic doubles for the USB stack, frame source and clock
//!
//! Used by this crate's tests and available to integrators who want to
//! exercise their own sources against the pacing loop.

pub mod clock;
pub mod source;
pub mod usb;

pub use clock::ManualClock;
pub use source::ScriptedSource;
pub use usb::{CompletionMode, MockUsb};
