pub mod capture;
pub mod control;
pub mod device;
pub mod error;
pub mod pipeline;
pub mod testing;
pub mod usb;
pub mod utils;

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use capture::{CaptureRequest, FrameHandle, FrameSource, PixelFormat};
pub use device::{RunningDevice, SlotConfig, UvcDevice};
pub use error::{ConfigError, FrameError, NegotiationError, UsbError};
pub use pipeline::{FrameInfo, PacingPolicy, PacingTiming, StreamingState};
pub use usb::{DeviceCallbacks, UsbVideo};

/// Cameras a single UVC function can expose.
pub const MAX_CAMERAS: usize = 2;

/// Device configuration, read once at bring-up
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub usb: UsbConfig,
    pub pacing: PacingConfig,
    pub control: ControlConfig,
    pub cameras: Vec<CameraConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UsbConfig {
    pub task_core: Option<usize>,
    pub poll_interval_us: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    pub yield_ms: u64,
    pub completion_wait_ms: u64,
    pub policy: PacingPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub line_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub format: PixelFormat,
    /// Pacing rate used until the host commits an interval
    pub frame_rate: u32,
    pub buffer_size: usize,
    pub task_core: Option<usize>,
    pub stack_size: usize,
    /// Advertised frame sizes; frame index 1 is the first entry
    pub frames: Vec<FrameInfo>,
}

impl Default for UsbConfig {
    fn default() -> Self {
        Self {
            task_core: None,
            poll_interval_us: 250,
        }
    }
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            yield_ms: 1,
            completion_wait_ms: 1,
            policy: PacingPolicy::CatchUp,
        }
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self { line_capacity: 512 }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            format: PixelFormat::Mjpeg,
            frame_rate: 15,
            buffer_size: 60 * 1024,
            task_core: None,
            stack_size: 64 * 1024,
            frames: pipeline::negotiation::REFERENCE_FRAMES.clone(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            usb: UsbConfig::default(),
            pacing: PacingConfig::default(),
            control: ControlConfig::default(),
            cameras: vec![CameraConfig::default()],
        }
    }
}

impl Config {
    /// Layer an optional TOML file under `UVCAM_*` environment overrides,
    /// e.g. `UVCAM_PACING__POLICY=skip_missed`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()).required(false))
            .add_source(
                config::Environment::with_prefix("UVCAM")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    pub fn timing(&self) -> PacingTiming {
        PacingTiming {
            yield_for: Duration::from_millis(self.pacing.yield_ms),
            completion_wait: Duration::from_millis(self.pacing.completion_wait_ms),
            policy: self.pacing.policy,
        }
    }
}
