//! Device bring-up: slot configuration, task spawning, shutdown

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{info, instrument, warn};

use crate::capture::{FrameSource, PixelFormat};
use crate::control::{CommandHandler, LineFramer};
use crate::error::ConfigError;
use crate::pipeline::completion::completion_channel;
use crate::pipeline::negotiation::{FrameInfo, FrameTable, Negotiator, REFERENCE_FRAMES};
use crate::pipeline::scheduler::{PacingScheduler, PacingTiming};
use crate::pipeline::session::SharedParams;
use crate::pipeline::stats::{SlotStats, StatsSnapshot};
use crate::usb::callbacks::{BoxedHandler, CameraLink, ControlFramer};
use crate::usb::{DeviceCallbacks, UsbVideo};
use crate::utils::{pause, pin_current_thread, Clock, SystemClock};
use crate::{CameraConfig, Config, MAX_CAMERAS};

const DEFAULT_STACK_SIZE: usize = 64 * 1024;

/// Everything one camera slot needs, validated.
pub struct SlotConfig {
    source: Arc<dyn FrameSource>,
    buffer: Box<[u8]>,
    format: PixelFormat,
    frame_rate: u32,
    frames: FrameTable,
    task_core: Option<usize>,
    stack_size: usize,
}

impl SlotConfig {
    pub fn builder() -> SlotConfigBuilder {
        SlotConfigBuilder::default()
    }

    /// Slot from a config-file camera section, with a freshly allocated buffer.
    pub fn from_config(
        camera: &CameraConfig,
        source: Arc<dyn FrameSource>,
    ) -> Result<Self, ConfigError> {
        SlotConfig::builder()
            .with_source(source)
            .with_buffer_size(camera.buffer_size)
            .with_format(camera.format)
            .with_frame_rate(camera.frame_rate)
            .with_frames(camera.frames.clone())
            .with_task_core(camera.task_core)
            .with_stack_size(camera.stack_size)
            .build()
    }

    pub fn buffer_capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Pacing interval before the host commits one.
    pub fn default_interval(&self) -> Duration {
        Duration::from_millis(1000 / self.frame_rate as u64)
    }
}

pub struct SlotConfigBuilder {
    source: Option<Arc<dyn FrameSource>>,
    buffer: Option<Box<[u8]>>,
    format: PixelFormat,
    frame_rate: u32,
    frames: Vec<FrameInfo>,
    task_core: Option<usize>,
    stack_size: usize,
}

impl Default for SlotConfigBuilder {
    fn default() -> Self {
        Self {
            source: None,
            buffer: None,
            format: PixelFormat::Mjpeg,
            frame_rate: 15,
            frames: REFERENCE_FRAMES.clone(),
            task_core: None,
            stack_size: DEFAULT_STACK_SIZE,
        }
    }
}

impl SlotConfigBuilder {
    pub fn with_source(mut self, source: Arc<dyn FrameSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Destination buffer, reused for every frame of this slot.
    pub fn with_buffer(mut self, buffer: Box<[u8]>) -> Self {
        self.buffer = Some(buffer);
        self
    }

    pub fn with_buffer_size(self, size: usize) -> Self {
        self.with_buffer(vec![0u8; size].into_boxed_slice())
    }

    pub fn with_format(mut self, format: PixelFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_frame_rate(mut self, frame_rate: u32) -> Self {
        self.frame_rate = frame_rate;
        self
    }

    pub fn with_frames(mut self, frames: Vec<FrameInfo>) -> Self {
        self.frames = frames;
        self
    }

    pub fn with_task_core(mut self, core: Option<usize>) -> Self {
        self.task_core = core;
        self
    }

    pub fn with_stack_size(mut self, stack_size: usize) -> Self {
        self.stack_size = stack_size;
        self
    }

    pub fn build(self) -> Result<SlotConfig, ConfigError> {
        let source = self.source.ok_or(ConfigError::MissingSource)?;
        let buffer = self.buffer.ok_or(ConfigError::MissingBuffer)?;
        if buffer.is_empty() {
            return Err(ConfigError::ZeroCapacity);
        }
        if self.frame_rate == 0 {
            return Err(ConfigError::ZeroFrameRate);
        }
        if self.frame_rate > 1000 {
            warn!(
                "frame rate {} exceeds 1000 fps, default pacing interval is 0 ms",
                self.frame_rate
            );
        }
        if self.frames.is_empty() {
            return Err(ConfigError::EmptyFrameTable);
        }
        Ok(SlotConfig {
            source,
            buffer,
            format: self.format,
            frame_rate: self.frame_rate,
            frames: FrameTable::new(self.frames),
            task_core: self.task_core,
            stack_size: self.stack_size.max(DEFAULT_STACK_SIZE / 4),
        })
    }
}

/// A UVC device being set up. [`UvcDevice::init`] consumes it, so bring-up
/// happens exactly once.
pub struct UvcDevice {
    slots: Vec<Option<SlotConfig>>,
    timing: PacingTiming,
    clock: Arc<dyn Clock>,
    usb_core: Option<usize>,
    usb_poll: Duration,
    control_capacity: usize,
    control: Option<Box<dyn CommandHandler + Send>>,
}

impl UvcDevice {
    pub fn new(camera_count: usize) -> Result<Self, ConfigError> {
        if camera_count == 0 || camera_count > MAX_CAMERAS {
            return Err(ConfigError::CameraCount(camera_count));
        }
        Ok(Self {
            slots: (0..camera_count).map(|_| None).collect(),
            timing: PacingTiming::default(),
            clock: Arc::new(SystemClock::new()),
            usb_core: None,
            usb_poll: Duration::from_micros(250),
            control_capacity: 512,
            control: None,
        })
    }

    /// Device shaped by `config`; camera slots still need [`configure`](Self::configure).
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        Ok(Self::new(config.cameras.len())?
            .with_timing(config.timing())
            .with_usb_task(
                config.usb.task_core,
                Duration::from_micros(config.usb.poll_interval_us),
            )
            .with_control_capacity(config.control.line_capacity))
    }

    pub fn camera_count(&self) -> usize {
        self.slots.len()
    }

    pub fn with_timing(mut self, timing: PacingTiming) -> Self {
        self.timing = timing;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Core pinning and pass interval for the USB processing task.
    pub fn with_usb_task(mut self, core: Option<usize>, poll: Duration) -> Self {
        self.usb_core = core;
        self.usb_poll = poll;
        self
    }

    /// Longest control line before a forced flush.
    pub fn with_control_capacity(mut self, capacity: usize) -> Self {
        self.control_capacity = capacity;
        self
    }

    /// Route complete control-channel lines to `handler`.
    pub fn with_control_handler<H>(mut self, handler: H) -> Self
    where
        H: CommandHandler + Send + 'static,
    {
        self.control = Some(Box::new(handler));
        self
    }

    pub fn configure(&mut self, index: usize, slot: SlotConfig) -> Result<(), ConfigError> {
        let count = self.slots.len();
        let entry = self
            .slots
            .get_mut(index)
            .ok_or(ConfigError::InvalidIndex { index, count })?;
        info!(
            camera = index,
            "Configured {:?} slot, buffer {} bytes, {} fps default",
            slot.format,
            slot.buffer.len(),
            slot.frame_rate
        );
        *entry = Some(slot);
        Ok(())
    }

    /// Start the USB stack and every pacing task.
    #[instrument(skip_all, fields(cameras = self.slots.len()))]
    pub fn init(self, usb: Arc<dyn UsbVideo>) -> Result<RunningDevice, ConfigError> {
        let mut slots = Vec::with_capacity(self.slots.len());
        for (index, slot) in self.slots.into_iter().enumerate() {
            slots.push(slot.ok_or(ConfigError::NotConfigured(index))?);
        }

        let mut links = Vec::with_capacity(slots.len());
        let mut tasks = Vec::with_capacity(slots.len());
        let mut stats = Vec::with_capacity(slots.len());
        for (camera, slot) in slots.into_iter().enumerate() {
            let params = Arc::new(SharedParams::new(slot.default_interval()));
            let (notifier, waiter) = completion_channel();
            let slot_stats = Arc::new(SlotStats::new());

            links.push(CameraLink {
                negotiator: Negotiator::new(
                    camera,
                    slot.format,
                    slot.frames,
                    slot.source.clone(),
                    params.clone(),
                ),
                completion: notifier,
                source: slot.source.clone(),
            });
            let scheduler = PacingScheduler::new(
                camera,
                usb.clone(),
                slot.source,
                slot.buffer,
                params,
                waiter,
                self.clock.clone(),
                self.timing,
            )
            .with_stats(slot_stats.clone());
            tasks.push((scheduler, slot.task_core, slot.stack_size));
            stats.push(slot_stats);
        }

        let control: Option<ControlFramer> = self
            .control
            .map(|handler| LineFramer::new(self.control_capacity, BoxedHandler(handler)));
        let callbacks = DeviceCallbacks::new(links, control);
        usb.start(callbacks.clone())
            .map_err(ConfigError::UsbStart)?;

        let mut running = RunningDevice {
            callbacks,
            stats,
            shutdown: Arc::new(AtomicBool::new(false)),
            handles: Vec::new(),
        };

        let usb_task = usb.clone();
        let shutdown = running.shutdown.clone();
        let (core, poll) = (self.usb_core, self.usb_poll);
        running.spawn("usb".to_string(), DEFAULT_STACK_SIZE, move || {
            pin_current_thread("usb", core);
            while !shutdown.load(Ordering::Acquire) {
                usb_task.task();
                pause(poll);
            }
        })?;

        for (scheduler, core, stack_size) in tasks {
            let name = format!("uvc-cam{}", scheduler.camera());
            let shutdown = running.shutdown.clone();
            let task_name = name.clone();
            running.spawn(name, stack_size, move || {
                pin_current_thread(&task_name, core);
                scheduler.run(&shutdown);
            })?;
        }

        info!(
            "UVC Device Start, Version: {}",
            env!("CARGO_PKG_VERSION")
        );
        Ok(running)
    }
}

/// A started device. Dropping it stops and joins every task.
pub struct RunningDevice {
    callbacks: DeviceCallbacks,
    stats: Vec<Arc<SlotStats>>,
    shutdown: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl RunningDevice {
    fn spawn<F>(&mut self, name: String, stack_size: usize, body: F) -> Result<(), ConfigError>
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = std::thread::Builder::new()
            .name(name.clone())
            .stack_size(stack_size)
            .spawn(body)
            .map_err(|source| ConfigError::Spawn { name, source })?;
        self.handles.push(handle);
        Ok(())
    }

    /// Entry points for the USB stack's host events.
    pub fn callbacks(&self) -> &DeviceCallbacks {
        &self.callbacks
    }

    pub fn camera_count(&self) -> usize {
        self.stats.len()
    }

    pub fn stats(&self, camera: usize) -> Option<StatsSnapshot> {
        self.stats.get(camera).map(|s| s.snapshot())
    }

    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        for handle in self.handles.drain(..) {
            let name = handle.thread().name().unwrap_or("task").to_string();
            if handle.join().is_err() {
                warn!("{} task panicked", name);
            }
        }
    }
}

impl Drop for RunningDevice {
    fn drop(&mut self) {
        self.stop();
    }
}
