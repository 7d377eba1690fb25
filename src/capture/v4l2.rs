//! V4L2-backed frame source: relays a local MJPEG webcam to the UVC host

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use bytes::Bytes;
use tracing::{info, instrument, warn};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use crate::capture::frame::{CaptureRequest, FrameHandle, PixelFormat};
use crate::capture::source::FrameSource;
use crate::error::FrameError;

/// Frame source reading memory-mapped buffers from a V4L2 capture device
pub struct V4l2Source {
    path: String,
    buffer_count: u32,
    active: Mutex<Option<Active>>,
    sequence: AtomicU64,
}

struct Active {
    stream: MmapStream<'static>,
    _device: Device,
}

impl V4l2Source {
    pub fn new(path: impl Into<String>, buffer_count: u32) -> Self {
        Self {
            path: path.into(),
            buffer_count: buffer_count.max(2),
            active: Mutex::new(None),
            sequence: AtomicU64::new(0),
        }
    }

    fn open(&self, request: &CaptureRequest) -> Result<Active, FrameError> {
        let device = Device::with_path(&self.path)?;

        let caps = device.query_caps()?;
        info!("Device: {} ({})", caps.card, caps.driver);
        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(FrameError::Hardware(format!(
                "{} doesn't support video capture",
                self.path
            )));
        }

        let mut fmt = device.format()?;
        fmt.width = request.width;
        fmt.height = request.height;
        fmt.fourcc = match request.format {
            PixelFormat::Mjpeg => FourCC::new(b"MJPG"),
            PixelFormat::Yuyv4 => FourCC::new(b"YUYV"),
            PixelFormat::H264 => FourCC::new(b"H264"),
        };
        let applied = device.set_format(&fmt)?;
        if applied.width != request.width || applied.height != request.height {
            warn!(
                "{} negotiated {}x{} instead of {}x{}",
                self.path, applied.width, applied.height, request.width, request.height
            );
        }
        if applied.fourcc != fmt.fourcc {
            return Err(FrameError::UnsupportedFormat(format!("{:?}", request.format)));
        }
        device.set_params(&Parameters::with_fps(request.rate))?;

        let stream = MmapStream::with_buffers(&device, Type::VideoCapture, self.buffer_count)?;
        Ok(Active {
            stream,
            _device: device,
        })
    }
}

impl FrameSource for V4l2Source {
    fn acquire(&self) -> Result<FrameHandle, FrameError> {
        let mut active = self
            .active
            .lock()
            .map_err(|_| FrameError::Hardware("capture state poisoned".into()))?;
        let active = active.as_mut().ok_or(FrameError::NotStarted)?;

        let (buf, meta) = active.stream.next()?;
        let used = (meta.bytesused as usize).min(buf.len());
        if used == 0 {
            return Err(FrameError::Unavailable);
        }

        // The mmap buffer is requeued on the next dequeue, so copy out now
        let data = Bytes::copy_from_slice(&buf[..used]);
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(FrameHandle::new(data, sequence))
    }

    fn release(&self, frame: FrameHandle) {
        drop(frame);
    }

    #[instrument(skip(self), fields(path = %self.path))]
    fn start_capture(&self, request: CaptureRequest) -> Result<(), FrameError> {
        let mut active = self
            .active
            .lock()
            .map_err(|_| FrameError::Hardware("capture state poisoned".into()))?;
        // Drop any previous stream before reconfiguring the device
        active.take();
        *active = Some(self.open(&request)?);
        info!(
            "Capture stream started with {} buffers",
            self.buffer_count
        );
        Ok(())
    }

    fn stop_capture(&self) {
        if let Ok(mut active) = self.active.lock() {
            if active.take().is_some() {
                info!("Capture stream on {} stopped", self.path);
            }
        }
    }
}

/// Find the first capture device offering MJPEG
pub fn find_mjpeg_device() -> Result<String, FrameError> {
    info!("Auto-detecting capture devices...");

    for i in 0..10 {
        let path = format!("/dev/video{}", i);
        if !Path::new(&path).exists() {
            continue;
        }

        let Ok(dev) = Device::with_path(&path) else {
            continue;
        };
        let Ok(caps) = dev.query_caps() else {
            continue;
        };
        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            continue;
        }
        if let Ok(formats) = dev.enum_formats() {
            if formats.iter().any(|fmt| fmt.fourcc == FourCC::new(b"MJPG")) {
                info!("Found MJPEG device: {} - {}", path, caps.card);
                return Ok(path);
            }
        }
    }

    Err(FrameError::Hardware("no MJPEG capture device found".into()))
}
