//! uvcam demo: UVC device bring-up against the in-process host

use std::sync::Arc;
use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use tracing::{error, info};

use uvcam::capture::SyntheticSource;
use uvcam::control::{CommandRequest, JsonCommandHandler};
use uvcam::pipeline::negotiation::TICKS_PER_MS;
use uvcam::usb::loopback::LoopbackUsb;
use uvcam::{Config, FrameSource, SlotConfig, UvcDevice};

/// Simulated full-speed-ish bus throughput.
const LOOPBACK_BYTES_PER_MS: usize = 1_000;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter("uvcam=debug")
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("uvcam Launching...");

    let config = Config::load("uvcam.toml")?;

    let mut device = UvcDevice::from_config(&config)?.with_control_handler(
        JsonCommandHandler::new(|request: CommandRequest| {
            for command in request.commands {
                info!(command = %command.command, data = ?command.data, "control command");
            }
        }),
    );
    for (index, camera) in config.cameras.iter().enumerate() {
        device.configure(index, SlotConfig::from_config(camera, frame_source(index)?)?)?;
    }

    let usb = Arc::new(LoopbackUsb::new(LOOPBACK_BYTES_PER_MS));
    let running = device.init(usb.clone())?;

    for (index, camera) in config.cameras.iter().enumerate() {
        let interval_ms = 1000 / camera.frame_rate.max(1);
        let request = usb
            .commit(index, 1, interval_ms * TICKS_PER_MS)
            .map_err(|e| eyre!("camera {} commit failed: {}", index, e))?;
        info!(camera = index, ?request, "Host committed");
        usb.set_streaming(index, true);
    }

    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                for camera in 0..running.camera_count() {
                    if let Some(stats) = running.stats(camera) {
                        info!(
                            camera,
                            sent = stats.frames_sent,
                            dropped = stats.frames_dropped,
                            delivered = usb.frames_delivered(camera),
                            "stats"
                        );
                    }
                }
            }
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    error!("Failed to listen for ctrl-c: {}", e);
                }
                break;
            }
        }
    }

    info!("Shutting down");
    for camera in 0..running.camera_count() {
        usb.set_streaming(camera, false);
    }
    running.shutdown();
    Ok(())
}

#[cfg(feature = "v4l2")]
fn frame_source(index: usize) -> Result<Arc<dyn FrameSource>> {
    use uvcam::capture::v4l2::{find_mjpeg_device, V4l2Source};

    if index == 0 {
        let path = find_mjpeg_device()?;
        return Ok(Arc::new(V4l2Source::new(path, 4)));
    }
    Ok(Arc::new(SyntheticSource::new(format!("synthetic{}", index))))
}

#[cfg(not(feature = "v4l2"))]
fn frame_source(index: usize) -> Result<Arc<dyn FrameSource>> {
    Ok(Arc::new(SyntheticSource::new(format!("synthetic{}", index))))
}
