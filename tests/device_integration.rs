//! Device Integration Tests
//!
//! Runs the full device with real pacing and USB tasks:
//! - Pacing against the committed interval
//! - Independence of two camera slots
//! - Commit rejection and suspend routing
//! - Loopback host end to end

use std::sync::Arc;
use std::thread::sleep;
use std::time::Duration;

use uvcam::capture::SyntheticSource;
use uvcam::testing::{CompletionMode, MockUsb, ScriptedSource};
use uvcam::usb::LoopbackUsb;
use uvcam::{ConfigError, NegotiationError, SlotConfig, UvcDevice};

fn slot(source: Arc<ScriptedSource>, capacity: usize) -> SlotConfig {
    SlotConfig::builder()
        .with_source(source)
        .with_buffer_size(capacity)
        .with_frame_rate(15)
        .build()
        .expect("valid slot")
}

/// A committed 50 ms interval produces about one transfer per interval
#[test]
fn test_single_camera_paces_to_committed_interval() {
    let source = Arc::new(ScriptedSource::new().with_default_len(512));
    let usb = Arc::new(MockUsb::new(CompletionMode::OnTask));

    let mut device = UvcDevice::new(1).unwrap();
    device.configure(0, slot(source.clone(), 4096)).unwrap();
    let running = device.init(usb.clone()).unwrap();

    let request = running
        .callbacks()
        .on_commit(0, 0, 1, 500_000)
        .expect("commit accepted");
    assert_eq!((request.width, request.height), (640, 480));
    assert_eq!(source.starts(), 1);

    usb.set_streaming(0, true);
    sleep(Duration::from_millis(550));
    usb.set_streaming(0, false);

    let stats = running.stats(0).unwrap();
    running.shutdown();

    assert!(
        (4..=12).contains(&stats.frames_sent),
        "frames sent: {}",
        stats.frames_sent
    );
    assert_eq!(stats.bytes_sent, stats.frames_sent * 512);
    assert_eq!(usb.max_in_flight(0), 1);
    assert_eq!(source.outstanding(), 0);
}

/// Each camera keeps its own cadence; a failing camera does not slow the other
#[test]
fn test_two_cameras_are_independent() {
    let fast = Arc::new(ScriptedSource::new().with_default_len(256));
    let broken = Arc::new(ScriptedSource::new());
    for _ in 0..10_000 {
        broken.push_failure();
    }
    let usb = Arc::new(MockUsb::new(CompletionMode::OnTask));

    let mut device = UvcDevice::new(2).unwrap();
    device.configure(0, slot(fast.clone(), 1024)).unwrap();
    device.configure(1, slot(broken.clone(), 1024)).unwrap();
    let running = device.init(usb.clone()).unwrap();

    running.callbacks().on_commit(0, 0, 2, 200_000).unwrap();
    running.callbacks().on_commit(1, 0, 1, 1_000_000).unwrap();

    usb.set_streaming(0, true);
    usb.set_streaming(1, true);
    sleep(Duration::from_millis(500));

    let cam0 = running.stats(0).unwrap();
    let cam1 = running.stats(1).unwrap();
    running.shutdown();

    assert!(
        (10..=26).contains(&cam0.frames_sent),
        "camera 0 frames sent: {}",
        cam0.frames_sent
    );
    assert_eq!(cam1.frames_sent, 0);
    assert!(cam1.acquire_failures >= 2);
    assert_eq!(usb.max_in_flight(0), 1);
}

/// Oversized frames are dropped and never reach the bus
#[test]
fn test_oversize_frames_never_submitted() {
    let source = Arc::new(ScriptedSource::new().with_default_len(2048));
    let usb = Arc::new(MockUsb::new(CompletionMode::OnTask));

    let mut device = UvcDevice::new(1).unwrap();
    device.configure(0, slot(source.clone(), 1024)).unwrap();
    let running = device.init(usb.clone()).unwrap();
    running.callbacks().on_commit(0, 0, 1, 200_000).unwrap();

    usb.set_streaming(0, true);
    sleep(Duration::from_millis(200));

    let stats = running.stats(0).unwrap();
    running.shutdown();

    assert_eq!(usb.submissions(0), 0);
    assert!(stats.frames_dropped > 0);
    assert_eq!(source.outstanding(), 0);
    assert_eq!(source.releases(), source.acquires());
}

/// Out-of-range frame indices are rejected before the camera is touched
#[test]
fn test_commit_rejections() {
    let source = Arc::new(ScriptedSource::new());
    let usb = Arc::new(MockUsb::new(CompletionMode::OnTask));

    let mut device = UvcDevice::new(1).unwrap();
    device.configure(0, slot(source.clone(), 1024)).unwrap();
    let running = device.init(usb).unwrap();
    let callbacks = running.callbacks();

    let err = callbacks.on_commit(0, 0, 9, 333_333).unwrap_err();
    assert!(matches!(err, NegotiationError::FrameIndexOutOfRange { .. }));
    assert_eq!(err.uvc_code(), 0x04);

    let err = callbacks.on_commit(3, 0, 1, 333_333).unwrap_err();
    assert!(matches!(err, NegotiationError::UnknownCamera(3)));

    source.fail_next_start();
    let err = callbacks.on_commit(0, 0, 1, 333_333).unwrap_err();
    assert!(matches!(err, NegotiationError::CameraStart(_)));

    assert_eq!(source.starts(), 0);
    running.shutdown();
}

/// Bus suspend stops every configured source
#[test]
fn test_suspend_stops_all_sources() {
    let a = Arc::new(ScriptedSource::new());
    let b = Arc::new(ScriptedSource::new());
    let usb = Arc::new(MockUsb::new(CompletionMode::OnTask));

    let mut device = UvcDevice::new(2).unwrap();
    device.configure(0, slot(a.clone(), 1024)).unwrap();
    device.configure(1, slot(b.clone(), 1024)).unwrap();
    let running = device.init(usb).unwrap();

    running.callbacks().on_suspend(false);
    running.callbacks().on_resume();
    assert_eq!((a.stops(), b.stops()), (1, 1));
    running.shutdown();
}

/// Skipping a slot makes bring-up fail
#[test]
fn test_unconfigured_slot_rejected() {
    let usb = Arc::new(MockUsb::new(CompletionMode::OnTask));
    let device = UvcDevice::new(1).unwrap();
    assert!(matches!(
        device.init(usb),
        Err(ConfigError::NotConfigured(0))
    ));
}

/// Synthetic frames flow through the loopback host
#[test]
fn test_loopback_end_to_end() {
    let source = Arc::new(SyntheticSource::new("cam0"));
    let usb = Arc::new(LoopbackUsb::new(40_000));

    let mut device = UvcDevice::new(1).unwrap();
    device
        .configure(
            0,
            SlotConfig::builder()
                .with_source(source.clone())
                .with_buffer_size(64 * 1024)
                .build()
                .unwrap(),
        )
        .unwrap();
    let running = device.init(usb.clone()).unwrap();

    usb.commit(0, 1, 333_333).expect("commit accepted");
    usb.set_streaming(0, true);
    sleep(Duration::from_millis(400));

    let stats = running.stats(0).unwrap();
    usb.set_streaming(0, false);
    running.shutdown();

    assert!(stats.frames_sent >= 3, "frames sent: {}", stats.frames_sent);
    assert!(usb.frames_delivered(0) >= 2);
    assert_eq!(stats.frames_dropped, 0);
    assert_eq!(source.outstanding(), 0);
}
