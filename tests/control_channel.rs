//! Control Channel Tests
//!
//! Bytes arriving on the serial control channel are framed into lines and
//! decoded as JSON command envelopes, independent of the video path.

use std::sync::{Arc, Mutex};
use std::thread::sleep;
use std::time::{Duration, Instant};

use uvcam::control::{CommandRequest, JsonCommandHandler};
use uvcam::testing::{CompletionMode, MockUsb, ScriptedSource};
use uvcam::usb::LoopbackUsb;
use uvcam::{RunningDevice, SlotConfig, UsbVideo, UvcDevice};

type Seen = Arc<Mutex<Vec<String>>>;

fn device_with_handler(usb: Arc<dyn UsbVideo>, capacity: usize) -> (RunningDevice, Seen) {
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let handler = JsonCommandHandler::new(move |request: CommandRequest| {
        let mut sink = sink.lock().unwrap();
        sink.extend(request.commands.into_iter().map(|c| c.command));
    });

    let mut device = UvcDevice::new(1)
        .unwrap()
        .with_control_capacity(capacity)
        .with_control_handler(handler);
    device
        .configure(
            0,
            SlotConfig::builder()
                .with_source(Arc::new(ScriptedSource::new()))
                .with_buffer_size(1024)
                .build()
                .unwrap(),
        )
        .unwrap();
    (device.init(usb).unwrap(), seen)
}

/// Commands split across USB packets are reassembled
#[test]
fn test_commands_across_chunks() {
    let usb = Arc::new(MockUsb::new(CompletionMode::OnTask));
    let (running, seen) = device_with_handler(usb, 512);
    let callbacks = running.callbacks();

    callbacks.on_control_rx(br#"{"commands":[{"command":"get_"#);
    callbacks.on_control_rx(b"device_mode\"}]}\r\n");
    callbacks.on_control_rx(br#"{"commands":[{"command":"pause","data":{"pause":false}}]}"#);
    callbacks.on_control_rx(b"\n");

    assert_eq!(
        *seen.lock().unwrap(),
        vec!["get_device_mode".to_string(), "pause".to_string()]
    );
    running.shutdown();
}

/// An unterminated line longer than the buffer is flushed, not accumulated
#[test]
fn test_overflow_flush_keeps_channel_alive() {
    let usb = Arc::new(MockUsb::new(CompletionMode::OnTask));
    let (running, seen) = device_with_handler(usb, 32);
    let callbacks = running.callbacks();

    callbacks.on_control_rx(&[b'x'; 100]);
    callbacks.on_control_rx(b"\n{\"commands\":[{\"command\":\"ok\"}]}\n");

    assert_eq!(*seen.lock().unwrap(), vec!["ok".to_string()]);
    running.shutdown();
}

/// Control bytes written by the host reach the handler via the USB task
#[test]
fn test_loopback_control_delivery() {
    let usb = Arc::new(LoopbackUsb::new(10_000));
    let (running, seen) = device_with_handler(usb.clone(), 512);

    usb.send_control(b"{\"commands\":[{\"command\":\"get_serial\"}]}\n");

    let deadline = Instant::now() + Duration::from_secs(2);
    while seen.lock().unwrap().is_empty() && Instant::now() < deadline {
        sleep(Duration::from_millis(5));
    }
    assert_eq!(*seen.lock().unwrap(), vec!["get_serial".to_string()]);
    running.shutdown();
}
