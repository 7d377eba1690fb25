use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::error::UsbError;
use crate::pipeline::completion::CompletionNotifier;
use crate::usb::{DeviceCallbacks, UsbVideo};
use crate::MAX_CAMERAS;

/// When [`MockUsb`] reports a submitted transfer as complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionMode {
    /// Only on an explicit [`MockUsb::complete`].
    Manual,
    /// Immediately, from inside `submit_frame`.
    OnSubmit,
    /// On the next `task()` pass.
    OnTask,
}

/// Scriptable USB stack that records what the core asks of it.
pub struct MockUsb {
    mode: CompletionMode,
    streaming: [AtomicBool; MAX_CAMERAS],
    in_flight: [AtomicUsize; MAX_CAMERAS],
    max_in_flight: [AtomicUsize; MAX_CAMERAS],
    submissions: [AtomicUsize; MAX_CAMERAS],
    last_payload: Mutex<[Option<Vec<u8>>; MAX_CAMERAS]>,
    notifiers: Mutex<[Option<CompletionNotifier>; MAX_CAMERAS]>,
    callbacks: Mutex<Option<DeviceCallbacks>>,
    reject: AtomicBool,
    fail_start: AtomicBool,
    tasks: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|p| p.into_inner())
}

impl MockUsb {
    pub fn new(mode: CompletionMode) -> Self {
        Self {
            mode,
            streaming: Default::default(),
            in_flight: Default::default(),
            max_in_flight: Default::default(),
            submissions: Default::default(),
            last_payload: Mutex::new(Default::default()),
            notifiers: Mutex::new(Default::default()),
            callbacks: Mutex::new(None),
            reject: AtomicBool::new(false),
            fail_start: AtomicBool::new(false),
            tasks: AtomicUsize::new(0),
        }
    }

    /// Deliver completions for `camera` straight to a pacing loop built
    /// without a device.
    pub fn attach(&self, camera: usize, notifier: CompletionNotifier) {
        lock(&self.notifiers)[camera] = Some(notifier);
    }

    /// Host toggles streaming. Turning it off aborts the in-flight transfer.
    pub fn set_streaming(&self, camera: usize, on: bool) {
        if !on {
            self.in_flight[camera].store(0, Ordering::SeqCst);
        }
        self.streaming[camera].store(on, Ordering::SeqCst);
    }

    pub fn reject_submissions(&self, reject: bool) {
        self.reject.store(reject, Ordering::SeqCst);
    }

    pub fn fail_start(&self) {
        self.fail_start.store(true, Ordering::SeqCst);
    }

    /// Finish the in-flight transfer on `camera` and signal it.
    pub fn complete(&self, camera: usize) {
        let finished = self.in_flight[camera]
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if !finished {
            return;
        }
        if let Some(notifier) = lock(&self.notifiers)[camera].clone() {
            notifier.notify();
            return;
        }
        if let Some(callbacks) = self.callbacks() {
            callbacks.on_transfer_complete(camera, 0);
        }
    }

    pub fn callbacks(&self) -> Option<DeviceCallbacks> {
        lock(&self.callbacks).clone()
    }

    pub fn submissions(&self, camera: usize) -> usize {
        self.submissions[camera].load(Ordering::SeqCst)
    }

    pub fn in_flight(&self, camera: usize) -> usize {
        self.in_flight[camera].load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self, camera: usize) -> usize {
        self.max_in_flight[camera].load(Ordering::SeqCst)
    }

    pub fn last_payload(&self, camera: usize) -> Option<Vec<u8>> {
        lock(&self.last_payload)[camera].clone()
    }

    pub fn task_passes(&self) -> usize {
        self.tasks.load(Ordering::SeqCst)
    }
}

impl UsbVideo for MockUsb {
    fn start(&self, callbacks: DeviceCallbacks) -> Result<(), UsbError> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(UsbError::Init("PHY did not come up".into()));
        }
        *lock(&self.callbacks) = Some(callbacks);
        Ok(())
    }

    fn task(&self) {
        self.tasks.fetch_add(1, Ordering::SeqCst);
        if self.mode == CompletionMode::OnTask {
            for camera in 0..MAX_CAMERAS {
                self.complete(camera);
            }
        }
    }

    fn is_streaming(&self, camera: usize, _stream: usize) -> bool {
        self.streaming
            .get(camera)
            .map(|s| s.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    fn submit_frame(&self, camera: usize, stream: usize, payload: &[u8]) -> Result<(), UsbError> {
        if self.reject.load(Ordering::SeqCst) || !self.is_streaming(camera, stream) {
            return Err(UsbError::TransferRejected { camera, stream });
        }
        let now = self.in_flight[camera].fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight[camera].fetch_max(now, Ordering::SeqCst);
        self.submissions[camera].fetch_add(1, Ordering::SeqCst);
        lock(&self.last_payload)[camera] = Some(payload.to_vec());

        if self.mode == CompletionMode::OnSubmit {
            self.complete(camera);
        }
        Ok(())
    }
}
