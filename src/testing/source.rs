use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Mutex;

use bytes::Bytes;

use crate::capture::{CaptureRequest, FrameHandle, FrameSource};
use crate::error::FrameError;

#[derive(Debug, Clone, Copy)]
enum Scripted {
    Frame(usize),
    Fail,
}

/// Frame source that plays back queued lengths and failures, then keeps
/// producing frames of a default length. Frame bytes are the low byte of the
/// frame's token.
#[derive(Debug)]
pub struct ScriptedSource {
    script: Mutex<VecDeque<Scripted>>,
    default_len: usize,
    next_token: AtomicUsize,
    acquires: AtomicUsize,
    releases: AtomicUsize,
    starts: AtomicUsize,
    stops: AtomicUsize,
    outstanding: AtomicI64,
    fail_start: AtomicBool,
    last_request: Mutex<Option<CaptureRequest>>,
}

impl Default for ScriptedSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            default_len: 1024,
            next_token: AtomicUsize::new(1),
            acquires: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            outstanding: AtomicI64::new(0),
            fail_start: AtomicBool::new(false),
            last_request: Mutex::new(None),
        }
    }

    pub fn with_default_len(mut self, len: usize) -> Self {
        self.default_len = len;
        self
    }

    pub fn push_frame(&self, len: usize) {
        self.script().push_back(Scripted::Frame(len));
    }

    pub fn push_failure(&self) {
        self.script().push_back(Scripted::Fail);
    }

    /// Make the next `start_capture` report a hardware failure.
    pub fn fail_next_start(&self) {
        self.fail_start.store(true, Ordering::SeqCst);
    }

    pub fn acquires(&self) -> usize {
        self.acquires.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    /// Acquired minus released frames.
    pub fn outstanding(&self) -> i64 {
        self.outstanding.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<CaptureRequest> {
        *self.last_request.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn script(&self) -> std::sync::MutexGuard<'_, VecDeque<Scripted>> {
        self.script.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl FrameSource for ScriptedSource {
    fn acquire(&self) -> Result<FrameHandle, FrameError> {
        self.acquires.fetch_add(1, Ordering::SeqCst);
        let next = self
            .script()
            .pop_front()
            .unwrap_or(Scripted::Frame(self.default_len));
        match next {
            Scripted::Fail => Err(FrameError::Unavailable),
            Scripted::Frame(len) => {
                let token = self.next_token.fetch_add(1, Ordering::SeqCst) as u64;
                self.outstanding.fetch_add(1, Ordering::SeqCst);
                Ok(FrameHandle::new(Bytes::from(vec![token as u8; len]), token))
            }
        }
    }

    fn release(&self, _frame: FrameHandle) {
        self.releases.fetch_add(1, Ordering::SeqCst);
        self.outstanding.fetch_sub(1, Ordering::SeqCst);
    }

    fn start_capture(&self, request: CaptureRequest) -> Result<(), FrameError> {
        if self.fail_start.swap(false, Ordering::SeqCst) {
            return Err(FrameError::Hardware("sensor did not respond".into()));
        }
        self.starts.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap_or_else(|p| p.into_inner()) = Some(request);
        Ok(())
    }

    fn stop_capture(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}
