//! Transfer-complete signal from USB-stack context into a pacing task
//!
//! A single-slot channel behaves like a binary task notification: repeated
//! notifies before a take collapse into one, and the taker waits with a
//! bound so its loop never blocks for good.

use std::time::Duration;

use flume::{Receiver, Sender, TrySendError};
use tracing::trace;

/// Create the notifier/waiter pair for one camera.
pub fn completion_channel() -> (CompletionNotifier, CompletionWaiter) {
    let (tx, rx) = flume::bounded(1);
    (CompletionNotifier { tx }, CompletionWaiter { rx })
}

/// Held by the USB stack side; cheap to clone.
#[derive(Debug, Clone)]
pub struct CompletionNotifier {
    tx: Sender<()>,
}

impl CompletionNotifier {
    /// Signal that the in-flight transfer finished. Never blocks.
    pub fn notify(&self) {
        match self.tx.try_send(()) {
            Ok(()) => {}
            Err(TrySendError::Full(())) => trace!("completion already pending"),
            Err(TrySendError::Disconnected(())) => trace!("pacing task gone"),
        }
    }
}

/// Held by the pacing task.
#[derive(Debug)]
pub struct CompletionWaiter {
    rx: Receiver<()>,
}

impl CompletionWaiter {
    /// Consume the signal, waiting at most `timeout` for it.
    pub fn wait(&self, timeout: Duration) -> bool {
        if self.rx.try_recv().is_ok() {
            return true;
        }
        if timeout.is_zero() {
            return false;
        }
        self.rx.recv_timeout(timeout).is_ok()
    }

    /// Discard a signal left over from a transfer that streaming abandoned.
    pub fn clear(&self) -> bool {
        self.rx.try_recv().is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notify_then_wait_consumes_once() {
        let (notifier, waiter) = completion_channel();
        notifier.notify();
        assert!(waiter.wait(Duration::ZERO));
        assert!(!waiter.wait(Duration::ZERO));
    }

    #[test]
    fn repeated_notifies_collapse() {
        let (notifier, waiter) = completion_channel();
        notifier.notify();
        notifier.notify();
        notifier.notify();
        assert!(waiter.wait(Duration::ZERO));
        assert!(!waiter.wait(Duration::from_millis(1)));
    }

    #[test]
    fn wait_is_bounded() {
        let (_notifier, waiter) = completion_channel();
        let start = std::time::Instant::now();
        assert!(!waiter.wait(Duration::from_millis(5)));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn notify_from_another_thread_wakes_waiter() {
        let (notifier, waiter) = completion_channel();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(5));
            notifier.notify();
        });
        assert!(waiter.wait(Duration::from_secs(5)));
        handle.join().unwrap();
    }

    #[test]
    fn notify_after_waiter_dropped_is_harmless() {
        let (notifier, waiter) = completion_channel();
        drop(waiter);
        notifier.notify();
    }

    #[test]
    fn clear_discards_stale_signal() {
        let (notifier, waiter) = completion_channel();
        notifier.notify();
        assert!(waiter.clear());
        assert!(!waiter.clear());
    }
}
