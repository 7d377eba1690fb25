use std::time::{Duration, Instant};

use tracing::{debug, warn};

/// Time as seen by a pacing loop.
pub trait Clock: Send + Sync {
    /// Monotonic time since the clock's origin.
    fn now(&self) -> Duration;

    /// Cede the processor for at most `duration`.
    fn sleep(&self, duration: Duration);
}

/// Monotonic clock relative to its creation instant
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    #[inline]
    fn now(&self) -> Duration {
        self.start.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        pause(duration);
    }
}

/// Sleep for `duration`; a zero duration still yields the processor.
pub fn pause(duration: Duration) {
    if duration.is_zero() {
        std::thread::yield_now();
    } else {
        std::thread::sleep(duration);
    }
}

/// Pin the calling thread to `core`, if one is requested and it exists.
pub fn pin_current_thread(task: &str, core: Option<usize>) {
    let Some(id) = core else {
        return;
    };
    let available = core_affinity::get_core_ids().unwrap_or_default();
    match available.into_iter().find(|c| c.id == id) {
        Some(core_id) if core_affinity::set_for_current(core_id) => {
            debug!("{} pinned to core {}", task, id);
        }
        _ => warn!("{} could not be pinned to core {}, running unpinned", task, id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let a = clock.now();
        clock.sleep(Duration::from_millis(2));
        let b = clock.now();
        assert!(b >= a + Duration::from_millis(2));
    }

    #[test]
    fn zero_pause_returns() {
        let start = Instant::now();
        pause(Duration::ZERO);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn pinning_to_missing_core_is_not_fatal() {
        pin_current_thread("test", Some(usize::MAX));
        pin_current_thread("test", None);
    }
}
