//! Per-slot streaming counters

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam::utils::CachePadded;

/// Counters written by one pacing task, read by anyone holding the slot.
#[derive(Debug, Default)]
pub struct SlotStats {
    counters: CachePadded<Counters>,
}

#[derive(Debug, Default)]
struct Counters {
    frames_sent: AtomicU64,
    frames_dropped: AtomicU64,
    acquire_failures: AtomicU64,
    completion_timeouts: AtomicU64,
    bytes_sent: AtomicU64,
}

/// Point-in-time copy of [`SlotStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub frames_sent: u64,
    pub frames_dropped: u64,
    pub acquire_failures: u64,
    pub completion_timeouts: u64,
    pub bytes_sent: u64,
}

impl SlotStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_sent(&self, len: usize) {
        self.counters.frames_sent.fetch_add(1, Ordering::Relaxed);
        self.counters
            .bytes_sent
            .fetch_add(len as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self) {
        self.counters.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_acquire_failure(&self) {
        self.counters
            .acquire_failures
            .fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_completion_timeout(&self) {
        self.counters
            .completion_timeouts
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_sent: self.counters.frames_sent.load(Ordering::Relaxed),
            frames_dropped: self.counters.frames_dropped.load(Ordering::Relaxed),
            acquire_failures: self.counters.acquire_failures.load(Ordering::Relaxed),
            completion_timeouts: self.counters.completion_timeouts.load(Ordering::Relaxed),
            bytes_sent: self.counters.bytes_sent.load(Ordering::Relaxed),
        }
    }
}
