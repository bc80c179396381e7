//! Audio-driven presentation clock and A/V drift tracking

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use tracing::{debug, trace};

/// Drift (ms) beyond which video is considered out of sync
pub const DRIFT_THRESHOLD_MS: i64 = 100;

/// Current playback position in milliseconds
///
/// Written by the audio consumer each time it plays a frame, read by the
/// video consumer to choose which frame to show. The clock only moves when
/// audio is actually consumed, so it stands still while audio is paused or
/// starved.
#[derive(Debug, Default)]
pub struct SharedClock {
    position_ms: AtomicI64,
    started: AtomicBool,
}

impl SharedClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current position in milliseconds
    pub fn now_ms(&self) -> i64 {
        self.position_ms.load(Ordering::Acquire)
    }

    /// Whether audio has advanced the clock since creation or the last rebase
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Advance to the position of the frame just played
    pub fn advance_to(&self, ms: i64) {
        self.position_ms.store(ms, Ordering::Release);
        self.started.store(true, Ordering::Release);
    }

    /// Move the clock after a seek
    pub fn rebase(&self, ms: i64) {
        self.position_ms.store(ms, Ordering::Release);
        self.started.store(false, Ordering::Release);
        debug!("Clock rebased to {}ms", ms);
    }
}

/// Tracks how far presented video is from the audio clock
#[derive(Debug, Default)]
pub struct SyncMonitor {
    last_drift_ms: AtomicI64,
    max_drift_ms: AtomicI64,
    frames: AtomicU64,
    out_of_sync: AtomicU64,
}

/// Point-in-time copy of [`SyncMonitor`] counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncSnapshot {
    /// Video pts minus clock for the last presented frame (positive = video ahead)
    pub last_drift_ms: i64,
    /// Largest absolute drift seen
    pub max_drift_ms: i64,
    pub frames: u64,
    pub out_of_sync: u64,
}

impl SyncMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a presented video frame against the clock position
    pub fn record(&self, video_ms: i64, clock_ms: i64) {
        let drift = video_ms - clock_ms;
        self.last_drift_ms.store(drift, Ordering::Relaxed);
        self.max_drift_ms.fetch_max(drift.abs(), Ordering::Relaxed);
        self.frames.fetch_add(1, Ordering::Relaxed);

        if drift.abs() > DRIFT_THRESHOLD_MS {
            self.out_of_sync.fetch_add(1, Ordering::Relaxed);
            trace!("Video drift {}ms exceeds threshold", drift);
        }
    }

    pub fn snapshot(&self) -> SyncSnapshot {
        SyncSnapshot {
            last_drift_ms: self.last_drift_ms.load(Ordering::Relaxed),
            max_drift_ms: self.max_drift_ms.load(Ordering::Relaxed),
            frames: self.frames.load(Ordering::Relaxed),
            out_of_sync: self.out_of_sync.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.last_drift_ms.store(0, Ordering::Relaxed);
        self.max_drift_ms.store(0, Ordering::Relaxed);
        self.frames.store(0, Ordering::Relaxed);
        self.out_of_sync.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_clock_advance_and_rebase() {
        let clock = SharedClock::new();
        assert_eq!(clock.now_ms(), 0);
        assert!(!clock.is_started());

        clock.advance_to(40);
        assert_eq!(clock.now_ms(), 40);
        assert!(clock.is_started());

        clock.rebase(5000);
        assert_eq!(clock.now_ms(), 5000);
        assert!(!clock.is_started());
    }

    #[test]
    fn test_clock_visible_across_threads() {
        let clock = Arc::new(SharedClock::new());
        let writer = {
            let clock = clock.clone();
            thread::spawn(move || {
                for ms in 0..=100 {
                    clock.advance_to(ms);
                }
            })
        };
        writer.join().unwrap();
        assert_eq!(clock.now_ms(), 100);
    }

    #[test]
    fn test_monitor_in_sync() {
        let monitor = SyncMonitor::new();
        for i in 0..100 {
            monitor.record(i * 33, i * 33);
        }
        let snap = monitor.snapshot();
        assert_eq!(snap.frames, 100);
        assert_eq!(snap.max_drift_ms, 0);
        assert_eq!(snap.out_of_sync, 0);
    }

    #[test]
    fn test_monitor_drift() {
        let monitor = SyncMonitor::new();
        monitor.record(1000, 1030);
        monitor.record(1200, 1050);

        let snap = monitor.snapshot();
        assert_eq!(snap.last_drift_ms, 150);
        assert_eq!(snap.max_drift_ms, 150);
        assert_eq!(snap.out_of_sync, 1);

        monitor.reset();
        assert_eq!(monitor.snapshot(), SyncSnapshot::default());
    }
}
