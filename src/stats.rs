use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

/// Live counters for the recognition loop, shared with the HTTP layer.
pub struct Stats {
    frames_captured: AtomicU64,
    recognition_passes: AtomicU64,
    faces_detected: AtomicU64,
    faces_matched: AtomicU64,
    events_inserted: AtomicU64,
    events_skipped: AtomicU64,
    persist_failures: AtomicU64,
    inference_failures: AtomicU64,
    last_committed_frame: AtomicU64,
    has_committed: AtomicBool,
    started: Instant,
    capture_started: parking_lot::Mutex<Option<Instant>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub uptime_secs: u64,
    pub frames_captured: u64,
    pub capture_fps: f64,
    pub recognition_passes: u64,
    pub faces_detected: u64,
    pub faces_matched: u64,
    pub events_inserted: u64,
    pub events_skipped: u64,
    pub persist_failures: u64,
    pub inference_failures: u64,
    pub last_committed_frame: Option<u64>,
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

impl Stats {
    pub fn new() -> Self {
        Self {
            frames_captured: AtomicU64::new(0),
            recognition_passes: AtomicU64::new(0),
            faces_detected: AtomicU64::new(0),
            faces_matched: AtomicU64::new(0),
            events_inserted: AtomicU64::new(0),
            events_skipped: AtomicU64::new(0),
            persist_failures: AtomicU64::new(0),
            inference_failures: AtomicU64::new(0),
            last_committed_frame: AtomicU64::new(0),
            has_committed: AtomicBool::new(false),
            started: Instant::now(),
            capture_started: parking_lot::Mutex::new(None),
        }
    }

    pub fn inc_frames_captured(&self) {
        let mut start = self.capture_started.lock();
        if start.is_none() {
            *start = Some(Instant::now());
        }
        self.frames_captured.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_recognition_passes(&self) { self.recognition_passes.fetch_add(1, Ordering::Relaxed); }
    pub fn inc_faces_detected(&self, n: u64) { self.faces_detected.fetch_add(n, Ordering::Relaxed); }
    pub fn inc_faces_matched(&self) { self.faces_matched.fetch_add(1, Ordering::Relaxed); }
    pub fn inc_events_inserted(&self) { self.events_inserted.fetch_add(1, Ordering::Relaxed); }
    pub fn inc_events_skipped(&self) { self.events_skipped.fetch_add(1, Ordering::Relaxed); }
    pub fn inc_persist_failures(&self) { self.persist_failures.fetch_add(1, Ordering::Relaxed); }
    pub fn inc_inference_failures(&self) { self.inference_failures.fetch_add(1, Ordering::Relaxed); }
    pub fn set_last_committed_frame(&self, index: u64) {
        self.last_committed_frame.store(index, Ordering::Relaxed);
        self.has_committed.store(true, Ordering::Relaxed);
    }

    pub fn frames_captured(&self) -> u64 { self.frames_captured.load(Ordering::Relaxed) }
    pub fn events_inserted(&self) -> u64 { self.events_inserted.load(Ordering::Relaxed) }
    pub fn last_committed_frame(&self) -> Option<u64> {
        if self.has_committed.load(Ordering::Relaxed) {
            Some(self.last_committed_frame.load(Ordering::Relaxed))
        } else {
            None
        }
    }
    pub fn uptime_secs(&self) -> u64 { self.started.elapsed().as_secs() }

    /// Average capture rate since the first frame arrived.
    pub fn capture_fps(&self) -> f64 {
        let Some(start) = *self.capture_started.lock() else { return 0.0 };
        let secs = start.elapsed().as_secs_f64();
        if secs <= 0.0 { 0.0 } else { self.frames_captured() as f64 / secs }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            uptime_secs: self.uptime_secs(),
            frames_captured: self.frames_captured(),
            capture_fps: self.capture_fps(),
            recognition_passes: self.recognition_passes.load(Ordering::Relaxed),
            faces_detected: self.faces_detected.load(Ordering::Relaxed),
            faces_matched: self.faces_matched.load(Ordering::Relaxed),
            events_inserted: self.events_inserted(),
            events_skipped: self.events_skipped.load(Ordering::Relaxed),
            persist_failures: self.persist_failures.load(Ordering::Relaxed),
            inference_failures: self.inference_failures.load(Ordering::Relaxed),
            last_committed_frame: self.last_committed_frame(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_stats_are_zeroed() {
        let s = Stats::new().snapshot();
        assert_eq!(s.frames_captured, 0);
        assert_eq!(s.capture_fps, 0.0);
        assert_eq!(s.last_committed_frame, None);
    }

    #[test]
    fn counters_accumulate() {
        let stats = Stats::new();
        stats.inc_frames_captured();
        stats.inc_frames_captured();
        stats.inc_faces_detected(3);
        stats.inc_events_inserted();
        stats.set_last_committed_frame(0);
        let s = stats.snapshot();
        assert_eq!(s.frames_captured, 2);
        assert_eq!(s.faces_detected, 3);
        assert_eq!(s.events_inserted, 1);
        assert_eq!(s.last_committed_frame, Some(0));
    }
}
