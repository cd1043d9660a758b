//! Thread-safe scan counters.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counters for one scan. Only the engine resets them between
/// scans; every mutation goes through atomic operations.
#[derive(Debug, Default)]
pub struct ScanStats {
    discovered: AtomicU64,
    from_cache: AtomicU64,
    fresh_scans: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    not_found: AtomicU64,
    retried_requests: AtomicU64,
    started_at: Mutex<Option<DateTime<Utc>>>,
    ended_at: Mutex<Option<DateTime<Utc>>>,
}

impl ScanStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&self) {
        self.discovered.store(0, Ordering::SeqCst);
        self.from_cache.store(0, Ordering::SeqCst);
        self.fresh_scans.store(0, Ordering::SeqCst);
        self.succeeded.store(0, Ordering::SeqCst);
        self.failed.store(0, Ordering::SeqCst);
        self.not_found.store(0, Ordering::SeqCst);
        self.retried_requests.store(0, Ordering::SeqCst);
        *self.started_at.lock().unwrap() = None;
        *self.ended_at.lock().unwrap() = None;
    }

    pub fn start(&self, now: DateTime<Utc>) {
        *self.started_at.lock().unwrap() = Some(now);
    }

    pub fn finish(&self, now: DateTime<Utc>) {
        *self.ended_at.lock().unwrap() = Some(now);
    }

    pub fn add_discovered(&self, n: u64) {
        self.discovered.fetch_add(n, Ordering::SeqCst);
    }

    /// A cache hit counts as a success served from cache.
    pub fn record_cache_hit(&self) {
        self.from_cache.fetch_add(1, Ordering::SeqCst);
        self.succeeded.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_fresh_success(&self) {
        self.fresh_scans.fetch_add(1, Ordering::SeqCst);
        self.succeeded.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_fresh_failure(&self) {
        self.fresh_scans.fetch_add(1, Ordering::SeqCst);
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_fresh_not_found(&self) {
        self.fresh_scans.fetch_add(1, Ordering::SeqCst);
        self.not_found.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_retry(&self) {
        self.retried_requests.fetch_add(1, Ordering::SeqCst);
    }

    #[must_use]
    pub fn snapshot(&self) -> ScanStatsSnapshot {
        ScanStatsSnapshot {
            discovered: self.discovered.load(Ordering::SeqCst),
            from_cache: self.from_cache.load(Ordering::SeqCst),
            fresh_scans: self.fresh_scans.load(Ordering::SeqCst),
            succeeded: self.succeeded.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            not_found: self.not_found.load(Ordering::SeqCst),
            retried_requests: self.retried_requests.load(Ordering::SeqCst),
            started_at: *self.started_at.lock().unwrap(),
            ended_at: *self.ended_at.lock().unwrap(),
        }
    }
}

/// Point-in-time copy of [`ScanStats`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanStatsSnapshot {
    pub discovered: u64,
    pub from_cache: u64,
    pub fresh_scans: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub not_found: u64,
    pub retried_requests: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl ScanStatsSnapshot {
    /// Bookkeeping identity: every counted extension ended in exactly one
    /// terminal bucket.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.from_cache + self.fresh_scans == self.succeeded + self.failed + self.not_found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn counters_accumulate_and_reset() {
        let stats = ScanStats::new();
        stats.add_discovered(5);
        stats.record_cache_hit();
        stats.record_fresh_success();
        stats.record_fresh_failure();
        stats.record_fresh_not_found();
        stats.record_retry();

        let snap = stats.snapshot();
        assert_eq!(snap.discovered, 5);
        assert_eq!(snap.from_cache, 1);
        assert_eq!(snap.fresh_scans, 3);
        assert_eq!(snap.succeeded, 2);
        assert_eq!(snap.failed, 1);
        assert_eq!(snap.not_found, 1);
        assert_eq!(snap.retried_requests, 1);
        assert!(snap.is_consistent());

        stats.reset();
        let snap = stats.snapshot();
        assert_eq!(snap.discovered, 0);
        assert_eq!(snap.from_cache, 0);
        assert!(snap.started_at.is_none());
    }

    #[test]
    fn start_and_finish_record_timestamps() {
        let stats = ScanStats::new();
        let t0 = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let t1 = t0 + chrono::Duration::seconds(30);
        stats.start(t0);
        stats.finish(t1);
        let snap = stats.snapshot();
        assert_eq!(snap.started_at, Some(t0));
        assert_eq!(snap.ended_at, Some(t1));
    }
}
