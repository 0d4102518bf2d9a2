//! Store metrics
//!
//! - Counters only, monotonic
//! - Per store instance, reset when the store is opened
//! - Relaxed atomics; values are exact once the store is quiescent

use std::sync::atomic::{AtomicU64, Ordering};

/// Operational counters of one open store.
#[derive(Debug, Default)]
pub struct StoreMetrics {
    containers_written: AtomicU64,
    containers_read: AtomicU64,
    bytes_written: AtomicU64,
    commits: AtomicU64,
    corrupt_records: AtomicU64,
    records_migrated: AtomicU64,
    profiler_failures: AtomicU64,
}

impl StoreMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_write(&self, bytes: u64) {
        self.containers_written.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn increment_reads(&self) {
        self.containers_read.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_commits(&self) {
        self.commits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_corrupt_records(&self) {
        self.corrupt_records.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_records_migrated(&self, count: u64) {
        self.records_migrated.fetch_add(count, Ordering::Relaxed);
    }

    /// Returns the number of failures counted before this one.
    pub fn increment_profiler_failures(&self) -> u64 {
        self.profiler_failures.fetch_add(1, Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            containers_written: self.containers_written.load(Ordering::Relaxed),
            containers_read: self.containers_read.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            commits: self.commits.load(Ordering::Relaxed),
            corrupt_records: self.corrupt_records.load(Ordering::Relaxed),
            records_migrated: self.records_migrated.load(Ordering::Relaxed),
            profiler_failures: self.profiler_failures.load(Ordering::Relaxed),
        }
    }

    /// Current values as a JSON object
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.snapshot()).unwrap_or_else(|_| "{}".to_string())
    }
}

/// A point-in-time copy of the counters
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    pub containers_written: u64,
    pub containers_read: u64,
    pub bytes_written: u64,
    pub commits: u64,
    pub corrupt_records: u64,
    pub records_migrated: u64,
    pub profiler_failures: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_new_metrics_are_zero() {
        assert_eq!(StoreMetrics::new().snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn test_counters() {
        let metrics = StoreMetrics::new();
        metrics.record_write(100);
        metrics.record_write(50);
        metrics.increment_reads();
        metrics.increment_commits();
        metrics.increment_corrupt_records();
        metrics.add_records_migrated(7);
        assert_eq!(metrics.increment_profiler_failures(), 0);
        assert_eq!(metrics.increment_profiler_failures(), 1);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.containers_written, 2);
        assert_eq!(snapshot.bytes_written, 150);
        assert_eq!(snapshot.containers_read, 1);
        assert_eq!(snapshot.commits, 1);
        assert_eq!(snapshot.corrupt_records, 1);
        assert_eq!(snapshot.records_migrated, 7);
        assert_eq!(snapshot.profiler_failures, 2);
    }

    #[test]
    fn test_to_json() {
        let metrics = StoreMetrics::new();
        metrics.record_write(1234);
        let parsed: serde_json::Value = serde_json::from_str(&metrics.to_json()).unwrap();
        assert_eq!(parsed["bytes_written"], 1234);
        assert_eq!(parsed["containers_written"], 1);
    }

    #[test]
    fn test_thread_safety() {
        let metrics = Arc::new(StoreMetrics::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let metrics = Arc::clone(&metrics);
                thread::spawn(move || {
                    for _ in 0..100 {
                        metrics.increment_reads();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(metrics.snapshot().containers_read, 800);
    }
}
