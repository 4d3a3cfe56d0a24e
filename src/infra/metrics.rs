//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention.
//! All counter updates are lock-free; reporting is the only operation
//! that needs synchronization (via atomic swap).
//!
//! NOTE: All atomics use Relaxed ordering. These are statistical
//! counters only. Do NOT use these atomics for coordination or logic decisions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Store write latency bucket boundaries (milliseconds)
/// Buckets: ≤10, ≤20, ≤40, ≤80, ≤160, ≤320, ≤640, ≤1280, ≤2560, ≤5120, >5120
const WRITE_LATENCY_BOUNDS: [u64; 10] = [10, 20, 40, 80, 160, 320, 640, 1280, 2560, 5120];

/// Saved wait bucket boundaries (seconds)
/// Buckets: ≤1m, ≤2m, ≤5m, ≤10m, ≤15m, ≤20m, ≤30m, ≤45m, ≤60m, ≤90m, >90m
const WAIT_BOUNDS: [u64; 10] = [60, 120, 300, 600, 900, 1200, 1800, 2700, 3600, 5400];
const NUM_BUCKETS: usize = 11;

/// Compute bucket index for a value using binary search
#[inline]
fn bucket_index(bounds: &[u64; NUM_BUCKETS - 1], value: u64) -> usize {
    bounds.partition_point(|&bound| bound < value)
}

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

/// Swap all buckets to zero and return their values
#[inline]
fn swap_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.swap(0, Ordering::Relaxed);
    }
    result
}

/// Compute percentile from histogram buckets
/// Returns the upper bound of the bucket containing the percentile
/// (overflow bucket reports 2x the last bound)
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], bounds: &[u64; NUM_BUCKETS - 1], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = (total as f64 * percentile) as u64;
    let mut cumulative = 0u64;

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return bounds.get(i).copied().unwrap_or(bounds[NUM_BUCKETS - 2] * 2);
        }
    }
    bounds[NUM_BUCKETS - 2] * 2
}

fn new_buckets() -> [AtomicU64; NUM_BUCKETS] {
    std::array::from_fn(|_| AtomicU64::new(0))
}

/// Lock-free metrics collector
///
/// All recording operations are lock-free using atomics.
/// The `report()` method atomically swaps counters to get a consistent snapshot.
pub struct Metrics {
    // Monotonic counters
    snapshots_applied: AtomicU64,
    check_ins_saved: AtomicU64,
    save_failures: AtomicU64,
    check_ins_discarded: AtomicU64,
    arrivals_prompted: AtomicU64,
    arrivals_denied: AtomicU64,
    fixes_received: AtomicU64,
    positioning_errors: AtomicU64,
    intel_writes: AtomicU64,
    intel_kept_existing: AtomicU64,
    renames: AtomicU64,
    geocode_requests: AtomicU64,
    briefing_requests: AtomicU64,
    transport_errors: AtomicU64,
    notices_dropped: AtomicU64,
    journal_failures: AtomicU64,

    // Periodic counters, reset by report()
    fixes_since_report: AtomicU64,
    write_count: AtomicU64,
    write_latency_sum_ms: AtomicU64,
    write_latency_max_ms: AtomicU64,
    write_latency_buckets: [AtomicU64; NUM_BUCKETS],
    wait_buckets: [AtomicU64; NUM_BUCKETS],

    // Gauge
    cached_locations: AtomicU64,

    last_report_time: parking_lot::Mutex<Instant>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            snapshots_applied: AtomicU64::new(0),
            check_ins_saved: AtomicU64::new(0),
            save_failures: AtomicU64::new(0),
            check_ins_discarded: AtomicU64::new(0),
            arrivals_prompted: AtomicU64::new(0),
            arrivals_denied: AtomicU64::new(0),
            fixes_received: AtomicU64::new(0),
            positioning_errors: AtomicU64::new(0),
            intel_writes: AtomicU64::new(0),
            intel_kept_existing: AtomicU64::new(0),
            renames: AtomicU64::new(0),
            geocode_requests: AtomicU64::new(0),
            briefing_requests: AtomicU64::new(0),
            transport_errors: AtomicU64::new(0),
            notices_dropped: AtomicU64::new(0),
            journal_failures: AtomicU64::new(0),
            fixes_since_report: AtomicU64::new(0),
            write_count: AtomicU64::new(0),
            write_latency_sum_ms: AtomicU64::new(0),
            write_latency_max_ms: AtomicU64::new(0),
            write_latency_buckets: new_buckets(),
            wait_buckets: new_buckets(),
            cached_locations: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    #[inline]
    pub fn record_snapshot_applied(&self, locations: usize) {
        self.snapshots_applied.fetch_add(1, Ordering::Relaxed);
        self.cached_locations.store(locations as u64, Ordering::Relaxed);
    }

    /// Record a saved check-in and its wait (lock-free)
    #[inline]
    pub fn record_check_in_saved(&self, wait_secs: f64) {
        self.check_ins_saved.fetch_add(1, Ordering::Relaxed);
        let bucket = bucket_index(&WAIT_BOUNDS, wait_secs.max(0.0).round() as u64);
        self.wait_buckets[bucket].fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_save_failure(&self) {
        self.save_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_check_in_discarded(&self) {
        self.check_ins_discarded.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_arrival_prompted(&self) {
        self.arrivals_prompted.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_arrival_denied(&self) {
        self.arrivals_denied.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_fix(&self) {
        self.fixes_received.fetch_add(1, Ordering::Relaxed);
        self.fixes_since_report.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_positioning_error(&self) {
        self.positioning_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_intel_write(&self, kept_existing: bool) {
        if kept_existing {
            self.intel_kept_existing.fetch_add(1, Ordering::Relaxed);
        } else {
            self.intel_writes.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_rename(&self) {
        self.renames.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_geocode_request(&self) {
        self.geocode_requests.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_briefing_request(&self) {
        self.briefing_requests.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_transport_error(&self) {
        self.transport_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a notice dropped because the UI channel was full
    #[inline]
    pub fn record_notice_dropped(&self) {
        self.notices_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a saved check-in that could not be appended to the journal
    #[inline]
    pub fn record_journal_failure(&self) {
        self.journal_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a committed store write and its latency (lock-free)
    #[inline]
    pub fn record_store_write(&self, latency_ms: u64) {
        self.write_count.fetch_add(1, Ordering::Relaxed);
        self.write_latency_sum_ms.fetch_add(latency_ms, Ordering::Relaxed);
        let bucket = bucket_index(&WRITE_LATENCY_BOUNDS, latency_ms);
        self.write_latency_buckets[bucket].fetch_add(1, Ordering::Relaxed);
        update_atomic_max(&self.write_latency_max_ms, latency_ms);
    }

    pub fn check_ins_saved(&self) -> u64 {
        self.check_ins_saved.load(Ordering::Relaxed)
    }

    pub fn save_failures(&self) -> u64 {
        self.save_failures.load(Ordering::Relaxed)
    }

    pub fn arrivals_prompted(&self) -> u64 {
        self.arrivals_prompted.load(Ordering::Relaxed)
    }

    pub fn arrivals_denied(&self) -> u64 {
        self.arrivals_denied.load(Ordering::Relaxed)
    }

    pub fn fixes_received(&self) -> u64 {
        self.fixes_received.load(Ordering::Relaxed)
    }

    pub fn positioning_errors(&self) -> u64 {
        self.positioning_errors.load(Ordering::Relaxed)
    }

    pub fn snapshots_applied(&self) -> u64 {
        self.snapshots_applied.load(Ordering::Relaxed)
    }

    pub fn intel_writes(&self) -> u64 {
        self.intel_writes.load(Ordering::Relaxed)
    }

    pub fn intel_kept_existing(&self) -> u64 {
        self.intel_kept_existing.load(Ordering::Relaxed)
    }

    pub fn notices_dropped(&self) -> u64 {
        self.notices_dropped.load(Ordering::Relaxed)
    }

    pub fn journal_failures(&self) -> u64 {
        self.journal_failures.load(Ordering::Relaxed)
    }

    /// Calculate and return metrics summary, then reset periodic counters
    ///
    /// This is the only method that resets counters. It uses atomic swap
    /// to get a consistent snapshot while allowing concurrent updates.
    pub fn report(&self, session_active: bool) -> MetricsSummary {
        let fixes_count = self.fixes_since_report.swap(0, Ordering::Relaxed);
        let write_count = self.write_count.swap(0, Ordering::Relaxed);
        let write_latency_sum = self.write_latency_sum_ms.swap(0, Ordering::Relaxed);
        let write_latency_max = self.write_latency_max_ms.swap(0, Ordering::Relaxed);
        let write_buckets = swap_buckets(&self.write_latency_buckets);
        let wait_buckets = swap_buckets(&self.wait_buckets);

        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };

        let fixes_per_sec = if elapsed.as_secs_f64() > 0.0 {
            fixes_count as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };

        MetricsSummary {
            session_active,
            cached_locations: self.cached_locations.load(Ordering::Relaxed),
            snapshots_applied: self.snapshots_applied(),
            check_ins_saved: self.check_ins_saved(),
            save_failures: self.save_failures(),
            check_ins_discarded: self.check_ins_discarded.load(Ordering::Relaxed),
            arrivals_prompted: self.arrivals_prompted(),
            arrivals_denied: self.arrivals_denied(),
            fixes_received: self.fixes_received(),
            fixes_per_sec,
            positioning_errors: self.positioning_errors(),
            intel_writes: self.intel_writes(),
            intel_kept_existing: self.intel_kept_existing(),
            renames: self.renames.load(Ordering::Relaxed),
            geocode_requests: self.geocode_requests.load(Ordering::Relaxed),
            briefing_requests: self.briefing_requests.load(Ordering::Relaxed),
            transport_errors: self.transport_errors.load(Ordering::Relaxed),
            notices_dropped: self.notices_dropped(),
            journal_failures: self.journal_failures(),
            write_count,
            write_latency_avg_ms: if write_count > 0 { write_latency_sum / write_count } else { 0 },
            write_latency_max_ms: write_latency_max,
            write_latency_p99_ms: percentile_from_buckets(&write_buckets, &WRITE_LATENCY_BOUNDS, 0.99),
            write_latency_buckets: write_buckets,
            wait_buckets,
            wait_p50_secs: percentile_from_buckets(&wait_buckets, &WAIT_BOUNDS, 0.50),
        }
    }
}

#[derive(Debug)]
pub struct MetricsSummary {
    pub session_active: bool,
    /// Locations in the cache after the last snapshot
    pub cached_locations: u64,
    pub snapshots_applied: u64,
    pub check_ins_saved: u64,
    pub save_failures: u64,
    pub check_ins_discarded: u64,
    pub arrivals_prompted: u64,
    pub arrivals_denied: u64,
    pub fixes_received: u64,
    pub fixes_per_sec: f64,
    pub positioning_errors: u64,
    pub intel_writes: u64,
    /// Intel writes that found a briefing already stored
    pub intel_kept_existing: u64,
    pub renames: u64,
    pub geocode_requests: u64,
    pub briefing_requests: u64,
    pub transport_errors: u64,
    pub notices_dropped: u64,
    pub journal_failures: u64,
    /// Store writes since the last report
    pub write_count: u64,
    pub write_latency_avg_ms: u64,
    pub write_latency_max_ms: u64,
    pub write_latency_p99_ms: u64,
    /// Bounds: ≤10, ≤20, ≤40, ≤80, ≤160, ≤320, ≤640, ≤1280, ≤2560, ≤5120, >5120 ms
    pub write_latency_buckets: [u64; NUM_BUCKETS],
    /// Saved waits since the last report.
    /// Bounds: ≤1m, ≤2m, ≤5m, ≤10m, ≤15m, ≤20m, ≤30m, ≤45m, ≤60m, ≤90m, >90m
    pub wait_buckets: [u64; NUM_BUCKETS],
    pub wait_p50_secs: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            session_active = %self.session_active,
            cached_locations = %self.cached_locations,
            check_ins_saved = %self.check_ins_saved,
            save_failures = %self.save_failures,
            arrivals_prompted = %self.arrivals_prompted,
            arrivals_denied = %self.arrivals_denied,
            fixes_per_sec = format!("{:.2}", self.fixes_per_sec),
            positioning_errors = %self.positioning_errors,
            intel_writes = %self.intel_writes,
            writes = %self.write_count,
            write_p99_ms = %self.write_latency_p99_ms,
            notices_dropped = %self.notices_dropped,
            journal_failures = %self.journal_failures,
            "metrics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_new() {
        let metrics = Metrics::new();
        assert_eq!(metrics.check_ins_saved(), 0);
        assert_eq!(metrics.fixes_received(), 0);
    }

    #[test]
    fn test_intel_counters() {
        let metrics = Metrics::new();

        metrics.record_intel_write(false);
        metrics.record_intel_write(true);
        metrics.record_intel_write(true);

        assert_eq!(metrics.intel_writes(), 1);
        assert_eq!(metrics.intel_kept_existing(), 2);
    }

    #[test]
    fn test_report() {
        let metrics = Metrics::new();

        metrics.record_fix();
        metrics.record_fix();
        metrics.record_check_in_saved(90.0);
        metrics.record_store_write(10);
        metrics.record_store_write(30);
        metrics.record_snapshot_applied(4);
        metrics.record_journal_failure();

        let summary = metrics.report(true);

        assert!(summary.session_active);
        assert_eq!(summary.cached_locations, 4);
        assert_eq!(summary.check_ins_saved, 1);
        assert_eq!(summary.fixes_received, 2);
        assert_eq!(summary.journal_failures, 1);
        assert_eq!(summary.write_count, 2);
        assert_eq!(summary.write_latency_avg_ms, 20);
        assert_eq!(summary.write_latency_max_ms, 30);
        assert_eq!(summary.wait_buckets[1], 1); // 90s is ≤2m

        // Periodic counters should be reset, monotonic ones kept
        assert_eq!(metrics.fixes_since_report.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.write_count.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.fixes_received(), 2);
    }

    #[test]
    fn test_bucket_index() {
        assert_eq!(bucket_index(&WRITE_LATENCY_BOUNDS, 10), 0);
        assert_eq!(bucket_index(&WRITE_LATENCY_BOUNDS, 11), 1);
        assert_eq!(bucket_index(&WRITE_LATENCY_BOUNDS, 5120), 9);
        assert_eq!(bucket_index(&WRITE_LATENCY_BOUNDS, 5121), 10); // overflow
        assert_eq!(bucket_index(&WAIT_BOUNDS, 0), 0);
    }

    #[test]
    fn test_percentile_computation() {
        let metrics = Metrics::new();

        // 100 writes, all at 15ms (bucket 1, ≤20)
        for _ in 0..100 {
            metrics.record_store_write(15);
        }

        let summary = metrics.report(false);
        assert_eq!(summary.write_latency_p99_ms, 20);
        assert_eq!(summary.wait_p50_secs, 0);
    }
}
