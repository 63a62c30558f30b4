//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention.
//! All counter updates are lock-free; reporting is the only operation
//! that resets state (via atomic swap).
//!
//! NOTE: All atomics use Relaxed ordering intentionally. These are statistical
//! counters only and must not be used for coordination.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Prometheus-style exponential bucket boundaries (microseconds)
/// Buckets: ≤10, ≤20, ≤40, ≤80, ≤160, ≤320, ≤640, ≤1280, ≤2560, ≤5120, >5120
const BUCKET_BOUNDS: [u64; 10] = [10, 20, 40, 80, 160, 320, 640, 1280, 2560, 5120];
const NUM_BUCKETS: usize = 11;

/// Compute bucket index for a latency value using binary search
#[inline]
fn bucket_index(latency_us: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < latency_us)
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

/// Load all bucket values without resetting
#[inline]
fn load_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.load(Ordering::Relaxed);
    }
    result
}

/// Compute percentile from histogram buckets
/// Returns the upper bound of the bucket containing the percentile
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = (total as f64 * percentile) as u64;
    let mut cumulative = 0u64;

    // Last bucket uses 2x the previous bound
    const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] =
        [10, 20, 40, 80, 160, 320, 640, 1280, 2560, 5120, 10240];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

/// Lock-free metrics collector
pub struct Metrics {
    /// Beacon reports ingested (monotonic)
    reports_total: AtomicU64,
    /// Reports since last summary (reset on report)
    reports_since_report: AtomicU64,
    /// Readings pushed into a window (monotonic)
    readings_applied_total: AtomicU64,
    /// Readings dropped: out of range or from a rejected beacon (monotonic)
    readings_dropped_total: AtomicU64,
    /// Reports rejected for an unknown beacon id (monotonic)
    unknown_beacon_total: AtomicU64,
    /// Position re-estimations (monotonic)
    positions_estimated_total: AtomicU64,
    /// Estimates produced by the linear solve (monotonic)
    trilateration_total: AtomicU64,
    /// Linear solves abandoned for singular geometry (monotonic)
    trilateration_fallback_total: AtomicU64,
    /// Devices removed by the inactivity sweep (monotonic)
    devices_evicted_total: AtomicU64,
    /// Device contacts closed (monotonic)
    contacts_closed_total: AtomicU64,
    /// Position records dropped because the sink channel was full (monotonic)
    sink_dropped_total: AtomicU64,
    /// Devices currently tracked
    tracked_devices: AtomicU64,
    /// Report apply latency histogram buckets (cumulative)
    latency_buckets: [AtomicU64; NUM_BUCKETS],
    /// Sum of all report latencies (cumulative)
    latency_total_us: AtomicU64,
    /// Sum of report latencies (reset on report)
    latency_sum_us: AtomicU64,
    /// Max update latency (reset on report)
    latency_max_us: AtomicU64,
    /// Last report time (only accessed from reporter)
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            reports_total: AtomicU64::new(0),
            reports_since_report: AtomicU64::new(0),
            readings_applied_total: AtomicU64::new(0),
            readings_dropped_total: AtomicU64::new(0),
            unknown_beacon_total: AtomicU64::new(0),
            positions_estimated_total: AtomicU64::new(0),
            trilateration_total: AtomicU64::new(0),
            trilateration_fallback_total: AtomicU64::new(0),
            devices_evicted_total: AtomicU64::new(0),
            contacts_closed_total: AtomicU64::new(0),
            sink_dropped_total: AtomicU64::new(0),
            tracked_devices: AtomicU64::new(0),
            latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            latency_total_us: AtomicU64::new(0),
            latency_sum_us: AtomicU64::new(0),
            latency_max_us: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    /// Record a beacon report and the time it took to apply (lock-free)
    #[inline]
    pub fn record_report(&self, latency_us: u64) {
        self.reports_total.fetch_add(1, Ordering::Relaxed);
        self.reports_since_report.fetch_add(1, Ordering::Relaxed);
        self.latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        self.latency_total_us.fetch_add(latency_us, Ordering::Relaxed);
        self.latency_buckets[bucket_index(latency_us)].fetch_add(1, Ordering::Relaxed);
        update_atomic_max(&self.latency_max_us, latency_us);
    }

    #[inline]
    pub fn record_reading_applied(&self) {
        self.readings_applied_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_reading_dropped(&self) {
        self.readings_dropped_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_unknown_beacon(&self) {
        self.unknown_beacon_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a position estimate and whether the linear solve produced it
    #[inline]
    pub fn record_position(&self, trilaterated: bool, fell_back: bool) {
        self.positions_estimated_total.fetch_add(1, Ordering::Relaxed);
        if trilaterated {
            self.trilateration_total.fetch_add(1, Ordering::Relaxed);
        }
        if fell_back {
            self.trilateration_fallback_total.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_evictions(&self, count: u64) {
        self.devices_evicted_total.fetch_add(count, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_contacts_closed(&self, count: u64) {
        self.contacts_closed_total.fetch_add(count, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_sink_dropped(&self) {
        self.sink_dropped_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn set_tracked_devices(&self, count: usize) {
        self.tracked_devices.store(count as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn reports_total(&self) -> u64 {
        self.reports_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn readings_applied_total(&self) -> u64 {
        self.readings_applied_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn readings_dropped_total(&self) -> u64 {
        self.readings_dropped_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn unknown_beacon_total(&self) -> u64 {
        self.unknown_beacon_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn devices_evicted_total(&self) -> u64 {
        self.devices_evicted_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn sink_dropped_total(&self) -> u64 {
        self.sink_dropped_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn tracked_devices(&self) -> u64 {
        self.tracked_devices.load(Ordering::Relaxed)
    }

    /// Calculate and return metrics summary, then reset periodic counters
    ///
    /// Only the periodic logger should call this; scrapes use [`current`](Self::current).
    pub fn report(&self) -> MetricsSummary {
        let reports_count = self.reports_since_report.swap(0, Ordering::Relaxed);
        let latency_sum = self.latency_sum_us.swap(0, Ordering::Relaxed);
        let max_latency = self.latency_max_us.swap(0, Ordering::Relaxed);

        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };

        self.summarize(reports_count, latency_sum, max_latency, elapsed.as_secs_f64())
    }

    /// Summary of the current period without resetting anything
    pub fn current(&self) -> MetricsSummary {
        let reports_count = self.reports_since_report.load(Ordering::Relaxed);
        let latency_sum = self.latency_sum_us.load(Ordering::Relaxed);
        let max_latency = self.latency_max_us.load(Ordering::Relaxed);
        let elapsed = self.last_report_time.lock().elapsed();

        self.summarize(reports_count, latency_sum, max_latency, elapsed.as_secs_f64())
    }

    fn summarize(
        &self,
        reports_count: u64,
        latency_sum: u64,
        max_latency: u64,
        elapsed_secs: f64,
    ) -> MetricsSummary {
        let lat_buckets = load_buckets(&self.latency_buckets);
        let reports_per_sec =
            if elapsed_secs > 0.0 { reports_count as f64 / elapsed_secs } else { 0.0 };
        let avg_latency = if reports_count > 0 { latency_sum / reports_count } else { 0 };

        MetricsSummary {
            reports_total: self.reports_total.load(Ordering::Relaxed),
            reports_per_sec,
            avg_latency_us: avg_latency,
            max_latency_us: max_latency,
            lat_p50_us: percentile_from_buckets(&lat_buckets, 0.50),
            lat_p99_us: percentile_from_buckets(&lat_buckets, 0.99),
            lat_buckets,
            lat_total_us: self.latency_total_us.load(Ordering::Relaxed),
            readings_applied_total: self.readings_applied_total.load(Ordering::Relaxed),
            readings_dropped_total: self.readings_dropped_total.load(Ordering::Relaxed),
            unknown_beacon_total: self.unknown_beacon_total.load(Ordering::Relaxed),
            positions_estimated_total: self.positions_estimated_total.load(Ordering::Relaxed),
            trilateration_total: self.trilateration_total.load(Ordering::Relaxed),
            trilateration_fallback_total: self.trilateration_fallback_total.load(Ordering::Relaxed),
            devices_evicted_total: self.devices_evicted_total.load(Ordering::Relaxed),
            contacts_closed_total: self.contacts_closed_total.load(Ordering::Relaxed),
            sink_dropped_total: self.sink_dropped_total.load(Ordering::Relaxed),
            tracked_devices: self.tracked_devices.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Number of histogram buckets (exported for Prometheus formatting)
pub const METRICS_NUM_BUCKETS: usize = NUM_BUCKETS;

/// Exported bucket bounds for Prometheus formatting
pub const METRICS_BUCKET_BOUNDS: [u64; 10] = BUCKET_BOUNDS;

#[derive(Debug)]
pub struct MetricsSummary {
    pub reports_total: u64,
    pub reports_per_sec: f64,
    pub avg_latency_us: u64,
    pub max_latency_us: u64,
    /// Report apply latency histogram (cumulative)
    /// Bounds: ≤10, ≤20, ≤40, ≤80, ≤160, ≤320, ≤640, ≤1280, ≤2560, ≤5120, >5120 µs
    pub lat_buckets: [u64; NUM_BUCKETS],
    /// Sum of all report latencies (µs, cumulative)
    pub lat_total_us: u64,
    pub lat_p50_us: u64,
    pub lat_p99_us: u64,
    pub readings_applied_total: u64,
    pub readings_dropped_total: u64,
    pub unknown_beacon_total: u64,
    pub positions_estimated_total: u64,
    pub trilateration_total: u64,
    pub trilateration_fallback_total: u64,
    pub devices_evicted_total: u64,
    pub contacts_closed_total: u64,
    pub sink_dropped_total: u64,
    pub tracked_devices: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            reports_total = %self.reports_total,
            reports_per_sec = format!("{:.1}", self.reports_per_sec),
            avg_latency_us = %self.avg_latency_us,
            max_latency_us = %self.max_latency_us,
            p99_us = %self.lat_p99_us,
            readings_applied = %self.readings_applied_total,
            readings_dropped = %self.readings_dropped_total,
            tracked_devices = %self.tracked_devices,
            evicted = %self.devices_evicted_total,
            "metrics"
        );
    }
}
