//! Prometheus text exposition for engine metrics
//!
//! Served at `GET /metrics` by the HTTP server. Formatting reads the
//! cumulative counters only and never resets the periodic log window.

use crate::infra::metrics::{Metrics, MetricsSummary, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS};
use std::fmt::Write;

/// Prometheus metric type
enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

/// Write a simple metric (counter or gauge) with site label
fn write_metric(
    output: &mut String,
    name: &str,
    help: &str,
    typ: MetricType,
    site: &str,
    val: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val}");
}

/// Write a histogram from per-bucket counts
fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    site: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    bounds: &[u64; 10],
    sum: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in bounds.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"+Inf\"}} {cumulative}");
    let _ = writeln!(output, "{name}_sum{{site=\"{site}\"}} {sum}");
    let _ = writeln!(output, "{name}_count{{site=\"{site}\"}} {cumulative}");
}

/// Format metrics in Prometheus text exposition format
pub fn format_prometheus_metrics(metrics: &Metrics, site_id: &str) -> String {
    let summary = metrics.current();
    let mut output = String::with_capacity(4096);

    write_report_metrics(&mut output, site_id, &summary);
    write_reading_metrics(&mut output, site_id, &summary);
    write_position_metrics(&mut output, site_id, &summary);
    write_device_metrics(&mut output, site_id, &summary);

    output
}

fn write_report_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "ble_reports_total",
        "Total beacon reports applied",
        MetricType::Counter,
        site,
        summary.reports_total,
    );
    write_histogram(
        output,
        "ble_report_latency_us",
        "Report apply latency in microseconds",
        site,
        &summary.lat_buckets,
        &METRICS_BUCKET_BOUNDS,
        summary.lat_total_us,
    );
    write_metric(
        output,
        "ble_report_latency_p99_us",
        "99th percentile report latency",
        MetricType::Gauge,
        site,
        summary.lat_p99_us,
    );
}

fn write_reading_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "ble_readings_applied_total",
        "Readings accepted into a window",
        MetricType::Counter,
        site,
        summary.readings_applied_total,
    );
    write_metric(
        output,
        "ble_readings_dropped_total",
        "Readings dropped (RSSI out of range or unknown beacon)",
        MetricType::Counter,
        site,
        summary.readings_dropped_total,
    );
    write_metric(
        output,
        "ble_unknown_beacon_reports_total",
        "Reports from beacons not in the registry",
        MetricType::Counter,
        site,
        summary.unknown_beacon_total,
    );
}

fn write_position_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "ble_positions_estimated_total",
        "Position estimates computed",
        MetricType::Counter,
        site,
        summary.positions_estimated_total,
    );
    write_metric(
        output,
        "ble_trilateration_total",
        "Estimates solved by trilateration",
        MetricType::Counter,
        site,
        summary.trilateration_total,
    );
    write_metric(
        output,
        "ble_trilateration_fallback_total",
        "Trilateration attempts that fell back to the weighted centroid",
        MetricType::Counter,
        site,
        summary.trilateration_fallback_total,
    );
    write_metric(
        output,
        "ble_position_sink_dropped_total",
        "Position records dropped by the persistence sink",
        MetricType::Counter,
        site,
        summary.sink_dropped_total,
    );
}

fn write_device_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "ble_tracked_devices",
        "Devices currently tracked",
        MetricType::Gauge,
        site,
        summary.tracked_devices,
    );
    write_metric(
        output,
        "ble_devices_evicted_total",
        "Devices evicted after inactivity",
        MetricType::Counter,
        site,
        summary.devices_evicted_total,
    );
    write_metric(
        output,
        "ble_contacts_closed_total",
        "Device contacts closed",
        MetricType::Counter,
        site,
        summary.contacts_closed_total,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_contains_counters() {
        let metrics = Metrics::new();
        metrics.record_report(15);
        metrics.record_reading_applied();
        metrics.record_reading_dropped();
        metrics.set_tracked_devices(3);

        let output = format_prometheus_metrics(&metrics, "lab");
        assert!(output.contains("ble_reports_total{site=\"lab\"} 1"));
        assert!(output.contains("ble_readings_applied_total{site=\"lab\"} 1"));
        assert!(output.contains("ble_readings_dropped_total{site=\"lab\"} 1"));
        assert!(output.contains("ble_tracked_devices{site=\"lab\"} 3"));
        assert!(output.contains("# TYPE ble_tracked_devices gauge"));
    }

    #[test]
    fn test_histogram_is_cumulative() {
        let metrics = Metrics::new();
        metrics.record_report(5);
        metrics.record_report(30);
        metrics.record_report(100_000);

        let output = format_prometheus_metrics(&metrics, "lab");
        assert!(output.contains("ble_report_latency_us_bucket{site=\"lab\",le=\"10\"} 1"));
        assert!(output.contains("ble_report_latency_us_bucket{site=\"lab\",le=\"40\"} 2"));
        assert!(output.contains("ble_report_latency_us_bucket{site=\"lab\",le=\"5120\"} 2"));
        assert!(output.contains("ble_report_latency_us_bucket{site=\"lab\",le=\"+Inf\"} 3"));
        assert!(output.contains("ble_report_latency_us_sum{site=\"lab\"} 100035"));
        assert!(output.contains("ble_report_latency_us_count{site=\"lab\"} 3"));
    }

    #[test]
    fn test_scrape_does_not_reset() {
        let metrics = Metrics::new();
        metrics.record_report(50);
        let _ = format_prometheus_metrics(&metrics, "lab");
        let output = format_prometheus_metrics(&metrics, "lab");
        assert!(output.contains("ble_report_latency_us_count{site=\"lab\"} 1"));
    }
}
