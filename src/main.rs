//! BLE proximity engine service
//!
//! Receives beacon RSSI reports over HTTP, keeps smoothed per-device state
//! and position estimates, and serves snapshots and metrics.
//!
//! Module structure:
//! - `domain/` - Distance model, reading windows, position estimation
//! - `services/` - Beacon and device registries, tracker
//! - `io/` - HTTP server, Prometheus text, position egress
//! - `infra/` - Config, metrics

use ble_proximity::domain::epoch_ms;
use ble_proximity::infra::{Config, Metrics};
use ble_proximity::io::{create_position_channel, start_http_server, AppState, PositionEgress};
use ble_proximity::services::ProximityTracker;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// BLE proximity engine - RSSI positioning service
#[derive(Parser, Debug)]
#[command(name = "ble-proximity", version, about)]
struct Args {
    /// Path to TOML configuration file (falls back to CONFIG_FILE, then config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

fn init_logging(json: bool) {
    // Default: INFO, use RUST_LOG=debug for per-reading traces
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging(args.log_json);

    info!(git_hash = %env!("GIT_HASH"), "ble-proximity starting");

    let config_path = args.config.unwrap_or_else(|| Config::resolve_config_path(&[]));
    let config = Config::load_from_path(&config_path);

    info!(
        config_file = %config.config_file(),
        site = %config.site_id(),
        bind = %config.bind_address(),
        port = %config.port(),
        beacons = %config.beacons().len(),
        estimation = %config.estimation().as_str(),
        window_capacity = %config.window_capacity(),
        inactivity_threshold_ms = %config.inactivity_threshold_ms(),
        unknown_beacon_policy = ?config.unknown_beacon_policy(),
        egress_enabled = %config.egress_enabled(),
        "config_loaded"
    );

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let metrics = Arc::new(Metrics::new());

    // Position egress (optional)
    let (sink, egress_handle) = if config.egress_enabled() {
        let (sink, rx) = create_position_channel(config.egress_channel_capacity(), metrics.clone());
        let egress = PositionEgress::new(config.egress_file());
        let egress_shutdown = shutdown_rx.clone();
        let handle = tokio::spawn(egress.run(rx, egress_shutdown));
        (Some(sink), Some(handle))
    } else {
        (None, None)
    };

    let tracker = Arc::new(ProximityTracker::new(&config, metrics.clone(), sink, epoch_ms()));

    // Periodic metrics log line
    let metrics_clone = metrics.clone();
    let metrics_interval = config.metrics_interval_secs();
    let mut metrics_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(metrics_interval));
        interval.tick().await;
        loop {
            tokio::select! {
                _ = interval.tick() => metrics_clone.report().log(),
                _ = metrics_shutdown.changed() => break,
            }
        }
    });

    // Handle shutdown on Ctrl+C
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_tx.send(true);
    });

    let addr: SocketAddr = format!("{}:{}", config.bind_address(), config.port()).parse()?;
    let state = Arc::new(AppState { tracker, site_id: config.site_id().to_string() });
    if let Err(e) = start_http_server(addr, state, shutdown_rx).await {
        error!(error = %e, "http_server_error");
        return Err(e.to_string().into());
    }

    // The writer flushes whatever is still queued once shutdown is signalled
    if let Some(handle) = egress_handle {
        if let Ok(written) = handle.await {
            info!(written = %written, "egress_flushed");
        }
    }

    info!(devices_evicted = %metrics.devices_evicted_total(), "ble-proximity shutdown complete");
    Ok(())
}
