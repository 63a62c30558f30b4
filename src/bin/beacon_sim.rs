//! Synthetic beacon reporter
//!
//! Walks simulated devices around the configured beacon layout and POSTs one
//! report per beacon per tick to a running `ble-proximity` server. RSSI is
//! derived from the true distance through the inverse path-loss curve plus
//! uniform jitter.
//!
//! Usage:
//!   cargo run --bin beacon-sim -- --config config/dev.toml --devices 3
//!   cargo run --bin beacon-sim -- --ticks 20 --jitter 0

use ble_proximity::domain::{epoch_ms, DistanceModel, Position};
use ble_proximity::infra::Config;
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use std::f64::consts::TAU;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "beacon-sim")]
#[command(about = "Synthetic BLE beacon reporter for local testing")]
struct Args {
    /// Config file path (beacon layout and path-loss constants)
    #[arg(short, long, default_value = "config/dev.toml")]
    config: String,

    /// Server base URL (defaults to the configured port on localhost)
    #[arg(long)]
    url: Option<String>,

    /// Number of simulated devices
    #[arg(long, default_value = "1")]
    devices: usize,

    /// Milliseconds between ticks
    #[arg(long, default_value = "500")]
    interval_ms: u64,

    /// Stop after this many ticks (0 = run until Ctrl+C)
    #[arg(long, default_value = "0")]
    ticks: u64,

    /// Peak RSSI jitter in dB
    #[arg(long, default_value = "2.0")]
    jitter: f64,

    /// Jitter seed
    #[arg(long, default_value = "42")]
    seed: u64,
}

/// Uniform RSSI jitter in [-amplitude, amplitude]
fn jitter(rng: &mut StdRng, amplitude: f64) -> f64 {
    if amplitude.is_finite() && amplitude > 0.0 {
        rng.gen_range(-amplitude..=amplitude)
    } else {
        0.0
    }
}

/// Circular walk around the beacon centroid, one phase offset per device
fn device_position(
    center: Position,
    radius: f64,
    tick: u64,
    device: usize,
    devices: usize,
) -> Position {
    let phase = TAU * device as f64 / devices.max(1) as f64;
    let angle = phase + tick as f64 * 0.1;
    Position::new(center.x + radius * angle.cos(), center.y + radius * angle.sin())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    let args = Args::parse();
    let config = Config::load_from_path(&args.config);
    let beacons = config.beacons().to_vec();
    if beacons.is_empty() {
        return Err("no beacons configured".into());
    }

    let model: DistanceModel = config.distance_model();
    let center = Position::new(
        beacons.iter().map(|b| b.x).sum::<f64>() / beacons.len() as f64,
        beacons.iter().map(|b| b.y).sum::<f64>() / beacons.len() as f64,
    );
    let radius = beacons
        .iter()
        .map(|b| center.distance_to(&b.position()))
        .fold(0.0_f64, f64::max)
        .max(0.5)
        * 0.6;

    let base_url = args.url.unwrap_or_else(|| format!("http://127.0.0.1:{}", config.port()));
    let endpoint = format!("{}/ble-data", base_url.trim_end_matches('/'));
    let client = reqwest::Client::builder().timeout(Duration::from_secs(2)).build()?;
    let mut rng = StdRng::seed_from_u64(args.seed);
    let amplitude = args.jitter.abs();

    info!(
        endpoint = %endpoint,
        beacons = %beacons.len(),
        devices = %args.devices,
        radius_m = format!("{:.2}", radius),
        "beacon_sim_started"
    );

    let mut interval = tokio::time::interval(Duration::from_millis(args.interval_ms.max(1)));
    let mut tick = 0u64;
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = tokio::signal::ctrl_c() => break,
        }

        let truth: Vec<Position> = (0..args.devices)
            .map(|d| device_position(center, radius, tick, d, args.devices))
            .collect();

        for beacon in &beacons {
            let sightings: Vec<serde_json::Value> = truth
                .iter()
                .enumerate()
                .map(|(d, pos)| {
                    let distance = pos.distance_to(&beacon.position());
                    let rssi = (model.expected_rssi(distance) + jitter(&mut rng, amplitude))
                        .clamp(config.rssi_min(), config.rssi_max());
                    json!({ "id": format!("SIM_{}", d + 1), "rssi": rssi.round(), "type": "sim" })
                })
                .collect();

            let report = json!({
                "beacon": beacon.id,
                "battery": 100,
                "devices": sightings,
                "timestamp": epoch_ms(),
            });

            match client
                .post(&endpoint)
                .header("Content-Type", "application/json")
                .body(report.to_string())
                .send()
                .await
            {
                Ok(resp) if resp.status().is_success() => {}
                Ok(resp) => warn!(beacon = %beacon.id, status = %resp.status(), "report_rejected"),
                Err(e) => warn!(beacon = %beacon.id, error = %e, "report_send_failed"),
            }
        }

        if tick % 10 == 0 {
            for (d, pos) in truth.iter().enumerate() {
                info!(
                    device = %format!("SIM_{}", d + 1),
                    x = format!("{:.2}", pos.x),
                    y = format!("{:.2}", pos.y),
                    "true_position"
                );
            }
        }

        tick += 1;
        if args.ticks > 0 && tick >= args.ticks {
            break;
        }
    }

    info!(ticks = %tick, "beacon_sim_stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jitter_bounded_and_repeatable() {
        let mut a = StdRng::seed_from_u64(7);
        let mut b = StdRng::seed_from_u64(7);
        for _ in 0..1000 {
            let v = jitter(&mut a, 3.0);
            assert!((-3.0..=3.0).contains(&v));
            assert_eq!(v, jitter(&mut b, 3.0));
        }
    }

    #[test]
    fn test_zero_jitter() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(jitter(&mut rng, 0.0), 0.0);
        assert_eq!(jitter(&mut rng, f64::NAN), 0.0);
        assert_eq!(jitter(&mut rng, f64::INFINITY), 0.0);
    }

    #[test]
    fn test_device_walk_stays_on_circle() {
        let center = Position::new(1.0, 1.0);
        for tick in 0..50 {
            let p = device_position(center, 2.0, tick, 1, 3);
            assert!((p.distance_to(&center) - 2.0).abs() < 1e-9);
        }
    }
}
