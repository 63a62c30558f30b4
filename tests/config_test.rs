//! Integration tests for configuration loading

use ble_proximity::domain::{DistanceModel, EstimationMode, Position};
use ble_proximity::infra::{Config, UnknownBeaconPolicy};
use std::io::Write;
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(content.as_bytes()).unwrap();
    temp_file.flush().unwrap();
    temp_file
}

#[test]
fn test_load_config_from_file() {
    let temp_file = write_config(
        r#"
[site]
id = "test-site"

[server]
bind_address = "127.0.0.1"
port = 5050

[path_loss]
rssi_at_1m = -59.0
exponent = 2.5
env_factor = 0.0

[tracking]
window_capacity = 8
inactivity_threshold_ms = 30000
min_beacons = 3
estimation = "trilateration"
contact_radius_m = 2.0

[beacons]
unknown_policy = "register"

[[beacons.fixed]]
id = "A"
x = 0.0
y = 0.0

[[beacons.fixed]]
id = "B"
x = 4.0
y = 0.0

[egress]
enabled = true
file = "out/positions.jsonl"
channel_capacity = 16

[metrics]
interval_secs = 30
"#,
    );

    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.site_id(), "test-site");
    assert_eq!(config.bind_address(), "127.0.0.1");
    assert_eq!(config.port(), 5050);
    assert_eq!(config.distance_model(), DistanceModel::new(-59.0, 2.5, 0.0));
    assert_eq!(config.window_capacity(), 8);
    assert_eq!(config.inactivity_threshold_ms(), 30_000);
    assert_eq!(config.min_beacons(), 3);
    assert_eq!(config.estimation(), EstimationMode::Trilateration);
    assert_eq!(config.contact_radius_m(), 2.0);
    assert_eq!(config.unknown_beacon_policy(), UnknownBeaconPolicy::Register);
    assert_eq!(config.beacons().len(), 2);
    assert_eq!(config.beacons()[1].position(), Position::new(4.0, 0.0));
    assert!(config.egress_enabled());
    assert_eq!(config.egress_file(), "out/positions.jsonl");
    assert_eq!(config.egress_channel_capacity(), 16);
    assert_eq!(config.metrics_interval_secs(), 30);
    assert_eq!(config.config_file(), temp_file.path().display().to_string());
}

#[test]
fn test_partial_config_keeps_defaults() {
    let temp_file = write_config(
        r#"
[tracking]
window_capacity = 3
"#,
    );

    let config = Config::from_file(temp_file.path()).unwrap();
    assert_eq!(config.window_capacity(), 3);
    assert_eq!(config.site_id(), "ble-proximity");
    assert_eq!(config.port(), 5000);
    assert_eq!(config.inactivity_threshold_ms(), 10_000);
    assert_eq!(config.rssi_min(), -100.0);
    assert_eq!(config.rssi_max(), 0.0);
    let ids: Vec<&str> = config.beacons().iter().map(|b| b.id.as_str()).collect();
    assert_eq!(ids, vec!["ESP32_1", "ESP32_2", "ESP32_3"]);
}

#[test]
fn test_invalid_toml_is_error() {
    let temp_file = write_config("[tracking\nwindow_capacity = ");
    let err = Config::from_file(temp_file.path()).unwrap_err();
    assert!(format!("{err:#}").contains("Failed to parse config file"));
}

#[test]
fn test_unknown_estimation_mode_is_error() {
    let temp_file = write_config("[tracking]\nestimation = \"magic\"\n");
    assert!(Config::from_file(temp_file.path()).is_err());
}

#[test]
fn test_load_from_path_fallback() {
    let config = Config::load_from_path("/nonexistent/config.toml");
    assert_eq!(config.site_id(), "ble-proximity");
    assert_eq!(config.port(), 5000);
    assert_eq!(config.unknown_beacon_policy(), UnknownBeaconPolicy::Reject);
    assert_eq!(config.config_file(), "default");
}

#[test]
fn test_dev_config_parses() {
    let config = Config::from_file("config/dev.toml").unwrap();
    assert_eq!(config.site_id(), "dev");
    assert_eq!(config.beacons().len(), 3);
    assert!(config.egress_enabled());
}
