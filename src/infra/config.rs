//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml

use crate::domain::distance::{
    DistanceModel, DEFAULT_ENV_FACTOR, DEFAULT_MAX_DISTANCE_M, DEFAULT_MIN_DISTANCE_M,
    DEFAULT_PATH_LOSS_EXPONENT, DEFAULT_RSSI_AT_1M,
};
use crate::domain::estimator::EstimationMode;
use crate::domain::types::Position;
use crate::domain::window::DEFAULT_WINDOW_CAPACITY;
use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use tracing::warn;

/// What to do with reports from beacons missing from the fixed table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownBeaconPolicy {
    /// Drop the report; positions depend on known geometry
    #[default]
    Reject,
    /// Record the beacon at the origin and apply its readings
    Register,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    #[serde(default = "default_site_id")]
    pub id: String,
}

fn default_site_id() -> String {
    "ble-proximity".to_string()
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self { id: default_site_id() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_server_port")]
    pub port: u16,
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_server_port() -> u16 {
    5000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind_address: default_bind_address(), port: default_server_port() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathLossConfig {
    /// Measured RSSI at 1 meter (dBm)
    #[serde(default = "default_rssi_at_1m")]
    pub rssi_at_1m: f64,
    /// Path loss exponent (2.0 = free space)
    #[serde(default = "default_exponent")]
    pub exponent: f64,
    #[serde(default = "default_env_factor")]
    pub env_factor: f64,
    #[serde(default = "default_min_distance")]
    pub min_distance_m: f64,
    #[serde(default = "default_max_distance")]
    pub max_distance_m: f64,
}

fn default_rssi_at_1m() -> f64 {
    DEFAULT_RSSI_AT_1M
}

fn default_exponent() -> f64 {
    DEFAULT_PATH_LOSS_EXPONENT
}

fn default_env_factor() -> f64 {
    DEFAULT_ENV_FACTOR
}

fn default_min_distance() -> f64 {
    DEFAULT_MIN_DISTANCE_M
}

fn default_max_distance() -> f64 {
    DEFAULT_MAX_DISTANCE_M
}

impl Default for PathLossConfig {
    fn default() -> Self {
        Self {
            rssi_at_1m: default_rssi_at_1m(),
            exponent: default_exponent(),
            env_factor: default_env_factor(),
            min_distance_m: default_min_distance(),
            max_distance_m: default_max_distance(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrackingConfig {
    #[serde(default = "default_window_capacity")]
    pub window_capacity: usize,
    #[serde(default = "default_inactivity_threshold_ms")]
    pub inactivity_threshold_ms: u64,
    #[serde(default = "default_rssi_min")]
    pub rssi_min: f64,
    #[serde(default = "default_rssi_max")]
    pub rssi_max: f64,
    /// Beacons with data required before a position is computed
    #[serde(default = "default_min_beacons")]
    pub min_beacons: usize,
    #[serde(default)]
    pub estimation: EstimationMode,
    #[serde(default = "default_contact_radius")]
    pub contact_radius_m: f64,
}

fn default_window_capacity() -> usize {
    DEFAULT_WINDOW_CAPACITY
}

fn default_inactivity_threshold_ms() -> u64 {
    10_000
}

fn default_rssi_min() -> f64 {
    -100.0
}

fn default_rssi_max() -> f64 {
    0.0
}

fn default_min_beacons() -> usize {
    2
}

fn default_contact_radius() -> f64 {
    1.5
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            window_capacity: default_window_capacity(),
            inactivity_threshold_ms: default_inactivity_threshold_ms(),
            rssi_min: default_rssi_min(),
            rssi_max: default_rssi_max(),
            min_beacons: default_min_beacons(),
            estimation: EstimationMode::default(),
            contact_radius_m: default_contact_radius(),
        }
    }
}

/// Fixed beacon entry (e.g. `{ id = "ESP32_1", x = 0.0, y = 0.0 }`)
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FixedBeacon {
    pub id: String,
    pub x: f64,
    pub y: f64,
}

impl FixedBeacon {
    fn new(id: &str, x: f64, y: f64) -> Self {
        Self { id: id.to_string(), x, y }
    }

    pub fn position(&self) -> Position {
        Position::new(self.x, self.y)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BeaconsConfig {
    #[serde(default)]
    pub unknown_policy: UnknownBeaconPolicy,
    #[serde(default = "default_fixed_beacons")]
    pub fixed: Vec<FixedBeacon>,
}

fn default_fixed_beacons() -> Vec<FixedBeacon> {
    vec![
        FixedBeacon::new("ESP32_1", 0.0, 0.0),
        FixedBeacon::new("ESP32_2", 3.0, 0.0),
        FixedBeacon::new("ESP32_3", 1.0, 2.0),
    ]
}

impl Default for BeaconsConfig {
    fn default() -> Self {
        Self { unknown_policy: UnknownBeaconPolicy::default(), fixed: default_fixed_beacons() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EgressConfig {
    /// Emit estimated positions to the JSONL sink
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_egress_file")]
    pub file: String,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_egress_file() -> String {
    "positions.jsonl".to_string()
}

fn default_channel_capacity() -> usize {
    1000
}

impl Default for EgressConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            file: default_egress_file(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval")]
    pub interval_secs: u64,
}

fn default_metrics_interval() -> u64 {
    10
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval() }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub path_loss: PathLossConfig,
    #[serde(default)]
    pub tracking: TrackingConfig,
    #[serde(default)]
    pub beacons: BeaconsConfig,
    #[serde(default)]
    pub egress: EgressConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    bind_address: String,
    port: u16,
    distance_model: DistanceModel,
    window_capacity: usize,
    inactivity_threshold_ms: u64,
    rssi_min: f64,
    rssi_max: f64,
    min_beacons: usize,
    estimation: EstimationMode,
    contact_radius_m: f64,
    unknown_beacon_policy: UnknownBeaconPolicy,
    beacons: Vec<FixedBeacon>,
    egress_enabled: bool,
    egress_file: String,
    egress_channel_capacity: usize,
    metrics_interval_secs: u64,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default".to_string())
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: String) -> Self {
        let path_loss = toml_config.path_loss;
        let distance_model =
            DistanceModel::new(path_loss.rssi_at_1m, path_loss.exponent, path_loss.env_factor)
                .with_bounds(path_loss.min_distance_m, path_loss.max_distance_m);

        Self {
            site_id: toml_config.site.id,
            bind_address: toml_config.server.bind_address,
            port: toml_config.server.port,
            distance_model,
            window_capacity: toml_config.tracking.window_capacity,
            inactivity_threshold_ms: toml_config.tracking.inactivity_threshold_ms,
            rssi_min: toml_config.tracking.rssi_min,
            rssi_max: toml_config.tracking.rssi_max,
            min_beacons: toml_config.tracking.min_beacons.max(1),
            estimation: toml_config.tracking.estimation,
            contact_radius_m: toml_config.tracking.contact_radius_m,
            unknown_beacon_policy: toml_config.beacons.unknown_policy,
            beacons: toml_config.beacons.fixed,
            egress_enabled: toml_config.egress.enabled,
            egress_file: toml_config.egress.file,
            egress_channel_capacity: toml_config.egress.channel_capacity.max(1),
            metrics_interval_secs: toml_config.metrics.interval_secs.max(1),
            config_file,
        }
    }

    /// Determine config file path from args or environment
    pub fn resolve_config_path(args: &[String]) -> String {
        for (i, arg) in args.iter().enumerate() {
            if arg == "--config" {
                if let Some(path) = args.get(i + 1) {
                    return path.clone();
                }
            }
            if let Some(path) = arg.strip_prefix("--config=") {
                return path.to_string();
            }
        }

        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        "config/dev.toml".to_string()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Self::from_toml(toml_config, path.display().to_string()))
    }

    /// Load configuration from a path, falling back to defaults on error
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "config_load_failed_using_defaults");
                Self::default()
            }
        }
    }

    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn bind_address(&self) -> &str {
        &self.bind_address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn distance_model(&self) -> DistanceModel {
        self.distance_model
    }

    pub fn window_capacity(&self) -> usize {
        self.window_capacity
    }

    pub fn inactivity_threshold_ms(&self) -> u64 {
        self.inactivity_threshold_ms
    }

    pub fn rssi_min(&self) -> f64 {
        self.rssi_min
    }

    pub fn rssi_max(&self) -> f64 {
        self.rssi_max
    }

    pub fn min_beacons(&self) -> usize {
        self.min_beacons
    }

    pub fn estimation(&self) -> EstimationMode {
        self.estimation
    }

    pub fn contact_radius_m(&self) -> f64 {
        self.contact_radius_m
    }

    pub fn unknown_beacon_policy(&self) -> UnknownBeaconPolicy {
        self.unknown_beacon_policy
    }

    pub fn beacons(&self) -> &[FixedBeacon] {
        &self.beacons
    }

    pub fn egress_enabled(&self) -> bool {
        self.egress_enabled
    }

    pub fn egress_file(&self) -> &str {
        &self.egress_file
    }

    pub fn egress_channel_capacity(&self) -> usize {
        self.egress_channel_capacity
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method to set the estimation strategy
    pub fn with_estimation(mut self, mode: EstimationMode) -> Self {
        self.estimation = mode;
        self
    }

    /// Builder method to set the unknown-beacon policy
    pub fn with_unknown_beacon_policy(mut self, policy: UnknownBeaconPolicy) -> Self {
        self.unknown_beacon_policy = policy;
        self
    }

    /// Builder method to replace the fixed beacon table
    pub fn with_beacons(mut self, beacons: Vec<FixedBeacon>) -> Self {
        self.beacons = beacons;
        self
    }

    /// Builder method for tests to set the inactivity threshold
    #[cfg(test)]
    pub fn with_inactivity_threshold_ms(mut self, ms: u64) -> Self {
        self.inactivity_threshold_ms = ms;
        self
    }

    /// Builder method for tests to set the contact radius
    #[cfg(test)]
    pub fn with_contact_radius_m(mut self, radius: f64) -> Self {
        self.contact_radius_m = radius;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.site_id(), "ble-proximity");
        assert_eq!(config.port(), 5000);
        assert_eq!(config.window_capacity(), 5);
        assert_eq!(config.inactivity_threshold_ms(), 10_000);
        assert_eq!(config.min_beacons(), 2);
        assert_eq!(config.estimation(), EstimationMode::WeightedCentroid);
        assert_eq!(config.unknown_beacon_policy(), UnknownBeaconPolicy::Reject);
        assert_eq!(config.beacons().len(), 3);
        assert_eq!(config.beacons()[1].position(), Position::new(3.0, 0.0));
        assert!(!config.egress_enabled());
        assert_eq!(config.config_file(), "default");
    }

    #[test]
    fn test_default_distance_model() {
        let config = Config::default();
        assert_eq!(config.distance_model(), DistanceModel::default());
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let toml_config: TomlConfig = toml::from_str("").unwrap();
        let config = Config::from_toml(toml_config, "empty".to_string());
        assert_eq!(config.port(), 5000);
        assert_eq!(config.beacons().len(), 3);
        assert_eq!(config.egress_file(), "positions.jsonl");
    }

    #[test]
    fn test_zero_values_clamped() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
[tracking]
min_beacons = 0

[egress]
channel_capacity = 0

[metrics]
interval_secs = 0
"#,
        )
        .unwrap();
        let config = Config::from_toml(toml_config, "zero".to_string());
        assert_eq!(config.min_beacons(), 1);
        assert_eq!(config.egress_channel_capacity(), 1);
        assert_eq!(config.metrics_interval_secs(), 1);
    }

    #[test]
    fn test_resolve_config_path_default() {
        let args: Vec<String> = vec!["ble-proximity".to_string()];
        if env::var("CONFIG_FILE").is_err() {
            assert_eq!(Config::resolve_config_path(&args), "config/dev.toml");
        }
    }

    #[test]
    fn test_resolve_config_path_from_arg() {
        let args: Vec<String> = vec![
            "ble-proximity".to_string(),
            "--config".to_string(),
            "config/lab.toml".to_string(),
        ];
        assert_eq!(Config::resolve_config_path(&args), "config/lab.toml");
    }

    #[test]
    fn test_resolve_config_path_from_arg_equals() {
        let args: Vec<String> =
            vec!["ble-proximity".to_string(), "--config=config/office.toml".to_string()];
        assert_eq!(Config::resolve_config_path(&args), "config/office.toml");
    }
}
