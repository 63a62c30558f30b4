//! RSSI to distance conversion
//!
//! Empirical log-distance path-loss curve:
//! `distance = 10^((A - rssi) / (10 * N)) * (1 + env_factor)`
//! clamped to `[min_distance, max_distance]` meters. The model is deliberately
//! simple; the clamp keeps output bounded near `rssi ≈ A` and far outside the
//! calibration range.

/// Measured RSSI at 1 meter (dBm)
pub const DEFAULT_RSSI_AT_1M: f64 = -60.0;
/// Free-space path-loss exponent
pub const DEFAULT_PATH_LOSS_EXPONENT: f64 = 2.0;
/// Environmental slack applied to every estimate
pub const DEFAULT_ENV_FACTOR: f64 = 0.5;
pub const DEFAULT_MIN_DISTANCE_M: f64 = 0.1;
pub const DEFAULT_MAX_DISTANCE_M: f64 = 10.0;

/// Calibrated path-loss model
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistanceModel {
    rssi_at_1m: f64,
    path_loss_exponent: f64,
    env_factor: f64,
    min_distance: f64,
    max_distance: f64,
}

impl Default for DistanceModel {
    fn default() -> Self {
        Self::new(DEFAULT_RSSI_AT_1M, DEFAULT_PATH_LOSS_EXPONENT, DEFAULT_ENV_FACTOR)
    }
}

impl DistanceModel {
    pub fn new(rssi_at_1m: f64, path_loss_exponent: f64, env_factor: f64) -> Self {
        Self {
            rssi_at_1m,
            path_loss_exponent,
            env_factor,
            min_distance: DEFAULT_MIN_DISTANCE_M,
            max_distance: DEFAULT_MAX_DISTANCE_M,
        }
    }

    /// Override the output clamp. Bounds are swapped if given in reverse.
    pub fn with_bounds(mut self, min_distance: f64, max_distance: f64) -> Self {
        self.min_distance = min_distance.min(max_distance);
        self.max_distance = max_distance.max(min_distance);
        self
    }

    /// Estimated distance in meters. Total: never fails, never leaves the clamp.
    pub fn distance(&self, rssi: f64) -> f64 {
        let exponent = (self.rssi_at_1m - rssi) / (10.0 * self.path_loss_exponent);
        let raw = 10f64.powf(exponent) * (1.0 + self.env_factor);
        if raw.is_nan() {
            return self.max_distance;
        }
        raw.clamp(self.min_distance, self.max_distance)
    }

    /// Difference between the distances implied by two readings
    pub fn proximity(&self, rssi_a: f64, rssi_b: f64) -> f64 {
        (self.distance(rssi_a) - self.distance(rssi_b)).abs()
    }

    /// Invert the curve (ignoring the clamp) to get the RSSI expected at `distance`
    pub fn expected_rssi(&self, distance: f64) -> f64 {
        let scaled = (distance / (1.0 + self.env_factor)).max(f64::MIN_POSITIVE);
        self.rssi_at_1m - 10.0 * self.path_loss_exponent * scaled.log10()
    }

    pub fn min_distance(&self) -> f64 {
        self.min_distance
    }

    pub fn max_distance(&self) -> f64 {
        self.max_distance
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calibration_point() {
        let model = DistanceModel::default();
        // At A the curve is 1m, scaled by (1 + env_factor)
        assert!((model.distance(-60.0) - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_clamp_over_valid_range() {
        let model = DistanceModel::default();
        for tenth in -1000..=0 {
            let rssi = tenth as f64 / 10.0;
            let d = model.distance(rssi);
            assert!((0.1..=10.0).contains(&d), "rssi {rssi} -> {d}");
        }
    }

    #[test]
    fn test_clamps_extremes() {
        let model = DistanceModel::default();
        assert_eq!(model.distance(-100.0), 10.0);
        assert_eq!(model.distance(0.0), 0.1);
        assert_eq!(model.distance(f64::NAN), 10.0);
        assert_eq!(model.distance(f64::NEG_INFINITY), 10.0);
        assert_eq!(model.distance(f64::INFINITY), 0.1);
    }

    #[test]
    fn test_monotonic_non_increasing() {
        let model = DistanceModel::default();
        let mut previous = f64::INFINITY;
        for rssi in -100..=0 {
            let d = model.distance(rssi as f64);
            assert!(d <= previous, "distance grew at rssi {rssi}");
            previous = d;
        }
    }

    #[test]
    fn test_custom_bounds() {
        let model = DistanceModel::default().with_bounds(0.5, 3.0);
        assert_eq!(model.distance(-95.0), 3.0);
        assert_eq!(model.distance(-10.0), 0.5);

        let swapped = DistanceModel::default().with_bounds(3.0, 0.5);
        assert_eq!(swapped.min_distance(), 0.5);
        assert_eq!(swapped.max_distance(), 3.0);
    }

    #[test]
    fn test_proximity() {
        let model = DistanceModel::default();
        assert_eq!(model.proximity(-60.0, -60.0), 0.0);
        let p = model.proximity(-60.0, -66.0);
        let expected = model.distance(-66.0) - model.distance(-60.0);
        assert!((p - expected).abs() < 1e-12);
        assert!(p > 0.0);
    }

    #[test]
    fn test_expected_rssi_inverts_distance() {
        let model = DistanceModel::default();
        for d in [0.5, 1.5, 2.7, 6.0] {
            let rssi = model.expected_rssi(d);
            assert!((model.distance(rssi) - d).abs() < 1e-9);
        }
    }
}
