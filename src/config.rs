//! Request options.
//!
//! A [`DiagnoseOptions`] value is built once per request (usually
//! deserialized from the caller's JSON) and passed by reference to every
//! stage. Field names follow the external API (`adaptiveRTS`,
//! `maxSpeed`, `simplifyEpsilon`, ...); every field is optional on the wire.

use log::warn;
use serde::{Deserialize, Serialize};

use crate::geo_utils::haversine_distance;
use crate::robust::percentile;
use crate::GeoPoint;

/// Speeds at or above this (km/h) are ignored when adapting `max_speed`.
const ADAPTIVE_SPEED_CEILING_KMH: f64 = 300.0;

/// Steps at or above this (meters) are ignored when adapting `max_jump`.
const ADAPTIVE_STEP_CEILING_M: f64 = 10_000.0;

/// Complete configuration for one diagnose request.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DiagnoseOptions {
    pub algorithms: AlgorithmToggles,
    pub thresholds: Thresholds,
    pub output: OutputOptions,
    pub tuning: Tuning,
    /// Caller-assigned report id. Derived from the input when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_id: Option<String>,
}

/// Correction stages that can be switched off. Detection always runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlgorithmToggles {
    #[serde(rename = "adaptiveRTS", alias = "adaptive_rts")]
    pub adaptive_rts: bool,
    #[serde(rename = "splineInterpolation", alias = "spline_interpolation")]
    pub spline_interpolation: bool,
    #[serde(rename = "simplification")]
    pub simplification: bool,
    #[serde(rename = "outlierRemoval", alias = "outlier_removal")]
    pub outlier_removal: bool,
}

impl Default for AlgorithmToggles {
    fn default() -> Self {
        Self {
            adaptive_rts: true,
            spline_interpolation: true,
            simplification: true,
            outlier_removal: true,
        }
    }
}

impl AlgorithmToggles {
    /// Every correction stage off: detection and statistics only.
    pub fn detection_only() -> Self {
        Self {
            adaptive_rts: false,
            spline_interpolation: false,
            simplification: false,
            outlier_removal: false,
        }
    }
}

/// Classifier thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Thresholds {
    /// Maximum plausible speed in km/h.
    /// Default: 120.0
    pub max_speed: f64,

    /// Maximum plausible |acceleration| in m/s².
    /// Default: 10.0
    pub max_acceleration: f64,

    /// Distance from the previous accepted fix above which a point is a jump (meters).
    /// Default: 500.0
    pub max_jump: f64,

    /// Coordinate deviation that counts as drift (degrees).
    /// Default: 0.0001 (~11 meters)
    pub drift_threshold: f64,

    /// Tighten `max_speed` and `max_jump` from the track itself: speed to
    /// 1.5 × its 95th-percentile speed, jump to 10 × its 99th-percentile
    /// step. The configured values stay upper bounds.
    /// Default: false
    #[serde(rename = "useAdaptive", alias = "adaptive")]
    pub adaptive: bool,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            max_speed: 120.0,
            max_acceleration: 10.0,
            max_jump: 500.0,
            drift_threshold: 0.0001,
            adaptive: false,
        }
    }
}

impl Thresholds {
    /// `max_speed` converted to m/s.
    pub fn max_speed_mps(&self) -> f64 {
        self.max_speed / 3.6
    }

    /// Thresholds the detector applies to this track.
    ///
    /// Without `adaptive` this is `self`. Otherwise `max_speed` becomes
    /// `min(1.5 × p95, max_speed)` over point speeds in (0, 300) km/h and
    /// `max_jump` becomes `min(10 × p99, max_jump)` over consecutive steps
    /// in (0, 10 km). A track with no usable samples keeps the configured value.
    pub fn effective_for(&self, points: &[GeoPoint]) -> Thresholds {
        if !self.adaptive {
            return *self;
        }
        let speeds: Vec<f64> = points
            .iter()
            .filter_map(|p| p.speed)
            .map(|v| v * 3.6)
            .filter(|v| *v > 0.0 && *v < ADAPTIVE_SPEED_CEILING_KMH)
            .collect();
        let steps: Vec<f64> = points
            .windows(2)
            .map(|w| haversine_distance(&w[0], &w[1]))
            .filter(|d| *d > 0.0 && *d < ADAPTIVE_STEP_CEILING_M)
            .collect();

        let mut out = *self;
        if let Some(p95) = percentile(&speeds, 0.95) {
            out.max_speed = (p95 * 1.5).min(self.max_speed);
        }
        if let Some(p99) = percentile(&steps, 0.99) {
            out.max_jump = (p99 * 10.0).min(self.max_jump);
        }
        out
    }
}

/// Output shaping.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OutputOptions {
    /// Include the corrected annotated points in the result.
    /// Default: true
    pub include_points: bool,

    /// Douglas-Peucker tolerance: maximum perpendicular deviation (meters).
    /// Default: 1.0
    pub simplify_epsilon: f64,
}

impl Default for OutputOptions {
    fn default() -> Self {
        Self {
            include_points: true,
            simplify_epsilon: 1.0,
        }
    }
}

/// Engine constants that are not part of the public thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Tuning {
    /// A gap is an interval longer than the median interval times this.
    /// Default: 5.0
    pub gap_multiplier: f64,

    /// Intervals shorter than this are never gaps (seconds).
    /// Default: 10.0
    pub min_gap_seconds: f64,

    /// Longest gap the interpolator fills (seconds).
    /// Default: 600.0
    pub max_fill_seconds: f64,

    /// Control points per side required for a cubic fit.
    /// Default: 4
    pub spline_control_points: usize,

    /// Half-width of the rolling density band (points).
    /// Default: 10
    pub density_half_window: usize,

    /// Width of the density band in standard deviations.
    /// Default: 2.0
    pub density_sigma: f64,

    /// Clean fixes used to predict the next position for drift detection.
    /// Default: 5
    pub drift_history: usize,

    /// Longest drift run before the predictor re-anchors.
    /// Default: 30
    pub drift_max_run: usize,

    /// Neighbours on each side used for outlier residuals.
    /// Default: 3
    pub outlier_neighbors: usize,

    /// Robust z-score above which a residual is an outlier.
    /// Default: 3.5
    pub outlier_z_cutoff: f64,

    /// Residuals below this are never outliers (meters).
    /// Default: 30.0
    pub outlier_min_deviation_m: f64,

    /// Standard deviation of a nominal GPS fix (meters).
    /// Default: 5.0
    pub measurement_std_m: f64,

    /// Standard deviation of the unmodelled acceleration (m/s²).
    /// Default: 1.5
    pub process_accel_std: f64,

    /// Normalized innovation squared above which measurement noise is inflated.
    /// Default: 13.8 (chi-square, 2 dof, 99.9%)
    pub innovation_gate: f64,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            gap_multiplier: 5.0,
            min_gap_seconds: 10.0,
            max_fill_seconds: 600.0,
            spline_control_points: 4,
            density_half_window: 10,
            density_sigma: 2.0,
            drift_history: 5,
            drift_max_run: 30,
            outlier_neighbors: 3,
            outlier_z_cutoff: 3.5,
            outlier_min_deviation_m: 30.0,
            measurement_std_m: 5.0,
            process_accel_std: 1.5,
            innovation_gate: 13.8,
        }
    }
}

impl DiagnoseOptions {
    /// Options with every correction stage disabled.
    pub fn detection_only() -> Self {
        Self {
            algorithms: AlgorithmToggles::detection_only(),
            ..Self::default()
        }
    }

    /// Replace non-finite or non-positive thresholds with their defaults.
    pub fn sanitized(&self) -> Self {
        let mut out = self.clone();
        let defaults = Thresholds::default();

        out.thresholds.max_speed = positive_or("maxSpeed", out.thresholds.max_speed, defaults.max_speed);
        out.thresholds.max_acceleration =
            positive_or("maxAcceleration", out.thresholds.max_acceleration, defaults.max_acceleration);
        out.thresholds.max_jump = positive_or("maxJump", out.thresholds.max_jump, defaults.max_jump);
        out.thresholds.drift_threshold =
            positive_or("driftThreshold", out.thresholds.drift_threshold, defaults.drift_threshold);

        // Zero epsilon is legal (keeps every point)
        let epsilon = out.output.simplify_epsilon;
        if !epsilon.is_finite() || epsilon < 0.0 {
            warn!("[TrajectoryDoctor] simplifyEpsilon={} is invalid, using default", epsilon);
            out.output.simplify_epsilon = OutputOptions::default().simplify_epsilon;
        }

        let tuning_defaults = Tuning::default();
        let t = &mut out.tuning;
        t.gap_multiplier = positive_or("gapMultiplier", t.gap_multiplier, tuning_defaults.gap_multiplier);
        t.min_gap_seconds = positive_or("minGapSeconds", t.min_gap_seconds, tuning_defaults.min_gap_seconds);
        t.max_fill_seconds = positive_or("maxFillSeconds", t.max_fill_seconds, tuning_defaults.max_fill_seconds);
        t.density_sigma = positive_or("densitySigma", t.density_sigma, tuning_defaults.density_sigma);
        t.outlier_z_cutoff = positive_or("outlierZCutoff", t.outlier_z_cutoff, tuning_defaults.outlier_z_cutoff);
        t.outlier_min_deviation_m =
            positive_or("outlierMinDeviationM", t.outlier_min_deviation_m, tuning_defaults.outlier_min_deviation_m);
        t.measurement_std_m =
            positive_or("measurementStdM", t.measurement_std_m, tuning_defaults.measurement_std_m);
        t.process_accel_std =
            positive_or("processAccelStd", t.process_accel_std, tuning_defaults.process_accel_std);
        t.innovation_gate = positive_or("innovationGate", t.innovation_gate, tuning_defaults.innovation_gate);
        t.spline_control_points = t.spline_control_points.max(1);
        t.drift_history = t.drift_history.max(2);
        t.outlier_neighbors = t.outlier_neighbors.max(1);

        out
    }
}

fn positive_or(name: &str, value: f64, default: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        warn!("[TrajectoryDoctor] {}={} is invalid, using default {}", name, value, default);
        default
    }
}
