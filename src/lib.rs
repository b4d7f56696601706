//! # Trajectory Doctor
//!
//! Diagnosis and repair of noisy GPS trajectories.
//!
//! This library provides:
//! - Input validation and kinematics derivation (speed, bearing, acceleration)
//! - Anomaly classification (gaps, jumps, speed/acceleration spikes, density, drift, outliers)
//! - Adaptive Rauch-Tung-Striebel smoothing of flagged points
//! - Cubic spline gap filling, statistical outlier removal and Douglas-Peucker simplification
//! - Trajectory statistics and a weighted health score
//!
//! ## Features
//!
//! - **`parallel`** - Compute per-point window statistics with rayon
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use trajectory_doctor::{diagnose, DiagnoseOptions};
//!
//! // [lat, lon, unix time, elevation?, speed?, bearing?]
//! let raw: Vec<Vec<f64>> = (0..30)
//!     .map(|i| vec![22.5431 + i as f64 * 0.00002, 113.9510, 1_705_318_200.0 + i as f64 * 3.0])
//!     .collect();
//!
//! let data = diagnose(&raw, &DiagnoseOptions::default()).unwrap();
//! assert_eq!(data.original.point_count, 30);
//! assert!(data.diagnostics.health_score.total <= 100);
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub mod cancel;
pub mod config;
pub mod density;
pub mod detector;
pub mod error;
pub mod geo_utils;
pub mod health;
pub mod kinematics;
pub mod outlier;
pub mod pipeline;
pub mod robust;
pub mod rts;
pub mod simplify;
pub mod spline;
pub mod stats;
pub mod validate;

pub use cancel::CancelToken;
pub use config::{AlgorithmToggles, DiagnoseOptions, OutputOptions, Thresholds, Tuning};
pub use detector::{detect_anomalies, DetectionReport, DetectorKind};
pub use error::{DiagnoseError, ErrorDetails};
pub use health::{score_health, HealthInputs};
pub use kinematics::derive_kinematics;
pub use outlier::remove_outliers;
pub use pipeline::{diagnose, diagnose_points, diagnose_with_cancel};
pub use rts::smooth_trajectory;
pub use simplify::simplify_trajectory;
pub use spline::interpolate_gaps;
pub use stats::compute_stats;
pub use validate::validate_points;

/// Minimum number of points accepted per request.
pub const MIN_POINTS: usize = 2;

/// Maximum number of points accepted per request (and produced by gap filling).
pub const MAX_POINTS: usize = 100_000;

// ============================================================================
// Input Types
// ============================================================================

/// One GPS fix.
///
/// `index` is the point's position in the original request and stays its
/// identity through every stage. Optional kinematic fields are filled by
/// [`derive_kinematics`] when the input did not supply them; a `None` speed
/// after derivation means the speed is undefined (zero elapsed time while
/// the position changed).
///
/// # Example
/// ```
/// use trajectory_doctor::GeoPoint;
/// let fix = GeoPoint::new(0, 22.5431, 113.9510, 1_705_318_200.0).with_elevation(12.0);
/// assert!(fix.is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoPoint {
    pub index: usize,
    pub lat: f64,
    pub lon: f64,
    /// Seconds since the Unix epoch
    pub timestamp: f64,
    /// Meters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elevation: Option<f64>,
    /// m/s
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    /// Degrees clockwise from north, [0, 360)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearing: Option<f64>,
    /// m/s²
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acceleration: Option<f64>,
}

impl GeoPoint {
    /// Create a fix with no optional fields.
    pub fn new(index: usize, lat: f64, lon: f64, timestamp: f64) -> Self {
        Self {
            index,
            lat,
            lon,
            timestamp,
            elevation: None,
            speed: None,
            bearing: None,
            acceleration: None,
        }
    }

    pub fn with_elevation(mut self, elevation: f64) -> Self {
        self.elevation = Some(elevation);
        self
    }

    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = Some(speed);
        self
    }

    pub fn with_bearing(mut self, bearing: f64) -> Self {
        self.bearing = Some(bearing);
        self
    }

    /// Check if the fix has finite, in-range coordinates and timestamp.
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && self.timestamp.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }
}

// ============================================================================
// Annotation Types
// ============================================================================

/// Classification of a point. Every point carries exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointStatus {
    Normal,
    Drift,
    Jump,
    SpeedAnomaly,
    AccelerationAnomaly,
    Missing,
    DensityAnomaly,
    Outlier,
    Interpolated,
}

impl PointStatus {
    /// Every status, in reporting order.
    pub const ALL: [PointStatus; 9] = [
        PointStatus::Normal,
        PointStatus::Drift,
        PointStatus::Jump,
        PointStatus::SpeedAnomaly,
        PointStatus::AccelerationAnomaly,
        PointStatus::Missing,
        PointStatus::DensityAnomaly,
        PointStatus::Outlier,
        PointStatus::Interpolated,
    ];

    /// Wire name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            PointStatus::Normal => "normal",
            PointStatus::Drift => "drift",
            PointStatus::Jump => "jump",
            PointStatus::SpeedAnomaly => "speed_anomaly",
            PointStatus::AccelerationAnomaly => "acceleration_anomaly",
            PointStatus::Missing => "missing",
            PointStatus::DensityAnomaly => "density_anomaly",
            PointStatus::Outlier => "outlier",
            PointStatus::Interpolated => "interpolated",
        }
    }

    /// True for statuses produced by the anomaly detector (not normal, not synthetic).
    pub fn is_anomaly(&self) -> bool {
        !matches!(self, PointStatus::Normal | PointStatus::Interpolated)
    }

    /// True for statuses whose coordinates the smoother is allowed to replace.
    pub fn is_correctable(&self) -> bool {
        matches!(
            self,
            PointStatus::Drift
                | PointStatus::Jump
                | PointStatus::Outlier
                | PointStatus::SpeedAnomaly
                | PointStatus::AccelerationAnomaly
        )
    }
}

impl std::fmt::Display for PointStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Anomaly severity, ordered low < medium < high.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// Stage that changed a point's corrected coordinates or created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairStage {
    AdaptiveRts,
    SplineInterpolation,
}

/// A GPS fix with its classification and correction state.
///
/// `original_lat`/`original_lon` are captured when the annotation is created
/// and cannot be changed afterwards; stages only ever write the corrected
/// coordinates.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotatedPoint {
    #[serde(flatten)]
    pub point: GeoPoint,
    pub status: PointStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    original_lat: f64,
    original_lon: f64,
    pub corrected_lat: f64,
    pub corrected_lon: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fixed_by: Option<RepairStage>,
}

impl AnnotatedPoint {
    /// Wrap a fix as a `normal` point whose corrected position equals the raw one.
    pub fn new(point: GeoPoint) -> Self {
        Self {
            point,
            status: PointStatus::Normal,
            severity: None,
            original_lat: point.lat,
            original_lon: point.lon,
            corrected_lat: point.lat,
            corrected_lon: point.lon,
            fixed_by: None,
        }
    }

    /// Wrap a synthetic fix created by gap filling.
    pub fn interpolated(point: GeoPoint) -> Self {
        Self {
            status: PointStatus::Interpolated,
            fixed_by: Some(RepairStage::SplineInterpolation),
            ..Self::new(point)
        }
    }

    pub fn original_lat(&self) -> f64 {
        self.original_lat
    }

    pub fn original_lon(&self) -> f64 {
        self.original_lon
    }

    pub fn index(&self) -> usize {
        self.point.index
    }

    pub fn timestamp(&self) -> f64 {
        self.point.timestamp
    }

    /// Move the corrected position and record which stage did it.
    pub fn apply_correction(&mut self, lat: f64, lon: f64, stage: RepairStage) {
        self.corrected_lat = lat;
        self.corrected_lon = lon;
        self.fixed_by = Some(stage);
    }

    /// True once a repair stage moved this point away from its raw position.
    pub fn is_fixed(&self) -> bool {
        self.fixed_by == Some(RepairStage::AdaptiveRts)
    }

    /// The corrected position as a plain fix (kinematic fields kept from the input).
    pub fn corrected_point(&self) -> GeoPoint {
        GeoPoint {
            lat: self.corrected_lat,
            lon: self.corrected_lon,
            ..self.point
        }
    }
}

// ============================================================================
// Report Types
// ============================================================================

/// A stretch of missing data between two recorded fixes.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GapSpan {
    /// Original index of the last point before the gap
    pub start_index: usize,
    /// Original index of the first point after the gap
    pub end_index: usize,
    pub start_time: f64,
    pub end_time: f64,
    pub duration_seconds: f64,
    pub distance_meters: f64,
    /// Whether the interpolator filled this gap
    pub filled: bool,
    pub inserted_points: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unfilled_reason: Option<String>,
}

/// Anomalies of one type, grouped after detection.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Anomaly {
    #[serde(rename = "type")]
    pub kind: PointStatus,
    pub description: String,
    pub severity: Severity,
    pub count: usize,
    /// Original indices of the affected points, ascending
    pub indices: Vec<usize>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub gaps: Vec<GapSpan>,
}

/// A parameter value recorded in an [`AlgorithmInfo`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<usize> for ParamValue {
    fn from(v: usize) -> Self {
        ParamValue::Int(v as i64)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Text(v.to_string())
    }
}

/// Audit record emitted by every stage that touches the point sequence.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlgorithmInfo {
    pub name: String,
    pub description: String,
    /// Points the stage examined
    pub processed_points: usize,
    /// Points it corrected in place
    pub fixed_points: usize,
    /// Points it deleted
    pub removed_points: usize,
    /// Points it created
    #[serde(skip_serializing_if = "is_zero")]
    pub added_points: usize,
    /// Original indices of the corrected points
    pub fixed_indices: Vec<usize>,
    /// Original indices the stage could not process (recorded, not fatal)
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed_indices: Vec<usize>,
    /// Threshold and configuration values actually used
    pub parameters: BTreeMap<String, ParamValue>,
}

fn is_zero(v: &usize) -> bool {
    *v == 0
}

impl AlgorithmInfo {
    pub fn new(name: &str, description: &str, processed_points: usize) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            processed_points,
            fixed_points: 0,
            removed_points: 0,
            added_points: 0,
            fixed_indices: Vec::new(),
            failed_indices: Vec::new(),
            parameters: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, key: &str, value: impl Into<ParamValue>) -> Self {
        self.parameters.insert(key.to_string(), value.into());
        self
    }

    /// `processed >= fixed + removed`
    pub fn is_consistent(&self) -> bool {
        self.processed_points >= self.fixed_points + self.removed_points
    }
}

/// One dimension of the health score.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreDetail {
    /// 0-100
    pub score: f64,
    pub weight: f64,
    pub description: String,
}

/// Overall rating band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rating {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl Rating {
    /// Bands are inclusive on their lower edge: 85 excellent, 70 good, 50 fair.
    pub fn from_total(total: u8) -> Self {
        match total {
            85..=u8::MAX => Rating::Excellent,
            70..=84 => Rating::Good,
            50..=69 => Rating::Fair,
            _ => Rating::Poor,
        }
    }
}

/// Weighted composite data-quality score.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthScore {
    /// 0-100
    pub total: u8,
    pub rating: Rating,
    pub breakdown: BTreeMap<String, ScoreDetail>,
    /// Set when the trajectory is too short for robust analysis
    pub insufficient_data: bool,
}

/// Pipeline-wide summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsInfo {
    /// Points classified normal at detection time
    pub normal_points: usize,
    /// Points classified as any anomaly at detection time
    pub anomaly_points: usize,
    /// Points repositioned by the smoother
    pub fixed_points: usize,
    /// Points deleted by outlier removal and simplification
    pub removed_points: usize,
    pub removed_by_outlier_removal: usize,
    pub removed_by_simplification: usize,
    pub interpolated_points: usize,
    /// Anomaly points plus points removed by simplification
    pub total_processed: usize,
    pub anomalies: Vec<Anomaly>,
    pub algorithms: Vec<AlgorithmInfo>,
    pub health_score: HealthScore,
}

/// Bounding box in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Bounds {
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
}

impl Bounds {
    /// Create bounds from fixes. Returns `None` for an empty slice.
    pub fn from_points(points: &[GeoPoint]) -> Option<Self> {
        let first = points.first()?;
        let mut bounds = Bounds {
            north: first.lat,
            south: first.lat,
            east: first.lon,
            west: first.lon,
        };
        for p in points {
            bounds.north = bounds.north.max(p.lat);
            bounds.south = bounds.south.min(p.lat);
            bounds.east = bounds.east.max(p.lon);
            bounds.west = bounds.west.min(p.lon);
        }
        Some(bounds)
    }
}

/// Elevation statistics over the fixes that carry an elevation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ElevationStats {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub gain: f64,
    pub loss: f64,
}

/// Aggregate statistics of one trajectory.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrajectoryStats {
    pub point_count: usize,
    /// Cumulative great-circle distance in meters
    pub distance: f64,
    pub duration_seconds: f64,
    pub bounds: Bounds,
    /// km/h
    pub avg_speed: f64,
    /// km/h
    pub max_speed: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elevation: Option<ElevationStats>,
}

/// Result of a diagnose request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnoseData {
    pub report_id: String,
    pub original: TrajectoryStats,
    pub corrected: TrajectoryStats,
    pub diagnostics: DiagnosticsInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub points: Option<Vec<AnnotatedPoint>>,
}

// ============================================================================
// Unit Tests
// ============================================================================
