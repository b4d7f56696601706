//! # Diagnose Pipeline
//!
//! Runs the stages in fixed order, handing the point sequence from one to
//! the next by value:
//!
//! 1. validate
//! 2. derive kinematics
//! 3. detect anomalies (always)
//! 4. adaptive RTS smoothing (toggle `adaptiveRTS`)
//! 5. spline gap filling (toggle `splineInterpolation`)
//! 6. outlier removal (toggle `outlierRemoval`)
//! 7. Douglas-Peucker simplification (toggle `simplification`)
//! 8. statistics and health score
//!
//! The cancel token is checked between stages and inside the long loops.

use std::time::Instant;

use log::{debug, info};
use uuid::Uuid;

use crate::cancel::CancelToken;
use crate::config::DiagnoseOptions;
use crate::detector::{detect_anomalies, DetectionReport};
use crate::error::DiagnoseError;
use crate::health::{score_health, HealthInputs};
use crate::kinematics::derive_kinematics;
use crate::outlier::remove_outliers;
use crate::rts::smooth_trajectory;
use crate::simplify::simplify_trajectory;
use crate::spline::interpolate_gaps;
use crate::stats::compute_stats;
use crate::validate::{validate_geo_points, validate_points};
use crate::{DiagnoseData, DiagnosticsInfo, GeoPoint, PointStatus};

/// Diagnose and repair a trajectory given as raw `[lat, lon, time, elevation?, speed?, bearing?]` rows.
///
/// # Example
///
/// ```rust
/// use trajectory_doctor::{diagnose, DiagnoseOptions, PointStatus};
///
/// let raw = vec![
///     vec![22.5431, 113.9510, 1_705_318_200.0],
///     vec![40.0, -70.0, 1_705_318_201.0],
/// ];
/// let data = diagnose(&raw, &DiagnoseOptions::default()).unwrap();
/// let jump = &data.diagnostics.anomalies[0];
/// assert_eq!(jump.kind, PointStatus::Jump);
/// assert_eq!(jump.indices, vec![1]);
/// assert!(data.diagnostics.health_score.insufficient_data);
/// ```
pub fn diagnose<P: AsRef<[f64]>>(raw: &[P], options: &DiagnoseOptions) -> Result<DiagnoseData, DiagnoseError> {
    diagnose_with_cancel(raw, options, &CancelToken::new())
}

/// [`diagnose`] with a caller-controlled cancel token.
pub fn diagnose_with_cancel<P: AsRef<[f64]>>(
    raw: &[P],
    options: &DiagnoseOptions,
    cancel: &CancelToken,
) -> Result<DiagnoseData, DiagnoseError> {
    let points = validate_points(raw)?;
    run(points, options, cancel)
}

/// Diagnose fixes that are already parsed.
///
/// The points go through the same checks as raw input, and their `index`
/// must equal their position.
pub fn diagnose_points(
    points: Vec<GeoPoint>,
    options: &DiagnoseOptions,
    cancel: &CancelToken,
) -> Result<DiagnoseData, DiagnoseError> {
    validate_geo_points(&points)?;
    run(points, options, cancel)
}

fn run(mut points: Vec<GeoPoint>, options: &DiagnoseOptions, cancel: &CancelToken) -> Result<DiagnoseData, DiagnoseError> {
    let start = Instant::now();
    let options = options.sanitized();
    let toggles = options.algorithms;
    let report_id = options
        .report_id
        .clone()
        .unwrap_or_else(|| derive_report_id(&points, &options));

    cancel.check()?;
    derive_kinematics(&mut points);
    let original_count = points.len();
    let original = compute_stats(&points);

    cancel.check()?;
    let DetectionReport {
        points: mut sequence,
        mut gaps,
        mut anomalies,
        info: detector_info,
        normal_points,
        anomaly_points,
        median_interval,
        ..
    } = detect_anomalies(points, &options, cancel)?;
    if normal_points + anomaly_points != original_count {
        return Err(DiagnoseError::Internal(format!(
            "detector classified {} of {} points",
            normal_points + anomaly_points,
            original_count
        )));
    }
    let mut algorithms = vec![detector_info];

    let mut fixed_points = 0;
    if toggles.adaptive_rts {
        cancel.check()?;
        let (smoothed, info) = smooth_trajectory(sequence, &options.tuning, cancel)?;
        fixed_points = info.fixed_points;
        sequence = smoothed;
        algorithms.push(info);
    }

    let mut interpolated_points = 0;
    if toggles.spline_interpolation {
        cancel.check()?;
        let (filled, updated_gaps, info) = interpolate_gaps(sequence, gaps, median_interval, &options.tuning, cancel)?;
        interpolated_points = info.added_points;
        sequence = filled;
        gaps = updated_gaps;
        algorithms.push(info);
    }

    let mut removed_by_outlier_removal = 0;
    if toggles.outlier_removal {
        cancel.check()?;
        let (kept, info) = remove_outliers(sequence, &options.tuning, cancel)?;
        removed_by_outlier_removal = info.removed_points;
        sequence = kept;
        algorithms.push(info);
    }

    let mut removed_by_simplification = 0;
    if toggles.simplification {
        cancel.check()?;
        let (kept, info) = simplify_trajectory(sequence, options.output.simplify_epsilon, cancel)?;
        removed_by_simplification = info.removed_points;
        sequence = kept;
        algorithms.push(info);
    }

    let expected = original_count + interpolated_points - removed_by_outlier_removal - removed_by_simplification;
    if sequence.len() != expected {
        return Err(DiagnoseError::Internal(format!(
            "point accounting mismatch: {} points, expected {}",
            sequence.len(),
            expected
        )));
    }
    if let Some(info) = algorithms.iter().find(|a| !a.is_consistent()) {
        return Err(DiagnoseError::Internal(format!("inconsistent counts from {}", info.name)));
    }

    // Gap records carry the final fill state
    for anomaly in anomalies.iter_mut().filter(|a| a.kind == PointStatus::Missing) {
        anomaly.gaps = gaps.clone();
    }

    cancel.check()?;
    let corrected_fixes: Vec<GeoPoint> = sequence.iter().map(|p| p.corrected_point()).collect();
    let corrected = compute_stats(&corrected_fixes);

    let health_score = score_health(&HealthInputs {
        points: &sequence,
        original_count,
        anomalies: &anomalies,
        gaps: &gaps,
        removed_by_outlier_removal,
        fixed_points,
        thresholds: &options.thresholds,
    });

    debug!(
        "[TrajectoryDoctor] stages: {}",
        algorithms.iter().map(|a| a.name.as_str()).collect::<Vec<_>>().join(" -> ")
    );
    info!(
        "[TrajectoryDoctor] Diagnosed {} points -> {} in {:.1?}: {} anomalies, {} fixed, {} interpolated, {} removed, health {}",
        original_count,
        sequence.len(),
        start.elapsed(),
        anomaly_points,
        fixed_points,
        interpolated_points,
        removed_by_outlier_removal + removed_by_simplification,
        health_score.total
    );

    Ok(DiagnoseData {
        report_id,
        original,
        corrected,
        diagnostics: DiagnosticsInfo {
            normal_points,
            anomaly_points,
            fixed_points,
            removed_points: removed_by_outlier_removal + removed_by_simplification,
            removed_by_outlier_removal,
            removed_by_simplification,
            interpolated_points,
            total_processed: anomaly_points + removed_by_simplification,
            anomalies,
            algorithms,
            health_score,
        },
        points: options.output.include_points.then_some(sequence),
    })
}

/// Name-based UUID over the points and options, so identical requests get identical ids.
fn derive_report_id(points: &[GeoPoint], options: &DiagnoseOptions) -> String {
    let mut bytes = Vec::with_capacity(points.len() * 24 + 256);
    for p in points {
        bytes.extend_from_slice(&p.lat.to_le_bytes());
        bytes.extend_from_slice(&p.lon.to_le_bytes());
        bytes.extend_from_slice(&p.timestamp.to_le_bytes());
    }
    bytes.extend_from_slice(format!("{:?}", options).as_bytes());
    Uuid::new_v5(&Uuid::NAMESPACE_OID, &bytes).to_string()
}

// =============================================================================
// Unit Tests
// =============================================================================
