//! # Health Score
//!
//! Weighted composite (0-100) of four equally weighted dimensions:
//!
//! | Dimension | Measures |
//! |-----------|----------|
//! | completeness | unfilled gap time, interpolated time, points removed as outliers |
//! | accuracy | flagged vs repaired points, high-severity anomalies, mean correction distance |
//! | consistency | speed and acceleration violations left on the corrected track |
//! | smoothness | spread of heading changes and zig-zag oscillations |
//!
//! Tracks with fewer than three corrected points report a neutral 50 for
//! consistency and smoothness and set `insufficient_data`.

use std::collections::BTreeMap;

use log::debug;

use crate::config::Thresholds;
use crate::geo_utils::{bearing_difference, haversine_distance, initial_bearing};
use crate::kinematics::{segment_speed, STATIONARY_EPSILON_M};
use crate::robust::mean_std;
use crate::stats::mean_correction_distance;
use crate::{AnnotatedPoint, Anomaly, GapSpan, HealthScore, Rating, ScoreDetail, Severity};

const WEIGHT: f64 = 0.25;
const MIN_SCORED_POINTS: usize = 3;
const NEUTRAL_SCORE: f64 = 50.0;

/// Weight of interpolated time relative to unfilled gap time.
const INTERPOLATED_PENALTY: f64 = 0.25;
/// Credit per repaired point relative to the penalty per flagged point.
const REPAIR_CREDIT: f64 = 0.5;
const HIGH_SEVERITY_PENALTY: f64 = 2.0;
const MAX_HIGH_SEVERITY_PENALTY: f64 = 30.0;
/// Meters of mean correction per point of accuracy penalty.
const CORRECTION_METERS_PER_POINT: f64 = 10.0;
const MAX_CORRECTION_PENALTY: f64 = 20.0;
const HEADING_SPREAD_PENALTY: f64 = 3.0;
const OSCILLATION_PENALTY: f64 = 2.0;
/// Heading changes below this are straight, above `TURN_DEG` a turn.
const STRAIGHT_DEG: f64 = 10.0;
const TURN_DEG: f64 = 30.0;

/// Everything the scorer looks at, gathered by the pipeline.
#[derive(Debug, Clone, Copy)]
pub struct HealthInputs<'a> {
    /// Final corrected sequence
    pub points: &'a [AnnotatedPoint],
    /// Point count before any stage ran
    pub original_count: usize,
    pub anomalies: &'a [Anomaly],
    pub gaps: &'a [GapSpan],
    pub removed_by_outlier_removal: usize,
    pub fixed_points: usize,
    pub thresholds: &'a Thresholds,
}

/// Compute the health score.
pub fn score_health(inputs: &HealthInputs<'_>) -> HealthScore {
    let insufficient_data = inputs.points.len() < MIN_SCORED_POINTS;

    let mut breakdown = BTreeMap::new();
    breakdown.insert("completeness".to_string(), completeness(inputs));
    breakdown.insert("accuracy".to_string(), accuracy(inputs));
    breakdown.insert("consistency".to_string(), consistency(inputs));
    breakdown.insert("smoothness".to_string(), smoothness(inputs.points));

    let weighted: f64 = breakdown.values().map(|d| d.score * d.weight).sum();
    let total = weighted.round().clamp(0.0, 100.0) as u8;
    debug!(
        "[HealthScore] total={} insufficient_data={} ({})",
        total,
        insufficient_data,
        breakdown
            .iter()
            .map(|(k, d)| format!("{}={:.0}", k, d.score))
            .collect::<Vec<_>>()
            .join(", ")
    );

    HealthScore {
        total,
        rating: Rating::from_total(total),
        breakdown,
        insufficient_data,
    }
}

fn detail(score: f64, description: &str) -> ScoreDetail {
    ScoreDetail {
        score: score.clamp(0.0, 100.0).round(),
        weight: WEIGHT,
        description: description.to_string(),
    }
}

fn completeness(inputs: &HealthInputs<'_>) -> ScoreDetail {
    let points = inputs.points;
    let duration = match (points.first(), points.last()) {
        (Some(a), Some(b)) => b.timestamp() - a.timestamp(),
        _ => 0.0,
    };
    if inputs.original_count == 0 {
        return detail(0.0, "No data available");
    }

    let (mut unfilled, mut filled) = (0.0, 0.0);
    for gap in inputs.gaps {
        if gap.filled {
            filled += gap.duration_seconds;
        } else {
            unfilled += gap.duration_seconds;
        }
    }
    let (unfilled_frac, filled_frac) = if duration > 0.0 {
        ((unfilled / duration).min(1.0), (filled / duration).min(1.0))
    } else {
        (0.0, 0.0)
    };
    let removed_ratio = inputs.removed_by_outlier_removal as f64 / inputs.original_count as f64;

    let score = 100.0 * (1.0 - unfilled_frac - INTERPOLATED_PENALTY * filled_frac - removed_ratio);
    detail(score, "Data completeness (unfilled gaps, interpolated time, removed outliers)")
}

fn accuracy(inputs: &HealthInputs<'_>) -> ScoreDetail {
    if inputs.original_count == 0 {
        return detail(0.0, "No data available");
    }
    let n = inputs.original_count as f64;

    let flagged: usize = inputs.anomalies.iter().map(|a| a.count).sum();
    let high: usize = inputs
        .anomalies
        .iter()
        .filter(|a| a.severity == Severity::High)
        .map(|a| a.count)
        .sum();
    let repaired = inputs.fixed_points.min(flagged);

    let mut score = 100.0 * (1.0 - flagged as f64 / n) + 100.0 * REPAIR_CREDIT * repaired as f64 / n;
    score -= (high as f64 * HIGH_SEVERITY_PENALTY).min(MAX_HIGH_SEVERITY_PENALTY);

    let originals: Vec<_> = inputs
        .points
        .iter()
        .filter(|p| p.is_fixed())
        .map(|p| {
            let mut original = p.point;
            original.lat = p.original_lat();
            original.lon = p.original_lon();
            (original, p.corrected_point())
        })
        .collect();
    let mean_correction = mean_correction_distance(originals.iter().map(|(a, b)| (a, b)));
    score -= (mean_correction / CORRECTION_METERS_PER_POINT).min(MAX_CORRECTION_PENALTY);

    detail(score, "Position accuracy (flagged and repaired points, severity, correction size)")
}

fn consistency(inputs: &HealthInputs<'_>) -> ScoreDetail {
    let points = inputs.points;
    if points.len() < MIN_SCORED_POINTS {
        return detail(NEUTRAL_SCORE, "Insufficient data for consistency check");
    }

    let fixes: Vec<_> = points.iter().map(|p| p.corrected_point()).collect();
    let max_speed = inputs.thresholds.max_speed_mps();
    let speeds: Vec<Option<f64>> = fixes.windows(2).map(|w| segment_speed(&w[0], &w[1])).collect();

    let mut violations = speeds.iter().filter(|s| s.map_or(true, |v| v > max_speed)).count();
    for (k, pair) in speeds.windows(2).enumerate() {
        let dt = fixes[k + 2].timestamp - fixes[k + 1].timestamp;
        if let (Some(v0), Some(v1)) = (pair[0], pair[1]) {
            if dt > 0.0 && ((v1 - v0) / dt).abs() > inputs.thresholds.max_acceleration {
                violations += 1;
            }
        }
    }

    let checks = speeds.len() * 2 - 1;
    let score = 100.0 * (1.0 - violations as f64 / checks as f64);
    detail(score, "Speed and acceleration consistency of the corrected track")
}

fn smoothness(points: &[AnnotatedPoint]) -> ScoreDetail {
    if points.len() < MIN_SCORED_POINTS {
        return detail(NEUTRAL_SCORE, "Insufficient data for smoothness check");
    }

    let fixes: Vec<_> = points.iter().map(|p| p.corrected_point()).collect();
    // Headings of moving segments only; standing still has no direction
    let headings: Vec<f64> = fixes
        .windows(2)
        .filter(|w| haversine_distance(&w[0], &w[1]) >= STATIONARY_EPSILON_M)
        .map(|w| initial_bearing(w[0].lat, w[0].lon, w[1].lat, w[1].lon))
        .collect();
    let changes: Vec<f64> = headings.windows(2).map(|w| bearing_difference(w[0], w[1])).collect();

    let Some((_, spread)) = mean_std(&changes) else {
        return detail(NEUTRAL_SCORE, "Cannot calculate heading changes");
    };
    let oscillations = changes
        .windows(3)
        .filter(|w| {
            (w[0] < STRAIGHT_DEG && w[1] > TURN_DEG && w[2] < STRAIGHT_DEG)
                || (w[0] > TURN_DEG && w[1] < STRAIGHT_DEG && w[2] > TURN_DEG)
        })
        .count();

    let score = 100.0 - HEADING_SPREAD_PENALTY * spread - OSCILLATION_PENALTY * oscillations as f64;
    detail(score, "Trajectory smoothness (heading changes, oscillations)")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GeoPoint;

    const T0: f64 = 1_705_318_200.0;

    fn track(coords: &[(f64, f64)]) -> Vec<AnnotatedPoint> {
        coords
            .iter()
            .enumerate()
            .map(|(i, (lat, lon))| AnnotatedPoint::new(GeoPoint::new(i, *lat, *lon, T0 + i as f64 * 3.0)))
            .collect()
    }

    fn straight(n: usize) -> Vec<(f64, f64)> {
        (0..n).map(|i| (22.5 + i as f64 * 0.0001, 113.9)).collect()
    }

    fn inputs<'a>(points: &'a [AnnotatedPoint], thresholds: &'a Thresholds) -> HealthInputs<'a> {
        HealthInputs {
            points,
            original_count: points.len(),
            anomalies: &[],
            gaps: &[],
            removed_by_outlier_removal: 0,
            fixed_points: 0,
            thresholds,
        }
    }

    #[test]
    fn test_clean_track_scores_full() {
        let points = track(&straight(30));
        let thresholds = Thresholds::default();
        let health = score_health(&inputs(&points, &thresholds));
        assert_eq!(health.total, 100);
        assert_eq!(health.rating, Rating::Excellent);
        assert!(!health.insufficient_data);
        assert_eq!(health.breakdown.len(), 4);
        let weights: f64 = health.breakdown.values().map(|d| d.weight).sum();
        assert!((weights - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_two_points_insufficient() {
        let points = track(&straight(2));
        let thresholds = Thresholds::default();
        let health = score_health(&inputs(&points, &thresholds));
        assert!(health.insufficient_data);
        assert_eq!(health.breakdown["consistency"].score, 50.0);
        assert_eq!(health.breakdown["smoothness"].score, 50.0);
        assert!(health.total <= 100);
    }

    #[test]
    fn test_unfilled_gap_lowers_completeness() {
        let points = track(&straight(30));
        let thresholds = Thresholds::default();
        let gaps = vec![GapSpan {
            start_index: 10,
            end_index: 11,
            start_time: T0 + 30.0,
            end_time: T0 + 60.0,
            duration_seconds: 29.0,
            distance_meters: 11.0,
            filled: false,
            inserted_points: 0,
            unfilled_reason: Some("test".to_string()),
        }];
        let health = score_health(&HealthInputs {
            gaps: &gaps,
            ..inputs(&points, &thresholds)
        });
        // 29 s of 87 s missing
        assert_eq!(health.breakdown["completeness"].score, 67.0);
    }

    #[test]
    fn test_zigzag_lowers_smoothness() {
        let coords: Vec<(f64, f64)> = (0..30)
            .map(|i| (22.5 + i as f64 * 0.0001, 113.9 + if i % 3 == 0 { 0.0001 } else { 0.0 }))
            .collect();
        let points = track(&coords);
        let thresholds = Thresholds::default();
        let health = score_health(&inputs(&points, &thresholds));
        assert!(health.breakdown["smoothness"].score < 100.0);
    }

    #[test]
    fn test_speed_violation_lowers_consistency() {
        let mut coords = straight(30);
        coords[15].1 += 0.01; // ~1 km sideways in 3 s
        let points = track(&coords);
        let thresholds = Thresholds::default();
        let health = score_health(&inputs(&points, &thresholds));
        assert!(health.breakdown["consistency"].score < 100.0);
    }

    #[test]
    fn test_total_matches_weighted_sum() {
        let mut coords = straight(40);
        coords[20].1 += 0.002;
        let points = track(&coords);
        let thresholds = Thresholds::default();
        let health = score_health(&inputs(&points, &thresholds));
        let weighted: f64 = health.breakdown.values().map(|d| d.score * d.weight).sum();
        assert_eq!(health.total as f64, weighted.round());
        assert_eq!(health.rating, Rating::from_total(health.total));
    }
}
