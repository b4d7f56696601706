//! # Anomaly Detector
//!
//! Classifies every fix into exactly one [`PointStatus`].
//!
//! The classifiers form a closed, ordered set ([`DetectorKind`]). For each
//! fix they are tried in precedence order and the first match wins:
//!
//! | Order | Kind | Condition |
//! |-------|------|-----------|
//! | 1 | `missing` | interval before the fix exceeds the gap threshold |
//! | 2 | `jump` | far from the reference fix at an impossible speed, or undefined speed |
//! | 3 | `speed_anomaly` | implied speed above `maxSpeed` |
//! | 4 | `acceleration_anomaly` | implied acceleration above `maxAcceleration` |
//! | 5 | `density_anomaly` | local density outside the rolling band, or exact duplicate |
//! | 6 | `drift` | sustained deviation from the constant-velocity prediction, not explained by a change of motion |
//! | 7 | `outlier` | robust z-score of the neighbour-chord residual |
//!
//! Jump, speed and acceleration are measured against the *reference* fix:
//! the last one accepted as a plausible position. A single spike therefore
//! flags once, and the fix after it is judged against the fix before it.
//! A jump whose successor agrees with it is a relocation and becomes the
//! new reference.
//!
//! Drift is judged against a prediction from recent clean fixes. When a fix
//! moves with a new velocity and its successor keeps that velocity, the
//! receiver manoeuvred (a turn, a stop, a speed change): the fix is taken at
//! face value and the predictor restarts from it.

use std::collections::VecDeque;

use log::debug;

use crate::cancel::CancelToken;
use crate::config::{DiagnoseOptions, Thresholds, Tuning};
use crate::density::{density_profile, DensityProfile};
use crate::error::DiagnoseError;
use crate::geo_utils::{degrees_to_meters, haversine_distance, LocalFrame};
use crate::kinematics::speed_over;
use crate::outlier::{chord_residuals, outlier_scores, Fix};
use crate::robust::median;
use crate::{AlgorithmInfo, AnnotatedPoint, Anomaly, GapSpan, GeoPoint, PointStatus, Severity};

/// Medium severity starts above this ratio for jumps.
const JUMP_MEDIUM_BAND: f64 = 1.2;

/// Medium severity starts above this ratio for every other classifier.
const MEDIUM_BAND: f64 = 1.5;

/// Ratio above which every classifier reports high severity.
const HIGH_BAND: f64 = 2.0;

// =============================================================================
// Detector Kinds
// =============================================================================

/// One anomaly classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DetectorKind {
    Missing,
    Jump,
    Speed,
    Acceleration,
    Density,
    Drift,
    Outlier,
}

impl DetectorKind {
    /// Classifiers in precedence order. Earlier entries win.
    pub const PRECEDENCE: [DetectorKind; 7] = [
        DetectorKind::Missing,
        DetectorKind::Jump,
        DetectorKind::Speed,
        DetectorKind::Acceleration,
        DetectorKind::Density,
        DetectorKind::Drift,
        DetectorKind::Outlier,
    ];

    /// Status assigned by this classifier.
    pub fn status(&self) -> PointStatus {
        match self {
            DetectorKind::Missing => PointStatus::Missing,
            DetectorKind::Jump => PointStatus::Jump,
            DetectorKind::Speed => PointStatus::SpeedAnomaly,
            DetectorKind::Acceleration => PointStatus::AccelerationAnomaly,
            DetectorKind::Density => PointStatus::DensityAnomaly,
            DetectorKind::Drift => PointStatus::Drift,
            DetectorKind::Outlier => PointStatus::Outlier,
        }
    }

    /// Classify the fix at `pos`, or `None` if this classifier does not match.
    pub fn classify(&self, pos: usize, ctx: &DetectionContext<'_>) -> Option<(PointStatus, Severity)> {
        let severity = match self {
            DetectorKind::Missing => {
                if !ctx.gap_before[pos] {
                    return None;
                }
                let dt = ctx.points[pos].timestamp - ctx.points[pos - 1].timestamp;
                severity_for(dt / ctx.gap_threshold, MEDIUM_BAND)
            }
            DetectorKind::Jump => {
                let step = ctx.step?;
                match step.speed {
                    None => Severity::High,
                    Some(v) if step.distance > ctx.thresholds.max_jump && v > ctx.max_speed_mps => {
                        severity_for(step.distance / ctx.thresholds.max_jump, JUMP_MEDIUM_BAND)
                    }
                    Some(_) => return None,
                }
            }
            DetectorKind::Speed => {
                let v = ctx.step?.speed?;
                if v <= ctx.max_speed_mps {
                    return None;
                }
                severity_for(v / ctx.max_speed_mps, MEDIUM_BAND)
            }
            DetectorKind::Acceleration => {
                let step = ctx.step?;
                let (v, v0) = (step.speed?, ctx.ref_speed?);
                if step.dt <= 0.0 {
                    return None;
                }
                let accel = ((v - v0) / step.dt).abs();
                if accel <= ctx.thresholds.max_acceleration {
                    return None;
                }
                severity_for(accel / ctx.thresholds.max_acceleration, MEDIUM_BAND)
            }
            DetectorKind::Density => {
                // An isolated single fix is the outlier classifier's business
                if ctx.outlier[pos].is_some() {
                    return None;
                }
                severity_for(ctx.density.flags[pos]?, MEDIUM_BAND)
            }
            DetectorKind::Drift => {
                if ctx.manoeuvre_at(pos) {
                    return None;
                }
                let (dx, dy) = ctx.drift_deviation(pos)?;
                let magnitude = dx.hypot(dy);
                if magnitude <= ctx.drift_threshold_m
                    || magnitude >= ctx.thresholds.max_jump
                    || ctx.drift_run >= ctx.tuning.drift_max_run
                {
                    return None;
                }
                let continues = pos > 0 && ctx.statuses[pos - 1] == PointStatus::Drift;
                let next_agrees = pos + 1 < ctx.points.len()
                    && !ctx.gap_before[pos + 1]
                    && ctx.drift_deviation(pos + 1).is_some_and(|(nx, ny)| {
                        nx.hypot(ny) > ctx.drift_threshold_m && nx * dx + ny * dy > 0.0
                    });
                if !continues && !next_agrees {
                    return None;
                }
                severity_for(magnitude / ctx.drift_threshold_m, MEDIUM_BAND)
            }
            DetectorKind::Outlier => {
                let z = ctx.outlier[pos]?;
                severity_for(z / ctx.tuning.outlier_z_cutoff, MEDIUM_BAND)
            }
        };
        Some((self.status(), severity))
    }
}

/// (east, north) velocity in m/s from a fix's speed and bearing.
fn velocity_of(p: &GeoPoint) -> Option<(f64, f64)> {
    let (speed, bearing) = (p.speed?, p.bearing?);
    let theta = bearing.to_radians();
    Some((speed * theta.sin(), speed * theta.cos()))
}

fn severity_for(ratio: f64, medium_band: f64) -> Severity {
    if ratio > HIGH_BAND {
        Severity::High
    } else if ratio > medium_band {
        Severity::Medium
    } else {
        Severity::Low
    }
}

// =============================================================================
// Detection Context
// =============================================================================

/// Motion from the reference fix to the fix being classified.
#[derive(Debug, Clone, Copy)]
struct Step {
    distance: f64,
    dt: f64,
    /// `None` when undefined (no elapsed time, real movement)
    speed: Option<f64>,
}

/// State threaded through the per-fix classification loop.
///
/// Holds the precomputed whole-track statistics (gaps, density, chord
/// residuals) plus the running state the sequential classifiers need:
/// the reference fix, the clean-fix history for drift prediction, and the
/// statuses assigned so far.
pub struct DetectionContext<'a> {
    points: &'a [GeoPoint],
    thresholds: Thresholds,
    tuning: &'a Tuning,
    max_speed_mps: f64,
    drift_threshold_m: f64,
    gap_threshold: f64,
    gap_before: Vec<bool>,
    density: DensityProfile,
    outlier: Vec<Option<f64>>,
    statuses: Vec<PointStatus>,
    reference: Option<usize>,
    ref_speed: Option<f64>,
    step: Option<Step>,
    clean: VecDeque<usize>,
    drift_run: usize,
}

impl<'a> DetectionContext<'a> {
    fn new(
        points: &'a [GeoPoint],
        options: &'a DiagnoseOptions,
        thresholds: Thresholds,
        gap_threshold: f64,
        cancel: &CancelToken,
    ) -> Result<Self, DiagnoseError> {
        let n = points.len();
        let tuning = &options.tuning;

        let gap_before: Vec<bool> = (0..n)
            .map(|i| i > 0 && points[i].timestamp - points[i - 1].timestamp > gap_threshold)
            .collect();

        // Runs break at gaps and at steps longer than maxJump, so neither the
        // density index nor the chord residuals look across a discontinuity
        let mut runs = Vec::with_capacity(n);
        let mut run = 0;
        for (i, &gap) in gap_before.iter().enumerate() {
            if gap || (i > 0 && haversine_distance(&points[i - 1], &points[i]) > thresholds.max_jump) {
                run += 1;
            }
            runs.push(run);
        }

        let fixes: Vec<Fix> = points.iter().map(|p| (p.lat, p.lon, p.timestamp)).collect();
        let mut residuals = Vec::with_capacity(n);
        let mut start = 0;
        for end in 1..=n {
            if end == n || runs[end] != runs[start] {
                residuals.extend(chord_residuals(&fixes[start..end], tuning.outlier_neighbors));
                start = end;
            }
        }
        let outlier = outlier_scores(&residuals, tuning);
        let density = density_profile(points, &runs, tuning, cancel)?;

        Ok(Self {
            points,
            thresholds,
            tuning,
            max_speed_mps: thresholds.max_speed_mps(),
            drift_threshold_m: degrees_to_meters(thresholds.drift_threshold),
            gap_threshold,
            gap_before,
            density,
            outlier,
            statuses: Vec::with_capacity(n),
            reference: None,
            ref_speed: None,
            step: None,
            clean: VecDeque::with_capacity(tuning.drift_history + 1),
            drift_run: 0,
        })
    }

    fn step_from(&self, from: usize, to: usize) -> Step {
        let (a, b) = (&self.points[from], &self.points[to]);
        let distance = haversine_distance(a, b);
        let dt = b.timestamp - a.timestamp;
        Step {
            distance,
            dt,
            speed: speed_over(distance, dt),
        }
    }

    /// True if `to` is a plausible position seen from `from`.
    fn consistent(&self, from: usize, to: usize) -> bool {
        matches!(self.step_from(from, to).speed, Some(v) if v <= self.max_speed_mps)
    }

    /// Mean (east, north) velocity of the clean history.
    fn predicted_velocity(&self) -> Option<(f64, f64)> {
        let mut sum = (0.0, 0.0);
        let mut samples = 0;
        for v in self.clean.iter().filter_map(|&i| velocity_of(&self.points[i])) {
            sum.0 += v.0;
            sum.1 += v.1;
            samples += 1;
        }
        (samples > 0).then(|| (sum.0 / samples as f64, sum.1 / samples as f64))
    }

    /// True when the fix at `pos` starts a new, sustained motion.
    ///
    /// The fix's own velocity must differ from the prediction, and the
    /// successor's velocity must sit closer to the fix's than to the
    /// prediction (by at least half).
    fn manoeuvre_at(&self, pos: usize) -> bool {
        let next = pos + 1;
        if self.clean.len() < 2 || next >= self.points.len() || self.gap_before[next] {
            return false;
        }
        let (Some(predicted), Some(own), Some(following)) = (
            self.predicted_velocity(),
            velocity_of(&self.points[pos]),
            velocity_of(&self.points[next]),
        ) else {
            return false;
        };
        let own_error = (following.0 - own.0).hypot(following.1 - own.1);
        let predicted_error = (following.0 - predicted.0).hypot(following.1 - predicted.1);
        2.0 * own_error < predicted_error
    }

    /// Deviation (east, north meters) of the fix at `pos` from the position
    /// predicted by the clean history.
    fn drift_deviation(&self, pos: usize) -> Option<(f64, f64)> {
        if self.clean.len() < 2 {
            return None;
        }
        let anchor = &self.points[*self.clean.back()?];
        let (vx, vy) = self.predicted_velocity()?;

        let target = &self.points[pos];
        let dt = target.timestamp - anchor.timestamp;
        let (x, y) = LocalFrame::new(anchor.lat, anchor.lon).project(target.lat, target.lon);
        Some((x - vx * dt, y - vy * dt))
    }

    fn classify(&self, pos: usize) -> (PointStatus, Option<Severity>) {
        DetectorKind::PRECEDENCE
            .iter()
            .find_map(|kind| kind.classify(pos, self))
            .map_or((PointStatus::Normal, None), |(status, severity)| (status, Some(severity)))
    }

    /// Record the status of `pos` and advance the running state.
    fn accept(&mut self, pos: usize, status: PointStatus) {
        let restart_prediction = status == PointStatus::Normal && self.manoeuvre_at(pos);
        self.statuses.push(status);

        match status {
            PointStatus::Jump | PointStatus::SpeedAnomaly => {
                let reference = self.reference.unwrap_or(pos);
                let next = pos + 1;
                let spike = next >= self.points.len()
                    || self.gap_before[next]
                    || self.consistent(reference, next);
                if !spike {
                    self.reference = Some(pos);
                    self.ref_speed = self.step.and_then(|s| s.speed).filter(|_| status != PointStatus::Jump);
                    if status == PointStatus::Jump {
                        self.clean.clear();
                    }
                }
            }
            PointStatus::Missing => {
                self.reference = Some(pos);
                self.ref_speed = None;
                self.clean.clear();
            }
            _ => {
                self.reference = Some(pos);
                self.ref_speed = match self.step {
                    Some(s) => s.speed,
                    None => self.points[pos].speed,
                };
            }
        }

        if status == PointStatus::Drift {
            self.drift_run += 1;
        } else {
            if self.drift_run >= self.tuning.drift_max_run {
                // Long drift is the new normal; predict from here on
                self.clean.clear();
            }
            self.drift_run = 0;
        }

        if status == PointStatus::Normal {
            if restart_prediction {
                self.clean.clear();
            }
            self.clean.push_back(pos);
            if self.clean.len() > self.tuning.drift_history {
                self.clean.pop_front();
            }
        }
    }
}

// =============================================================================
// Detection
// =============================================================================

/// Output of [`detect_anomalies`].
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionReport {
    /// One annotation per input fix, in input order
    pub points: Vec<AnnotatedPoint>,
    /// Every gap, in time order
    pub gaps: Vec<GapSpan>,
    pub anomalies: Vec<Anomaly>,
    pub info: AlgorithmInfo,
    pub normal_points: usize,
    pub anomaly_points: usize,
    /// Median positive sampling interval (seconds)
    pub median_interval: f64,
    /// Interval above which a gap is recorded (seconds)
    pub gap_threshold: f64,
}

/// Classify every fix and group the results into anomalies.
///
/// `points` must have kinematics derived (see
/// [`derive_kinematics`](crate::derive_kinematics)); `options` should be
/// sanitized.
///
/// # Example
///
/// ```rust
/// use trajectory_doctor::{detect_anomalies, derive_kinematics, CancelToken, DiagnoseOptions, GeoPoint, PointStatus};
///
/// let mut track: Vec<GeoPoint> = (0..30)
///     .map(|i| GeoPoint::new(i, 22.5431 + i as f64 * 0.0001, 113.9510, 1_705_318_200.0 + i as f64 * 3.0))
///     .collect();
/// track[15].lat = 40.0;
/// track[15].lon = -70.0;
/// derive_kinematics(&mut track);
///
/// let report = detect_anomalies(track, &DiagnoseOptions::default(), &CancelToken::new()).unwrap();
/// assert_eq!(report.points[15].status, PointStatus::Jump);
/// assert_eq!(report.points[16].status, PointStatus::Normal);
/// ```
pub fn detect_anomalies(
    points: Vec<GeoPoint>,
    options: &DiagnoseOptions,
    cancel: &CancelToken,
) -> Result<DetectionReport, DiagnoseError> {
    let n = points.len();
    let intervals: Vec<f64> = points
        .windows(2)
        .map(|w| w[1].timestamp - w[0].timestamp)
        .filter(|dt| *dt > 0.0)
        .collect();
    let median_interval = median(&intervals).unwrap_or(1.0);
    let gap_threshold = (median_interval * options.tuning.gap_multiplier).max(options.tuning.min_gap_seconds);
    let thresholds = options.thresholds.effective_for(&points);
    if options.thresholds.adaptive {
        debug!(
            "[Detector] adaptive thresholds: maxSpeed {:.1} -> {:.1} km/h, maxJump {:.1} -> {:.1} m",
            options.thresholds.max_speed, thresholds.max_speed, options.thresholds.max_jump, thresholds.max_jump
        );
    }

    let mut ctx = DetectionContext::new(&points, options, thresholds, gap_threshold, cancel)?;
    let mut severities: Vec<Option<Severity>> = Vec::with_capacity(n);

    for pos in 0..n {
        cancel.check_every(pos)?;
        ctx.step = ctx.reference.map(|r| ctx.step_from(r, pos));
        let (status, severity) = ctx.classify(pos);
        ctx.accept(pos, status);
        severities.push(severity);
    }

    let gaps: Vec<GapSpan> = (1..n)
        .filter(|&i| ctx.gap_before[i])
        .map(|i| {
            let (a, b) = (&points[i - 1], &points[i]);
            GapSpan {
                start_index: a.index,
                end_index: b.index,
                start_time: a.timestamp,
                end_time: b.timestamp,
                duration_seconds: b.timestamp - a.timestamp,
                distance_meters: haversine_distance(a, b),
                filled: false,
                inserted_points: 0,
                unfilled_reason: None,
            }
        })
        .collect();

    let density_radius = ctx.density.radius_m;
    let statuses = std::mem::take(&mut ctx.statuses);
    drop(ctx);

    let annotated: Vec<AnnotatedPoint> = points
        .into_iter()
        .zip(statuses)
        .zip(severities)
        .map(|((p, status), severity)| {
            let mut a = AnnotatedPoint::new(p);
            a.status = status;
            a.severity = severity;
            a
        })
        .collect();

    let anomalies = group_anomalies(&annotated, &gaps);
    let anomaly_points = annotated.iter().filter(|p| p.status.is_anomaly()).count();
    let normal_points = n - anomaly_points;

    let precedence: Vec<&str> = DetectorKind::PRECEDENCE.iter().map(|k| k.status().as_str()).collect();
    let info = AlgorithmInfo::new(
        "anomaly_detector",
        "Classifies each point by precedence: missing, jump, speed, acceleration, density, drift, outlier",
        n,
    )
    .with_param("maxSpeed", options.thresholds.max_speed)
    .with_param("maxAcceleration", options.thresholds.max_acceleration)
    .with_param("maxJump", options.thresholds.max_jump)
    .with_param("driftThreshold", options.thresholds.drift_threshold)
    .with_param("adaptiveThresholds", options.thresholds.adaptive)
    .with_param("effectiveMaxSpeed", thresholds.max_speed)
    .with_param("effectiveMaxJump", thresholds.max_jump)
    .with_param("medianIntervalSeconds", median_interval)
    .with_param("gapThresholdSeconds", gap_threshold)
    .with_param("densityRadiusMeters", density_radius)
    .with_param("outlierZCutoff", options.tuning.outlier_z_cutoff)
    .with_param("precedence", precedence.join(",").as_str());

    debug!(
        "[Detector] {} points: {} normal, {} anomalies in {} groups, {} gaps (threshold {:.1}s)",
        n,
        normal_points,
        anomaly_points,
        anomalies.len(),
        gaps.len(),
        gap_threshold
    );

    Ok(DetectionReport {
        points: annotated,
        gaps,
        anomalies,
        info,
        normal_points,
        anomaly_points,
        median_interval,
        gap_threshold,
    })
}

/// Group annotated fixes by status into [`Anomaly`] records.
pub fn group_anomalies(points: &[AnnotatedPoint], gaps: &[GapSpan]) -> Vec<Anomaly> {
    PointStatus::ALL
        .iter()
        .filter(|s| s.is_anomaly())
        .filter_map(|&kind| {
            let members: Vec<&AnnotatedPoint> = points.iter().filter(|p| p.status == kind).collect();
            if members.is_empty() {
                return None;
            }
            let severity = members
                .iter()
                .filter_map(|p| p.severity)
                .max()
                .unwrap_or(Severity::Low);
            Some(Anomaly {
                kind,
                description: describe(kind).to_string(),
                severity,
                count: members.len(),
                indices: members.iter().map(|p| p.index()).collect(),
                gaps: if kind == PointStatus::Missing { gaps.to_vec() } else { Vec::new() },
            })
        })
        .collect()
}

fn describe(kind: PointStatus) -> &'static str {
    match kind {
        PointStatus::Drift => "GPS position drift detected",
        PointStatus::Jump => "Position jump detected",
        PointStatus::SpeedAnomaly => "Abnormal speed detected",
        PointStatus::AccelerationAnomaly => "Abnormal acceleration detected",
        PointStatus::Missing => "Missing data segment",
        PointStatus::DensityAnomaly => "Abnormal point density detected",
        PointStatus::Outlier => "Statistical outlier detected",
        PointStatus::Normal | PointStatus::Interpolated => "",
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kinematics::derive_kinematics;
    use crate::ParamValue;

    const T0: f64 = 1_705_318_200.0;
    const LAT0: f64 = 22.5431;
    const LON0: f64 = 113.9510;

    /// Northbound track, 0.0001° (~11 m) per fix.
    fn track(n: usize, cadence: f64) -> Vec<GeoPoint> {
        (0..n)
            .map(|i| GeoPoint::new(i, LAT0 + i as f64 * 0.0001, LON0, T0 + i as f64 * cadence))
            .collect()
    }

    fn detect(mut points: Vec<GeoPoint>) -> DetectionReport {
        derive_kinematics(&mut points);
        detect_anomalies(points, &DiagnoseOptions::default(), &CancelToken::new()).unwrap()
    }

    fn statuses(report: &DetectionReport) -> Vec<PointStatus> {
        report.points.iter().map(|p| p.status).collect()
    }

    /// Longitude offset for `meters` east at the test latitude.
    fn east(meters: f64) -> f64 {
        meters / (degrees_to_meters(1.0) * LAT0.to_radians().cos())
    }

    #[test]
    fn test_clean_track_is_all_normal() {
        let report = detect(track(50, 3.0));
        assert!(statuses(&report).iter().all(|s| *s == PointStatus::Normal));
        assert!(report.anomalies.is_empty());
        assert_eq!(report.normal_points, 50);
        assert!((report.median_interval - 3.0).abs() < 1e-9);
        assert_eq!(report.gap_threshold, 15.0);
    }

    #[test]
    fn test_continental_jump_flagged_once() {
        let mut pts = track(40, 1.0);
        pts[20].lat = 40.0;
        pts[20].lon = -70.0;
        let report = detect(pts);

        assert_eq!(report.points[20].status, PointStatus::Jump);
        assert_eq!(report.points[20].severity, Some(Severity::High));
        assert_eq!(report.anomaly_points, 1);
        assert_eq!(report.points[21].status, PointStatus::Normal);

        let jump = &report.anomalies[0];
        assert_eq!(jump.kind, PointStatus::Jump);
        assert_eq!(jump.indices, vec![20]);
        assert_eq!(jump.severity, Severity::High);
    }

    #[test]
    fn test_two_point_continental_jump() {
        let pts = vec![GeoPoint::new(0, LAT0, LON0, T0), GeoPoint::new(1, 40.0, -70.0, T0 + 1.0)];
        let report = detect(pts);
        assert_eq!(report.points[0].status, PointStatus::Normal);
        assert_eq!(report.points[1].status, PointStatus::Jump);
        assert_eq!(report.points[1].severity, Some(Severity::High));
    }

    #[test]
    fn test_relocation_reanchors_reference() {
        // Everything from index 15 on is 5 km further north
        let mut pts = track(30, 1.0);
        for p in pts.iter_mut().skip(15) {
            p.lat += 0.045;
        }
        let report = detect(pts);
        assert_eq!(report.points[15].status, PointStatus::Jump);
        assert!(report.points[16..].iter().all(|p| p.status == PointStatus::Normal));
    }

    #[test]
    fn test_undefined_speed_is_high_jump() {
        let mut pts = track(10, 1.0);
        pts[5].timestamp = pts[4].timestamp;
        for p in pts.iter_mut().skip(6) {
            p.timestamp -= 1.0;
        }
        let report = detect(pts);
        assert_eq!(report.points[5].status, PointStatus::Jump);
        assert_eq!(report.points[5].severity, Some(Severity::High));
    }

    #[test]
    fn test_speed_spike_flagged_once() {
        // 200 m sideways in one second: not a jump, far too fast
        let mut pts = track(30, 1.0);
        pts[10].lon += east(200.0);
        let report = detect(pts);
        assert_eq!(report.points[10].status, PointStatus::SpeedAnomaly);
        assert_eq!(report.points[10].severity, Some(Severity::High));
        assert_eq!(report.points[11].status, PointStatus::Normal);
        assert_eq!(report.anomaly_points, 1);
    }

    #[test]
    fn test_gap_recorded_as_missing() {
        let mut pts = track(60, 3.0);
        for p in pts.iter_mut().skip(30) {
            p.timestamp += 400.0 - 3.0;
        }
        let report = detect(pts);

        assert_eq!(report.points[30].status, PointStatus::Missing);
        assert_eq!(report.gaps.len(), 1);
        let gap = &report.gaps[0];
        assert_eq!((gap.start_index, gap.end_index), (29, 30));
        assert!((gap.duration_seconds - 400.0).abs() < 1e-9);
        assert!(!gap.filled);

        let missing = report.anomalies.iter().find(|a| a.kind == PointStatus::Missing).unwrap();
        assert_eq!(missing.gaps.len(), 1);
        assert_eq!(missing.severity, Severity::High);
    }

    #[test]
    fn test_sustained_offset_is_drift() {
        let mut pts = track(50, 3.0);
        for p in &mut pts[20..28] {
            p.lon += east(20.0);
        }
        let report = detect(pts);
        let s = statuses(&report);
        assert!(s[20..28].iter().all(|s| *s == PointStatus::Drift), "{:?}", &s[18..30]);
        assert_eq!(s[28], PointStatus::Normal);
        assert_eq!(report.anomaly_points, 8);
    }

    #[test]
    fn test_single_offset_is_outlier() {
        let mut pts = track(50, 3.0);
        pts[25].lon += east(60.0);
        let report = detect(pts);
        assert_eq!(report.points[25].status, PointStatus::Outlier);
        assert_eq!(report.anomaly_points, 1);
    }

    #[test]
    fn test_duplicate_fix_is_density_anomaly() {
        let mut pts = track(30, 1.0);
        pts[12].lat = pts[11].lat;
        pts[12].timestamp = pts[11].timestamp;
        for p in pts.iter_mut().skip(13) {
            p.lat -= 0.0001;
            p.timestamp -= 1.0;
        }
        let report = detect(pts);
        assert_eq!(report.points[12].status, PointStatus::DensityAnomaly);
        assert_eq!(report.points[12].severity, Some(Severity::Low));
    }

    #[test]
    fn test_accounting_and_exclusivity() {
        let mut pts = track(80, 1.0);
        pts[10].lat = 40.0;
        pts[30].lon += east(200.0);
        for p in pts.iter_mut().skip(50) {
            p.timestamp += 100.0;
        }
        let report = detect(pts);

        assert_eq!(report.normal_points + report.anomaly_points, 80);
        let mut seen = std::collections::HashSet::new();
        for anomaly in &report.anomalies {
            assert_eq!(anomaly.count, anomaly.indices.len());
            for idx in &anomaly.indices {
                assert!(seen.insert(*idx), "index {} in two anomalies", idx);
            }
        }
        assert_eq!(seen.len(), report.anomaly_points);
        assert_eq!(report.info.name, "anomaly_detector");
        assert!(report.info.is_consistent());
    }

    #[test]
    fn test_right_angle_turn_is_normal() {
        // 15 m/s at 1 Hz: north for 30 s, then east
        let step = 15.0 / degrees_to_meters(1.0);
        let mut pts: Vec<GeoPoint> = (0..30)
            .map(|i| GeoPoint::new(i, LAT0 + i as f64 * step, LON0, T0 + i as f64))
            .collect();
        let corner = pts[29].lat;
        pts.extend((1..=30).map(|j| GeoPoint::new(29 + j, corner, LON0 + east(15.0 * j as f64), T0 + (29 + j) as f64)));

        let report = detect(pts);
        assert!(report.anomalies.is_empty(), "{:?}", statuses(&report));
        assert_eq!(report.normal_points, 60);
    }

    #[test]
    fn test_clean_curve_is_normal() {
        // Radius 40 m at 0.15 rad/s (6 m/s), counter-clockwise
        let frame = LocalFrame::new(LAT0, LON0);
        let pts: Vec<GeoPoint> = (0..20)
            .map(|i| {
                let theta = 0.15 * i as f64;
                let (lat, lon) = frame.unproject(40.0 * theta.cos(), 40.0 * theta.sin());
                GeoPoint::new(i, lat, lon, T0 + i as f64)
            })
            .collect();

        let report = detect(pts);
        assert!(report.anomalies.is_empty(), "{:?}", statuses(&report));
    }

    #[test]
    fn test_turn_does_not_hide_drift_after_it() {
        let step = 15.0 / degrees_to_meters(1.0);
        let mut pts: Vec<GeoPoint> = (0..30)
            .map(|i| GeoPoint::new(i, LAT0 + i as f64 * step, LON0, T0 + i as f64))
            .collect();
        let corner = pts[29].lat;
        pts.extend((1..=40).map(|j| GeoPoint::new(29 + j, corner, LON0 + east(15.0 * j as f64), T0 + (29 + j) as f64)));
        // 20 m north of the eastbound leg for eight fixes
        for p in &mut pts[50..58] {
            p.lat += 20.0 / degrees_to_meters(1.0);
        }

        let report = detect(pts);
        let s = statuses(&report);
        assert!(s[..50].iter().all(|s| *s == PointStatus::Normal), "{:?}", &s[..50]);
        assert!(s[51..58].iter().all(|s| *s != PointStatus::Normal), "{:?}", &s[48..60]);
    }

    #[test]
    fn test_adaptive_thresholds_tighten_speed() {
        // 25 m sideways on an ~13 km/h walk: fine at 120 km/h, not at 1.5 x p95
        let mut pts = track(50, 3.0);
        pts[10].lon += east(25.0);
        derive_kinematics(&mut pts);

        let fixed = detect_anomalies(pts.clone(), &DiagnoseOptions::default(), &CancelToken::new()).unwrap();
        assert_ne!(fixed.points[10].status, PointStatus::SpeedAnomaly);
        assert_eq!(fixed.info.parameters["adaptiveThresholds"], ParamValue::Bool(false));

        let mut options = DiagnoseOptions::default();
        options.thresholds.adaptive = true;
        let report = detect_anomalies(pts, &options, &CancelToken::new()).unwrap();
        assert_eq!(report.points[10].status, PointStatus::SpeedAnomaly);
        assert_eq!(report.points[11].status, PointStatus::Normal);
        assert_eq!(report.info.parameters["maxSpeed"], ParamValue::Float(120.0));
        let ParamValue::Float(effective) = report.info.parameters["effectiveMaxSpeed"] else {
            panic!("effectiveMaxSpeed is not a float");
        };
        assert!((effective - 20.0).abs() < 0.1, "{}", effective);
    }

    #[test]
    fn test_cancelled_detection() {
        let mut pts = track(10, 1.0);
        derive_kinematics(&mut pts);
        let token = CancelToken::new();
        token.cancel();
        let result = detect_anomalies(pts, &DiagnoseOptions::default(), &token);
        assert_eq!(result.unwrap_err(), DiagnoseError::Cancelled);
    }
}
