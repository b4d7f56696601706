//! Gap filling with natural cubic splines over time.
//!
//! For every gap the detector recorded, latitude, longitude and (when all
//! control points carry it) elevation are each fitted as a function of time
//! through up to `spline_control_points` corrected fixes on each side of the
//! gap. New fixes are placed evenly inside the gap at the local sampling
//! cadence. With too few control points the gap is filled linearly.

use log::debug;

use crate::cancel::CancelToken;
use crate::config::Tuning;
use crate::error::DiagnoseError;
use crate::geo_utils::{normalize_lon, wrap_lon_delta};
use crate::robust::median;
use crate::{AlgorithmInfo, AnnotatedPoint, GapSpan, GeoPoint, MAX_POINTS};

// =============================================================================
// Natural Cubic Spline
// =============================================================================

/// Interpolating cubic spline with zero second derivative at both ends.
#[derive(Debug, Clone, PartialEq)]
pub struct NaturalSpline {
    xs: Vec<f64>,
    ys: Vec<f64>,
    /// Second derivative at each knot
    m: Vec<f64>,
}

impl NaturalSpline {
    /// Fit through `(xs[i], ys[i])`.
    ///
    /// Returns `None` with fewer than two knots, mismatched lengths or
    /// knots that are not strictly increasing.
    pub fn fit(xs: &[f64], ys: &[f64]) -> Option<Self> {
        let n = xs.len();
        if n < 2 || ys.len() != n || xs.windows(2).any(|w| w[1] <= w[0]) {
            return None;
        }

        let mut m = vec![0.0; n];
        if n > 2 {
            // Tridiagonal system for the interior second derivatives (Thomas algorithm)
            let h: Vec<f64> = xs.windows(2).map(|w| w[1] - w[0]).collect();
            let size = n - 2;
            let mut diag = vec![0.0; size];
            let mut upper = vec![0.0; size];
            let mut rhs = vec![0.0; size];
            for k in 0..size {
                let i = k + 1;
                diag[k] = 2.0 * (h[i - 1] + h[i]);
                upper[k] = h[i];
                rhs[k] = 6.0 * ((ys[i + 1] - ys[i]) / h[i] - (ys[i] - ys[i - 1]) / h[i - 1]);
            }
            for k in 1..size {
                let lower = h[k];
                let w = lower / diag[k - 1];
                diag[k] -= w * upper[k - 1];
                rhs[k] -= w * rhs[k - 1];
            }
            m[size] = rhs[size - 1] / diag[size - 1];
            for k in (0..size - 1).rev() {
                m[k + 1] = (rhs[k] - upper[k] * m[k + 2]) / diag[k];
            }
        }

        Some(Self {
            xs: xs.to_vec(),
            ys: ys.to_vec(),
            m,
        })
    }

    /// Evaluate at `x`. Outside the knot range the end segments are extended.
    pub fn eval(&self, x: f64) -> f64 {
        let last = self.xs.len() - 2;
        let j = self.xs[1..].partition_point(|&k| k < x).min(last);
        let (x0, x1) = (self.xs[j], self.xs[j + 1]);
        let (y0, y1) = (self.ys[j], self.ys[j + 1]);
        let (m0, m1) = (self.m[j], self.m[j + 1]);
        let h = x1 - x0;
        let (a, b) = (x1 - x, x - x0);

        m0 * a.powi(3) / (6.0 * h) + m1 * b.powi(3) / (6.0 * h) + (y0 / h - m0 * h / 6.0) * a + (y1 / h - m1 * h / 6.0) * b
    }
}

// =============================================================================
// Gap Filling
// =============================================================================

/// Control fixes around one gap, in time order, relative to the gap start.
struct Controls {
    t: Vec<f64>,
    lat: Vec<f64>,
    /// Longitude offsets from the gap start, unwrapped across the antimeridian
    lon: Vec<f64>,
    elevation: Option<Vec<f64>>,
    before: usize,
    after: usize,
}

impl Controls {
    fn gather(points: &[AnnotatedPoint], start: usize, per_side: usize) -> Self {
        let anchor = &points[start];
        let (t0, lon0) = (anchor.timestamp(), anchor.corrected_lon);

        let mut left: Vec<&AnnotatedPoint> = Vec::with_capacity(per_side);
        for p in points[..=start].iter().rev() {
            if left.len() == per_side {
                break;
            }
            if left.last().map_or(true, |q| p.timestamp() < q.timestamp()) {
                left.push(p);
            }
        }
        left.reverse();

        let mut right: Vec<&AnnotatedPoint> = Vec::with_capacity(per_side);
        for p in &points[start + 1..] {
            if right.len() == per_side {
                break;
            }
            if right.last().map_or(true, |q| p.timestamp() > q.timestamp()) {
                right.push(p);
            }
        }

        let all: Vec<&AnnotatedPoint> = left.iter().chain(right.iter()).copied().collect();
        let elevation = all.iter().map(|p| p.point.elevation).collect::<Option<Vec<f64>>>();

        Self {
            t: all.iter().map(|p| p.timestamp() - t0).collect(),
            lat: all.iter().map(|p| p.corrected_lat).collect(),
            lon: all.iter().map(|p| wrap_lon_delta(p.corrected_lon - lon0)).collect(),
            elevation,
            before: left.len(),
            after: right.len(),
        }
    }

    /// Median positive interval among the control fixes on either side.
    fn cadence(&self) -> Option<f64> {
        let gap_step = self.before.saturating_sub(1);
        let intervals: Vec<f64> = self
            .t
            .windows(2)
            .enumerate()
            .filter(|(k, _)| *k != gap_step)
            .map(|(_, w)| w[1] - w[0])
            .filter(|dt| *dt > 0.0)
            .collect();
        median(&intervals)
    }
}

/// Fitted curves for one gap.
enum Fill {
    Cubic {
        lat: NaturalSpline,
        lon: NaturalSpline,
        elevation: Option<NaturalSpline>,
    },
    Linear,
}

/// Fill recorded gaps with interpolated fixes.
///
/// Gaps longer than `max_fill_seconds`, or whose fill would push the
/// sequence past [`MAX_POINTS`], are left unfilled with a reason. New fixes
/// are tagged `interpolated` and indexed upward from the highest existing
/// index.
pub fn interpolate_gaps(
    points: Vec<AnnotatedPoint>,
    gaps: Vec<GapSpan>,
    median_interval: f64,
    tuning: &Tuning,
    cancel: &CancelToken,
) -> Result<(Vec<AnnotatedPoint>, Vec<GapSpan>, AlgorithmInfo), DiagnoseError> {
    fill_gaps(points, gaps, median_interval, tuning, cancel, MAX_POINTS)
}

fn fill_gaps(
    points: Vec<AnnotatedPoint>,
    mut gaps: Vec<GapSpan>,
    median_interval: f64,
    tuning: &Tuning,
    cancel: &CancelToken,
    point_limit: usize,
) -> Result<(Vec<AnnotatedPoint>, Vec<GapSpan>, AlgorithmInfo), DiagnoseError> {
    let n = points.len();
    let mut info = AlgorithmInfo::new(
        "spline_interpolation",
        "Fills missing segments with natural cubic splines over time",
        n,
    )
    .with_param("maxFillSeconds", tuning.max_fill_seconds)
    .with_param("controlPoints", tuning.spline_control_points)
    .with_param("medianIntervalSeconds", median_interval);

    let mut next_index = points.iter().map(|p| p.index() + 1).max().unwrap_or(0);
    let mut total = n;
    // (position of the fix before the gap, fixes to insert after it)
    let mut inserts: Vec<(usize, Vec<AnnotatedPoint>)> = Vec::new();
    let mut linear_fills = 0;

    for (iteration, gap) in gaps.iter_mut().enumerate() {
        cancel.check_every(iteration)?;

        if gap.duration_seconds > tuning.max_fill_seconds {
            gap.unfilled_reason = Some(format!(
                "gap of {:.0}s exceeds the {:.0}s fill limit",
                gap.duration_seconds, tuning.max_fill_seconds
            ));
            continue;
        }
        let Ok(start) = points.binary_search_by_key(&gap.start_index, |p| p.index()) else {
            gap.unfilled_reason = Some("gap boundary no longer in the sequence".to_string());
            continue;
        };
        if start + 1 >= n {
            gap.unfilled_reason = Some("gap boundary no longer in the sequence".to_string());
            continue;
        }

        let controls = Controls::gather(&points, start, tuning.spline_control_points.max(1));
        let cadence = controls.cadence().unwrap_or(median_interval).max(f64::EPSILON);
        let steps = (gap.duration_seconds / cadence).ceil() as usize;
        let count = steps.saturating_sub(1);
        if count == 0 {
            gap.unfilled_reason = Some("gap shorter than two sampling intervals".to_string());
            continue;
        }
        if total + count > point_limit {
            gap.unfilled_reason = Some(format!("filling would exceed the {} point limit", point_limit));
            continue;
        }

        let cubic_ready = controls.before >= tuning.spline_control_points && controls.after >= tuning.spline_control_points;
        let fill = match (
            cubic_ready,
            NaturalSpline::fit(&controls.t, &controls.lat),
            NaturalSpline::fit(&controls.t, &controls.lon),
        ) {
            (true, Some(lat), Some(lon)) => Fill::Cubic {
                lat,
                lon,
                elevation: controls.elevation.as_ref().and_then(|e| NaturalSpline::fit(&controls.t, e)),
            },
            _ => Fill::Linear,
        };

        let (a, b) = (&points[start], &points[start + 1]);
        let lon0 = a.corrected_lon;
        let dlon = wrap_lon_delta(b.corrected_lon - lon0);
        let linear = |frac: f64| -> (f64, f64, Option<f64>) {
            let elevation = match (a.point.elevation, b.point.elevation) {
                (Some(ea), Some(eb)) => Some(ea + (eb - ea) * frac),
                _ => None,
            };
            (a.corrected_lat + (b.corrected_lat - a.corrected_lat) * frac, dlon * frac, elevation)
        };

        let span = gap.duration_seconds;
        let mut generated = Vec::with_capacity(count);
        let mut used_linear = matches!(fill, Fill::Linear);
        for k in 1..=count {
            let frac = k as f64 / (count + 1) as f64;
            let dt = span * frac;
            let (lat, lon_offset, elevation) = match &fill {
                Fill::Cubic { lat, lon, elevation } => {
                    let sample = (lat.eval(dt), lon.eval(dt), elevation.as_ref().map(|e| e.eval(dt)));
                    if sample.0.is_finite() && sample.1.is_finite() && (-90.0..=90.0).contains(&sample.0) {
                        sample
                    } else {
                        used_linear = true;
                        linear(frac)
                    }
                }
                Fill::Linear => linear(frac),
            };

            let mut p = GeoPoint::new(next_index, lat, normalize_lon(lon0 + lon_offset), a.timestamp() + dt);
            p.elevation = elevation;
            generated.push(AnnotatedPoint::interpolated(p));
            next_index += 1;
        }
        if used_linear {
            linear_fills += 1;
        }

        total += count;
        gap.filled = true;
        gap.inserted_points = count;
        gap.unfilled_reason = None;
        inserts.push((start, generated));
    }

    info.added_points = total - n;

    let mut out = Vec::with_capacity(total);
    let mut pending = inserts.into_iter().peekable();
    for (pos, p) in points.into_iter().enumerate() {
        out.push(p);
        if pending.peek().is_some_and(|(at, _)| *at == pos) {
            if let Some((_, generated)) = pending.next() {
                out.extend(generated);
            }
        }
    }

    let unfilled = gaps.iter().filter(|g| !g.filled).count();
    debug!(
        "[SplineInterpolation] {} gaps: {} filled ({} linear), {} unfilled, {} points added",
        gaps.len(),
        gaps.len() - unfilled,
        linear_fills,
        unfilled,
        info.added_points
    );
    Ok((out, gaps, info))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo_utils::haversine_deg;
    use crate::PointStatus;

    const T0: f64 = 1_705_318_200.0;

    fn approx_eq(a: f64, b: f64, epsilon: f64) -> bool {
        (a - b).abs() < epsilon
    }

    /// 3 s cadence with a gap of `gap` seconds after `split` fixes.
    /// `moving` keeps the receiver on its constant-velocity line through the gap.
    fn gapped(total: usize, split: usize, gap: f64, moving: bool) -> (Vec<AnnotatedPoint>, Vec<GapSpan>) {
        let step = 0.0001 / 3.0; // degrees per second
        let points: Vec<AnnotatedPoint> = (0..total)
            .map(|i| {
                let t = if i < split { i as f64 * 3.0 } else { (split - 1) as f64 * 3.0 + gap + (i - split) as f64 * 3.0 };
                let lat = if moving { 22.5 + t * step } else { 22.5 + i as f64 * 0.0001 };
                AnnotatedPoint::new(GeoPoint::new(i, lat, 113.9, T0 + t).with_elevation(10.0 + t * 0.01))
            })
            .collect();
        let (a, b) = (&points[split - 1], &points[split]);
        let gaps = vec![GapSpan {
            start_index: split - 1,
            end_index: split,
            start_time: a.timestamp(),
            end_time: b.timestamp(),
            duration_seconds: b.timestamp() - a.timestamp(),
            distance_meters: haversine_deg(a.corrected_lat, a.corrected_lon, b.corrected_lat, b.corrected_lon),
            filled: false,
            inserted_points: 0,
            unfilled_reason: None,
        }];
        (points, gaps)
    }

    #[test]
    fn test_spline_passes_through_knots() {
        let xs = [0.0, 1.0, 2.5, 4.0, 7.0];
        let ys = [1.0, 3.0, 2.0, -1.0, 0.5];
        let s = NaturalSpline::fit(&xs, &ys).unwrap();
        for (x, y) in xs.iter().zip(ys.iter()) {
            assert!(approx_eq(s.eval(*x), *y, 1e-9));
        }
    }

    #[test]
    fn test_spline_reproduces_a_line() {
        let xs = [0.0, 2.0, 3.0, 10.0, 11.0];
        let ys: Vec<f64> = xs.iter().map(|x| 4.0 - 0.5 * x).collect();
        let s = NaturalSpline::fit(&xs, &ys).unwrap();
        for x in [0.5, 5.0, 7.25, 10.9] {
            assert!(approx_eq(s.eval(x), 4.0 - 0.5 * x, 1e-9));
        }
    }

    #[test]
    fn test_spline_rejects_bad_knots() {
        assert!(NaturalSpline::fit(&[0.0], &[1.0]).is_none());
        assert!(NaturalSpline::fit(&[0.0, 0.0, 1.0], &[1.0, 2.0, 3.0]).is_none());
        assert!(NaturalSpline::fit(&[0.0, 1.0], &[1.0]).is_none());
    }

    #[test]
    fn test_fills_400s_gap_at_cadence() {
        let (points, gaps) = gapped(60, 30, 400.0, false);
        let (out, gaps, info) = interpolate_gaps(points, gaps, 3.0, &Tuning::default(), &CancelToken::new()).unwrap();

        // ceil(400 / 3) - 1
        assert_eq!(info.added_points, 133);
        assert_eq!(out.len(), 193);
        assert!(gaps[0].filled);
        assert_eq!(gaps[0].inserted_points, 133);

        let (t_start, t_end) = (gaps[0].start_time, gaps[0].end_time);
        let inserted: Vec<&AnnotatedPoint> = out.iter().filter(|p| p.status == PointStatus::Interpolated).collect();
        assert_eq!(inserted.len(), 133);
        for p in &inserted {
            assert!(p.timestamp() > t_start && p.timestamp() < t_end);
            assert!(p.index() >= 60);
        }
        assert!(out.windows(2).all(|w| w[1].timestamp() > w[0].timestamp()));
    }

    #[test]
    fn test_fill_follows_constant_motion() {
        let (points, gaps) = gapped(20, 10, 60.0, true);
        let (a, b) = (points[9].clone(), points[10].clone());
        let (out, _, _) = interpolate_gaps(points, gaps, 3.0, &Tuning::default(), &CancelToken::new()).unwrap();

        for p in out.iter().filter(|p| p.status == PointStatus::Interpolated) {
            let frac = (p.timestamp() - a.timestamp()) / (b.timestamp() - a.timestamp());
            let lat = a.corrected_lat + (b.corrected_lat - a.corrected_lat) * frac;
            assert!(haversine_deg(p.corrected_lat, p.corrected_lon, lat, 113.9) < 0.5);
            assert!(p.point.elevation.is_some());
        }
    }

    #[test]
    fn test_linear_fallback_with_few_controls() {
        let (points, gaps) = gapped(4, 2, 30.0, false);
        let (a, b) = (points[1].clone(), points[2].clone());
        let (out, gaps, _) = interpolate_gaps(points, gaps, 3.0, &Tuning::default(), &CancelToken::new()).unwrap();

        assert!(gaps[0].filled);
        let mid = &out[2 + gaps[0].inserted_points / 2];
        let frac = (mid.timestamp() - a.timestamp()) / (b.timestamp() - a.timestamp());
        let lat = a.corrected_lat + (b.corrected_lat - a.corrected_lat) * frac;
        assert!(approx_eq(mid.corrected_lat, lat, 1e-9));
    }

    #[test]
    fn test_long_gap_left_unfilled() {
        let (points, gaps) = gapped(40, 20, 700.0, false);
        let (out, gaps, info) = interpolate_gaps(points, gaps, 3.0, &Tuning::default(), &CancelToken::new()).unwrap();
        assert_eq!(out.len(), 40);
        assert!(!gaps[0].filled);
        assert!(gaps[0].unfilled_reason.as_deref().unwrap().contains("fill limit"));
        assert_eq!(info.added_points, 0);
    }

    #[test]
    fn test_point_limit_leaves_gap_unfilled() {
        let (points, gaps) = gapped(60, 30, 400.0, false);
        let (out, gaps, _) = fill_gaps(points, gaps, 3.0, &Tuning::default(), &CancelToken::new(), 100).unwrap();
        assert_eq!(out.len(), 60);
        assert!(gaps[0].unfilled_reason.as_deref().unwrap().contains("point limit"));
    }

    #[test]
    fn test_fill_across_antimeridian() {
        let points = vec![
            AnnotatedPoint::new(GeoPoint::new(0, 0.0, 179.9995, T0)),
            AnnotatedPoint::new(GeoPoint::new(1, 0.0, -179.9995, T0 + 20.0)),
        ];
        let gaps = vec![GapSpan {
            start_index: 0,
            end_index: 1,
            start_time: T0,
            end_time: T0 + 20.0,
            duration_seconds: 20.0,
            distance_meters: 111.0,
            filled: false,
            inserted_points: 0,
            unfilled_reason: None,
        }];
        let (out, _, _) = interpolate_gaps(points, gaps, 2.0, &Tuning::default(), &CancelToken::new()).unwrap();
        assert!(out.len() > 2);
        for p in &out {
            assert!(p.corrected_lon.abs() > 179.999);
        }
    }
}
