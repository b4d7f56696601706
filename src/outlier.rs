//! Statistical outliers.
//!
//! A fix's residual is its distance from where its neighbours say it
//! should be: for each symmetric neighbour pair `(i - j, i + j)` the chord
//! between them is interpolated at the fix's timestamp, and the residual is
//! the distance to the component-wise median of those predictions. Residuals
//! are scored with a robust z-score `(r - median) / (1.4826 · MAD)`.
//!
//! The same residuals drive the detector's `outlier` classifier (on raw
//! coordinates) and [`remove_outliers`] (on corrected coordinates, after
//! smoothing).

use log::debug;

use crate::cancel::CancelToken;
use crate::config::Tuning;
use crate::error::DiagnoseError;
use crate::geo_utils::{haversine_deg, normalize_lon, wrap_lon_delta};
use crate::robust::{median, robust_center_scale};
use crate::{AlgorithmInfo, AnnotatedPoint};

/// Smallest residual spread used for z-scores (meters).
pub const MIN_RESIDUAL_SCALE_M: f64 = 1.0;

/// Shortest sequence the remover works on.
pub const MIN_REMOVAL_POINTS: usize = 5;

/// `(lat, lon, timestamp)`
pub type Fix = (f64, f64, f64);

/// Residual of `target` against chords between neighbour pairs.
///
/// `None` when there are no pairs (sequence endpoints).
pub fn chord_residual(target: Fix, pairs: impl IntoIterator<Item = (Fix, Fix)>) -> Option<f64> {
    let mut lats = Vec::with_capacity(4);
    let mut lons = Vec::with_capacity(4);
    for (a, b) in pairs {
        let span = b.2 - a.2;
        let frac = if span > 0.0 { ((target.2 - a.2) / span).clamp(0.0, 1.0) } else { 0.5 };
        lats.push(a.0 + (b.0 - a.0) * frac);
        // Relative to the target so the median never straddles the antimeridian
        let lon_a = wrap_lon_delta(a.1 - target.1);
        let lon_b = lon_a + wrap_lon_delta(b.1 - a.1);
        lons.push(lon_a + (lon_b - lon_a) * frac);
    }

    let lat = median(&lats)?;
    let lon = normalize_lon(target.1 + median(&lons)?);
    Some(haversine_deg(target.0, target.1, lat, lon))
}

/// Residual of every fix in a sequence, using up to `k` pairs per fix.
pub fn chord_residuals(fixes: &[Fix], k: usize) -> Vec<Option<f64>> {
    let n = fixes.len();
    let residual_at = |i: usize| -> Option<f64> {
        let reach = k.min(i).min(n - 1 - i);
        chord_residual(fixes[i], (1..=reach).map(|j| (fixes[i - j], fixes[i + j])))
    };

    #[cfg(feature = "parallel")]
    let residuals: Vec<Option<f64>> = {
        use rayon::prelude::*;
        (0..n).into_par_iter().map(residual_at).collect()
    };

    #[cfg(not(feature = "parallel"))]
    let residuals: Vec<Option<f64>> = (0..n).map(residual_at).collect();

    residuals
}

/// Robust z-scores of residuals that qualify as outliers; `None` elsewhere.
///
/// A residual qualifies when its z-score exceeds `outlier_z_cutoff` and the
/// residual itself exceeds `outlier_min_deviation_m`.
pub fn outlier_scores(residuals: &[Option<f64>], tuning: &Tuning) -> Vec<Option<f64>> {
    let finite: Vec<f64> = residuals.iter().flatten().copied().collect();
    let Some((center, scale)) = robust_center_scale(&finite, MIN_RESIDUAL_SCALE_M) else {
        return vec![None; residuals.len()];
    };

    residuals
        .iter()
        .map(|r| {
            let r = (*r)?;
            let z = (r - center) / scale;
            (z > tuning.outlier_z_cutoff && r > tuning.outlier_min_deviation_m).then_some(z)
        })
        .collect()
}

/// Delete fixes whose corrected position is still inconsistent with their
/// neighbours.
///
/// Candidates are taken worst-first. Before each deletion the candidate's
/// residual is recomputed over the fixes that survive at that moment, so a
/// fix that only looked bad because of an already-deleted neighbour stays.
/// Endpoints are never deleted, so at least two fixes always remain.
pub fn remove_outliers(
    points: Vec<AnnotatedPoint>,
    tuning: &Tuning,
    cancel: &CancelToken,
) -> Result<(Vec<AnnotatedPoint>, AlgorithmInfo), DiagnoseError> {
    let n = points.len();
    let k = tuning.outlier_neighbors;
    let mut info = AlgorithmInfo::new(
        "outlier_removal",
        "Deletes points whose corrected position deviates from a robust local fit",
        n,
    )
    .with_param("zCutoff", tuning.outlier_z_cutoff)
    .with_param("minDeviationMeters", tuning.outlier_min_deviation_m)
    .with_param("neighbors", k);

    if n < MIN_REMOVAL_POINTS {
        return Ok((points, info));
    }

    let fixes: Vec<Fix> = points
        .iter()
        .map(|p| (p.corrected_lat, p.corrected_lon, p.timestamp()))
        .collect();
    let residuals = chord_residuals(&fixes, k);
    let finite: Vec<f64> = residuals.iter().flatten().copied().collect();
    let Some((center, scale)) = robust_center_scale(&finite, MIN_RESIDUAL_SCALE_M) else {
        return Ok((points, info));
    };
    let qualifies = |r: f64| (r - center) / scale > tuning.outlier_z_cutoff && r > tuning.outlier_min_deviation_m;

    let mut candidates: Vec<(usize, f64)> = residuals
        .iter()
        .enumerate()
        .filter(|&(pos, _)| pos != 0 && pos != n - 1)
        .filter_map(|(pos, r)| r.filter(|r| qualifies(*r)).map(|r| (pos, r)))
        .collect();
    candidates.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

    let mut removed = vec![false; n];
    let mut alive = n;

    for (iteration, &(pos, _)) in candidates.iter().enumerate() {
        cancel.check_every(iteration)?;
        let before = surviving_neighbours((0..pos).rev(), &removed, k);
        let after = surviving_neighbours(pos + 1..n, &removed, k);
        let current = chord_residual(
            fixes[pos],
            before.iter().zip(&after).map(|(&a, &b)| (fixes[a], fixes[b])),
        );
        if current.is_some_and(|r| qualifies(r)) && alive > 2 {
            removed[pos] = true;
            alive -= 1;
        }
    }

    let kept: Vec<AnnotatedPoint> = points
        .into_iter()
        .zip(removed.iter())
        .filter_map(|(p, gone)| (!gone).then_some(p))
        .collect();

    info.removed_points = n - kept.len();
    debug!(
        "[OutlierRemoval] {} candidates, removed {} of {} points",
        candidates.len(),
        info.removed_points,
        n
    );
    Ok((kept, info))
}

/// Up to `k` positions from `walk` that have not been removed, nearest first.
fn surviving_neighbours(walk: impl Iterator<Item = usize>, removed: &[bool], k: usize) -> Vec<usize> {
    walk.filter(|&i| !removed[i]).take(k).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GeoPoint;

    const T0: f64 = 1_705_318_200.0;

    fn annotated(coords: &[(f64, f64)]) -> Vec<AnnotatedPoint> {
        coords
            .iter()
            .enumerate()
            .map(|(i, (lat, lon))| AnnotatedPoint::new(GeoPoint::new(i, *lat, *lon, T0 + i as f64 * 3.0)))
            .collect()
    }

    fn straight(n: usize) -> Vec<(f64, f64)> {
        (0..n).map(|i| (22.5 + i as f64 * 0.0001, 113.9)).collect()
    }

    #[test]
    fn test_chord_residual_on_line_is_zero() {
        let r = chord_residual((0.0005, 0.0, 5.0), [((0.0004, 0.0, 4.0), (0.0006, 0.0, 6.0))]).unwrap();
        assert!(r < 1e-6);
        assert!(chord_residual((0.0, 0.0, 0.0), []).is_none());
    }

    #[test]
    fn test_chord_residual_across_antimeridian() {
        let r = chord_residual((0.0, 180.0, 5.0), [((0.0, 179.999, 4.0), (0.0, -179.999, 6.0))]).unwrap();
        assert!(r < 1.0);
    }

    #[test]
    fn test_scores_flag_single_spike() {
        let mut coords = straight(30);
        coords[15].1 += 0.001; // ~100 m east
        let fixes: Vec<Fix> = coords
            .iter()
            .enumerate()
            .map(|(i, (lat, lon))| (*lat, *lon, i as f64))
            .collect();
        let scores = outlier_scores(&chord_residuals(&fixes, 3), &Tuning::default());
        assert!(scores[15].is_some());
        assert_eq!(scores.iter().filter(|s| s.is_some()).count(), 1);
    }

    #[test]
    fn test_removes_spike_keeps_neighbours() {
        let mut coords = straight(30);
        coords[12].1 += 0.001;
        let points = annotated(&coords);
        let (kept, info) = remove_outliers(points, &Tuning::default(), &CancelToken::new()).unwrap();
        assert_eq!(kept.len(), 29);
        assert!(kept.iter().all(|p| p.index() != 12));
        assert_eq!(info.removed_points, 1);
        assert!(info.is_consistent());
    }

    #[test]
    fn test_adjacent_spikes_removed_without_cascade() {
        let mut coords = straight(40);
        coords[20].1 += 0.002;
        coords[21].1 += 0.002;
        let (kept, info) = remove_outliers(annotated(&coords), &Tuning::default(), &CancelToken::new()).unwrap();
        // Only the displaced pair goes; their clean neighbours stay
        assert_eq!(info.removed_points, 2);
        for idx in [18, 19, 22, 23] {
            assert!(kept.iter().any(|p| p.index() == idx));
        }
    }

    #[test]
    fn test_many_spikes_removed_in_one_pass() {
        let mut coords = straight(2000);
        for (i, c) in coords.iter_mut().enumerate() {
            if i % 10 == 5 {
                c.1 += 0.001;
            }
        }
        let (kept, info) = remove_outliers(annotated(&coords), &Tuning::default(), &CancelToken::new()).unwrap();
        assert_eq!(info.removed_points, 200);
        assert!(kept.iter().all(|p| p.index() % 10 != 5));
        assert_eq!(kept.len(), 1800);
    }

    #[test]
    fn test_endpoints_never_removed() {
        let mut coords = straight(10);
        coords[0].1 += 0.01;
        coords[9].1 += 0.01;
        let (kept, _) = remove_outliers(annotated(&coords), &Tuning::default(), &CancelToken::new()).unwrap();
        assert_eq!(kept.first().unwrap().index(), 0);
        assert_eq!(kept.last().unwrap().index(), 9);
    }

    #[test]
    fn test_short_sequence_untouched() {
        let coords = [(0.0, 0.0), (0.0, 1.0), (0.0, 0.0)];
        let (kept, info) = remove_outliers(annotated(&coords), &Tuning::default(), &CancelToken::new()).unwrap();
        assert_eq!(kept.len(), 3);
        assert_eq!(info.removed_points, 0);
    }
}
