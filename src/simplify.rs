//! Douglas-Peucker simplification with great-circle cross-track distance.
//!
//! Iterative (explicit stack) so long tracks cannot overflow the call
//! stack. The distance of a fix from a chord is measured on the sphere and
//! clamped to the chord, so `epsilon` is a true bound in meters anywhere on
//! the globe.

use log::debug;

use crate::cancel::CancelToken;
use crate::error::DiagnoseError;
use crate::geo_utils::cross_track_distance;
use crate::{AlgorithmInfo, AnnotatedPoint};

/// Which positions of `coords` (lat, lon) survive simplification.
///
/// Endpoints are always kept. A non-positive `epsilon` keeps everything.
pub fn douglas_peucker_mask(coords: &[(f64, f64)], epsilon: f64, cancel: &CancelToken) -> Result<Vec<bool>, DiagnoseError> {
    let n = coords.len();
    if n < 3 || epsilon <= 0.0 {
        return Ok(vec![true; n]);
    }

    let mut keep = vec![false; n];
    keep[0] = true;
    keep[n - 1] = true;

    let mut stack = vec![(0usize, n - 1)];
    let mut iteration = 0usize;
    while let Some((first, last)) = stack.pop() {
        if last <= first + 1 {
            continue;
        }
        let (a, b) = (coords[first], coords[last]);
        let mut worst = (first, 0.0_f64);
        for (i, &p) in coords.iter().enumerate().take(last).skip(first + 1) {
            cancel.check_every(iteration)?;
            iteration += 1;
            let d = cross_track_distance(p, a, b);
            if d > worst.1 {
                worst = (i, d);
            }
        }
        if worst.1 > epsilon {
            keep[worst.0] = true;
            stack.push((first, worst.0));
            stack.push((worst.0, last));
        }
    }

    Ok(keep)
}

/// Drop fixes that lie within `epsilon` meters of the simplified path.
pub fn simplify_trajectory(
    points: Vec<AnnotatedPoint>,
    epsilon: f64,
    cancel: &CancelToken,
) -> Result<(Vec<AnnotatedPoint>, AlgorithmInfo), DiagnoseError> {
    let n = points.len();
    let mut info = AlgorithmInfo::new(
        "douglas_peucker",
        "Removes points within epsilon meters of the simplified path",
        n,
    )
    .with_param("epsilonMeters", epsilon);

    let coords: Vec<(f64, f64)> = points.iter().map(|p| (p.corrected_lat, p.corrected_lon)).collect();
    let keep = douglas_peucker_mask(&coords, epsilon, cancel)?;

    let kept: Vec<AnnotatedPoint> = points
        .into_iter()
        .zip(keep)
        .filter_map(|(p, k)| k.then_some(p))
        .collect();
    info.removed_points = n - kept.len();

    debug!("[DouglasPeucker] epsilon={}m kept {} of {} points", epsilon, kept.len(), n);
    Ok((kept, info))
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
            .map(|(i, (lat, lon))| AnnotatedPoint::new(GeoPoint::new(i, *lat, *lon, T0 + i as f64)))
            .collect()
    }

    /// Northbound track with a deterministic east-west wobble of `amplitude_deg`.
    fn wobbly(n: usize, amplitude_deg: f64) -> Vec<(f64, f64)> {
        (0..n)
            .map(|i| (45.0 + i as f64 * 0.0001, 7.0 + (i as f64 * 1.7).sin() * amplitude_deg))
            .collect()
    }

    #[test]
    fn test_straight_line_collapses_to_endpoints() {
        let coords: Vec<(f64, f64)> = (0..50).map(|i| (45.0 + i as f64 * 0.0001, 7.0)).collect();
        let (kept, info) = simplify_trajectory(annotated(&coords), 1.0, &CancelToken::new()).unwrap();
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].index(), 0);
        assert_eq!(kept[1].index(), 49);
        assert_eq!(info.removed_points, 48);
        assert!(info.is_consistent());
    }

    #[test]
    fn test_large_zigzag_is_kept() {
        // ~40 m wobble against a 1 m tolerance
        let coords = wobbly(30, 0.0005);
        let (kept, _) = simplify_trajectory(annotated(&coords), 1.0, &CancelToken::new()).unwrap();
        assert!(kept.len() > 25);
    }

    #[test]
    fn test_removed_points_within_epsilon() {
        let coords = wobbly(200, 0.00004); // ~3 m wobble
        let epsilon = 2.0;
        let keep = douglas_peucker_mask(&coords, epsilon, &CancelToken::new()).unwrap();
        let kept: Vec<usize> = (0..coords.len()).filter(|&i| keep[i]).collect();
        assert!(kept.len() < coords.len());

        for w in kept.windows(2) {
            let (a, b) = (coords[w[0]], coords[w[1]]);
            for &p in &coords[w[0] + 1..w[1]] {
                assert!(cross_track_distance(p, a, b) <= epsilon);
            }
        }
    }

    #[test]
    fn test_keeps_exactly_the_corners() {
        // Five straight legs of 20 fixes; only the turns carry shape
        let corners = [(45.0, 7.0), (45.002, 7.0013), (45.004, 7.0), (45.006, 7.0013), (45.008, 7.0), (45.0085, 7.004)];
        let mut coords: Vec<(f64, f64)> = corners
            .windows(2)
            .flat_map(|w| {
                let (a, b) = (w[0], w[1]);
                (0..20).map(move |j| {
                    let t = j as f64 / 20.0;
                    (a.0 + (b.0 - a.0) * t, a.1 + (b.1 - a.1) * t)
                })
            })
            .collect();
        coords.push(corners[5]);

        let keep = douglas_peucker_mask(&coords, 2.0, &CancelToken::new()).unwrap();
        let kept: Vec<usize> = (0..coords.len()).filter(|&i| keep[i]).collect();
        assert_eq!(kept, vec![0, 20, 40, 60, 80, 100]);

        // Dropping any kept corner pushes its own fix past epsilon
        for w in kept.windows(3) {
            let (a, b) = (coords[w[0]], coords[w[2]]);
            assert!(cross_track_distance(coords[w[1]], a, b) > 2.0);
        }
    }

    #[test]
    fn test_zero_epsilon_keeps_everything() {
        let coords: Vec<(f64, f64)> = (0..10).map(|i| (45.0 + i as f64 * 0.0001, 7.0)).collect();
        let (kept, info) = simplify_trajectory(annotated(&coords), 0.0, &CancelToken::new()).unwrap();
        assert_eq!(kept.len(), 10);
        assert_eq!(info.removed_points, 0);
    }

    #[test]
    fn test_short_input_untouched() {
        let coords = [(45.0, 7.0), (45.0001, 7.0)];
        let (kept, _) = simplify_trajectory(annotated(&coords), 5.0, &CancelToken::new()).unwrap();
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn test_cancelled_simplification() {
        let token = CancelToken::new();
        token.cancel();
        let coords = wobbly(20, 0.0001);
        assert_eq!(douglas_peucker_mask(&coords, 1.0, &token).unwrap_err(), DiagnoseError::Cancelled);
    }
}
