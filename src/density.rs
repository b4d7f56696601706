//! Local point-density profile.
//!
//! Each fix gets a normalized density: the number of spatial neighbours
//! within a radius divided by the number a uniformly sampled track would
//! have there. Neighbours come from an R-tree over locally projected meters
//! plus sequence position, so a query only visits fixes that are close both
//! in space and along the track, and a parked receiver costs no more than a
//! moving one. A fix whose density leaves the rolling robust band
//! (median ± σ·1.4826·MAD) of its neighbours is a density anomaly. Exact
//! duplicates (no elapsed time, no movement) are always flagged.

use rstar::{RTree, RTreeObject, AABB};

use crate::cancel::CancelToken;
use crate::config::Tuning;
use crate::error::DiagnoseError;
use crate::geo_utils::{haversine_distance, LocalFrame};
use crate::kinematics::STATIONARY_EPSILON_M;
use crate::robust::{median, robust_center_scale};
use crate::GeoPoint;

/// Fewer fixes than this give no meaningful rolling band.
pub const MIN_DENSITY_POINTS: usize = 20;

/// Minimum absolute departure from the rolling median before a fix is flagged.
pub const MIN_DENSITY_DEVIATION: f64 = 0.5;

const MIN_RADIUS_M: f64 = 1.0;
const MAX_RADIUS_M: f64 = 200.0;
const RADIUS_STEPS: f64 = 2.5;
const MIN_BAND_SCALE: f64 = 0.1;

// =============================================================================
// R-tree Indexed Point
// =============================================================================

/// A projected fix with its position in the sequence
#[derive(Debug, Clone, Copy)]
struct IndexedPoint {
    pos: usize,
    x: f64,
    y: f64,
}

impl IndexedPoint {
    fn distance_2(&self, other: &IndexedPoint) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }
}

impl RTreeObject for IndexedPoint {
    /// (east, north, position): the third axis bounds queries to a stretch of the sequence
    type Envelope = AABB<[f64; 3]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point([self.x, self.y, self.pos as f64])
    }
}

// =============================================================================
// Density Profile
// =============================================================================

/// Per-fix density values and flags.
#[derive(Debug, Clone, PartialEq)]
pub struct DensityProfile {
    /// Normalized density per position (1.0 = uniform sampling)
    pub values: Vec<f64>,
    /// `Some(ratio)` for flagged positions; ratio is |deviation| / band width
    pub flags: Vec<Option<f64>>,
    /// Neighbour search radius actually used (meters)
    pub radius_m: f64,
}

/// Compute the density profile of a track.
///
/// `segments[i]` is the id of the gap-free run position `i` belongs to;
/// neighbours are only counted within the same run so gap boundaries do
/// not look sparse.
pub fn density_profile(
    points: &[GeoPoint],
    segments: &[usize],
    tuning: &Tuning,
    cancel: &CancelToken,
) -> Result<DensityProfile, DiagnoseError> {
    let n = points.len();
    let mut flags: Vec<Option<f64>> = vec![None; n];

    for i in 1..n {
        let (a, b) = (&points[i - 1], &points[i]);
        if b.timestamp == a.timestamp && haversine_distance(a, b) < STATIONARY_EPSILON_M {
            flags[i] = Some(1.0);
        }
    }

    if n < MIN_DENSITY_POINTS {
        return Ok(DensityProfile {
            values: vec![1.0; n],
            flags,
            radius_m: 0.0,
        });
    }

    let frame = LocalFrame::for_points(points);
    let projected: Vec<IndexedPoint> = points
        .iter()
        .enumerate()
        .map(|(pos, p)| {
            let (x, y) = frame.project(p.lat, p.lon);
            IndexedPoint { pos, x, y }
        })
        .collect();

    let steps: Vec<f64> = projected
        .windows(2)
        .map(|w| ((w[1].x - w[0].x).powi(2) + (w[1].y - w[0].y).powi(2)).sqrt())
        .filter(|d| *d > 0.0)
        .collect();
    let median_step = median(&steps).unwrap_or(0.0);
    let half_window = tuning.density_half_window.max(1);

    let radius = (median_step * RADIUS_STEPS).clamp(MIN_RADIUS_M, MAX_RADIUS_M);
    let k = if median_step > 0.0 {
        ((radius / median_step).floor() as usize).clamp(1, half_window)
    } else {
        half_window
    };

    let reach = (2 * half_window) as f64;
    let tree = RTree::bulk_load(projected.clone());
    let count_at = |i: usize| -> Result<f64, DiagnoseError> {
        cancel.check_every(i)?;
        let here = projected[i];
        let query = AABB::from_corners(
            [here.x - radius, here.y - radius, i as f64 - reach],
            [here.x + radius, here.y + radius, i as f64 + reach],
        );
        let found = tree
            .locate_in_envelope(&query)
            .filter(|q| q.pos != i && segments[q.pos] == segments[i] && q.distance_2(&here) <= radius * radius)
            .count();
        let expected = expected_neighbours(i, k, segments);
        Ok(if expected == 0 {
            1.0
        } else {
            found as f64 / expected as f64
        })
    };

    #[cfg(feature = "parallel")]
    let values: Vec<f64> = {
        use rayon::prelude::*;
        (0..n).into_par_iter().map(count_at).collect::<Result<_, _>>()?
    };

    #[cfg(not(feature = "parallel"))]
    let values: Vec<f64> = (0..n).map(count_at).collect::<Result<_, _>>()?;

    let mut window = Vec::with_capacity(2 * half_window);
    for i in 0..n {
        cancel.check_every(i)?;
        if flags[i].is_some() {
            continue;
        }
        window.clear();
        let lo = i.saturating_sub(half_window);
        let hi = (i + half_window).min(n - 1);
        window.extend((lo..=hi).filter(|&j| j != i).map(|j| values[j]));

        let Some((center, scale)) = robust_center_scale(&window, MIN_BAND_SCALE) else {
            continue;
        };
        let deviation = (values[i] - center).abs();
        let band = tuning.density_sigma * scale;
        if deviation > band && deviation >= MIN_DENSITY_DEVIATION {
            flags[i] = Some(deviation / band.max(MIN_DENSITY_DEVIATION));
        }
    }

    Ok(DensityProfile {
        values,
        flags,
        radius_m: radius,
    })
}

/// Neighbours a uniformly sampled run would place within `k` steps of `i`.
fn expected_neighbours(i: usize, k: usize, segments: &[usize]) -> usize {
    let n = segments.len();
    let before = (i.saturating_sub(k)..i).filter(|&j| segments[j] == segments[i]).count();
    let after = (i + 1..(i + k + 1).min(n)).filter(|&j| segments[j] == segments[i]).count();
    before + after
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: f64 = 1_705_318_200.0;

    fn straight(n: usize) -> Vec<GeoPoint> {
        (0..n)
            .map(|i| GeoPoint::new(i, 22.5 + i as f64 * 0.0001, 113.9, T0 + i as f64))
            .collect()
    }

    #[test]
    fn test_uniform_track_has_no_flags() {
        let pts = straight(40);
        let profile = density_profile(&pts, &vec![0; 40], &Tuning::default(), &CancelToken::new()).unwrap();
        assert!(profile.flags.iter().all(|f| f.is_none()));
        assert!(profile.values.iter().all(|v| (v - 1.0).abs() < 1e-9));
        assert!(profile.radius_m > 20.0 && profile.radius_m < 35.0);
    }

    #[test]
    fn test_duplicates_flagged_even_on_short_tracks() {
        let mut pts = straight(5);
        pts[3].lat = pts[2].lat;
        pts[3].timestamp = pts[2].timestamp;
        let profile = density_profile(&pts, &vec![0; 5], &Tuning::default(), &CancelToken::new()).unwrap();
        assert!(profile.flags[3].is_some());
        assert_eq!(profile.flags.iter().filter(|f| f.is_some()).count(), 1);
    }

    #[test]
    fn test_short_stop_is_flagged() {
        // Receiver stops for three fixes, then motion resumes
        let mut pts = straight(40);
        let stop = pts[20].lat;
        for i in 20..23 {
            pts[i].lat = stop + (i - 20) as f64 * 1e-7;
        }
        for i in 23..40 {
            pts[i].lat = stop + (i - 22) as f64 * 0.0001;
        }
        let profile = density_profile(&pts, &vec![0; 40], &Tuning::default(), &CancelToken::new()).unwrap();
        assert!(profile.flags[21].is_some());
        assert!(profile.flags[..10].iter().all(|f| f.is_none()));
        assert!(profile.flags[30..].iter().all(|f| f.is_none()));
    }

    #[test]
    fn test_gap_boundaries_not_flagged() {
        let pts = straight(40);
        let segments: Vec<usize> = (0..40).map(|i| usize::from(i >= 20)).collect();
        let profile = density_profile(&pts, &segments, &Tuning::default(), &CancelToken::new()).unwrap();
        assert!(profile.flags.iter().all(|f| f.is_none()));
    }

    #[test]
    fn test_parked_receiver_stays_linear() {
        // 20k fixes within a millimetre of one spot
        let n = 20_000;
        let pts: Vec<GeoPoint> = (0..n)
            .map(|i| GeoPoint::new(i, 22.5 + (i % 7) as f64 * 1e-8, 113.9, T0 + i as f64))
            .collect();
        let start = std::time::Instant::now();
        let profile = density_profile(&pts, &vec![0; n], &Tuning::default(), &CancelToken::new()).unwrap();
        assert!(start.elapsed() < std::time::Duration::from_secs(20), "took {:?}", start.elapsed());
        assert_eq!(profile.radius_m, MIN_RADIUS_M);
        // Every fix sees exactly its ±20 sequence neighbours
        assert!(profile.values[100..n - 100].iter().all(|v| (v - 2.0).abs() < 1e-9));
    }

    #[test]
    fn test_cancelled_density() {
        let token = CancelToken::new();
        token.cancel();
        let result = density_profile(&straight(40), &vec![0; 40], &Tuning::default(), &token);
        assert_eq!(result.unwrap_err(), DiagnoseError::Cancelled);
    }

    #[test]
    fn test_expected_neighbours_respects_segments() {
        let segments = [0, 0, 0, 1, 1, 1];
        assert_eq!(expected_neighbours(2, 3, &segments), 2);
        assert_eq!(expected_neighbours(3, 3, &segments), 2);
        assert_eq!(expected_neighbours(1, 1, &segments), 2);
    }
}
