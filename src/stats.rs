//! Aggregate trajectory statistics.

use crate::geo_utils::{haversine_distance, polyline_length};
use crate::kinematics::segment_speed;
use crate::{Bounds, ElevationStats, GeoPoint, TrajectoryStats};

const MPS_TO_KMH: f64 = 3.6;

/// Compute statistics for a sequence of fixes (never mutates it).
///
/// Speeds are computed from the geometry, not from reported speeds:
/// `avg_speed` is total distance over total duration and `max_speed` the
/// fastest consecutive pair with positive elapsed time, both in km/h.
///
/// # Example
///
/// ```rust
/// use trajectory_doctor::{compute_stats, GeoPoint};
///
/// let track = vec![
///     GeoPoint::new(0, 0.0, 0.0, 1_705_318_200.0).with_elevation(10.0),
///     GeoPoint::new(1, 0.0, 0.001, 1_705_318_210.0).with_elevation(15.0),
///     GeoPoint::new(2, 0.0, 0.002, 1_705_318_220.0).with_elevation(12.0),
/// ];
/// let stats = compute_stats(&track);
/// assert_eq!(stats.point_count, 3);
/// assert!((stats.distance - 222.4).abs() < 0.5);
/// assert!((stats.avg_speed - 40.0).abs() < 0.2);
/// let elevation = stats.elevation.unwrap();
/// assert_eq!((elevation.gain, elevation.loss), (5.0, 3.0));
/// ```
pub fn compute_stats(points: &[GeoPoint]) -> TrajectoryStats {
    let distance = polyline_length(points);
    let duration_seconds = match (points.first(), points.last()) {
        (Some(a), Some(b)) => (b.timestamp - a.timestamp).max(0.0),
        _ => 0.0,
    };

    let avg_speed = if duration_seconds > 0.0 {
        distance / duration_seconds * MPS_TO_KMH
    } else {
        0.0
    };

    let max_speed = points
        .windows(2)
        .filter(|w| w[1].timestamp > w[0].timestamp)
        .filter_map(|w| segment_speed(&w[0], &w[1]))
        .fold(0.0_f64, f64::max)
        * MPS_TO_KMH;

    TrajectoryStats {
        point_count: points.len(),
        distance,
        duration_seconds,
        bounds: Bounds::from_points(points).unwrap_or_default(),
        avg_speed,
        max_speed,
        elevation: elevation_stats(points),
    }
}

/// Elevation min/max/mean and cumulative gain/loss over fixes that carry one.
pub fn elevation_stats(points: &[GeoPoint]) -> Option<ElevationStats> {
    let elevations: Vec<f64> = points.iter().filter_map(|p| p.elevation).collect();
    let first = *elevations.first()?;

    let mut stats = ElevationStats {
        min: first,
        max: first,
        avg: elevations.iter().sum::<f64>() / elevations.len() as f64,
        gain: 0.0,
        loss: 0.0,
    };
    for e in &elevations {
        stats.min = stats.min.min(*e);
        stats.max = stats.max.max(*e);
    }
    for w in elevations.windows(2) {
        let delta = w[1] - w[0];
        if delta > 0.0 {
            stats.gain += delta;
        } else {
            stats.loss -= delta;
        }
    }
    Some(stats)
}

/// Mean distance in meters between each fix's original and corrected position.
pub fn mean_correction_distance<'a>(pairs: impl IntoIterator<Item = (&'a GeoPoint, &'a GeoPoint)>) -> f64 {
    let (sum, count) = pairs
        .into_iter()
        .fold((0.0, 0usize), |(sum, count), (a, b)| (sum + haversine_distance(a, b), count + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}
